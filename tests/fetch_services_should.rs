use std::io::Write;

use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use playlist_proxy::server::services::fetch_services::{
    ContentFetcher, DEFAULT_USER_AGENT, FetchMode,
};
use playlist_proxy::server::utils::header_codec::HeaderSet;
use reqwest::header;

const MANIFEST: &[u8] = b"#EXTM3U\n#EXTINF:6.0,\nseg1.ts\n";

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn raw_deflate(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn header_value(map: &header::HeaderMap, name: header::HeaderName) -> Option<&str> {
    map.get(name).and_then(|v| v.to_str().ok())
}

#[test]
fn test_gzip_bodies_are_decompressed() {
    let body = ContentFetcher::decompress(Some("gzip"), &gzip(MANIFEST)).unwrap();
    assert_eq!(body, MANIFEST);

    let body = ContentFetcher::decompress(Some(" GZIP "), &gzip(MANIFEST)).unwrap();
    assert_eq!(body, MANIFEST);
}

#[test]
fn test_deflate_bodies_are_decompressed_wrapped_or_raw() {
    let wrapped = ContentFetcher::decompress(Some("deflate"), &zlib(MANIFEST)).unwrap();
    assert_eq!(wrapped, MANIFEST);

    let raw = ContentFetcher::decompress(Some("deflate"), &raw_deflate(MANIFEST)).unwrap();
    assert_eq!(raw, MANIFEST);
}

#[test]
fn test_other_encodings_pass_through() {
    assert_eq!(ContentFetcher::decompress(None, MANIFEST).unwrap(), MANIFEST);
    assert_eq!(ContentFetcher::decompress(Some("br"), MANIFEST).unwrap(), MANIFEST);
}

#[test]
fn test_empty_body_stays_empty_whatever_the_encoding() {
    assert!(ContentFetcher::decompress(Some("gzip"), &[]).unwrap().is_empty());
    assert!(ContentFetcher::decompress(Some("deflate"), &[]).unwrap().is_empty());
}

#[test]
fn test_broken_gzip_body_is_an_error() {
    assert!(ContentFetcher::decompress(Some("gzip"), b"definitely not gzip").is_err());
}

#[test]
fn test_default_user_agent_unless_the_caller_sent_one() {
    let map = ContentFetcher::request_headers(&HeaderSet::new(), FetchMode::Text);
    assert_eq!(header_value(&map, header::USER_AGENT), Some(DEFAULT_USER_AGENT));

    let caller: HeaderSet = [("user-agent", "VLC/3.0.20"), ("Referer", "http://a.com")]
        .into_iter()
        .collect();
    let map = ContentFetcher::request_headers(&caller, FetchMode::Text);
    assert_eq!(header_value(&map, header::USER_AGENT), Some("VLC/3.0.20"));
    assert_eq!(header_value(&map, header::REFERER), Some("http://a.com"));
}

#[test]
fn test_accept_headers_follow_the_mode() {
    let text = ContentFetcher::request_headers(&HeaderSet::new(), FetchMode::Text);
    assert_eq!(
        header_value(&text, header::ACCEPT),
        Some("text/plain;charset=UTF-8, */*")
    );

    let binary = ContentFetcher::request_headers(&HeaderSet::new(), FetchMode::Binary);
    assert_eq!(header_value(&binary, header::ACCEPT), Some("*/*"));

    // a caller can't talk us into an encoding flate2 can't undo
    let caller: HeaderSet = [("Accept-Encoding", "br")].into_iter().collect();
    let map = ContentFetcher::request_headers(&caller, FetchMode::Binary);
    assert_eq!(
        header_value(&map, header::ACCEPT_ENCODING),
        Some("gzip, deflate")
    );
}
