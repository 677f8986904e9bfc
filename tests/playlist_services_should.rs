use std::sync::Arc;

use playlist_proxy::server::error::Error;
use playlist_proxy::server::services::epg_services::encode_epg_sources;
use playlist_proxy::server::services::fetch_services::{FetchedContent, MockContentFetcherTrait};
use playlist_proxy::server::services::playlist_services::{
    PlaylistRequest, PlaylistService, PlaylistServiceTrait, parse_excluded_groups,
    playlist_header,
};
use reqwest::header::HeaderMap;

const ORIGIN: &str = "https://proxy.local";

fn fetched(status: u16, url: &str, body: &str) -> FetchedContent {
    FetchedContent {
        status,
        final_url: url.to_string(),
        headers: HeaderMap::new(),
        body: body.as_bytes().to_vec(),
    }
}

/// serves `sources` by url, anything else is a network failure
fn fetcher_for(sources: Vec<(&'static str, u16, &'static str)>) -> MockContentFetcherTrait {
    let mut fetcher = MockContentFetcherTrait::new();
    fetcher.expect_fetch().returning(move |url, _, _| {
        match sources.iter().find(|(source, _, _)| *source == url) {
            Some((source, status, body)) => Ok(fetched(*status, source, body)),
            None => Err(Error::UpstreamFetch {
                url: url.to_string(),
                reason: "Request failed: connection refused".to_string(),
            }),
        }
    });
    fetcher
}

fn request(urls: &str, epg_merging: bool) -> PlaylistRequest {
    PlaylistRequest::new(urls, None, epg_merging, None, ORIGIN)
}

const FIRST: &str = "#EXTM3U url-tvg=\"http://epg/one.xml\"\n#EXTINF:-1,One\nhttp://a/1\n";
const SECOND: &str = "#EXTM3U url-tvg=\"http://epg/two.xml\"\n#EXTINF:-1,Two\nhttp://b/2\n";

#[tokio::test]
async fn test_sources_are_concatenated_in_order_under_one_header() {
    let fetcher = fetcher_for(vec![("http://p/1", 200, FIRST), ("http://p/2", 200, SECOND)]);
    let service = PlaylistService::new(Arc::new(fetcher));

    let combined = service.aggregate(&request("http://p/2,http://p/1", false)).await;

    assert_eq!(
        combined,
        "#EXTM3U\n#EXTINF:-1,Two\nhttp://b/2\n#EXTINF:-1,One\nhttp://a/1"
    );
    assert_eq!(combined.matches("#EXTM3U").count(), 1);
}

#[tokio::test]
async fn test_several_guides_are_merged_behind_the_epg_endpoint() {
    let fetcher = fetcher_for(vec![("http://p/1", 200, FIRST), ("http://p/2", 200, SECOND)]);
    let service = PlaylistService::new(Arc::new(fetcher));

    let combined = service.aggregate(&request("http://p/1,http://p/2", true)).await;

    let data = encode_epg_sources(&["http://epg/one.xml".to_string(), "http://epg/two.xml".to_string()]);
    let expected_header = format!(
        "#EXTM3U url-tvg=\"https://proxy.local/Epg?data={}\"",
        urlencoding::encode(&data)
    );
    assert_eq!(combined.lines().next(), Some(expected_header.as_str()));
}

#[tokio::test]
async fn test_a_single_guide_passes_through() {
    let same_guide = "#EXTM3U url-tvg=\"http://epg/one.xml\"\n#EXTINF:-1,Again\nhttp://c/3";
    let fetcher = fetcher_for(vec![("http://p/1", 200, FIRST), ("http://p/3", 200, same_guide)]);
    let service = PlaylistService::new(Arc::new(fetcher));

    let combined = service.aggregate(&request("http://p/1,http://p/3", true)).await;

    assert!(combined.starts_with("#EXTM3U url-tvg=\"http://epg/one.xml\"\n"));
}

#[tokio::test]
async fn test_failed_sources_are_skipped() {
    let fetcher = fetcher_for(vec![("http://p/1", 200, FIRST), ("http://p/404", 404, "nope")]);
    let service = PlaylistService::new(Arc::new(fetcher));

    let combined = service
        .aggregate(&request("http://p/404,http://p/down,http://p/1", false))
        .await;

    assert_eq!(
        combined,
        "#EXTM3U url-tvg=\"http://epg/one.xml\"\n#EXTINF:-1,One\nhttp://a/1"
    );
}

#[tokio::test]
async fn test_nothing_fetched_is_still_a_playlist() {
    let fetcher = fetcher_for(vec![]);
    let service = PlaylistService::new(Arc::new(fetcher));

    let combined = service.aggregate(&request("http://p/down", true)).await;

    assert_eq!(combined, "#EXTM3U");
}

#[tokio::test]
async fn test_external_token_and_exclusions_are_applied() {
    let source = "#EXTM3U\n#EXTINF:-1 group-title=\"Sports\",S\nhttp://a/s\n#EXTINF:-1 group-title=\"Kids TV\",K\nhttp://a/k";
    let fetcher = fetcher_for(vec![("http://p/1", 200, source)]);
    let service = PlaylistService::new(Arc::new(fetcher));

    let request = PlaylistRequest::new("http://p/1", Some("dG9r"), false, Some("Kids%20TV"), ORIGIN);
    let combined = service.aggregate(&request).await;

    assert_eq!(
        combined,
        "#EXTM3U\n#EXTINF:-1 group-title=\"Sports\",S\nhttps://proxy.local?url=http%3A%2F%2Fa%2Fs&data=dG9r&type=/index.m3u8"
    );
}

#[test]
fn test_excluded_groups_are_decoded_one_by_one() {
    assert_eq!(
        parse_excluded_groups("Sports,Kids%20TV,News%2C%20Weather"),
        vec!["Sports", "Kids TV", "News, Weather"]
    );
}

#[test]
fn test_header_without_merging_drops_several_guides() {
    let guides = vec!["http://epg/one.xml".to_string(), "http://epg/two.xml".to_string()];

    assert_eq!(playlist_header(&guides, false, ORIGIN), "#EXTM3U");
    assert_eq!(playlist_header(&[], true, ORIGIN), "#EXTM3U");
}
