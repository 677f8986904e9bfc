use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use playlist_proxy::server::error::Error;
use playlist_proxy::server::services::ProxyServices;
use playlist_proxy::server::services::fetch_services::{
    FetchMode, FetchedContent, MockContentFetcherTrait,
};
use playlist_proxy::server::services::session_services::MockSessionClientTrait;
use playlist_proxy::server::utils::header_codec::{HeaderSet, encode_token};
use playlist_proxy::{AppConfig, DynKeyValueStore, MemoryStore, ProxyApplicationServer};
use reqwest::header::HeaderMap;
use tower::ServiceExt;

fn fetched(status: u16, url: &str, body: &[u8]) -> FetchedContent {
    FetchedContent {
        status,
        final_url: url.to_string(),
        headers: HeaderMap::new(),
        body: body.to_vec(),
    }
}

fn app(fetcher: MockContentFetcherTrait, sessions: MockSessionClientTrait) -> axum::Router {
    let config = AppConfig {
        public_origin: Some("https://proxy.local".to_string()),
        ..AppConfig::default()
    };
    let services = ProxyServices::with_parts(
        Arc::new(MemoryStore::new()) as DynKeyValueStore,
        Arc::new(config),
        Arc::new(fetcher),
        Arc::new(sessions),
    );
    ProxyApplicationServer::router(services)
}

async fn get(app: axum::Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn content_type(response: &Response) -> &str {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[tokio::test]
async fn test_bare_root_serves_the_help_page() {
    let response = get(app(MockContentFetcherTrait::new(), MockSessionClientTrait::new()), "/").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).starts_with("text/html"));
    assert!(body_text(response).await.contains("Playlist Proxy"));
}

#[tokio::test]
async fn test_missing_parameters_are_bad_requests() {
    let cases = [
        ("/?foo=bar", "Bad Request"),
        ("/playlist", "URL parameter missing"),
        ("/Epg", "Data parameter missing"),
    ];

    for (uri, message) in cases {
        let response = get(
            app(MockContentFetcherTrait::new(), MockSessionClientTrait::new()),
            uri,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_text(response).await, message);
    }

    let response = get(
        app(MockContentFetcherTrait::new(), MockSessionClientTrait::new()),
        "/fetch",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "Missing URL parameter");
}

#[tokio::test]
async fn test_options_gets_no_content_with_cors_headers() {
    let response = app(MockContentFetcherTrait::new(), MockSessionClientTrait::new())
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_manifest_is_rewritten_with_the_caller_token() {
    let token = encode_token(&[("Referer", "http://a.com")].into_iter().collect::<HeaderSet>());

    let mut fetcher = MockContentFetcherTrait::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|url, headers, mode| {
            assert_eq!(url, "http://a.com/live/index.m3u8");
            assert_eq!(headers.get("Referer"), Some("http://a.com"));
            assert_eq!(mode, FetchMode::Text);
            Ok(fetched(200, url, b"#EXTM3U\n#EXTINF:6.0,\nseg1.ts"))
        });

    let uri = format!(
        "/?url=http%3A%2F%2Fa.com%2Flive%2Findex.m3u8&data={}",
        urlencoding::encode(&token)
    );
    let response = get(app(fetcher, MockSessionClientTrait::new()), &uri).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "application/vnd.apple.mpegurl");
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-cache")
    );

    let body = body_text(response).await;
    assert_eq!(
        body.lines().last(),
        Some(
            format!(
                "https://proxy.local?url2=https%3A%2F%2Fa.com%2Flive%2Fseg1.ts&data={}&type=/index.ts",
                urlencoding::encode(&token)
            )
            .as_str()
        )
    );
}

#[tokio::test]
async fn test_segments_pass_through_as_bytes() {
    let mut fetcher = MockContentFetcherTrait::new();
    fetcher.expect_fetch().times(1).returning(|url, _, mode| {
        assert_eq!(mode, FetchMode::Binary);
        Ok(fetched(200, url, &[0x47, 0x00, 0xff]))
    });

    let response = get(
        app(fetcher, MockSessionClientTrait::new()),
        "/?url2=https%3A%2F%2Fa.com%2Fseg1.ts",
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok()),
        Some("3")
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), &[0x47, 0x00, 0xff]);
}

#[tokio::test]
async fn test_upstream_error_status_is_passed_back() {
    let mut fetcher = MockContentFetcherTrait::new();
    fetcher
        .expect_fetch()
        .returning(|url, _, _| Ok(fetched(404, url, b"missing")));

    let response = get(
        app(fetcher, MockSessionClientTrait::new()),
        "/?url=http%3A%2F%2Fa.com%2Fmissing.m3u8",
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "Error: 404");
}

#[tokio::test]
async fn test_network_failure_is_a_generic_500() {
    let mut fetcher = MockContentFetcherTrait::new();
    fetcher.expect_fetch().returning(|url, _, _| {
        Err(Error::UpstreamFetch {
            url: url.to_string(),
            reason: "Request timed out".to_string(),
        })
    });

    let response = get(
        app(fetcher, MockSessionClientTrait::new()),
        "/?url=http%3A%2F%2Fa.com%2Fslow.m3u8",
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Internal Server Error");
}

#[tokio::test]
async fn test_key_requests_use_key_headers_with_caller_overrides() {
    let token = encode_token(&[("Referer", "http://mine.com/")].into_iter().collect::<HeaderSet>());

    let mut fetcher = MockContentFetcherTrait::new();
    fetcher.expect_fetch().times(1).returning(|url, headers, mode| {
        assert_eq!(mode, FetchMode::Binary);
        assert_eq!(headers.get("Referer"), Some("http://mine.com/"));
        assert_eq!(headers.get("Origin"), Some("https://cookiedwebplay.xyz"));
        Ok(fetched(200, url, &[1u8; 16]))
    });

    let uri = format!(
        "/?url=https%3A%2F%2Fkeys.example%2Fk.bin&data={}&key=true",
        urlencoding::encode(&token)
    );
    let response = get(app(fetcher, MockSessionClientTrait::new()), &uri).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "application/octet-stream");
}

#[tokio::test]
async fn test_failed_key_fetch_is_reported() {
    let mut fetcher = MockContentFetcherTrait::new();
    fetcher
        .expect_fetch()
        .returning(|url, _, _| Ok(fetched(403, url, b"")));

    let response = get(
        app(fetcher, MockSessionClientTrait::new()),
        "/?url=https%3A%2F%2Fkeys.example%2Fk.bin&key=true",
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.starts_with("Error fetching key:"));
}

#[tokio::test]
async fn test_unstamped_session_upstream_is_redirected() {
    let mut fetcher = MockContentFetcherTrait::new();
    fetcher.expect_fetch().times(0);

    let mut sessions = MockSessionClientTrait::new();
    sessions
        .expect_init_session()
        .times(1)
        .returning(|path| {
            assert_eq!(path, "s/stream/abc/playlist.m3u8");
            Ok("tok".to_string())
        });

    let response = get(
        app(fetcher, sessions),
        "/?url=https%3A%2F%2Frr.vipstreams.in%2Fs%2Fstream%2Fabc%2Fplaylist.m3u8",
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert_eq!(
        location,
        format!(
            "https://proxy.local?url={}&su=1&suToken=tok&type=/index.m3u8",
            urlencoding::encode("https://rr.vipstreams.in/s/stream/abc/playlist.m3u8?id=tok")
        )
    );
}

#[tokio::test]
async fn test_session_negotiation_failure_fails_the_request() {
    let mut sessions = MockSessionClientTrait::new();
    sessions.expect_init_session().returning(|_| {
        Err(Error::SessionNegotiation(
            "Failed to fetch session data: 500".to_string(),
        ))
    });

    let response = get(
        app(MockContentFetcherTrait::new(), sessions),
        "/?url=https%3A%2F%2Frr.vipstreams.in%2Fs%2Fplaylist.m3u8",
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_stamped_session_request_is_served_while_the_token_is_checked() {
    let (checked_tx, mut checked_rx) = tokio::sync::mpsc::unbounded_channel();

    let mut sessions = MockSessionClientTrait::new();
    sessions.expect_init_session().times(0);
    sessions
        .expect_check_token()
        .times(1)
        .returning(move |token| {
            let _ = checked_tx.send(token.to_string());
            Err(Error::SessionNegotiation(
                "Failed to check token: 502".to_string(),
            ))
        });

    let mut fetcher = MockContentFetcherTrait::new();
    fetcher.expect_fetch().times(1).returning(|url, _, mode| {
        assert_eq!(url, "https://rr.vipstreams.in/s/stream/abc/playlist.m3u8?id=tok");
        assert_eq!(mode, FetchMode::Text);
        Ok(fetched(200, url, b"#EXTM3U\n#EXTINF:4.0,\nseg.ts"))
    });

    let uri = format!(
        "/?url={}&su=1&suToken=tok&type=/index.m3u8",
        urlencoding::encode("https://rr.vipstreams.in/s/stream/abc/playlist.m3u8?id=tok")
    );
    let response = get(app(fetcher, sessions), &uri).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "application/vnd.apple.mpegurl");
    assert!(body_text(response).await.contains("url2="));

    let checked = tokio::time::timeout(Duration::from_secs(1), checked_rx.recv())
        .await
        .expect("liveness check should run in the background");
    assert_eq!(checked.as_deref(), Some("tok"));
}

#[tokio::test]
async fn test_playlist_endpoint_aggregates() {
    let mut fetcher = MockContentFetcherTrait::new();
    fetcher.expect_fetch().returning(|url, _, _| {
        Ok(fetched(
            200,
            url,
            b"#EXTM3U\n#EXTINF:-1,Ch1\nhttp://a.com/ch1.m3u8|Referer=http://a.com",
        ))
    });

    let response = get(
        app(fetcher, MockSessionClientTrait::new()),
        "/playlist?url=http%3A%2F%2Fa.com%2Flist.m3u",
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).starts_with("text/plain"));
    let body = body_text(response).await;
    assert!(body.starts_with("#EXTM3U\n#EXTINF:-1,Ch1\nhttps://proxy.local?url=http%3A%2F%2Fa.com%2Fch1.m3u8&data="));
}
