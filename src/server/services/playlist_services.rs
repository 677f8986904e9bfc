use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::{
    epg_services::encode_epg_sources,
    fetch_services::{DynContentFetcher, FetchMode},
};
use crate::server::utils::{
    header_codec::HeaderSet,
    manifest_utils::{Playlist, PlaylistRewriter},
};

const PLAYLIST_HEADER: &str = "#EXTM3U";

pub type DynPlaylistService = Arc<dyn PlaylistServiceTrait + Send + Sync>;

/// everything `/playlist` needs, already pulled out of the query string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistRequest {
    pub sources: Vec<String>,
    /// header token applied to stream urls that don't bring their own
    pub token: Option<String>,
    pub epg_merging: bool,
    pub excluded_groups: Vec<String>,
    pub proxy_origin: String,
}

impl PlaylistRequest {
    pub fn new(
        url_csv: &str,
        token: Option<&str>,
        epg_merging: bool,
        exclude_csv: Option<&str>,
        proxy_origin: &str,
    ) -> Self {
        Self {
            sources: split_csv(url_csv),
            token: token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            epg_merging,
            excluded_groups: exclude_csv.map(parse_excluded_groups).unwrap_or_default(),
            proxy_origin: proxy_origin.to_string(),
        }
    }
}

fn split_csv(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// each group title is percent-encoded on its own before the list is joined
pub fn parse_excluded_groups(exclude_csv: &str) -> Vec<String> {
    exclude_csv
        .split(',')
        .filter(|item| !item.is_empty())
        .map(|item| match urlencoding::decode(item) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => item.to_string(),
        })
        .collect()
}

/// `#EXTM3U` line for the combined playlist, from the distinct epg urls of its sources
pub fn playlist_header(epg_urls: &[String], epg_merging: bool, proxy_origin: &str) -> String {
    match epg_urls {
        [] => PLAYLIST_HEADER.to_string(),
        [single] => format!(r#"{} url-tvg="{}""#, PLAYLIST_HEADER, single),
        many if epg_merging => format!(
            r#"{} url-tvg="{}/Epg?data={}""#,
            PLAYLIST_HEADER,
            proxy_origin.trim_end_matches('/'),
            urlencoding::encode(&encode_epg_sources(many))
        ),
        // several guides and no merging, a player can only take one so it gets none
        _ => PLAYLIST_HEADER.to_string(),
    }
}

#[async_trait::async_trait]
pub trait PlaylistServiceTrait {
    /// fetch every source, rewrite it and stitch the results under one header. Sources that
    /// fail are skipped, so the worst case is a bare header
    async fn aggregate(&self, request: &PlaylistRequest) -> String;
}

pub struct PlaylistService {
    fetcher: DynContentFetcher,
}

impl PlaylistService {
    pub fn new(fetcher: DynContentFetcher) -> Self {
        Self { fetcher }
    }

    async fn fetch_source(&self, url: &str) -> Option<String> {
        info!("Fetching playlist URL: {}", url);
        match self.fetcher.fetch(url, &HeaderSet::new(), FetchMode::Text).await {
            Ok(content) if content.is_ok() => Some(content.text()),
            Ok(content) => {
                warn!("Failed to fetch: {}, status: {}", url, content.status);
                None
            }
            Err(e) => {
                warn!("Failed to fetch: {}, {}", url, e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl PlaylistServiceTrait for PlaylistService {
    async fn aggregate(&self, request: &PlaylistRequest) -> String {
        // join_all keeps source order
        let fetched = join_all(request.sources.iter().map(|url| self.fetch_source(url))).await;

        let mut epg_urls: Vec<String> = Vec::new();
        let mut bodies: Vec<String> = Vec::new();

        for content in fetched.into_iter().flatten() {
            let mut playlist = Playlist::parse(&content);
            if let Some(epg_url) = playlist.epg_url.take() {
                if !epg_urls.contains(&epg_url) {
                    epg_urls.push(epg_url);
                }
            }

            playlist.exclude_groups(&request.excluded_groups);

            let mut rewriter =
                PlaylistRewriter::new(&request.proxy_origin, request.token.as_deref());
            let rewritten = rewriter.rewrite(&playlist.body);
            debug!(
                "Playlist rewritten, {} channels, {} lines",
                rewriter.channel_count(),
                rewritten.lines().count()
            );

            let rewritten = rewritten.trim();
            if !rewritten.is_empty() {
                bodies.push(rewritten.to_string());
            }
        }

        let header = playlist_header(&epg_urls, request.epg_merging, &request.proxy_origin);
        let combined = if bodies.is_empty() {
            header
        } else {
            format!("{}\n{}", header, bodies.join("\n"))
        };

        info!(
            "Combined {} of {} playlists, {} bytes",
            bodies.len(),
            request.sources.len(),
            combined.len()
        );
        combined
    }
}
