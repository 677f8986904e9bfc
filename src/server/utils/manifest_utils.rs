// m3u / hls text handling. Two rewriters live here:
//
// - ManifestRewriter handles hls manifests fetched through the generic endpoint. It classifies
//   every line and points sub-manifests, segments and keys back at the proxy
// - PlaylistRewriter handles the top level iptv playlists going through /playlist. It only cares
//   about stream urls and the headers that belong to them
//
// neither is allowed to fail a request, on error the input goes back out untouched
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error};
use url::Url;

use super::header_codec::{self, HeaderSet, resolve_stream_headers};

static URI_ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)URI="([^"]+)""#).expect("valid uri regex"));

static GROUP_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"group-title="([^"]*)""#).expect("valid group-title regex"));

static EPG_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:url-tvg|x-tvg-url)="([^"]*)""#).expect("valid url-tvg regex")
});

const STREAM_INF: &str = "#EXT-X-STREAM-INF";
const KEY_TAG: &str = "#EXT-X-KEY";
const PLAYLIST_HEADER: &str = "#EXTM3U";
const MASTER_TYPE: &str = "&type=/index.m3u8";
const SEGMENT_TYPE: &str = "&type=/index.ts";

#[derive(thiserror::Error, Debug)]
pub enum RewriteError {
    #[error("invalid manifest url {url}: {reason}")]
    InvalidBase { url: String, reason: String },

    #[error("could not resolve {reference}: {reason}")]
    Unresolvable { reference: String, reason: String },
}

/// one trimmed line of an hls manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine<'a> {
    /// `#` line. `uri` is the byte range of the `URI="..."` value, if there is one
    Directive {
        text: &'a str,
        uri: Option<Range<usize>>,
        is_key: bool,
    },
    /// sub-manifest, fetched as text and rewritten again
    MasterReference(&'a str),
    /// media segment, fetched as bytes
    SegmentReference(&'a str),
    Blank,
}

/// single forward pass, the only state is whether the previous directive was a stream-inf
#[derive(Debug, Default)]
pub struct ManifestClassifier {
    next_is_master: bool,
}

impl ManifestClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify<'a>(&mut self, line: &'a str) -> ManifestLine<'a> {
        let line = line.trim();

        if line.starts_with('#') {
            self.next_is_master = line.contains(STREAM_INF);

            let uri = if line.contains("URI=\"") {
                URI_ATTRIBUTE
                    .captures(line)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.range())
            } else {
                None
            };

            return ManifestLine::Directive {
                text: line,
                uri,
                is_key: line.contains(KEY_TAG),
            };
        }

        if line.is_empty() {
            return ManifestLine::Blank;
        }

        let is_master = self.next_is_master || line.contains(".m3u8");
        self.next_is_master = false;

        if is_master {
            ManifestLine::MasterReference(line)
        } else {
            ManifestLine::SegmentReference(line)
        }
    }
}

pub fn classify_manifest(content: &str) -> Vec<ManifestLine<'_>> {
    let mut classifier = ManifestClassifier::new();
    content.lines().map(|line| classifier.classify(line)).collect()
}

/// `<origin>?<param>=<target>[&data=<token>]`, the token is left off when there isn't one
pub fn proxied_url(proxy_origin: &str, param: &str, target: &str, token: Option<&str>) -> String {
    let mut out = format!(
        "{}?{}={}",
        proxy_origin.trim_end_matches('/'),
        param,
        urlencoding::encode(target)
    );
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        out.push_str("&data=");
        out.push_str(&urlencoding::encode(token));
    }
    out
}

pub struct ManifestRewriter<'a> {
    base: Url,
    proxy_origin: &'a str,
    token: Option<&'a str>,
}

impl<'a> ManifestRewriter<'a> {
    pub fn new(
        manifest_url: &str,
        proxy_origin: &'a str,
        token: Option<&'a str>,
    ) -> Result<Self, RewriteError> {
        let invalid = |reason: String| RewriteError::InvalidBase {
            url: manifest_url.to_string(),
            reason,
        };

        let manifest = Url::parse(manifest_url).map_err(|e| invalid(e.to_string()))?;
        if manifest.cannot_be_a_base() {
            return Err(invalid("url cannot be a base".to_string()));
        }

        // directory of the manifest, not the manifest itself
        let base = manifest.join("./").map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            base,
            proxy_origin,
            token,
        })
    }

    /// absolute urls stay as they are, relative ones are joined onto the manifest directory and
    /// moved to https
    pub fn resolve(&self, reference: &str) -> Result<String, RewriteError> {
        if reference.starts_with("http") {
            return Ok(reference.to_string());
        }

        let resolved = self
            .base
            .join(reference)
            .map_err(|e| RewriteError::Unresolvable {
                reference: reference.to_string(),
                reason: e.to_string(),
            })?
            .to_string();

        Ok(match resolved.strip_prefix("http:") {
            Some(rest) => format!("https:{}", rest),
            None => resolved,
        })
    }

    fn rewrite_line(&self, line: ManifestLine<'_>) -> Result<String, RewriteError> {
        match line {
            ManifestLine::Directive {
                text,
                uri: Some(range),
                is_key,
            } => {
                let target = self.resolve(&text[range.clone()])?;
                let mut rewritten = proxied_url(self.proxy_origin, "url", &target, self.token);
                if is_key {
                    rewritten.push_str("&key=true");
                }
                Ok(format!(
                    "{}{}{}",
                    &text[..range.start],
                    rewritten,
                    &text[range.end..]
                ))
            }
            ManifestLine::Directive { text, uri: None, .. } => Ok(text.to_string()),
            ManifestLine::MasterReference(reference) => {
                let target = self.resolve(reference)?;
                Ok(proxied_url(self.proxy_origin, "url", &target, self.token) + MASTER_TYPE)
            }
            ManifestLine::SegmentReference(reference) => {
                let target = self.resolve(reference)?;
                Ok(proxied_url(self.proxy_origin, "url2", &target, self.token) + SEGMENT_TYPE)
            }
            ManifestLine::Blank => Ok(String::new()),
        }
    }

    /// line for line, so a trailing newline survives. `\r` goes with the per-line trim
    pub fn rewrite(&self, content: &str) -> Result<String, RewriteError> {
        let mut classifier = ManifestClassifier::new();
        let lines = content
            .split('\n')
            .map(|line| self.rewrite_line(classifier.classify(line)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }
}

/// rewrite every uri in an hls manifest to go through the proxy. Never fails, a manifest that
/// can't be rewritten is returned as it came in
pub fn rewrite_manifest(
    content: &str,
    manifest_url: &str,
    proxy_origin: &str,
    token: Option<&str>,
) -> String {
    let result = ManifestRewriter::new(manifest_url, proxy_origin, token)
        .and_then(|rewriter| rewriter.rewrite(content));

    match result {
        Ok(rewritten) => rewritten,
        Err(e) => {
            error!("Manifest rewrite failed, passing through unchanged: {}", e);
            content.to_string()
        }
    }
}

/// rewrites stream urls of a top level playlist so each one carries its header token
pub struct PlaylistRewriter<'a> {
    proxy_origin: &'a str,
    external_token: Option<&'a str>,
    // #EXTVLCOPT headers waiting for the next stream url
    pending_vlc: HeaderSet,
    channel_count: usize,
}

impl<'a> PlaylistRewriter<'a> {
    pub fn new(proxy_origin: &'a str, external_token: Option<&'a str>) -> Self {
        Self {
            proxy_origin,
            external_token,
            pending_vlc: HeaderSet::new(),
            channel_count: 0,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn rewrite_stream_line(&mut self, line: &str) -> String {
        let (stream_url, embedded) = header_codec::split_stream_line(line);
        let resolved = resolve_stream_headers(embedded, &self.pending_vlc, self.external_token);
        // vlc options only ever belong to the url right below them
        self.pending_vlc.clear();

        match resolved.token() {
            Some(token) => {
                proxied_url(self.proxy_origin, "url", stream_url.trim(), Some(&token))
                    + MASTER_TYPE
            }
            None => line.to_string(),
        }
    }

    /// returns `None` for lines that are consumed and not written back out
    fn rewrite_line(&mut self, line: &str) -> Option<String> {
        if line.starts_with("#EXTINF") {
            self.channel_count += 1;
            return Some(line.to_string());
        }

        // kodi inputstream lines are left alone, including urls that mention it
        if line.contains("inputstream.adaptive") {
            return Some(line.to_string());
        }

        if line.starts_with("#EXTVLCOPT:http-") {
            let parsed = header_codec::parse_headers(line);
            self.pending_vlc.extend(&parsed.headers);
            return None;
        }

        if line.starts_with("#EXTVLCOPT") {
            return None;
        }

        if line.starts_with("http") {
            return Some(self.rewrite_stream_line(line));
        }

        Some(line.to_string())
    }

    pub fn rewrite(&mut self, content: &str) -> String {
        let lines: Vec<String> = content
            .lines()
            .filter_map(|line| self.rewrite_line(line))
            .collect();

        debug!(
            "Playlist rewrite processed {} channel entries",
            self.channel_count
        );
        lines.join("\n")
    }
}

pub fn rewrite_playlist_urls(
    content: &str,
    proxy_origin: &str,
    external_token: Option<&str>,
) -> String {
    PlaylistRewriter::new(proxy_origin, external_token).rewrite(content)
}

/// a source playlist with its `#EXTM3U` header taken off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub epg_url: Option<String>,
    pub body: String,
}

impl Playlist {
    /// takes the `#EXTM3U` header off, keeping its `url-tvg` if it has one. Stray header lines
    /// further down (concatenated playlists) go as well
    pub fn parse(content: &str) -> Self {
        let content = content.trim_start_matches('\u{feff}');

        let mut epg_url = None;
        let mut body = Vec::new();
        for line in content.lines() {
            if line.trim_start().starts_with(PLAYLIST_HEADER) {
                if epg_url.is_none() {
                    epg_url = EPG_ATTRIBUTE
                        .captures(line)
                        .and_then(|caps| caps.get(1))
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|url| !url.is_empty());
                }
                continue;
            }
            body.push(line);
        }

        Self {
            epg_url,
            body: body.join("\n"),
        }
    }

    /// drops every channel whose `#EXTINF` carries an excluded `group-title`, from that line up
    /// to the next `#EXTINF`
    pub fn exclude_groups(&mut self, excluded: &[String]) {
        if excluded.is_empty() {
            return;
        }

        let mut kept = Vec::new();
        let mut skipping = false;
        for line in self.body.lines() {
            if line.starts_with("#EXTINF") {
                skipping = group_title(line)
                    .map(|group| excluded.iter().any(|e| e == group))
                    .unwrap_or(false);
            }
            if !skipping {
                kept.push(line);
            }
        }

        self.body = kept.join("\n").trim().to_string();
    }
}

pub fn group_title(line: &str) -> Option<&str> {
    GROUP_TITLE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
