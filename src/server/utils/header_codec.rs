//! Per-stream header sets and the token they travel in.
//!
//! Playlists smuggle request headers for a stream in a few different ways:
//!
//! ```text
//! http://host/a.m3u8|Referer="http://host"|User-Agent="VLC/3.0.20"      pipe, quoted
//! http://host/a.m3u8|Referer=http://host|User-Agent=VLC/3.0.20          pipe, bare
//! http://host/a.m3u8|Referer=http%3A%2F%2Fhost&User-Agent=VLC%2F3.0.20  percent-encoded
//! #EXTVLCOPT:http-referrer=http://host                                  vlc directive
//! ```
//!
//! All of them end up as a [`HeaderSet`], which is carried through rewritten urls as a
//! base64 token of `Key=Value|Key=Value` in the `data` query parameter.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD},
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

const PAIR_SEPARATOR: char = '|';
const VLC_PREFIX: &str = "#EXTVLCOPT:";
const VLC_HTTP_PREFIX: &str = "http-";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum HeaderCodecError {
    #[error("header token is not valid base64: {0}")]
    InvalidEncoding(String),

    #[error("header token is not valid utf-8")]
    InvalidUtf8,
}

/// ordered (name, value) pairs, names may repeat and the last one wins once it becomes a map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    pairs: Vec<(String, String)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    /// appends every pair of `other`, so on conversion `other` overrides what's already here
    pub fn extend(&mut self, other: &HeaderSet) {
        self.pairs.extend(other.pairs.iter().cloned());
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// case-insensitive lookup of the last value set for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// build the map reqwest wants. Pairs that aren't valid http get dropped with a warning
    /// instead of failing the whole request
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.pairs {
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!("Invalid header name: '{}'", name);
                continue;
            };
            let Ok(header_value) = HeaderValue::from_str(value) else {
                warn!("Invalid header value for {}: '{}'", name, value);
                continue;
            };
            map.insert(header_name, header_value);
        }
        map
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// which of the textual forms a header set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSyntax {
    /// `Key=Value|Key="Value"`, never percent-decoded
    PipeDelimited,
    /// `Key=Value&Key=Value`, the whole segment is percent-decoded before splitting
    PercentEncoded,
    /// `#EXTVLCOPT:http-key=value` lines
    VlcDirective,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeaders {
    pub syntax: HeaderSyntax,
    pub headers: HeaderSet,
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

/// drops one surrounding quote on each side, if present
pub fn strip_quotes(value: &str) -> &str {
    let value = value.strip_prefix(is_quote).unwrap_or(value);
    value.strip_suffix(is_quote).unwrap_or(value)
}

fn normalize_name(name: &str) -> String {
    // vlc options spell it properly, the http header doesn't
    if name == "referrer" {
        "Referer".to_string()
    } else {
        name.to_string()
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `Key=Value` with the key trimmed, value trimmed and unquoted. Empty halves are skipped
fn parse_pair(raw: &str) -> Option<(String, String)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    let value = strip_quotes(value.trim()).trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }
    Some((normalize_name(key), value.to_string()))
}

/// splits a playlist stream line into the url and whatever follows the first `|`
pub fn split_stream_line(line: &str) -> (&str, Option<&str>) {
    match line.split_once(PAIR_SEPARATOR) {
        Some((url, headers)) => (url, Some(headers)),
        None => (line, None),
    }
}

/// a pipe or a quoted value means the raw pipe form, anything else is treated as `&`-joined
/// and percent-decoded (a single bare pair decodes to itself). Quotes elsewhere don't count,
/// `encodeURIComponent` leaves `'` alone
pub fn detect_embedded_syntax(segment: &str) -> HeaderSyntax {
    if segment.contains(PAIR_SEPARATOR) || segment.contains("=\"") || segment.contains("='") {
        HeaderSyntax::PipeDelimited
    } else {
        HeaderSyntax::PercentEncoded
    }
}

/// parse the part of a stream line after the first `|`
pub fn parse_embedded(segment: &str) -> ParsedHeaders {
    let syntax = detect_embedded_syntax(segment);

    let headers = match syntax {
        HeaderSyntax::PercentEncoded => {
            let decoded = match urlencoding::decode(segment) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes()))
                    .into_owned(),
            };
            decoded.split('&').filter_map(parse_pair).collect()
        }
        _ => segment.split(PAIR_SEPARATOR).filter_map(parse_pair).collect(),
    };

    ParsedHeaders { syntax, headers }
}

/// single entry point for anything found in a playlist, a vlc directive line or the segment
/// after a stream url's `|`
pub fn parse_headers(input: &str) -> ParsedHeaders {
    if input.trim_start().starts_with(VLC_PREFIX) {
        return ParsedHeaders {
            syntax: HeaderSyntax::VlcDirective,
            headers: parse_vlc_directive(input).into_iter().collect(),
        };
    }
    parse_embedded(input)
}

/// `#EXTVLCOPT:http-user-agent=VLC` -> `("User-agent", "VLC")`
///
/// anything that isn't an `http-` option gives `None`
pub fn parse_vlc_directive(line: &str) -> Option<(String, String)> {
    let option = strip_quotes(line.trim().strip_prefix(VLC_PREFIX)?.trim());
    let option = option.strip_prefix(VLC_HTTP_PREFIX)?;
    let (key, value) = option.split_once('=')?;

    let key = normalize_name(key.trim());
    let value = strip_quotes(value.trim()).trim();
    if key.is_empty() || value.is_empty() {
        return None;
    }

    Some((capitalize(&key), value.to_string()))
}

/// `Key=Value|Key=Value`, base64. Empty sets encode to an empty string and callers leave the
/// `data` parameter off entirely
pub fn encode_token(headers: &HeaderSet) -> String {
    if headers.is_empty() {
        return String::new();
    }

    let joined = headers
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("|");

    encode_base64_text(&joined)
}

/// lenient base64 to text: standard or url-safe alphabet, padded or not
pub fn decode_base64_text(value: &str) -> Result<String, HeaderCodecError> {
    // a raw `+` in a query string comes out of form decoding as a space, so put those back
    // before anything gets trimmed
    let value = value.replace(' ', "+");
    let value = value.trim_matches(['\r', '\n', '\t']);
    let unpadded = value.trim_end_matches('=');
    if unpadded.is_empty() {
        return Ok(String::new());
    }

    let bytes = if unpadded.contains(['-', '_']) {
        URL_SAFE_NO_PAD.decode(unpadded)
    } else {
        STANDARD_NO_PAD.decode(unpadded)
    }
    .map_err(|e| HeaderCodecError::InvalidEncoding(e.to_string()))?;

    String::from_utf8(bytes).map_err(|_| HeaderCodecError::InvalidUtf8)
}

pub fn encode_base64_text(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// reverse of [`encode_token`]
pub fn decode_token(token: &str) -> Result<HeaderSet, HeaderCodecError> {
    let text = decode_base64_text(token)?;
    Ok(text.split(PAIR_SEPARATOR).filter_map(parse_pair).collect())
}

/// the header set that wins for one stream url
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedHeaders {
    /// pipe/percent headers straight on the url line
    Embedded(HeaderSet),
    /// `#EXTVLCOPT` lines collected above the url line
    Vlc(HeaderSet),
    /// token the player handed us on the original request
    External(String),
    None,
}

impl ResolvedHeaders {
    pub fn token(&self) -> Option<String> {
        match self {
            Self::Embedded(headers) | Self::Vlc(headers) => Some(encode_token(headers)),
            Self::External(token) => Some(token.clone()),
            Self::None => None,
        }
    }
}

/// embedded beats vlc beats external beats nothing
pub fn resolve_stream_headers(
    embedded: Option<&str>,
    vlc: &HeaderSet,
    external: Option<&str>,
) -> ResolvedHeaders {
    if let Some(segment) = embedded {
        let parsed = parse_embedded(segment);
        if !parsed.headers.is_empty() {
            return ResolvedHeaders::Embedded(parsed.headers);
        }
    }

    if !vlc.is_empty() {
        return ResolvedHeaders::Vlc(vlc.clone());
    }

    match external {
        Some(token) if !token.trim().is_empty() => ResolvedHeaders::External(token.to_string()),
        _ => ResolvedHeaders::None,
    }
}
