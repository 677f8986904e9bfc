use std::sync::Arc;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::fetch_services::DynContentFetcher;
use crate::server::{
    error::{AppResult, Error},
    utils::header_codec,
};

static XML_PROLOG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\?xml.*?\?>").expect("valid xml prolog regex"));

static DOCTYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!DOCTYPE.*?>").expect("valid doctype regex"));

// `<tv>`, `<tv generator-info-name="...">` and `</tv>`, but not `<tvshow>` or similar
static TV_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?tv(?:\s[^>]*)?>").expect("valid tv element regex"));

const EPG_PROLOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

pub type DynEpgService = Arc<dyn EpgServiceTrait + Send + Sync>;

#[async_trait::async_trait]
pub trait EpgServiceTrait {
    /// `data` is the base64 of a comma separated list of xmltv urls. Sources that fail are
    /// skipped, so this only errors on a `data` that doesn't decode
    async fn merge(&self, data: &str) -> AppResult<String>;
}

/// base64 of the comma joined urls, the format `/Epg?data=` expects
pub fn encode_epg_sources(urls: &[String]) -> String {
    header_codec::encode_base64_text(&urls.join(","))
}

pub fn decode_epg_sources(data: &str) -> AppResult<Vec<String>> {
    let text = header_codec::decode_base64_text(data)
        .map_err(|e| Error::BadRequest(format!("Invalid EPG data: {}", e)))?;

    Ok(text
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect())
}

/// what's left of an xmltv document once the prolog, doctype and root element are gone
pub fn strip_epg_document(document: &str) -> String {
    let without_prolog = XML_PROLOG.replace(document, "");
    let without_doctype = DOCTYPE.replace(&without_prolog, "");
    TV_ELEMENT.replace_all(&without_doctype, "").into_owned()
}

pub fn wrap_epg(body: &str) -> String {
    format!("{}<tv>{}</tv>", EPG_PROLOG, body)
}

pub struct EpgService {
    fetcher: DynContentFetcher,
}

impl EpgService {
    pub fn new(fetcher: DynContentFetcher) -> Self {
        Self { fetcher }
    }

    async fn fetch_source(&self, url: &str) -> Option<String> {
        match self.fetcher.fetch_raw(url).await {
            Ok(content) if content.is_ok() => Some(content.text()),
            Ok(content) => {
                warn!(
                    "Failed to fetch EPG {}: request failed with status code {}",
                    url, content.status
                );
                None
            }
            Err(e) => {
                warn!("Failed to fetch EPG {}: {}", url, e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl EpgServiceTrait for EpgService {
    async fn merge(&self, data: &str) -> AppResult<String> {
        let urls = decode_epg_sources(data)?;
        debug!("Merging {} EPG sources", urls.len());

        // join_all keeps source order
        let documents = join_all(urls.iter().map(|url| self.fetch_source(url))).await;
        let merged: String = documents
            .iter()
            .flatten()
            .map(|document| strip_epg_document(document))
            .collect();

        Ok(wrap_epg(&merged))
    }
}
