use serde::Deserialize;

/// query of the generic `/` endpoint. `type` is only a hint for players and never read
#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    /// manifest, fetched as text and rewritten
    pub url: Option<String>,
    /// segment, fetched as bytes
    pub url2: Option<String>,
    pub data: Option<String>,
    pub key: Option<String>,
    pub su: Option<String>,
    #[serde(rename = "suToken")]
    pub su_token: Option<String>,
}

impl ProxyQuery {
    pub fn is_key_request(&self) -> bool {
        self.key.as_deref() == Some("true")
    }

    pub fn is_session_stamped(&self) -> bool {
        self.su.as_deref() == Some("1")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaylistQuery {
    /// comma separated source playlists
    pub url: Option<String>,
    pub data: Option<String>,
    #[serde(rename = "epgMerging")]
    pub epg_merging: Option<String>,
    /// comma separated group titles, each one percent-encoded
    pub exclude: Option<String>,
}

impl PlaylistQuery {
    pub fn epg_merging_enabled(&self) -> bool {
        self.epg_merging
            .as_deref()
            .is_some_and(|v| v == "true")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EpgQuery {
    pub data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchQuery {
    pub url: Option<String>,
}
