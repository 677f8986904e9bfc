use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::{
    config::AppConfig,
    database::{DynKeyValueStore, session::KvSessionRepository},
};

use super::{
    epg_services::{DynEpgService, EpgService},
    fetch_services::{ContentFetcher, DynContentFetcher},
    playlist_services::{DynPlaylistService, PlaylistService},
    quirk_services::{QuirkRegistry, SessionStampQuirk},
    session_services::{DynSessionClient, HttpSessionClient, SessionNegotiator},
};

/// everything the handlers need, cloned into each request through an extension
#[derive(Clone)]
pub struct ProxyServices {
    pub fetcher: DynContentFetcher,
    pub playlists: DynPlaylistService,
    pub epg: DynEpgService,
    pub sessions: Arc<SessionNegotiator>,
    pub quirks: Arc<QuirkRegistry>,
    pub store: DynKeyValueStore,
    pub config: Arc<AppConfig>,
}

impl ProxyServices {
    pub fn new(store: DynKeyValueStore, config: Arc<AppConfig>) -> anyhow::Result<Self> {
        info!(
            "starting proxy services with {} session storage...",
            store.backend_name()
        );

        let fetch_timeout = Duration::from_secs(config.fetch_timeout_secs);
        let fetcher = Arc::new(ContentFetcher::new(fetch_timeout, config.max_redirects)?)
            as DynContentFetcher;

        let session_client = Arc::new(HttpSessionClient::new(
            &config.session_init_url,
            &config.session_check_url,
            fetch_timeout,
            Duration::from_secs(config.check_timeout_secs),
        )?) as DynSessionClient;

        Ok(Self::with_parts(store, config, fetcher, session_client))
    }

    /// wiring without any http clients of its own, tests hand in mocks here
    pub fn with_parts(
        store: DynKeyValueStore,
        config: Arc<AppConfig>,
        fetcher: DynContentFetcher,
        session_client: DynSessionClient,
    ) -> Self {
        let repository = Arc::new(KvSessionRepository::new(store.clone()));
        let sessions = Arc::new(SessionNegotiator::new(repository, session_client));

        let mut quirks = QuirkRegistry::new();
        quirks.register(Arc::new(SessionStampQuirk::new(
            &config.session_host,
            sessions.clone(),
        )));
        info!("{} upstream quirks registered", quirks.len());

        let playlists = Arc::new(PlaylistService::new(fetcher.clone())) as DynPlaylistService;
        let epg = Arc::new(EpgService::new(fetcher.clone())) as DynEpgService;

        Self {
            fetcher,
            playlists,
            epg,
            sessions,
            quirks: Arc::new(quirks),
            store,
            config,
        }
    }
}
