pub mod epg_services;
pub mod fetch_services;
pub mod playlist_services;
pub mod proxy_services;
pub mod quirk_services;
pub mod session_services;

pub use epg_services::DynEpgService;
pub use fetch_services::DynContentFetcher;
pub use playlist_services::DynPlaylistService;
pub use proxy_services::ProxyServices;
pub use session_services::DynSessionClient;
