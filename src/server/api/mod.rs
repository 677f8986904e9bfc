pub mod playlist_controller;
pub mod proxy_controller;
