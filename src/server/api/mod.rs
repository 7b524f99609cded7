pub mod health_controller;
pub mod playlist_controller;
