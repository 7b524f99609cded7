pub mod access_token_dto;
pub mod health_dto;
pub mod playlist_dto;
