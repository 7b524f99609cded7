use playlist_edge::server::dtos::playlist_dto::PlaylistKind;
use playlist_edge::server::error::{Error, ErrorKind};
use playlist_edge::server::services::access_token_services::{
    GqlAccessTokenService, OPERATION_NAME,
};

#[test]
fn pick_the_stream_token_for_live_requests() {
    let body = br#"{"data":{"streamPlaybackAccessToken":{"value":"{\"channel\":\"somechannel\"}","signature":"abc123","__typename":"PlaybackAccessToken"}}}"#;

    let token = GqlAccessTokenService::extract_token(PlaylistKind::Stream, body).unwrap();

    assert_eq!(token.value, r#"{"channel":"somechannel"}"#);
    assert_eq!(token.signature, "abc123");
}

#[test]
fn pick_the_video_token_for_vods() {
    let body = br#"{"data":{"videoPlaybackAccessToken":{"value":"vod-value","signature":"vod-sig"}}}"#;

    let token = GqlAccessTokenService::extract_token(PlaylistKind::Vod, body).unwrap();

    assert_eq!(token.value, "vod-value");
    assert_eq!(token.signature, "vod-sig");
}

#[test]
fn report_a_missing_signature_as_token_not_found() {
    let body = br#"{"data":{"streamPlaybackAccessToken":{"value":"something"}}}"#;

    let err = GqlAccessTokenService::extract_token(PlaylistKind::Stream, body).unwrap_err();

    assert!(matches!(err, Error::ServerTokenNotFound));
    assert_eq!(err.status_code().as_u16(), 404);
}

#[test]
fn report_an_offline_channel_as_token_not_found() {
    let body = br#"{"data":{"streamPlaybackAccessToken":null},"errors":[{"message":"service error"}]}"#;

    let err = GqlAccessTokenService::extract_token(PlaylistKind::Stream, body).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerTokenNotFound);
}

#[test]
fn not_accept_the_other_kinds_token() {
    let body = br#"{"data":{"streamPlaybackAccessToken":{"value":"v","signature":"s"}}}"#;

    let err = GqlAccessTokenService::extract_token(PlaylistKind::Vod, body).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServerTokenNotFound);
}

#[test]
fn treat_non_json_as_unexpected() {
    let err = GqlAccessTokenService::extract_token(PlaylistKind::Stream, b"<html>bad gateway</html>")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnexpectedError);
    assert_eq!(err.status_code().as_u16(), 500);
    // internals stay in the logs
    assert_eq!(err.public_message(), "unexpected error");
}

#[test]
fn fill_only_the_live_branch_for_streams() {
    let request = GqlAccessTokenService::token_request(PlaylistKind::Stream, "somechannel");
    let json = serde_json::to_value(&request).unwrap();

    assert_eq!(json["operationName"], OPERATION_NAME);
    assert_eq!(json["variables"]["isLive"], true);
    assert_eq!(json["variables"]["isVod"], false);
    assert_eq!(json["variables"]["login"], "somechannel");
    assert_eq!(json["variables"]["vodID"], "");
    assert_eq!(json["variables"]["playerType"], "site");
    assert_eq!(json["variables"]["platform"], "web");

    let query = json["query"].as_str().unwrap();
    assert!(query.contains("streamPlaybackAccessToken"));
    assert!(query.contains("videoPlaybackAccessToken"));
}

#[test]
fn fill_only_the_vod_branch_for_vods() {
    let request = GqlAccessTokenService::token_request(PlaylistKind::Vod, "2000000000");
    let json = serde_json::to_value(&request).unwrap();

    assert_eq!(json["variables"]["isLive"], false);
    assert_eq!(json["variables"]["isVod"], true);
    assert_eq!(json["variables"]["login"], "");
    assert_eq!(json["variables"]["vodID"], "2000000000");
}
