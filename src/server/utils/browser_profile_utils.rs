use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

pub const SITE_URL: &str = "https://www.twitch.tv";

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

// the gql endpoint rejects anything that doesn't look enough like the web player, so these
// mirror what chrome sends from the site
const BROWSER_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("accept-language", "en-US"),
    ("origin", SITE_URL),
    ("referer", "https://www.twitch.tv/"),
    (
        "sec-ch-ua",
        r#""Not)A;Brand";v="8", "Chromium";v="138", "Google Chrome";v="138""#,
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", r#""Windows""#),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-site"),
];

/// browser profile used for every upstream request, plus the client id and device id
pub fn browser_headers(client_id: &str, device_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for &(name, value) in BROWSER_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

    if let Ok(value) = HeaderValue::from_str(client_id) {
        headers.insert(HeaderName::from_static("client-id"), value);
    }

    if let Some(value) = device_id.and_then(|d| HeaderValue::from_str(d).ok()) {
        headers.insert(HeaderName::from_static("x-device-id"), value);
    }

    headers
}
