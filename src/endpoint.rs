//! # Endpoint URI
//!
//! Builds the connection target for one run:
//!
//! ```text
//! wss://host/speech/translate?api-version=1.0&from=en-US&to=it-IT&features=TextToSpeech&...
//! ```
//!
//! Optional parameters are left out when empty. Values are percent-encoded by
//! `url`'s query serializer. The subscription key travels in the query string,
//! so logs only ever see [`redact`]ed URIs.

use crate::config::ApiConfig;
use crate::error::{AppError, AppResult};
use url::Url;

const KEY_PARAM: &str = "subscription-key";

/// Parse the configured endpoint and make sure it speaks WebSocket.
pub fn parse_endpoint(endpoint: &str) -> AppResult<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| AppError::validation("api.endpoint", format!("'{}' is not a valid URI: {}", endpoint, e)))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(AppError::validation(
            "api.endpoint",
            format!("scheme '{}' is not supported, use ws or wss", other),
        )),
    }
}

/// Assemble the full URI for translating from `from` to `to`.
pub fn build_endpoint_uri(api: &ApiConfig, from: &str, to: &str) -> AppResult<Url> {
    let base = format!("{}{}", api.endpoint.trim_end_matches('/'), api.path);
    let mut url = parse_endpoint(&base)?;

    let (version_key, version_value) = api
        .version
        .split_once('=')
        .ok_or_else(|| AppError::validation("api.version", "expected key=value"))?;

    let optional = [
        ("features", api.features.as_str()),
        ("voice", api.voice.as_str()),
        ("format", api.audio_format.as_str()),
        ("ProfanityAction", api.profanity_action.as_str()),
        ("ProfanityMarker", api.profanity_marker.as_str()),
        (KEY_PARAM, api.subscription_key.as_str()),
    ];

    {
        let mut query = url.query_pairs_mut();
        query
            .clear()
            .append_pair(version_key, version_value)
            .append_pair("from", from)
            .append_pair("to", to);
        for (key, value) in optional.iter().filter(|(_, value)| !value.is_empty()) {
            query.append_pair(key, value);
        }
    }

    Ok(url)
}

/// Render `url` with the subscription key masked.
pub fn redact(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == KEY_PARAM) {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == KEY_PARAM {
                "REDACTED".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
