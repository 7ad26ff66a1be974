//! Pre-connect token resolution
//!
//! A [`TokenProvider`] runs before every connection attempt. Its token, if
//! any, is attached to the connection URL as the `token` query parameter.

use crate::error::{ClientError, Result};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Context handed to the provider for each attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAttempt {
    /// Consecutive failures before this attempt
    pub attempt: u32,
    /// The previous connection was closed with an authentication rejection
    pub token_rejected: bool,
}

/// Hook resolving a bearer token before a connection attempt
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn resolve(&self, attempt: ConnectAttempt) -> Result<String>;
}

/// Successful token endpoint body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Failed token endpoint body
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    details: Option<String>,
}

/// Fetches a fresh token with `GET` on every attempt
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpTokenProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn resolve(&self, attempt: ConnectAttempt) -> Result<String> {
        debug!(
            endpoint = %self.endpoint,
            attempt = attempt.attempt,
            token_rejected = attempt.token_rejected,
            "Requesting identity token"
        );

        let response = self.http.get(&self.endpoint).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        parse_token_response(status, &body)
    }
}

fn parse_token_response(status: StatusCode, body: &[u8]) -> Result<String> {
    if status != StatusCode::OK {
        let detail = serde_json::from_slice::<TokenErrorResponse>(body)
            .ok()
            .map(|e| {
                format!(
                    "{}: {}",
                    e.error.unwrap_or_else(|| "unknown error".to_string()),
                    e.details.unwrap_or_default()
                )
            })
            .unwrap_or_else(|| "no error body".to_string());
        return Err(ClientError::TokenResolution(format!(
            "token endpoint returned {}: {}",
            status, detail
        )));
    }

    let parsed: TokenResponse = serde_json::from_slice(body)
        .map_err(|e| ClientError::TokenResolution(format!("invalid token response: {}", e)))?;

    match parsed.token {
        Some(token) if !token.is_empty() => {
            debug!(expires_in = ?parsed.expires_in, "Identity token received");
            Ok(token)
        }
        _ => Err(ClientError::TokenResolution(
            "token endpoint response has no token".to_string(),
        )),
    }
}

/// Append `token` to `base`, keeping any existing query pairs
pub fn connection_url(base: &str, token: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base)?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_with_token() {
        let body = br#"{"token":"abc.def","expiresIn":3600}"#;
        assert_eq!(parse_token_response(StatusCode::OK, body).unwrap(), "abc.def");
    }

    #[test]
    fn test_parse_ok_without_token_fails() {
        let body = br#"{"expiresIn":3600}"#;
        let err = parse_token_response(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, ClientError::TokenResolution(_)));
    }

    #[test]
    fn test_parse_empty_token_fails() {
        let body = br#"{"token":""}"#;
        assert!(parse_token_response(StatusCode::OK, body).is_err());
    }

    #[test]
    fn test_parse_server_error_carries_details() {
        let body = br#"{"error":"Failed to get authentication token","details":"iam down"}"#;
        let err = parse_token_response(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap_err();

        let message = err.to_string();
        assert!(message.contains("500"));
        assert!(message.contains("iam down"));
    }

    #[test]
    fn test_parse_method_not_allowed_fails() {
        assert!(parse_token_response(StatusCode::METHOD_NOT_ALLOWED, b"").is_err());
    }

    #[test]
    fn test_connection_url_without_token() {
        let url = connection_url("ws://localhost:8080", None).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/");
    }

    #[test]
    fn test_connection_url_appends_token() {
        let url = connection_url("wss://relay.example.com/ws?room=a", Some("t0k+n")).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(
            pairs,
            vec![
                ("room".to_string(), "a".to_string()),
                ("token".to_string(), "t0k+n".to_string())
            ]
        );
    }

    #[test]
    fn test_connection_url_rejects_garbage() {
        assert!(matches!(
            connection_url("::not-a-url", None),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
