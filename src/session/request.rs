//! Handshake request construction: URL, subprotocol and auth headers

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};

use super::{AuthMode, ConnectionConfig};
use crate::shared::ConnectionError;

/// Build the client handshake request for a station.
///
/// Headers are computed once per dial; credentials are not refreshed
/// mid-session.
pub(crate) fn build_request(config: &ConnectionConfig) -> Result<Request, ConnectionError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectionError::InvalidRequest(format!("{}: {e}", config.url)))?;

    let headers = request.headers_mut();
    headers.insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(config.subprotocol()),
    );

    if let Some(value) = authorization_value(&config.auth) {
        let value = HeaderValue::from_str(&value)
            .map_err(|e| ConnectionError::InvalidRequest(format!("authorization header: {e}")))?;
        headers.insert(header::AUTHORIZATION, value);
    }

    Ok(request)
}

/// `Authorization` header value for the configured auth mode.
pub(crate) fn authorization_value(auth: &AuthMode) -> Option<String> {
    match auth {
        AuthMode::None => None,
        AuthMode::Basic { username, password } => Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{username}:{password}"))
        )),
        AuthMode::Bearer { token } => Some(format!("Bearer {token}")),
    }
}
