//! Header helpers shared by the endpoint handlers.

use axum::http::{header, HeaderMap, Uri};
use tracing::warn;
use wseb_proto::headers::{parse_sequence_no, SEQUENCE_NO};
use wseb_session::{SessionError, SessionHandle};

use crate::error::{GatewayError, GatewayResult};

/// A single header as text. Non-visible-ASCII values are rejected.
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> GatewayResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| GatewayError::BadRequest(format!("invalid {name} header")))
        })
        .transpose()
}

/// Every value of a repeatable header.
pub(crate) fn header_values<'a>(headers: &'a HeaderMap, name: &str) -> Vec<&'a str> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect()
}

/// The declared `X-Sequence-No`, if any.
pub(crate) fn sequence_no(headers: &HeaderMap) -> GatewayResult<Option<u64>> {
    header_str(headers, SEQUENCE_NO)?
        .map(parse_sequence_no)
        .transpose()
        .map_err(GatewayError::from)
}

/// Reject the carrier and reset the session.
pub(crate) fn violation(session: &SessionHandle, reason: &str) -> GatewayError {
    let err = SessionError::protocol(reason);
    warn!(session_id = %session.id(), reason, "Carrier request rejected");
    session.reset(err.clone());
    GatewayError::Session(err)
}

/// Authority the client used to reach the gateway.
pub(crate) fn authority(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    header_str(headers, header::HOST.as_str())
        .ok()
        .flatten()
        .map(ToString::to_string)
        .or_else(|| uri.authority().map(ToString::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_sequence_no() {
        let mut headers = HeaderMap::new();
        assert_eq!(sequence_no(&headers).unwrap(), None);

        headers.insert("x-sequence-no", HeaderValue::from_static("7"));
        assert_eq!(sequence_no(&headers).unwrap(), Some(7));

        headers.insert("x-sequence-no", HeaderValue::from_static("-1"));
        assert!(matches!(sequence_no(&headers), Err(GatewayError::BadRequest(_))));
    }

    #[test]
    fn test_header_values_collects_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("x-websocket-protocol", HeaderValue::from_static("a, b"));
        headers.append("x-websocket-protocol", HeaderValue::from_static("c"));
        assert_eq!(header_values(&headers, "X-WebSocket-Protocol"), vec!["a, b", "c"]);
    }

    #[test]
    fn test_authority_prefers_host_header() {
        let mut headers = HeaderMap::new();
        let uri: Uri = "http://fallback.example/echo".parse().unwrap();
        assert_eq!(authority(&headers, &uri).as_deref(), Some("fallback.example"));

        headers.insert(header::HOST, HeaderValue::from_static("gw.example:8080"));
        assert_eq!(authority(&headers, &uri).as_deref(), Some("gw.example:8080"));
    }
}
