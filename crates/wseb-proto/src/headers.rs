//! Header names, values and the per-session protocol mode.

use crate::error::ProtoError;

/// Protocol version header sent on create.
pub const WEBSOCKET_VERSION: &str = "X-WebSocket-Version";
/// Carrier ordinal header on create, upstream and downstream requests.
pub const SEQUENCE_NO: &str = "X-Sequence-No";
/// Commands the client is prepared to receive.
pub const ACCEPT_COMMANDS: &str = "X-Accept-Commands";
/// Requested / negotiated subprotocol.
pub const WEBSOCKET_PROTOCOL: &str = "X-WebSocket-Protocol";
/// Requested / negotiated extensions.
pub const WEBSOCKET_EXTENSIONS: &str = "X-WebSocket-Extensions";
/// Client idle timeout advertisement on downstream responses, in seconds.
pub const IDLE_TIMEOUT: &str = "X-Idle-Timeout";
/// Long header emitted on request to defeat content sniffing.
pub const CONTENT_TYPE_PADDING: &str = "X-Content-Type-Padding";

/// The only version value this gateway speaks.
pub const WSEB_VERSION: &str = "wseb-1.0";
/// The only legal `X-Accept-Commands` value.
pub const ACCEPT_PING: &str = "ping";

/// Largest sequence number a client may declare (2^53 - 1).
pub const MAX_SEQUENCE_NO: u64 = (1 << 53) - 1;

/// Length of the value of [`CONTENT_TYPE_PADDING`].
pub const CONTENT_TYPE_PADDING_LEN: usize = 256;

/// Negotiation mode of a session, fixed at create time.
///
/// Compliant clients send `X-WebSocket-Version: wseb-1.0` and number
/// every carrier; legacy clients do neither and expect a NOOP as soon as a
/// downstream opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolMode {
    /// `wseb-1.0` clients.
    Compliant,
    /// Pre-1.0 clients.
    Legacy,
}

impl ProtocolMode {
    /// Determine the mode from the create request's version header.
    ///
    /// # Errors
    ///
    /// Returns an error if a version other than `wseb-1.0` is requested.
    pub fn from_version(version: Option<&str>) -> Result<Self, ProtoError> {
        match version.map(str::trim) {
            None => Ok(Self::Legacy),
            Some(v) if v.eq_ignore_ascii_case(WSEB_VERSION) => Ok(Self::Compliant),
            Some(v) => Err(ProtoError::InvalidHeader {
                name: WEBSOCKET_VERSION,
                reason: format!("unsupported version {v:?}"),
            }),
        }
    }

    /// Whether carriers must declare an ordinal that matches the session's
    /// expected sequence number.
    #[must_use]
    pub const fn validates_sequence(self) -> bool {
        matches!(self, Self::Compliant)
    }

    /// Whether a NOOP is written as soon as a downstream carrier attaches.
    #[must_use]
    pub const fn emits_initial_noop(self) -> bool {
        matches!(self, Self::Legacy)
    }

    /// Whether upstream requests must declare a content type.
    #[must_use]
    pub const fn requires_content_type(self) -> bool {
        matches!(self, Self::Compliant)
    }
}

/// Parse an `X-Sequence-No` value.
///
/// # Errors
///
/// Returns an error for non-numeric, negative or out-of-range values.
pub fn parse_sequence_no(value: &str) -> Result<u64, ProtoError> {
    let value = value.trim();
    let parsed: i128 = value.parse().map_err(|_| ProtoError::InvalidHeader {
        name: SEQUENCE_NO,
        reason: format!("not an integer: {value:?}"),
    })?;
    if parsed < 0 || parsed > i128::from(MAX_SEQUENCE_NO) {
        return Err(ProtoError::InvalidHeader {
            name: SEQUENCE_NO,
            reason: format!("out of range: {parsed}"),
        });
    }
    Ok(parsed as u64)
}

/// Validate an `X-Accept-Commands` value. Returns whether PING is enabled.
///
/// # Errors
///
/// Returns an error for any value other than `ping`.
pub fn parse_accept_commands(value: Option<&str>) -> Result<bool, ProtoError> {
    match value.map(str::trim) {
        None => Ok(false),
        Some(v) if v.eq_ignore_ascii_case(ACCEPT_PING) => Ok(true),
        Some(v) => Err(ProtoError::InvalidHeader {
            name: ACCEPT_COMMANDS,
            reason: format!("unsupported value {v:?}"),
        }),
    }
}

/// Split repeatable, comma-separated header values into trimmed tokens.
pub fn split_list<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Value of the long anti-sniffing header.
#[must_use]
pub fn content_type_padding() -> String {
    "-".repeat(CONTENT_TYPE_PADDING_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    // ==================== ProtocolMode Tests ====================

    #[test]
    fn test_mode_from_version() {
        assert_eq!(ProtocolMode::from_version(None), Ok(ProtocolMode::Legacy));
        assert_eq!(
            ProtocolMode::from_version(Some("wseb-1.0")),
            Ok(ProtocolMode::Compliant)
        );
        assert!(ProtocolMode::from_version(Some("wseb-2.0")).is_err());
    }

    #[test]
    fn test_mode_behaviour_switches() {
        assert!(ProtocolMode::Compliant.validates_sequence());
        assert!(!ProtocolMode::Compliant.emits_initial_noop());
        assert!(ProtocolMode::Compliant.requires_content_type());

        assert!(!ProtocolMode::Legacy.validates_sequence());
        assert!(ProtocolMode::Legacy.emits_initial_noop());
        assert!(!ProtocolMode::Legacy.requires_content_type());
    }

    // ==================== Sequence Number Tests ====================

    #[test_case("0", Some(0) ; "zero")]
    #[test_case(" 42 ", Some(42) ; "whitespace")]
    #[test_case("9007199254740991", Some(MAX_SEQUENCE_NO) ; "max")]
    #[test_case("9007199254740992", None ; "above max")]
    #[test_case("-1", None ; "negative")]
    #[test_case("abc", None ; "not a number")]
    fn test_parse_sequence_no(value: &str, expected: Option<u64>) {
        assert_eq!(parse_sequence_no(value).ok(), expected);
    }

    // ==================== Accept Commands Tests ====================

    #[test]
    fn test_accept_commands() {
        assert_eq!(parse_accept_commands(None), Ok(false));
        assert_eq!(parse_accept_commands(Some("ping")), Ok(true));
        assert!(parse_accept_commands(Some("pong")).is_err());
    }

    #[test]
    fn test_split_list() {
        let values = split_list(["a, b", "c", " ,"]);
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_content_type_padding_length() {
        assert_eq!(content_type_padding().len(), CONTENT_TYPE_PADDING_LEN);
    }
}
