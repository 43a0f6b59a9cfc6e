//! Downstream query parameters.
//!
//! | Param  | Meaning                                              |
//! |--------|------------------------------------------------------|
//! | `.kb`  | client buffer threshold in KiB before a reconnect    |
//! | `.kp`  | padding byte count                                   |
//! | `.kbp` | block padding size (gzip content encoding)           |
//! | `.kc`  | content type override                                |
//! | `.kcc` | cache-control override                               |
//! | `.kf`  | flush delay in milliseconds                          |
//! | `.kns` | emit the long anti-sniffing header                   |
//! | `.kkt` | keepalive interval override in seconds               |
//! | `.kd`  | `s` forbids the redirect to the secure endpoint      |

use std::time::Duration;

use crate::error::ProtoError;

/// Parsed downstream query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownstreamParams {
    /// Client buffer threshold in bytes.
    pub client_buffer: Option<u64>,
    /// Target number of padding bytes at the head of a carrier.
    pub padding: Option<usize>,
    /// Block padding size; enables gzip.
    pub block_padding: Option<usize>,
    /// Content type override.
    pub content_type: Option<String>,
    /// Cache-control override.
    pub cache_control: Option<String>,
    /// Delay before the writer starts draining data.
    pub flush_delay: Option<Duration>,
    /// Emit the long anti-sniffing header.
    pub nosniff_padding: bool,
    /// Keepalive interval override.
    pub keepalive: Option<Duration>,
    /// The client refuses the redirect to the secure endpoint.
    pub same_scheme_only: bool,
}

impl DownstreamParams {
    /// Parse parameters from a raw query string (without the leading `?`).
    ///
    /// Unknown parameters are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric parameter is not a non-negative integer.
    pub fn from_query(query: Option<&str>) -> Result<Self, ProtoError> {
        let mut params = Self::default();
        let Some(query) = query else {
            return Ok(params);
        };

        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                ".kb" => {
                    let kib = parse_number(".kb", &value)?;
                    params.client_buffer = Some(kib.saturating_mul(1024));
                }
                ".kp" => params.padding = Some(parse_number(".kp", &value)? as usize),
                ".kbp" => params.block_padding = Some(parse_number(".kbp", &value)? as usize),
                ".kc" => params.content_type = Some(value.into_owned()),
                ".kcc" => params.cache_control = Some(value.into_owned()),
                ".kf" => {
                    params.flush_delay =
                        Some(Duration::from_millis(parse_number(".kf", &value)?));
                }
                ".kns" => params.nosniff_padding = value != "0" && value != "false",
                ".kkt" => {
                    params.keepalive = Some(Duration::from_secs(parse_number(".kkt", &value)?));
                }
                ".kd" => params.same_scheme_only = value == "s",
                _ => {}
            }
        }

        Ok(params)
    }

    /// Whether the client asked for long-polling via a zero buffer.
    #[must_use]
    pub fn requests_long_polling(&self) -> bool {
        self.client_buffer == Some(0)
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ProtoError> {
    value.trim().parse().map_err(|_| ProtoError::InvalidParam {
        name,
        value: value.to_string(),
    })
}
