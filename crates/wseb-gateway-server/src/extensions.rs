//! Extension negotiation on create.

use std::fmt;

/// Decides which of the client's requested extensions a session uses.
pub trait ExtensionNegotiator: Send + Sync + fmt::Debug {
    /// Return the accepted subset of `requested`, in request order.
    fn negotiate(&self, requested: &[String]) -> Vec<String>;
}

/// Accepts requested extensions whose name appears in a fixed list.
///
/// Parameters after `;` are kept on the accepted offer but ignored for
/// matching; names compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct SupportedExtensions {
    names: Vec<String>,
}

impl SupportedExtensions {
    /// Accept extensions named in `names`.
    #[must_use]
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    fn supports(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

impl ExtensionNegotiator for SupportedExtensions {
    fn negotiate(&self, requested: &[String]) -> Vec<String> {
        let mut accepted: Vec<String> = Vec::new();
        for offer in requested {
            let name = offer.split(';').next().unwrap_or_default().trim();
            let duplicate = accepted
                .iter()
                .any(|a| a.split(';').next().unwrap_or_default().trim().eq_ignore_ascii_case(name));
            if self.supports(name) && !duplicate {
                accepted.push(offer.trim().to_string());
            }
        }
        accepted
    }
}
