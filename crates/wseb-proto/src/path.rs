//! Endpoint path grammar.
//!
//! Every emulated endpoint hangs off a service base path:
//!
//! ```text
//! <base>/;e/cb          create, binary transport
//! <base>/;e/ct          create, UTF-8 text transport
//! <base>/;e/ub/<id>     upstream, binary
//! <base>/;e/db/<id>     downstream, binary
//! <base>/;e/ut/<id>     upstream, text
//! <base>/;e/dt/<id>     downstream, text
//! ```

use std::fmt;

/// Separator between the service base path and the emulation suffix.
pub const EMULATION_MARKER: &str = "/;e/";

/// How bytes travel on a session's carriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Raw frames.
    Binary,
    /// Frames carried through the UTF-8 text transport.
    Text,
}

impl TransportKind {
    const fn letter(self) -> char {
        match self {
            Self::Binary => 'b',
            Self::Text => 't',
        }
    }

    fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'b' => Some(Self::Binary),
            't' => Some(Self::Text),
            _ => None,
        }
    }
}

/// Which endpoint of a service a path addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Session creation.
    Create,
    /// Client to server carriers of a session.
    Upstream(String),
    /// Server to client carriers of a session.
    Downstream(String),
}

/// A parsed emulated endpoint path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointPath {
    /// Service base path, without a trailing slash. Empty for the root.
    pub base: String,
    /// Transport kind of the endpoint.
    pub transport: TransportKind,
    /// Endpoint addressed.
    pub endpoint: Endpoint,
}

impl EndpointPath {
    /// Parse a request path.
    ///
    /// Returns `None` for paths without the emulation marker and for unknown
    /// suffixes.
    #[must_use]
    pub fn parse(path: &str) -> Option<Self> {
        let index = path.find(EMULATION_MARKER)?;
        let base = path[..index].trim_end_matches('/').to_string();
        let suffix = &path[index + EMULATION_MARKER.len()..];

        let (head, id) = match suffix.split_once('/') {
            Some((head, id)) => (head, Some(id)),
            None => (suffix, None),
        };

        let mut letters = head.chars();
        let role = letters.next()?;
        let transport = TransportKind::from_letter(letters.next()?)?;
        if letters.next().is_some() {
            return None;
        }

        let endpoint = match (role, id) {
            ('c', None) => Endpoint::Create,
            ('u', Some(id)) if is_valid_id(id) => Endpoint::Upstream(id.to_string()),
            ('d', Some(id)) if is_valid_id(id) => Endpoint::Downstream(id.to_string()),
            _ => return None,
        };

        Some(Self {
            base,
            transport,
            endpoint,
        })
    }

    /// The create path for a service.
    #[must_use]
    pub fn create(base: &str, transport: TransportKind) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            transport,
            endpoint: Endpoint::Create,
        }
    }

    /// The upstream path of session `id`, sharing this path's base and
    /// transport.
    #[must_use]
    pub fn upstream(&self, id: &str) -> Self {
        Self {
            base: self.base.clone(),
            transport: self.transport,
            endpoint: Endpoint::Upstream(id.to_string()),
        }
    }

    /// The downstream path of session `id`.
    #[must_use]
    pub fn downstream(&self, id: &str) -> Self {
        Self {
            base: self.base.clone(),
            transport: self.transport,
            endpoint: Endpoint::Downstream(id.to_string()),
        }
    }

    /// Session id addressed by this path, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match &self.endpoint {
            Endpoint::Create => None,
            Endpoint::Upstream(id) | Endpoint::Downstream(id) => Some(id),
        }
    }
}

impl fmt::Display for EndpointPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = self.transport.letter();
        write!(f, "{}{EMULATION_MARKER}", self.base)?;
        match &self.endpoint {
            Endpoint::Create => write!(f, "c{letter}"),
            Endpoint::Upstream(id) => write!(f, "u{letter}/{id}"),
            Endpoint::Downstream(id) => write!(f, "d{letter}/{id}"),
        }
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
