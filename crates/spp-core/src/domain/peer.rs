//! Remote endpoint identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address and optional display name of a remote peer.
///
/// The address format belongs to the transport (`ip:port` for TCP, any
/// non-empty string for the in-memory hub).  Validation happens in
/// [`TransportFactory::resolve_peer`](crate::transport::TransportFactory::resolve_peer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl PeerIdentity {
    /// Creates an identity with no display name.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    /// Creates an identity with a display name.
    pub fn named(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Replaces the display name.  Blank names are treated as absent.
    pub fn with_name(mut self, name: Option<&str>) -> Self {
        self.name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The name shown to the user: the display name if known, else the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.address),
            None => f.write_str(&self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_address() {
        // Arrange
        let peer = PeerIdentity::new("10.0.0.7:24850");

        // Act / Assert
        assert_eq!(peer.display_name(), "10.0.0.7:24850");
        assert!(peer.name().is_none());
    }

    #[test]
    fn test_display_name_prefers_name() {
        let peer = PeerIdentity::named("10.0.0.7:24850", "kitchen-tablet");
        assert_eq!(peer.display_name(), "kitchen-tablet");
        assert_eq!(peer.to_string(), "kitchen-tablet (10.0.0.7:24850)");
    }

    #[test]
    fn test_with_name_ignores_blank_names() {
        // Arrange
        let peer = PeerIdentity::named("a", "old");

        // Act
        let peer = peer.with_name(Some("   "));

        // Assert
        assert_eq!(peer.name(), None);
        assert_eq!(peer.display_name(), "a");
    }
}
