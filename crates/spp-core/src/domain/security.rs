//! Secure/insecure channel selection.
//!
//! The preference is owned by the embedding application.  The session reads it
//! through [`SecurityPreference`] at the moment a connect or listen is
//! started and never caches it, so a change applies to the next attempt only.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Which transport variant a socket is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelSecurity {
    /// Authenticated/encrypted link as provided by the transport.
    Secure,
    /// No link-level authentication.
    Insecure,
}

impl ChannelSecurity {
    pub fn is_secure(&self) -> bool {
        matches!(self, ChannelSecurity::Secure)
    }
}

impl From<bool> for ChannelSecurity {
    fn from(secure: bool) -> Self {
        if secure {
            ChannelSecurity::Secure
        } else {
            ChannelSecurity::Insecure
        }
    }
}

impl fmt::Display for ChannelSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelSecurity::Secure => "secure",
            ChannelSecurity::Insecure => "insecure",
        })
    }
}

/// Source of the current secure-channel preference.
pub trait SecurityPreference: Send + Sync {
    /// Returns `true` if the next socket should use the secure variant.
    fn is_secure(&self) -> bool;
}

/// Reads `preference` once and converts it to a [`ChannelSecurity`].
pub fn current_security(preference: &dyn SecurityPreference) -> ChannelSecurity {
    ChannelSecurity::from(preference.is_secure())
}

/// A shared, thread-safe secure-channel flag.
///
/// Clones share the same underlying value, so the embedding application can
/// keep one clone to flip while the controller holds another.
#[derive(Debug, Clone)]
pub struct SecurityFlag {
    secure: Arc<AtomicBool>,
}

impl SecurityFlag {
    pub fn new(secure: bool) -> Self {
        Self {
            secure: Arc::new(AtomicBool::new(secure)),
        }
    }

    /// Stores `secure`.  Returns `true` if the value changed.
    pub fn set(&self, secure: bool) -> bool {
        self.secure.swap(secure, Ordering::SeqCst) != secure
    }
}

impl Default for SecurityFlag {
    /// The secure variant is the default.
    fn default() -> Self {
        Self::new(true)
    }
}

impl SecurityPreference for SecurityFlag {
    fn is_secure(&self) -> bool {
        self.secure.load(Ordering::SeqCst)
    }
}
