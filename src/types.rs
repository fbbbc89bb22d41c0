//! Public data types used by this crate.

use std::collections::BTreeMap;

/// Listing facts for one entry (`lower-cased fact name -> raw value`).
///
/// Values are kept exactly as transmitted; sizes, timestamps and permissions
/// are not interpreted.
pub type Facts = BTreeMap<String, String>;

/// Credentials and address of an FTP server.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, PartialEq, Eq)]
pub struct Access {
    /// Hostname (or IP) of the server.
    pub host: String,
    /// TCP port of the control connection.
    pub port: u16,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
}

impl Access {
    /// Creates access information for a server.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Access")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of [`crate::FtpSession::mlst`]: the server path of an entry and its facts.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FactEntry {
    /// Path as reported by the server.
    pub path: String,
    /// Facts reported for the entry.
    pub facts: Facts,
}

impl FactEntry {
    /// Returns the raw value of a fact, looked up by its lower-case name.
    pub fn fact(&self, name: &str) -> Option<&str> {
        self.facts.get(name).map(String::as_str)
    }
}
