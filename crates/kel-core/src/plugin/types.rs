//! Plugin type definitions

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// An installable, versioned sub-command.
///
/// Identity is `(name, version)`; two descriptors with the same name and
/// different versions coexist in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: Version,
    pub command: PluginCommandSpec,
}

/// How the plugin is exposed on the command line and where its binary lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommandSpec {
    /// Sub-command name
    #[serde(rename = "use")]
    pub use_: String,
    /// One-line help text
    #[serde(default)]
    pub short: String,
    /// HTTP(S) location of the executable
    pub binary_url: String,
    /// Expected SHA-256 of the executable (hex)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, version: Version, command: PluginCommandSpec) -> Self {
        Self {
            name: name.into(),
            version,
            command,
        }
    }

    /// Registry key: `name==version`
    pub fn key(&self) -> String {
        plugin_key(&self.name, &self.version)
    }

    /// Exact-version pin recorded in a site's constraint map.
    pub fn pin(&self) -> String {
        format!("={}", self.version)
    }
}

pub fn plugin_key(name: &str, version: &Version) -> String {
    format!("{}=={}", name, version)
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
