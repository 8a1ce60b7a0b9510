use std::path::PathBuf;

use thiserror::Error;

use crate::uri::Uri;

#[derive(Debug, Error)]
pub enum KelError {
    #[error("Invalid URI '{input}': {reason}")]
    MalformedUri { input: String, reason: String },

    #[error("First argument must be a URI or a default cluster must be set")]
    NoDefaultCluster,

    #[error("Must specify resource group and site in URI (given: {uri})")]
    MissingSiteTarget { uri: String },

    #[error("Must specify resource group in URI (given: {uri})")]
    MissingResourceGroup { uri: String },

    #[error("Site plugin '{plugin}' version range '{range}' is invalid")]
    InvalidVersionRange { plugin: String, range: String },

    #[error("Plugin matching {name} {range} was not found")]
    PluginNotFound { name: String, range: String },

    #[error("{}", already_activated_message(.existing, .same_site))]
    AlreadyActivated { existing: Uri, same_site: bool },

    #[error("Nothing to deactivate: {path} is not activated")]
    NothingToDeactivate { path: PathBuf },

    #[error("No site is activated for {path}")]
    NotActivated { path: PathBuf },

    #[error("{kind} '{name}' does not exist")]
    RemoteNotFound { kind: &'static str, name: String },

    #[error("Failed to {action} (error: {message})")]
    Remote { action: String, message: String },

    #[error("Failed to download {url}: {message}")]
    Network { url: String, message: String },

    #[error("Checksum mismatch for plugin '{plugin}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        plugin: String,
        expected: String,
        actual: String,
    },

    #[error("Failed executing plugin '{name}' binary {path}: {source}")]
    PluginExec {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load configuration {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Config key not found: {key}")]
    ConfigKeyNotFound { key: String },

    #[error("Invalid authentication type: '{value}' (expected 'none' or 'cluster')")]
    InvalidAuthMode { value: String },

    #[error("Authentication failed: {0}")]
    Credential(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Home directory not found")]
    HomeNotFound,
}

pub type Result<T> = std::result::Result<T, KelError>;

fn already_activated_message(existing: &Uri, same_site: &bool) -> String {
    if *same_site {
        "This directory is already activated for the given site. Use --force to override."
            .to_string()
    } else {
        format!(
            "This directory is already activated for {}. Use --force to override.",
            existing
        )
    }
}

impl KelError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MalformedUri { .. }
            | Self::NoDefaultCluster
            | Self::MissingSiteTarget { .. }
            | Self::MissingResourceGroup { .. }
            | Self::ConfigKeyNotFound { .. }
            | Self::InvalidAuthMode { .. } => 2,
            Self::InvalidVersionRange { .. } | Self::PluginNotFound { .. } => 3,
            Self::AlreadyActivated { .. }
            | Self::NothingToDeactivate { .. }
            | Self::NotActivated { .. } => 4,
            Self::RemoteNotFound { .. } => 5,
            _ => 1,
        }
    }
}
