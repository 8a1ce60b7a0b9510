//! Plugin Module
//!
//! Versioned sub-command plugins.
//!
//! - `types`: plugin descriptors as stored in the configuration
//! - `resolver`: selection of installed versions for a site's constraints
//! - `installer`: binary download to `<plugins dir>/<name>-v<version>`
//! - `sync`: installs what an activated site expects
//! - `dispatch`: process handoff to a plugin binary

pub mod dispatch;
pub mod installer;
pub mod resolver;
pub mod sync;
pub mod types;

// Re-exports
pub use dispatch::PluginCommand;
pub use installer::{binary_path, Downloader, HttpDownloader, PluginInstaller};
pub use resolver::{resolve, ResolvedPlugin, VersionRange};
pub use sync::{sync, SyncReport};
pub use types::{plugin_key, PluginCommandSpec, PluginDescriptor};
