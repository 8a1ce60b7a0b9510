pub mod auth;
pub mod config;
pub mod credential;
pub mod error;
pub mod plugin;
pub mod remote;
pub mod site;
pub mod uri;

pub use auth::PasswordGrantProvider;
pub use config::{AuthMode, Config, ConfigStore, SiteConfig};
pub use credential::{Credential, CredentialCache, CredentialProvider, Prompter, ProviderError};
pub use error::{KelError, Result};
pub use plugin::{
    PluginCommand, PluginCommandSpec, PluginDescriptor, PluginInstaller, ResolvedPlugin,
    SyncReport, VersionRange,
};
pub use remote::{HttpPlatformClient, PlatformApi, RemoteError, ResourceGroup, Site};
pub use site::Activation;
pub use uri::Uri;
