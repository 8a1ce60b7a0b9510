use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "kel")]
#[command(about = "Kel end-user command-line tool")]
#[command(version)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage resource groups
    ResourceGroups {
        #[command(subcommand)]
        action: ResourceGroupAction,
    },

    /// Manage sites
    Sites {
        #[command(subcommand)]
        action: SiteAction,
    },

    /// Activate a site for the current directory
    Activate {
        /// Site URI (//host/rg/site), `rg/site` or `site` under the default cluster
        site: String,

        /// Replace an existing activation
        #[arg(long)]
        force: bool,
    },

    /// Deactivate the site of the current directory
    Deactivate,

    /// Manage plugins
    Plugins {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (cluster, auth)
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key (cluster, auth)
        key: String,

        /// Value to set (e.g., "//example.com/acme" or "none")
        value: String,
    },

    /// List all config values
    List,

    /// Show config file path
    Path,
}

#[derive(Subcommand)]
pub enum ResourceGroupAction {
    /// Create a resource group
    Create {
        /// Resource group URI (//host/rg) or name under the default cluster
        resource_group: String,

        /// Token to create resource group
        #[arg(long)]
        token: Option<String>,
    },

    /// List resource groups
    List {
        /// Cluster URI (default: configured cluster)
        cluster: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum SiteAction {
    /// Create a site
    Create {
        /// Site URI (//host/rg/site), `rg/site` or `site` under the default cluster
        site: String,
    },

    /// List sites
    List {
        /// Resource group URI (default: configured cluster)
        resource_group_uri: Option<String>,

        /// Name of resource group
        #[arg(long)]
        resource_group: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PluginAction {
    /// List installed plugins
    List,

    /// Install the plugins the activated site expects
    Sync,
}
