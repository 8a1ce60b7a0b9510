use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::ExitCode;

use clap::{Arg, CommandFactory, FromArgMatches};
use clap_complete::generate;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use kel_core::auth::{DEFAULT_CLIENT_ID, DEFAULT_TOKEN_URL};
use kel_core::plugin::{self, PluginCommand, PluginInstaller};
use kel_core::remote::{lookup_error, remote_error};
use kel_core::site::{self, Activation};
use kel_core::{
    AuthMode, ConfigStore, CredentialCache, HttpPlatformClient, KelError, PasswordGrantProvider,
    PlatformApi, Result, Uri,
};

mod args;
mod prompt;
use args::{Cli, Commands, ConfigAction, PluginAction, ResourceGroupAction, Shell, SiteAction};
use prompt::TerminalPrompter;

const LOG_ENV: &str = "KEL_LOG";
const TOKEN_URL_ENV: &str = "KEL_TOKEN_URL";
const CLIENT_ID_ENV: &str = "KEL_CLIENT_ID";

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "[ERROR]".red().bold(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run() -> Result<()> {
    let raw: Vec<OsString> = std::env::args_os().collect();
    let (verbose, quiet) = log_flags(&raw);
    init_logging(verbose, quiet);

    let store = ConfigStore::load(ConfigStore::default_dir()?)?;
    let cwd = std::env::current_dir()?;
    let plugins = load_plugins(&store, &cwd)?;

    if let Some((plugin, args)) = plugin_invocation(&plugins, &raw) {
        match plugin.exec(args)? {}
    }

    let matches = build_command(&plugins).get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    tracing::debug!(verbose = cli.verbose, quiet = cli.quiet, "parsed arguments");

    match cli.command {
        Some(Commands::Config { action }) => handle_config(action, &store),
        Some(Commands::ResourceGroups { action }) => handle_resource_groups(action, &store),
        Some(Commands::Sites { action }) => handle_sites(action, &store),
        Some(Commands::Activate { site, force }) => handle_activate(&store, &cwd, &site, force),
        Some(Commands::Deactivate) => handle_deactivate(&store, &cwd),
        Some(Commands::Plugins { action }) => handle_plugins(action, &store, &cwd),
        Some(Commands::Completions { shell }) => {
            handle_completions(shell, &plugins);
            Ok(())
        }
        None => {
            build_command(&plugins).print_help()?;
            Ok(())
        }
    }
}

/// `--verbose` / `--quiet` as given anywhere before `--`.
///
/// Read ahead of clap so that config loading and plugin resolution are
/// already logged.
fn log_flags(raw: &[OsString]) -> (bool, bool) {
    raw.iter()
        .skip(1)
        .take_while(|arg| arg.to_str() != Some("--"))
        .fold((false, false), |(verbose, quiet), arg| match arg.to_str() {
            Some("-v" | "--verbose") => (true, quiet),
            Some("-q" | "--quiet") => (verbose, true),
            _ => (verbose, quiet),
        })
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "kel_core=debug,kel=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn success(message: &str) {
    println!("{} {}", "Success:".green(), message);
}

fn warning(message: &str) {
    eprintln!("{} {}", "[WARN]".yellow().bold(), message);
}

// ========== Plugins ==========

/// Resolve the plugins required by the site activated for `cwd`.
fn load_plugins(store: &ConfigStore, cwd: &Path) -> Result<Vec<PluginCommand>> {
    let Some((_, site)) = site::current(store, cwd) else {
        return Ok(Vec::new());
    };
    let resolved = store.read(|config| plugin::resolve(config, &site, &store.plugins_dir()))?;
    Ok(resolved.into_iter().map(PluginCommand::from).collect())
}

/// The plugin named by the first non-flag argument, with everything after it.
fn plugin_invocation<'a>(
    plugins: &'a [PluginCommand],
    raw: &'a [OsString],
) -> Option<(&'a PluginCommand, &'a [OsString])> {
    let position = raw
        .iter()
        .skip(1)
        .position(|arg| !arg.to_string_lossy().starts_with('-'))?
        + 1;
    let name = raw[position].to_str()?;
    let plugin = plugins.iter().find(|p| p.name() == name)?;
    Some((plugin, &raw[position + 1..]))
}

/// The built-in commands plus one sub-command per resolved plugin.
fn build_command(plugins: &[PluginCommand]) -> clap::Command {
    plugins
        .iter()
        .fold(Cli::command(), |cmd, plugin| cmd.subcommand(plugin_subcommand(plugin)))
}

fn plugin_subcommand(plugin: &PluginCommand) -> clap::Command {
    clap::Command::new(plugin.name().to_string())
        .about(plugin.about().to_string())
        .disable_help_flag(true)
        .arg(
            Arg::new("args")
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true)
                .value_parser(clap::value_parser!(OsString)),
        )
}

fn handle_plugins(action: PluginAction, store: &ConfigStore, cwd: &Path) -> Result<()> {
    match action {
        PluginAction::List => {
            let config = store.snapshot();
            if config.plugins.is_empty() {
                println!("No plugins installed.");
                return Ok(());
            }
            let pinned = config
                .activated_site(cwd)
                .map(|(_, site)| site.plugins.clone())
                .unwrap_or_default();

            println!();
            for plugin in config.plugins.values() {
                let marker = match pinned.get(&plugin.name) {
                    Some(range) => format!(" (site requires {})", range).green().to_string(),
                    None => String::new(),
                };
                println!(
                    "  {} {}{}",
                    plugin.name.cyan().bold(),
                    plugin.version,
                    marker
                );
                println!("    {} - {}", plugin.command.use_, plugin.command.short);
            }
            println!();
        }
        PluginAction::Sync => {
            let (_, site) = site::current(store, cwd).ok_or_else(|| KelError::NotActivated {
                path: cwd.to_path_buf(),
            })?;
            let client = connect(store, &site.uri)?;
            sync_plugins(store, &client, cwd)?;
        }
    }

    Ok(())
}

fn sync_plugins(store: &ConfigStore, api: &dyn PlatformApi, cwd: &Path) -> Result<()> {
    let installer = PluginInstaller::new(store.plugins_dir());
    print!("Fetching plugins... ");
    let report = match plugin::sync(store, api, &installer, cwd) {
        Ok(report) => report,
        Err(e) => {
            println!("{}", "error".red());
            return Err(e);
        }
    };
    println!("{}", "done".green());

    for plugin in &report.installed {
        println!(
            "Installed plugin {}: {} (version: {})",
            plugin.name.cyan(),
            "installed".green(),
            plugin.version.to_string().white().bold()
        );
    }
    Ok(())
}

// ========== Remote ==========

/// Client for the cluster of `uri`, logging in first unless auth is off.
fn connect(store: &ConfigStore, uri: &Uri) -> Result<HttpPlatformClient> {
    if store.read(|config| config.auth) == AuthMode::None {
        return Ok(HttpPlatformClient::new(uri, None));
    }

    let token_url = std::env::var(TOKEN_URL_ENV).unwrap_or_else(|_| DEFAULT_TOKEN_URL.into());
    let client_id = std::env::var(CLIENT_ID_ENV).unwrap_or_else(|_| DEFAULT_CLIENT_ID.into());
    let provider = PasswordGrantProvider::new(token_url, client_id);
    let credential = CredentialCache::new(provider, TerminalPrompter, store).token()?;

    Ok(HttpPlatformClient::new(uri, Some(&credential)))
}

fn cluster_target(store: &ConfigStore, arg: Option<&str>) -> Result<Uri> {
    match arg {
        Some(text) => Uri::parse(text),
        None => store
            .read(|config| config.cluster.clone())
            .ok_or(KelError::NoDefaultCluster),
    }
}

fn handle_resource_groups(action: ResourceGroupAction, store: &ConfigStore) -> Result<()> {
    match action {
        ResourceGroupAction::Create {
            resource_group,
            token,
        } => {
            let cluster = store.read(|config| config.cluster.clone());
            let uri = Uri::resource_group_target(&resource_group, cluster.as_ref())?;
            let name = uri.resource_group().unwrap_or_default();
            let client = connect(store, &uri)?;
            let created = client
                .create_resource_group(name, token.as_deref())
                .map_err(|e| remote_error("create resource group", e))?;
            success(&format!("created {:?} resource group.", created.name));
        }
        ResourceGroupAction::List { cluster } => {
            let uri = cluster_target(store, cluster.as_deref())?;
            let client = connect(store, &uri)?;
            let groups = client
                .list_resource_groups()
                .map_err(|e| remote_error("list resource groups", e))?;
            if groups.is_empty() {
                println!("No resource groups found.");
            }
            for group in groups {
                println!("{}", group.name);
            }
        }
    }

    Ok(())
}

fn handle_sites(action: SiteAction, store: &ConfigStore) -> Result<()> {
    match action {
        SiteAction::Create { site } => {
            let cluster = store.read(|config| config.cluster.clone());
            let uri = Uri::site_target(&site, cluster.as_ref())?;
            let (rg, name) = (
                uri.resource_group().unwrap_or_default(),
                uri.site().unwrap_or_default(),
            );
            let client = connect(store, &uri)?;
            client
                .get_resource_group(rg)
                .map_err(|e| lookup_error("resource group", rg, e))?;
            let created = client
                .create_site(rg, name)
                .map_err(|e| remote_error("create site", e))?;
            success(&format!("created \"{}/{}\" site.", rg, created.name));
        }
        SiteAction::List {
            resource_group_uri,
            resource_group,
        } => {
            let uri = cluster_target(store, resource_group_uri.as_deref())?;
            let rg = resource_group
                .as_deref()
                .or(uri.resource_group())
                .ok_or_else(|| KelError::MissingResourceGroup {
                    uri: uri.to_string(),
                })?
                .to_string();
            let client = connect(store, &uri)?;
            let sites = client
                .list_sites(&rg)
                .map_err(|e| lookup_error("resource group", &rg, e))?;
            if sites.is_empty() {
                println!("No sites found in {}.", rg);
            }
            for site in sites {
                println!("{}/{}", rg, site.name);
            }
        }
    }

    Ok(())
}

// ========== Activation ==========

fn handle_activate(store: &ConfigStore, cwd: &Path, arg: &str, force: bool) -> Result<()> {
    let cluster = store.read(|config| config.cluster.clone());
    let uri = Uri::site_target(arg, cluster.as_ref())?;
    if !force {
        site::ensure_unactivated(store, cwd, &uri)?;
    }
    let client = connect(store, &uri)?;

    activate_site(store, &client, cwd, &uri, force)?;
    Ok(())
}

/// Activate `uri` and fetch its plugins. A failed plugin sync leaves the
/// activation in place and is only reported.
fn activate_site(
    store: &ConfigStore,
    api: &dyn PlatformApi,
    cwd: &Path,
    uri: &Uri,
    force: bool,
) -> Result<Activation> {
    let outcome = site::activate(store, api, cwd, uri, force)?;
    if let Activation::Replaced { previous } = &outcome {
        if !previous.equals(uri) {
            println!("Replaced activation of {}.", previous);
        }
    }
    success(&format!(
        "{}/{} has been activated.",
        uri.resource_group().unwrap_or_default(),
        uri.site().unwrap_or_default()
    ));

    if let Err(e) = sync_plugins(store, api, cwd) {
        warning(&format!(
            "plugins were not synced ({}); run `kel plugins sync` to retry.",
            e
        ));
    }
    Ok(outcome)
}

fn handle_deactivate(store: &ConfigStore, cwd: &Path) -> Result<()> {
    let removed = site::deactivate(store, cwd)?;
    success(&format!("{} has been deactivated.", removed.uri));
    Ok(())
}

// ========== Config ==========

fn handle_config(action: ConfigAction, store: &ConfigStore) -> Result<()> {
    match action {
        ConfigAction::Get { key } => match store.read(|config| config.get(&key)) {
            Some(value) => println!("{}", value),
            None => return Err(KelError::ConfigKeyNotFound { key }),
        },
        ConfigAction::Set { key, value } => {
            store.update(|config| config.set(&key, &value))?;
            println!("{} {} = {}", "Set:".green(), key, value);
        }
        ConfigAction::List => {
            println!();
            for (key, value) in store.read(|config| config.list()) {
                println!("{} = {}", key.cyan(), value);
            }
            println!();
        }
        ConfigAction::Path => {
            println!("{}", store.path().display());
        }
    }

    Ok(())
}

fn handle_completions(shell: Shell, plugins: &[PluginCommand]) {
    let mut cmd = build_command(plugins);
    let shell = match shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
        Shell::Elvish => clap_complete::Shell::Elvish,
    };
    generate(shell, &mut cmd, "kel", &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use kel_core::plugin::{PluginCommandSpec, PluginDescriptor, ResolvedPlugin};
    use kel_core::remote::RemoteResult;
    use kel_core::{RemoteError, ResourceGroup, Site};
    use semver::Version;
    use tempfile::TempDir;

    /// Platform knowing one site but serving no plugin listing.
    struct NoPluginEndpoint;

    impl PlatformApi for NoPluginEndpoint {
        fn get_resource_group(&self, name: &str) -> RemoteResult<ResourceGroup> {
            Ok(ResourceGroup {
                name: name.to_string(),
            })
        }
        fn list_resource_groups(&self) -> RemoteResult<Vec<ResourceGroup>> {
            Ok(Vec::new())
        }
        fn create_resource_group(&self, _: &str, _: Option<&str>) -> RemoteResult<ResourceGroup> {
            Err(RemoteError::NotFound)
        }
        fn get_site(&self, _: &str, name: &str) -> RemoteResult<Site> {
            Ok(Site {
                name: name.to_string(),
                resource_group: None,
            })
        }
        fn list_sites(&self, _: &str) -> RemoteResult<Vec<Site>> {
            Ok(Vec::new())
        }
        fn create_site(&self, _: &str, _: &str) -> RemoteResult<Site> {
            Err(RemoteError::NotFound)
        }
        fn site_plugins(&self, _: &str, _: &str) -> RemoteResult<Vec<PluginDescriptor>> {
            Err(RemoteError::NotFound)
        }
    }

    fn build_plugin() -> PluginCommand {
        PluginCommand::from(ResolvedPlugin {
            descriptor: PluginDescriptor::new(
                "kel-build",
                Version::new(0, 1, 0),
                PluginCommandSpec {
                    use_: "build [flags]".to_string(),
                    short: "Build me".to_string(),
                    binary_url: "http://localhost/kel-build".to_string(),
                    sha256: None,
                },
            ),
            binary_path: PathBuf::from("/tmp/plugins/kel-build-v0.1.0"),
        })
    }

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_plugin_invocation_passes_remaining_args() {
        let plugins = vec![build_plugin()];
        let raw = os(&["kel", "build", "--release", "-v"]);

        let (plugin, args) = plugin_invocation(&plugins, &raw).unwrap();
        assert_eq!(plugin.name(), "build");
        assert_eq!(args, os(&["--release", "-v"]).as_slice());
    }

    #[test]
    fn test_plugin_invocation_ignores_builtin_commands() {
        let plugins = vec![build_plugin()];
        assert!(plugin_invocation(&plugins, &os(&["kel", "-v", "config", "list"])).is_none());
        assert!(plugin_invocation(&plugins, &os(&["kel"])).is_none());
        assert!(plugin_invocation(&plugins, &os(&["kel", "--help"])).is_none());
    }

    #[test]
    fn test_log_flags() {
        assert_eq!(log_flags(&os(&["kel", "config", "list"])), (false, false));
        assert_eq!(log_flags(&os(&["kel", "-v", "config", "list"])), (true, false));
        assert_eq!(log_flags(&os(&["kel", "plugins", "list", "--quiet"])), (false, true));
        assert_eq!(log_flags(&os(&["kel", "build", "--", "-v"])), (false, false));
    }

    #[test]
    fn test_activation_survives_failed_plugin_sync() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::load(temp.path().join(".kel")).unwrap();
        let work = temp.path().join("work");
        let uri = Uri::parse("//example.com/acme/web").unwrap();

        let outcome = activate_site(&store, &NoPluginEndpoint, &work, &uri, false).unwrap();
        assert_eq!(outcome, Activation::Activated);

        let (dir, site) = site::current(&store, &work).unwrap();
        assert_eq!(dir, work);
        assert_eq!(site.uri, uri);
        assert!(site.plugins.is_empty());
    }

    #[test]
    fn test_plugin_subcommand_accepts_any_args() {
        let plugin = build_plugin();
        let cmd = clap::Command::new("kel").subcommand(plugin_subcommand(&plugin));
        let matches = cmd
            .try_get_matches_from(["kel", "build", "x", "--flag", "-h"])
            .unwrap();
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "build");
        let args: Vec<&OsString> = sub.get_many::<OsString>("args").unwrap().collect();
        assert_eq!(args.len(), 3);
    }
}
