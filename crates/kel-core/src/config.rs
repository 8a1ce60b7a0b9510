use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::{KelError, Result};
use crate::plugin::types::PluginDescriptor;
use crate::uri::Uri;

const CONFIG_FILE: &str = "config.json";
const PLUGINS_DIR: &str = "plugins";
const HOME_ENV: &str = "KEL_HOME";

/// Whether remote calls need an interactive credential exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    #[default]
    Cluster,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::None => write!(f, "none"),
            AuthMode::Cluster => write!(f, "cluster"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = KelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(AuthMode::None),
            "cluster" => Ok(AuthMode::Cluster),
            _ => Err(KelError::InvalidAuthMode {
                value: s.to_string(),
            }),
        }
    }
}

/// Persisted client state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fallback address when a command omits an explicit URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Uri>,

    #[serde(default)]
    pub auth: AuthMode,

    /// Activated working directories
    #[serde(default)]
    pub sites: BTreeMap<String, SiteConfig>,

    /// Cached credentials keyed by provider id
    #[serde(default)]
    pub tokens: BTreeMap<String, Credential>,

    /// Installed plugins keyed by `name==version`
    #[serde(default)]
    pub plugins: BTreeMap<String, PluginDescriptor>,
}

/// A directory's activated site and the plugin versions it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub uri: Uri,

    /// Plugin name -> version range
    #[serde(default)]
    pub plugins: BTreeMap<String, String>,
}

impl SiteConfig {
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            plugins: BTreeMap::new(),
        }
    }

    /// Pin the site to exactly this plugin version.
    pub fn pin_plugin(&mut self, plugin: &PluginDescriptor) {
        self.plugins.insert(plugin.name.clone(), plugin.pin());
    }
}

/// Key under which a directory's activation is stored.
pub fn site_key(dir: &Path) -> String {
    dir.to_string_lossy().to_string()
}

impl Config {
    /// Register an installed plugin. Returns false if it was already known.
    pub fn add_plugin(&mut self, plugin: &PluginDescriptor) -> bool {
        let key = plugin.key();
        if self.plugins.contains_key(&key) {
            return false;
        }
        self.plugins.insert(key, plugin.clone());
        true
    }

    /// Activation for `dir`, or for its nearest activated ancestor.
    pub fn activated_site(&self, dir: &Path) -> Option<(PathBuf, &SiteConfig)> {
        dir.ancestors().find_map(|candidate| {
            self.sites
                .get(&site_key(candidate))
                .map(|site| (candidate.to_path_buf(), site))
        })
    }

    /// Get a config value by key
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "cluster" => Some(
                self.cluster
                    .as_ref()
                    .map(|uri| uri.to_string())
                    .unwrap_or_default(),
            ),
            "auth" => Some(self.auth.to_string()),
            _ => None,
        }
    }

    /// Set a config value by key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "cluster" => {
                self.cluster = Some(Uri::parse(value)?);
                Ok(())
            }
            "auth" => {
                self.auth = value.parse()?;
                Ok(())
            }
            _ => Err(KelError::ConfigKeyNotFound {
                key: key.to_string(),
            }),
        }
    }

    /// List all config keys with their current values
    pub fn list(&self) -> Vec<(String, String)> {
        ["cluster", "auth"]
            .iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }
}

/// Owner of the on-disk configuration.
///
/// Constructed once per process and handed to every component that needs
/// local state. All mutations go through [`ConfigStore::update`], which
/// serializes writers and flushes the whole file before the change becomes
/// visible.
#[derive(Debug)]
pub struct ConfigStore {
    dir: PathBuf,
    state: Mutex<Config>,
}

impl ConfigStore {
    /// `$KEL_HOME`, falling back to `~/.kel`
    pub fn default_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(HOME_ENV) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        let home = dirs::home_dir().ok_or(KelError::HomeNotFound)?;
        Ok(home.join(".kel"))
    }

    /// Load the configuration, creating the directory and a default file on
    /// first run.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(CONFIG_FILE);

        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            write_config(&path, &Config::default())?;
            tracing::debug!(path = %path.display(), "created default configuration");
        } else if !path.exists() {
            write_config(&path, &Config::default())?;
            tracing::debug!(path = %path.display(), "wrote default configuration");
        }

        let content = fs::read_to_string(&path)?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| KelError::ConfigParse {
                path: path.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(path = %path.display(), "loaded configuration");

        Ok(Self {
            dir,
            state: Mutex::new(config),
        })
    }

    /// Get config file path
    pub fn path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding installed plugin binaries
    pub fn plugins_dir(&self) -> PathBuf {
        self.dir.join(PLUGINS_DIR)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Config {
        self.lock().clone()
    }

    pub fn read<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        f(&self.lock())
    }

    /// Apply a mutation and persist it.
    ///
    /// The closure works on a copy. If it fails, or the file cannot be
    /// written, the in-memory state is left untouched and the error is
    /// returned. The lock is held until the write completes.
    pub fn update<T>(&self, f: impl FnOnce(&mut Config) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let value = f(&mut next)?;
        write_config(&self.path(), &next)?;
        *guard = next;
        Ok(value)
    }

    /// Overwrite the file with the current state.
    pub fn save(&self) -> Result<()> {
        let guard = self.lock();
        write_config(&self.path(), &guard)
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Full-file overwrite; a crash mid-write can leave a truncated file.
fn write_config(path: &Path, config: &Config) -> Result<()> {
    let content = serde_json::to_string_pretty(config).map_err(|e| KelError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::write(path, content)?;
    tracing::debug!(path = %path.display(), "saved configuration");
    Ok(())
}
