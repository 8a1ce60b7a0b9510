//! Plugin sync
//!
//! Brings the local registry in line with the plugins an activated site
//! expects.

use std::path::Path;

use crate::config::{site_key, Config, ConfigStore};
use crate::error::{KelError, Result};
use crate::plugin::installer::{Downloader, PluginInstaller};
use crate::plugin::types::PluginDescriptor;
use crate::remote::{remote_error, PlatformApi};

#[derive(Debug, Default)]
pub struct SyncReport {
    /// Newly downloaded plugins
    pub installed: Vec<PluginDescriptor>,
    /// Plugins that were already in the registry
    pub already_present: Vec<PluginDescriptor>,
}

/// Install every plugin the site activated for `dir` expects and pin the
/// site to those exact versions.
///
/// Each plugin is recorded only after its binary is in place. The first
/// failure stops the sync; plugins recorded before it stay recorded.
pub fn sync<A, D>(
    store: &ConfigStore,
    api: &A,
    installer: &PluginInstaller<D>,
    dir: &Path,
) -> Result<SyncReport>
where
    A: PlatformApi + ?Sized,
    D: Downloader,
{
    let (site_dir, site) = store
        .read(|config| {
            config
                .activated_site(dir)
                .map(|(site_dir, site)| (site_dir, site.clone()))
        })
        .ok_or_else(|| KelError::NotActivated {
            path: dir.to_path_buf(),
        })?;

    let (rg, name) = match (site.uri.resource_group(), site.uri.site()) {
        (Some(rg), Some(name)) => (rg, name),
        _ => {
            return Err(KelError::MissingSiteTarget {
                uri: site.uri.to_string(),
            })
        }
    };

    let expected = api
        .site_plugins(rg, name)
        .map_err(|e| remote_error("fetch site plugins", e))?;

    let mut report = SyncReport::default();
    for plugin in expected {
        let registered = store.read(|config| config.plugins.contains_key(&plugin.key()));

        if registered && installer.is_installed(&plugin) {
            record(store, &site_dir, &plugin, false)?;
            report.already_present.push(plugin);
            continue;
        }

        installer.install(&plugin)?;
        record(store, &site_dir, &plugin, true)?;
        report.installed.push(plugin);
    }

    Ok(report)
}

/// Register `plugin` and pin the site to it. An existing pin is only
/// replaced when `repin` is set, which is the case for fresh installs.
fn record(
    store: &ConfigStore,
    site_dir: &Path,
    plugin: &PluginDescriptor,
    repin: bool,
) -> Result<()> {
    let needs_write = store.read(|config| !is_recorded(config, site_dir, plugin, repin));
    if !needs_write {
        return Ok(());
    }

    store.update(|config| {
        config.add_plugin(plugin);
        let site = config
            .sites
            .get_mut(&site_key(site_dir))
            .ok_or_else(|| KelError::NotActivated {
                path: site_dir.to_path_buf(),
            })?;
        if repin || !site.plugins.contains_key(&plugin.name) {
            site.pin_plugin(plugin);
        }
        Ok(())
    })
}

fn is_recorded(
    config: &Config,
    site_dir: &Path,
    plugin: &PluginDescriptor,
    repin: bool,
) -> bool {
    let pinned = config
        .sites
        .get(&site_key(site_dir))
        .and_then(|site| site.plugins.get(&plugin.name));
    let pin_ok = match pinned {
        Some(range) => !repin || *range == plugin.pin(),
        None => false,
    };
    config.plugins.contains_key(&plugin.key()) && pin_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use semver::Version;
    use tempfile::TempDir;

    use crate::config::SiteConfig;
    use crate::plugin::types::PluginCommandSpec;
    use crate::remote::{RemoteError, RemoteResult, ResourceGroup, Site};
    use crate::uri::Uri;

    struct PluginCatalog(Vec<PluginDescriptor>);

    impl PlatformApi for PluginCatalog {
        fn get_resource_group(&self, name: &str) -> RemoteResult<ResourceGroup> {
            Ok(ResourceGroup {
                name: name.to_string(),
            })
        }
        fn list_resource_groups(&self) -> RemoteResult<Vec<ResourceGroup>> {
            Ok(Vec::new())
        }
        fn create_resource_group(&self, _: &str, _: Option<&str>) -> RemoteResult<ResourceGroup> {
            Err(RemoteError::Transport("read only".to_string()))
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
            Err(RemoteError::Transport("read only".to_string()))
        }
        fn site_plugins(&self, _: &str, _: &str) -> RemoteResult<Vec<PluginDescriptor>> {
            Ok(self.0.clone())
        }
    }

    struct Bytes;

    impl Downloader for Bytes {
        fn fetch(&self, url: &str, out: &mut dyn Write) -> Result<u64> {
            if url.contains("broken") {
                return Err(KelError::Network {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            out.write_all(b"bin")?;
            Ok(3)
        }
    }

    fn plugin(name: &str, version: &str) -> PluginDescriptor {
        PluginDescriptor::new(
            name,
            Version::parse(version).unwrap(),
            PluginCommandSpec {
                use_: name.trim_start_matches("kel-").to_string(),
                short: String::new(),
                binary_url: format!("http://localhost/{}", name),
                sha256: None,
            },
        )
    }

    fn activated_store(temp: &TempDir, work: &Path) -> ConfigStore {
        let store = ConfigStore::load(temp.path().join(".kel")).unwrap();
        store
            .update(|config| {
                config.sites.insert(
                    site_key(work),
                    SiteConfig::new(Uri::parse("//h/acme/web").unwrap()),
                );
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_sync_installs_and_pins() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        let store = activated_store(&temp, &work);
        let installer = PluginInstaller::with_downloader(store.plugins_dir(), Bytes);
        let api = PluginCatalog(vec![plugin("kel-build", "0.1.0")]);

        let report = sync(&store, &api, &installer, &work).unwrap();
        assert_eq!(report.installed.len(), 1);
        assert!(report.already_present.is_empty());

        let config = ConfigStore::load(temp.path().join(".kel")).unwrap().snapshot();
        assert!(config.plugins.contains_key("kel-build==0.1.0"));
        assert_eq!(
            config.sites[&site_key(&work)].plugins["kel-build"],
            "=0.1.0"
        );
        assert!(store.plugins_dir().join("kel-build-v0.1.0").is_file());

        let again = sync(&store, &api, &installer, &work).unwrap();
        assert!(again.installed.is_empty());
        assert_eq!(again.already_present.len(), 1);
    }

    #[test]
    fn test_new_version_replaces_pin() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        let store = activated_store(&temp, &work);
        let installer = PluginInstaller::with_downloader(store.plugins_dir(), Bytes);

        sync(&store, &PluginCatalog(vec![plugin("kel-build", "0.1.0")]), &installer, &work)
            .unwrap();
        let report = sync(
            &store,
            &PluginCatalog(vec![plugin("kel-build", "0.2.0")]),
            &installer,
            &work,
        )
        .unwrap();
        assert_eq!(report.installed.len(), 1);

        let config = store.snapshot();
        assert!(config.plugins.contains_key("kel-build==0.1.0"));
        assert!(config.plugins.contains_key("kel-build==0.2.0"));
        assert_eq!(
            config.sites[&site_key(&work)].plugins["kel-build"],
            "=0.2.0"
        );
    }

    #[test]
    fn test_present_plugin_keeps_existing_pin() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        let store = activated_store(&temp, &work);
        let installer = PluginInstaller::with_downloader(store.plugins_dir(), Bytes);
        let api = PluginCatalog(vec![plugin("kel-build", "1.2.0")]);

        sync(&store, &api, &installer, &work).unwrap();
        store
            .update(|config| {
                if let Some(site) = config.sites.get_mut(&site_key(&work)) {
                    site.plugins
                        .insert("kel-build".to_string(), ">=1.0.0 <2.0.0".to_string());
                }
                Ok(())
            })
            .unwrap();

        let report = sync(&store, &api, &installer, &work).unwrap();
        assert!(report.installed.is_empty());
        assert_eq!(report.already_present.len(), 1);
        assert_eq!(
            store.snapshot().sites[&site_key(&work)].plugins["kel-build"],
            ">=1.0.0 <2.0.0"
        );
    }

    #[test]
    fn test_failed_install_is_not_registered() {
        let temp = TempDir::new().unwrap();
        let work = temp.path().join("work");
        let store = activated_store(&temp, &work);
        let installer = PluginInstaller::with_downloader(store.plugins_dir(), Bytes);
        let api = PluginCatalog(vec![
            plugin("kel-build", "0.1.0"),
            plugin("kel-broken", "1.0.0"),
        ]);

        let result = sync(&store, &api, &installer, &work);
        assert!(matches!(result, Err(KelError::Network { .. })));

        let config = store.snapshot();
        assert!(config.plugins.contains_key("kel-build==0.1.0"));
        assert!(!config.plugins.contains_key("kel-broken==1.0.0"));
        assert!(!config.sites[&site_key(&work)]
            .plugins
            .contains_key("kel-broken"));
    }

    #[test]
    fn test_sync_requires_activation() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::load(temp.path()).unwrap();
        let installer = PluginInstaller::with_downloader(store.plugins_dir(), Bytes);
        let api = PluginCatalog(Vec::new());

        assert!(matches!(
            sync(&store, &api, &installer, &temp.path().join("nowhere")),
            Err(KelError::NotActivated { .. })
        ));
    }
}
