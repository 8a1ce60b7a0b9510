//! Site activation
//!
//! Binds working directories to remote sites. A directory holds at most one
//! activation; replacing it requires `force`.

use std::path::{Path, PathBuf};

use crate::config::{site_key, ConfigStore, SiteConfig};
use crate::error::{KelError, Result};
use crate::remote::{lookup_error, PlatformApi};
use crate::uri::Uri;

/// Result of a successful activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Activated,
    /// `force` replaced an existing activation
    Replaced { previous: Uri },
}

/// Activate `uri` for `dir`.
///
/// The resource group and site must both exist upstream before anything is
/// written. Without `force`, an existing activation for `dir` is an error
/// whether or not it names the same site.
pub fn activate<A>(
    store: &ConfigStore,
    api: &A,
    dir: &Path,
    uri: &Uri,
    force: bool,
) -> Result<Activation>
where
    A: PlatformApi + ?Sized,
{
    let (rg, site) = match (uri.resource_group(), uri.site()) {
        (Some(rg), Some(site)) if !rg.is_empty() && !site.is_empty() => (rg, site),
        _ => {
            return Err(KelError::MissingSiteTarget {
                uri: uri.to_string(),
            })
        }
    };

    if !force {
        ensure_unactivated(store, dir, uri)?;
    }
    let key = site_key(dir);

    api.get_resource_group(rg)
        .map_err(|e| lookup_error("resource group", rg, e))?;
    api.get_site(rg, site)
        .map_err(|e| lookup_error("site", site, e))?;

    let activation = store.update(|config| {
        let existing = config.sites.get(&key).cloned();
        if !force {
            check_unactivated(existing.clone(), uri)?;
        }

        let entry = match existing {
            // Keep plugin pins when re-activating the same site.
            Some(previous) if previous.uri.equals(uri) => SiteConfig {
                uri: uri.clone(),
                plugins: previous.plugins,
            },
            _ => SiteConfig::new(uri.clone()),
        };
        let previous = config.sites.insert(key.clone(), entry);

        Ok(match previous {
            Some(previous) => Activation::Replaced {
                previous: previous.uri,
            },
            None => Activation::Activated,
        })
    })?;

    tracing::info!(dir = %dir.display(), site = %uri, "activated site");
    Ok(activation)
}

/// Fail with `AlreadyActivated` if `dir` already has an activation.
///
/// Purely local, so callers can run it before any login or remote call.
pub fn ensure_unactivated(store: &ConfigStore, dir: &Path, uri: &Uri) -> Result<()> {
    let key = site_key(dir);
    check_unactivated(store.read(|config| config.sites.get(&key).cloned()), uri)
}

fn check_unactivated(existing: Option<SiteConfig>, uri: &Uri) -> Result<()> {
    match existing {
        Some(site) => Err(KelError::AlreadyActivated {
            same_site: site.uri.equals(uri),
            existing: site.uri,
        }),
        None => Ok(()),
    }
}

/// Remove the activation of `dir`, returning it.
pub fn deactivate(store: &ConfigStore, dir: &Path) -> Result<SiteConfig> {
    let key = site_key(dir);
    if store.read(|config| !config.sites.contains_key(&key)) {
        return Err(KelError::NothingToDeactivate {
            path: dir.to_path_buf(),
        });
    }

    let removed = store.update(|config| {
        config
            .sites
            .remove(&key)
            .ok_or_else(|| KelError::NothingToDeactivate {
                path: dir.to_path_buf(),
            })
    })?;

    tracing::info!(dir = %dir.display(), site = %removed.uri, "deactivated site");
    Ok(removed)
}

/// Site activated for `dir` or its nearest activated ancestor.
pub fn current(store: &ConfigStore, dir: &Path) -> Option<(PathBuf, SiteConfig)> {
    store.read(|config| {
        config
            .activated_site(dir)
            .map(|(path, site)| (path, site.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::fs;

    use tempfile::TempDir;

    use crate::plugin::types::PluginDescriptor;
    use crate::remote::{RemoteError, RemoteResult, ResourceGroup, Site};

    /// In-memory platform with a fixed set of resource groups and sites.
    #[derive(Default)]
    struct FakePlatform {
        groups: BTreeSet<String>,
        sites: BTreeSet<(String, String)>,
        calls: RefCell<Vec<String>>,
    }

    impl FakePlatform {
        fn with_site(rg: &str, site: &str) -> Self {
            let mut platform = Self::default();
            platform.groups.insert(rg.to_string());
            platform.sites.insert((rg.to_string(), site.to_string()));
            platform
        }
    }

    impl PlatformApi for FakePlatform {
        fn get_resource_group(&self, name: &str) -> RemoteResult<ResourceGroup> {
            self.calls.borrow_mut().push(format!("rg:{}", name));
            if self.groups.contains(name) {
                Ok(ResourceGroup {
                    name: name.to_string(),
                })
            } else {
                Err(RemoteError::NotFound)
            }
        }

        fn list_resource_groups(&self) -> RemoteResult<Vec<ResourceGroup>> {
            Ok(self
                .groups
                .iter()
                .map(|name| ResourceGroup { name: name.clone() })
                .collect())
        }

        fn create_resource_group(
            &self,
            _: &str,
            _: Option<&str>,
        ) -> RemoteResult<ResourceGroup> {
            Err(RemoteError::Status {
                code: 403,
                body: String::new(),
            })
        }

        fn get_site(&self, rg: &str, name: &str) -> RemoteResult<Site> {
            self.calls.borrow_mut().push(format!("site:{}/{}", rg, name));
            if self.sites.contains(&(rg.to_string(), name.to_string())) {
                Ok(Site {
                    name: name.to_string(),
                    resource_group: Some(ResourceGroup {
                        name: rg.to_string(),
                    }),
                })
            } else {
                Err(RemoteError::NotFound)
            }
        }

        fn list_sites(&self, _: &str) -> RemoteResult<Vec<Site>> {
            Ok(Vec::new())
        }

        fn create_site(&self, _: &str, _: &str) -> RemoteResult<Site> {
            Err(RemoteError::Transport("offline".to_string()))
        }

        fn site_plugins(&self, _: &str, _: &str) -> RemoteResult<Vec<PluginDescriptor>> {
            Ok(Vec::new())
        }
    }

    fn setup() -> (TempDir, ConfigStore, PathBuf) {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::load(temp.path().join(".kel")).unwrap();
        let work = temp.path().join("work");
        (temp, store, work)
    }

    #[test]
    fn test_activate_records_site() {
        let (_temp, store, work) = setup();
        let api = FakePlatform::with_site("acme", "web");
        let uri = Uri::parse("//example.com/acme/web").unwrap();

        let outcome = activate(&store, &api, &work, &uri, false).unwrap();
        assert_eq!(outcome, Activation::Activated);

        let (dir, site) = current(&store, &work).unwrap();
        assert_eq!(dir, work);
        assert_eq!(site.uri, uri);
        assert!(site.plugins.is_empty());
        assert_eq!(*api.calls.borrow(), vec!["rg:acme", "site:acme/web"]);
    }

    #[test]
    fn test_activate_same_site_twice_fails() {
        let (_temp, store, work) = setup();
        let api = FakePlatform::with_site("acme", "web");
        let uri = Uri::parse("//example.com/acme/web").unwrap();

        activate(&store, &api, &work, &uri, false).unwrap();
        let before = fs::read(store.path()).unwrap();

        match activate(&store, &api, &work, &uri, false) {
            Err(KelError::AlreadyActivated {
                same_site,
                existing,
            }) => {
                assert!(same_site);
                assert_eq!(existing, uri);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(current(&store, &work).unwrap().1.uri, uri);
    }

    #[test]
    fn test_ensure_unactivated_is_local() {
        let (_temp, store, work) = setup();
        let api = FakePlatform::with_site("acme", "web");
        let uri = Uri::parse("//example.com/acme/web").unwrap();
        let other = Uri::parse("//example.com/acme/api").unwrap();

        ensure_unactivated(&store, &work, &uri).unwrap();
        activate(&store, &api, &work, &uri, false).unwrap();

        match ensure_unactivated(&store, &work, &other) {
            Err(KelError::AlreadyActivated { same_site, .. }) => assert!(!same_site),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(ensure_unactivated(&store, &work.join("nested"), &uri).is_ok());
    }

    #[test]
    fn test_activate_different_site_needs_force() {
        let (_temp, store, work) = setup();
        let mut api = FakePlatform::with_site("acme", "web");
        api.sites.insert(("acme".to_string(), "api".to_string()));
        let web = Uri::parse("//example.com/acme/web").unwrap();
        let other = Uri::parse("//example.com/acme/api").unwrap();

        activate(&store, &api, &work, &web, false).unwrap();

        let err = activate(&store, &api, &work, &other, false).unwrap_err();
        assert!(matches!(
            err,
            KelError::AlreadyActivated {
                same_site: false,
                ..
            }
        ));
        assert!(err.to_string().contains("//example.com/acme/web"));

        let outcome = activate(&store, &api, &work, &other, true).unwrap();
        assert_eq!(outcome, Activation::Replaced { previous: web });
        assert_eq!(current(&store, &work).unwrap().1.uri, other);
    }

    #[test]
    fn test_forced_reactivation_keeps_pins() {
        let (_temp, store, work) = setup();
        let api = FakePlatform::with_site("acme", "web");
        let uri = Uri::parse("//example.com/acme/web").unwrap();

        activate(&store, &api, &work, &uri, false).unwrap();
        store
            .update(|config| {
                config
                    .sites
                    .get_mut(&site_key(&work))
                    .unwrap()
                    .plugins
                    .insert("kel-build".to_string(), "=0.1.0".to_string());
                Ok(())
            })
            .unwrap();

        activate(&store, &api, &work, &uri, true).unwrap();
        let site = current(&store, &work).unwrap().1;
        assert_eq!(site.plugins["kel-build"], "=0.1.0");
    }

    #[test]
    fn test_activate_missing_remote_writes_nothing() {
        let (_temp, store, work) = setup();
        let api = FakePlatform::with_site("acme", "web");
        let before = fs::read(store.path()).unwrap();

        let missing_rg = Uri::parse("//example.com/nope/web").unwrap();
        assert!(matches!(
            activate(&store, &api, &work, &missing_rg, false),
            Err(KelError::RemoteNotFound {
                kind: "resource group",
                ..
            })
        ));

        let missing_site = Uri::parse("//example.com/acme/nope").unwrap();
        assert!(matches!(
            activate(&store, &api, &work, &missing_site, false),
            Err(KelError::RemoteNotFound { kind: "site", .. })
        ));

        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert!(current(&store, &work).is_none());
    }

    #[test]
    fn test_activate_requires_site() {
        let (_temp, store, work) = setup();
        let api = FakePlatform::with_site("acme", "web");
        let uri = Uri::parse("//example.com/acme").unwrap();

        assert!(matches!(
            activate(&store, &api, &work, &uri, false),
            Err(KelError::MissingSiteTarget { .. })
        ));
        assert!(api.calls.borrow().is_empty());
    }

    #[test]
    fn test_deactivate() {
        let (_temp, store, work) = setup();
        let api = FakePlatform::with_site("acme", "web");
        let uri = Uri::parse("//example.com/acme/web").unwrap();

        activate(&store, &api, &work, &uri, false).unwrap();
        let removed = deactivate(&store, &work).unwrap();
        assert_eq!(removed.uri, uri);
        assert!(current(&store, &work).is_none());
    }

    #[test]
    fn test_deactivate_unactivated_leaves_file_untouched() {
        let (_temp, store, work) = setup();
        let before = fs::read(store.path()).unwrap();
        let modified = fs::metadata(store.path()).unwrap().modified().unwrap();

        assert!(matches!(
            deactivate(&store, &work),
            Err(KelError::NothingToDeactivate { .. })
        ));

        assert_eq!(fs::read(store.path()).unwrap(), before);
        assert_eq!(
            fs::metadata(store.path()).unwrap().modified().unwrap(),
            modified
        );
    }

    #[test]
    fn test_fresh_environment_scenario() {
        let temp = TempDir::new().unwrap();
        let home = temp.path().join(".kel");
        let work = temp.path().join("myservice");

        // First invocation creates the directory and a default file.
        let store = ConfigStore::load(&home).unwrap();
        assert!(home.join("config.json").is_file());
        assert!(store.snapshot().cluster.is_none());

        // config set cluster //example.com/acme
        store
            .update(|config| config.set("cluster", "//example.com/acme"))
            .unwrap();
        let store = ConfigStore::load(&home).unwrap();
        let cluster = store.snapshot().cluster.unwrap();
        assert_eq!(cluster.host(), "example.com");
        assert_eq!(cluster.resource_group(), Some("acme"));
        assert_eq!(cluster.site(), None);

        // activate myservice
        let uri = Uri::site_target("myservice", Some(&cluster)).unwrap();
        assert_eq!(uri.to_string(), "//example.com/acme/myservice");

        let empty = FakePlatform::with_site("acme", "other");
        assert!(activate(&store, &empty, &work, &uri, false).is_err());
        assert!(current(&store, &work).is_none());

        let api = FakePlatform::with_site("acme", "myservice");
        activate(&store, &api, &work, &uri, false).unwrap();

        let config = ConfigStore::load(&home).unwrap().snapshot();
        assert_eq!(config.sites[&site_key(&work)].uri, uri);
    }
}
