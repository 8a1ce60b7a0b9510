//! Site addressing
//!
//! Parses and formats the `//host[/resource-group[/site]][?options]` scheme
//! used to name clusters, resource groups and sites.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KelError, Result};

const PREFIX: &str = "//";
const INSECURE_OPTION: &str = "insecure";

/// Structured form of `//host/resource-group/site?opts`.
///
/// A site can only be set together with its resource group. Equality and
/// hashing ignore `insecure`, which is a transport hint rather than part of
/// the remote identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "UriRecord", into = "UriRecord")]
pub struct Uri {
    host: String,
    resource_group: Option<String>,
    site: Option<String>,
    insecure: bool,
}

/// On-disk shape of a [`Uri`]; keeps the insecure flag across reloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
///
/// The capitalized aliases read files written by earlier clients.
struct UriRecord {
    #[serde(alias = "Host")]
    host: String,
    #[serde(
        default,
        alias = "ResourceGroup",
        skip_serializing_if = "Option::is_none"
    )]
    resource_group: Option<String>,
    #[serde(default, alias = "Site", skip_serializing_if = "Option::is_none")]
    site: Option<String>,
    #[serde(default, alias = "Insecure")]
    insecure: bool,
}

impl Uri {
    /// URI addressing a whole cluster.
    pub fn cluster(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            resource_group: None,
            site: None,
            insecure: false,
        }
    }

    pub fn with_resource_group(mut self, name: impl Into<String>) -> Self {
        self.resource_group = Some(name.into());
        self
    }

    /// Sets the site. Returns `None` when no resource group is set yet.
    pub fn with_site(mut self, name: impl Into<String>) -> Option<Self> {
        self.resource_group.as_ref()?;
        self.site = Some(name.into());
        Some(self)
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Parse `//host[/rg[/site]][?k=v&...]`.
    pub fn parse(value: &str) -> Result<Self> {
        let rest = value
            .strip_prefix(PREFIX)
            .ok_or_else(|| malformed(value, "must begin with //"))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        let insecure = query.map(parse_insecure).unwrap_or(false);

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() > 3 {
            return Err(malformed(value, "invalid format"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(malformed(value, "empty path segment"));
        }

        Ok(Self {
            host: parts[0].to_string(),
            resource_group: parts.get(1).map(|s| s.to_string()),
            site: parts.get(2).map(|s| s.to_string()),
            insecure,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn resource_group(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// Structural comparison of host, resource group and site.
    pub fn equals(&self, other: &Uri) -> bool {
        self.host == other.host
            && self.resource_group == other.resource_group
            && self.site == other.site
    }

    /// Resolve a resource-group argument: either a full URI or a bare name
    /// placed under the default cluster.
    pub fn resource_group_target(arg: &str, default_cluster: Option<&Uri>) -> Result<Uri> {
        let uri = match Uri::parse(arg) {
            Ok(uri) => uri,
            Err(_) => {
                let cluster = default_cluster.ok_or(KelError::NoDefaultCluster)?;
                if arg.is_empty() || arg.contains('/') {
                    return Err(malformed(arg, "invalid resource group name"));
                }
                Uri::cluster(cluster.host.clone())
                    .with_resource_group(arg)
                    .with_insecure(cluster.insecure)
            }
        };

        if uri.resource_group.is_none() {
            return Err(KelError::MissingResourceGroup {
                uri: uri.to_string(),
            });
        }
        Ok(uri)
    }

    /// Resolve a site argument: a full URI, `name` under the default
    /// cluster's resource group, or `rg/name` under the default cluster.
    pub fn site_target(arg: &str, default_cluster: Option<&Uri>) -> Result<Uri> {
        let uri = match Uri::parse(arg) {
            Ok(uri) => uri,
            Err(_) => {
                let cluster = default_cluster.ok_or(KelError::NoDefaultCluster)?;
                let mut uri = Uri {
                    site: None,
                    ..cluster.clone()
                };
                let parts: Vec<&str> = arg.split('/').collect();
                match parts.as_slice() {
                    [site] => uri.site = Some(site.to_string()),
                    [rg, site] => {
                        uri.resource_group = Some(rg.to_string());
                        uri.site = Some(site.to_string());
                    }
                    _ => return Err(malformed(arg, "invalid resource group / site pair")),
                }
                uri
            }
        };

        let named = |part: &Option<String>| part.as_deref().is_some_and(|s| !s.is_empty());
        if !named(&uri.resource_group) || !named(&uri.site) {
            return Err(KelError::MissingSiteTarget {
                uri: uri.to_string(),
            });
        }
        Ok(uri)
    }
}

fn malformed(input: &str, reason: &str) -> KelError {
    KelError::MalformedUri {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

/// Unparsable values fall back to `false`.
fn parse_insecure(query: &str) -> bool {
    let value = query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(key, _)| *key == INSECURE_OPTION)
        .map(|(_, value)| value);

    match value {
        None => false,
        Some("1" | "t" | "T" | "TRUE" | "true" | "True") => true,
        Some("0" | "f" | "F" | "FALSE" | "false" | "False") => false,
        Some(other) => {
            tracing::warn!(
                value = other,
                "ignoring unparsable insecure option; using a secure transport"
            );
            false
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PREFIX, self.host)?;
        if let Some(rg) = &self.resource_group {
            write!(f, "/{}", rg)?;
            if let Some(site) = &self.site {
                write!(f, "/{}", site)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = KelError;

    fn from_str(s: &str) -> Result<Self> {
        Uri::parse(s)
    }
}

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Uri {}

impl Hash for Uri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.resource_group.hash(state);
        self.site.hash(state);
    }
}

impl TryFrom<UriRecord> for Uri {
    type Error = String;

    fn try_from(record: UriRecord) -> std::result::Result<Self, Self::Error> {
        if record.host.is_empty() {
            return Err("URI host must not be empty".to_string());
        }
        let resource_group = record.resource_group.filter(|rg| !rg.is_empty());
        let site = record.site.filter(|site| !site.is_empty());
        if site.is_some() && resource_group.is_none() {
            return Err(format!(
                "URI for host {} has a site but no resource group",
                record.host
            ));
        }
        Ok(Self {
            host: record.host,
            resource_group,
            site,
            insecure: record.insecure,
        })
    }
}

impl From<Uri> for UriRecord {
    fn from(uri: Uri) -> Self {
        Self {
            host: uri.host,
            resource_group: uri.resource_group,
            site: uri.site,
            insecure: uri.insecure,
        }
    }
}
