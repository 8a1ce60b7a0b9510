//! Plugin resolution
//!
//! Matches a site's plugin constraints against the installed registry.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use semver::{Prerelease, Version};

use crate::config::{Config, SiteConfig};
use crate::error::{KelError, Result};
use crate::plugin::installer::binary_path;
use crate::plugin::types::PluginDescriptor;

/// A semantic-version constraint such as `>=1.0.0 <2.0.0` or
/// `=1.2.0 || >=2.0.0`.
///
/// Space-separated comparators must all hold; `||` separates alternatives.
/// A bare version means exactly that version. Versions are compared by plain
/// precedence, so `>=1.0.0 <2.0.0` also admits `1.5.0-beta.1`.
#[derive(Debug, Clone)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<Vec<Comparator>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn matches(&self, version: &Version) -> bool {
        let ord = precedence(version).cmp(&precedence(&self.version));
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
        }
    }
}

// Build metadata does not take part in precedence.
fn precedence(version: &Version) -> (u64, u64, u64, &Prerelease) {
    (version.major, version.minor, version.patch, &version.pre)
}

impl VersionRange {
    pub fn parse(input: &str) -> Option<Self> {
        let alternatives = input
            .split("||")
            .map(parse_alternative)
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            source: input.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|all| all.iter().all(|c| c.matches(version)))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Longest operators first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 8] = [
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("==", Op::Eq),
    ("!", Op::Ne),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("=", Op::Eq),
];

fn split_operator(token: &str) -> (Option<Op>, &str) {
    OPERATORS
        .iter()
        .find_map(|(text, op)| token.strip_prefix(text).map(|rest| (Some(*op), rest)))
        .unwrap_or((None, token))
}

fn parse_alternative(input: &str) -> Option<Vec<Comparator>> {
    let mut comparators = Vec::new();
    let mut pending: Option<Op> = None;

    for token in input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let (op, rest) = split_operator(token);
        let op = match (pending.take(), op) {
            (Some(_), Some(_)) => return None,
            (Some(op), None) | (None, Some(op)) => op,
            (None, None) => Op::Eq,
        };
        if rest.is_empty() {
            // `>= 1.0.0`: operator separated from its version
            pending = Some(op);
            continue;
        }
        let version = Version::parse(rest).ok()?;
        comparators.push(Comparator { op, version });
    }

    if comparators.is_empty() || pending.is_some() {
        return None;
    }
    Some(comparators)
}

/// An installed plugin selected for a site.
#[derive(Debug, Clone)]
pub struct ResolvedPlugin {
    pub descriptor: PluginDescriptor,
    pub binary_path: PathBuf,
}

/// Select an installed plugin for every constraint of `site`.
///
/// When several installed versions satisfy a range the highest one wins.
/// Any unresolvable constraint fails the whole resolution.
pub fn resolve(
    config: &Config,
    site: &SiteConfig,
    plugins_dir: &Path,
) -> Result<Vec<ResolvedPlugin>> {
    let mut resolved = Vec::with_capacity(site.plugins.len());

    for (name, range_text) in &site.plugins {
        let range =
            VersionRange::parse(range_text).ok_or_else(|| KelError::InvalidVersionRange {
                plugin: name.clone(),
                range: range_text.clone(),
            })?;

        let descriptor = config
            .plugins
            .values()
            .filter(|plugin| &plugin.name == name && range.matches(&plugin.version))
            .max_by(|a, b| a.version.cmp(&b.version))
            .ok_or_else(|| KelError::PluginNotFound {
                name: name.clone(),
                range: range_text.clone(),
            })?;

        tracing::debug!(
            plugin = %name,
            range = %range,
            version = %descriptor.version,
            "resolved plugin"
        );
        resolved.push(ResolvedPlugin {
            binary_path: binary_path(plugins_dir, descriptor),
            descriptor: descriptor.clone(),
        });
    }

    Ok(resolved)
}
