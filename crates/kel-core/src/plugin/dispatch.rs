//! Plugin dispatch
//!
//! Hands the process over to a resolved plugin binary.

use std::convert::Infallible;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{KelError, Result};
use crate::plugin::resolver::ResolvedPlugin;

/// A resolved plugin exposed as a sub-command.
#[derive(Debug, Clone)]
pub struct PluginCommand {
    plugin: String,
    name: String,
    about: String,
    binary_path: PathBuf,
}

impl From<ResolvedPlugin> for PluginCommand {
    fn from(resolved: ResolvedPlugin) -> Self {
        let command = resolved.descriptor.command;
        // `use` is a usage line such as `build [flags]`; the first word names the command.
        let name = command
            .use_
            .split_whitespace()
            .next()
            .unwrap_or(&resolved.descriptor.name)
            .to_string();
        Self {
            plugin: resolved.descriptor.name,
            name,
            about: command.short,
            binary_path: resolved.binary_path,
        }
    }
}

impl PluginCommand {
    /// Sub-command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text
    pub fn about(&self) -> &str {
        &self.about
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Argument zero: the binary's own basename.
    pub fn arg0(&self) -> OsString {
        self.binary_path
            .file_name()
            .map(OsStr::to_os_string)
            .unwrap_or_else(|| self.binary_path.clone().into_os_string())
    }

    /// Full argument vector seen by the plugin.
    pub fn argv<I, S>(&self, args: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        std::iter::once(self.arg0())
            .chain(args.into_iter().map(|a| a.as_ref().to_os_string()))
            .collect()
    }

    /// Replace the current process with the plugin.
    ///
    /// Environment and working directory are inherited. Only returns when
    /// the handoff fails.
    pub fn exec<I, S>(&self, args: I) -> Result<Infallible>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary_path);
        command.args(args);
        tracing::debug!(plugin = %self.plugin, path = %self.binary_path.display(), "dispatching");
        self.handoff(command)
    }

    #[cfg(unix)]
    fn handoff(&self, mut command: Command) -> Result<Infallible> {
        use std::os::unix::process::CommandExt;

        command.arg0(self.arg0());
        let source = command.exec();
        Err(self.exec_error(source))
    }

    #[cfg(not(unix))]
    fn handoff(&self, mut command: Command) -> Result<Infallible> {
        let status = command.status().map_err(|e| self.exec_error(e))?;
        std::process::exit(status.code().unwrap_or(1));
    }

    fn exec_error(&self, source: std::io::Error) -> KelError {
        KelError::PluginExec {
            name: self.plugin.clone(),
            path: self.binary_path.clone(),
            source,
        }
    }
}
