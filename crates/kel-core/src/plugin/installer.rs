//! Plugin Installer
//!
//! Downloads plugin binaries to `<plugins dir>/<name>-v<version>`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{KelError, Result};
use crate::plugin::types::PluginDescriptor;

const USER_AGENT: &str = concat!("kel/", env!("CARGO_PKG_VERSION"));

/// Deterministic location of a plugin's executable.
pub fn binary_path(plugins_dir: &Path, plugin: &PluginDescriptor) -> PathBuf {
    plugins_dir.join(format!("{}-v{}", plugin.name, plugin.version))
}

/// Transport for plugin binaries.
pub trait Downloader {
    /// Stream the body at `url` into `out`, returning the byte count.
    fn fetch(&self, url: &str, out: &mut dyn Write) -> Result<u64>;
}

/// Blocking HTTP(S) GET.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str, out: &mut dyn Write) -> Result<u64> {
        let network = |message: String| KelError::Network {
            url: url.to_string(),
            message,
        };

        let response = match ureq::get(url).set("User-Agent", USER_AGENT).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, _)) => return Err(network(format!("HTTP {}", code))),
            Err(e) => return Err(network(e.to_string())),
        };

        let mut reader = response.into_reader();
        io::copy(&mut reader, out).map_err(|e| network(e.to_string()))
    }
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Plugin Installer - downloads binaries into the plugins directory
pub struct PluginInstaller<D = HttpDownloader> {
    plugins_dir: PathBuf,
    downloader: D,
}

impl PluginInstaller<HttpDownloader> {
    pub fn new(plugins_dir: PathBuf) -> Self {
        Self::with_downloader(plugins_dir, HttpDownloader)
    }
}

impl<D: Downloader> PluginInstaller<D> {
    /// Create with a custom transport (for testing)
    pub fn with_downloader(plugins_dir: PathBuf, downloader: D) -> Self {
        Self {
            plugins_dir,
            downloader,
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn binary_path(&self, plugin: &PluginDescriptor) -> PathBuf {
        binary_path(&self.plugins_dir, plugin)
    }

    pub fn is_installed(&self, plugin: &PluginDescriptor) -> bool {
        self.binary_path(plugin).is_file()
    }

    /// Download and install the plugin binary.
    ///
    /// The binary is streamed into a temporary file next to its final path
    /// and only moved into place once it is complete, verified and
    /// executable. On failure nothing is left behind.
    pub fn install(&self, plugin: &PluginDescriptor) -> Result<PathBuf> {
        let path = self.binary_path(plugin);
        fs::create_dir_all(&self.plugins_dir)?;

        let mut tmp = NamedTempFile::new_in(&self.plugins_dir)?;
        let mut writer = HashingWriter {
            inner: tmp.as_file_mut(),
            hasher: Sha256::new(),
        };
        let bytes = self
            .downloader
            .fetch(&plugin.command.binary_url, &mut writer)?;
        writer.flush()?;
        let digest = hex::encode(writer.hasher.finalize());

        if let Some(expected) = &plugin.command.sha256 {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(KelError::ChecksumMismatch {
                    plugin: plugin.key(),
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o755))?;
        }

        tmp.persist(&path).map_err(|e| KelError::Io(e.error))?;
        tracing::info!(
            plugin = %plugin.key(),
            path = %path.display(),
            bytes,
            "installed plugin"
        );

        Ok(path)
    }
}
