//! Engine runtime bootstrap.
//!
//! Container mode pulls the image and is done. The other modes download a
//! release zip for the host platform, extract it under the target directory
//! and report `{target}/bin/{runtime-id}` as the new engine root.

mod download;
mod extract;

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use linterhub_config::EngineDefaults;
use linterhub_types::{EngineMode, PlatformInfo};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::EngineError;
use crate::platform::{self, UnsupportedPlatformError};
use crate::process::{CommandLine, CommandRunner};

pub use download::{DownloadOptions, MAX_REDIRECTS, download_file};
pub use extract::extract_archive;

/// Download name of the archive inside the target directory.
const ARCHIVE_FILE: &str = "temp.zip";
const ARTIFACT_PREFIX: &str = "linterhub-cli";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("too many redirects (>{max}) starting at {url}")]
    RedirectLimit { url: String, max: u32 },
    #[error("redirect from {url} has no usable Location header")]
    MissingLocation { url: String },
    #[error("invalid download URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to configure HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("corrupt archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatformError),
    #[error("container image pull failed: {0}")]
    Container(#[source] EngineError),
    #[error("install cancelled")]
    Cancelled,
}

impl InstallError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Container(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// What to install and where.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub mode: EngineMode,
    pub target_dir: PathBuf,
    pub proxy: Option<String>,
    pub strict_ssl: bool,
}

/// A resolved release download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallArtifact {
    mode: EngineMode,
    platform: String,
    version: String,
    url: Url,
}

impl InstallArtifact {
    /// Resolve the release artifact for `mode` on `platform`.
    ///
    /// The URL follows `{base}/{version}/linterhub-cli-{rid}-{version}.zip`.
    pub fn resolve(
        mode: EngineMode,
        platform: PlatformInfo,
        version: &str,
        base_url: &str,
    ) -> Result<Self, InstallError> {
        let rid = platform::artifact_runtime_id(mode, platform)?;
        let raw = format!(
            "{}/{version}/{ARTIFACT_PREFIX}-{rid}-{version}.zip",
            base_url.trim_end_matches('/')
        );
        let url = Url::parse(&raw).map_err(|source| InstallError::InvalidUrl { url: raw, source })?;
        Ok(Self {
            mode,
            platform: rid.to_string(),
            version: version.to_string(),
            url,
        })
    }

    #[must_use]
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Runtime id, e.g. `debian.8-x64`.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Engine root once extracted under `target`.
    #[must_use]
    pub fn install_path(&self, target: &Path) -> PathBuf {
        target.join("bin").join(&self.platform)
    }
}

pub type InstallFut<'a> = Pin<Box<dyn Future<Output = Result<PathBuf, InstallError>> + Send + 'a>>;

/// Seam for bootstrapping the engine runtime.
pub trait Installer: Send + Sync {
    /// Install and return the directory the engine should be run from.
    fn install<'a>(
        &'a self,
        request: &'a InstallRequest,
        cancel: &'a CancellationToken,
    ) -> InstallFut<'a>;
}

/// Installs release archives over HTTP and container images via `docker pull`.
pub struct EngineInstaller {
    version: String,
    base_url: String,
    image: String,
    runner: Arc<dyn CommandRunner>,
    platform: Option<PlatformInfo>,
}

impl EngineInstaller {
    #[must_use]
    pub fn new(defaults: &EngineDefaults, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            version: defaults.version.clone(),
            base_url: defaults.base_url.clone(),
            image: defaults.image.clone(),
            runner,
            platform: None,
        }
    }

    /// Pin the platform instead of detecting the host.
    #[must_use]
    pub fn with_platform(mut self, platform: PlatformInfo) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn artifact(&self, mode: EngineMode) -> Result<InstallArtifact, InstallError> {
        let platform = match self.platform {
            Some(platform) => platform,
            None => platform::current()?,
        };
        InstallArtifact::resolve(mode, platform, &self.version, &self.base_url)
    }

    async fn pull_image(
        &self,
        request: &InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, InstallError> {
        let command = CommandLine::new("docker").args(["pull", self.image.as_str()]);
        tracing::info!(image = %self.image, "Pulling engine container image");
        match self.runner.run(&command, cancel).await {
            Ok(_) => Ok(request.target_dir.clone()),
            Err(e) if e.is_cancelled() => Err(InstallError::Cancelled),
            Err(e) => Err(InstallError::Container(e)),
        }
    }

    async fn install_release(
        &self,
        request: &InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, InstallError> {
        let artifact = self.artifact(request.mode)?;
        let target = &request.target_dir;
        let archive = target.join(ARCHIVE_FILE);
        let options = DownloadOptions {
            proxy: request.proxy.clone(),
            strict_ssl: request.strict_ssl,
        };

        tracing::info!(
            mode = %request.mode,
            platform = artifact.platform(),
            version = artifact.version(),
            target = %target.display(),
            "Installing engine runtime"
        );

        let result = fetch_and_extract(artifact.url(), &archive, target, &options, cancel).await;

        if let Err(e) = tokio::fs::remove_file(&archive).await
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %archive.display(), "Failed to remove downloaded archive: {e}");
        }

        result?;
        Ok(artifact.install_path(target))
    }
}

async fn fetch_and_extract(
    url: &Url,
    archive: &Path,
    target: &Path,
    options: &DownloadOptions,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    download_file(url, archive, options, cancel).await?;
    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled);
    }
    extract_archive(archive, target).await?;
    Ok(())
}

impl Installer for EngineInstaller {
    fn install<'a>(
        &'a self,
        request: &'a InstallRequest,
        cancel: &'a CancellationToken,
    ) -> InstallFut<'a> {
        Box::pin(async move {
            match request.mode {
                EngineMode::Container => self.pull_image(request, cancel).await,
                EngineMode::ManagedRuntime | EngineMode::NativeBinary => {
                    self.install_release(request, cancel).await
                }
            }
        })
    }
}
