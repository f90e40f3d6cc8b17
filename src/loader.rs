//! # Content Loader
//!
//! Downloads asset sources into a fresh temporary directory.
//!
//! - `single` mode stores the downloaded file as-is
//! - `package` mode downloads a `.tar.gz`/`.tgz`/`.tar`/`.zip` archive and unpacks it
//!   with the system `tar` or `unzip`
//!
//! The returned file list is relative to the directory and already filtered.

use crate::config::LoaderConfig;
use crate::crd::AssetMode;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Content pulled for one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedContent {
    /// Directory holding the files; remove it with [`Loader::clean`]
    pub base_path: PathBuf,
    /// Paths relative to `base_path`, `/`-separated, sorted
    pub files: Vec<String>,
}

#[async_trait]
pub trait Loader: Send + Sync {
    /// Pull `url` into a new directory named after `name`
    ///
    /// On error nothing is left behind on disk.
    async fn load(
        &self,
        url: &str,
        name: &str,
        mode: AssetMode,
        filter: Option<&str>,
    ) -> Result<LoadedContent>;

    /// Remove a directory returned by [`Loader::load`]
    async fn clean(&self, base_path: &Path) -> Result<()>;
}

/// [`Loader`] fetching over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: reqwest::Client,
    temporary_directory: PathBuf,
    download_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Tar,
    Zip,
}

impl HttpLoader {
    pub fn new(client: reqwest::Client, config: &LoaderConfig) -> Self {
        Self {
            client,
            temporary_directory: config.temporary_directory.clone(),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .with_context(|| format!("while requesting {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("invalid status code {} while downloading {url}", status.as_u16());
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .with_context(|| format!("while creating {}", destination.display()))?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("while downloading {url}"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("while writing {}", destination.display()))?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn load_into(
        &self,
        dir: &Path,
        url: &str,
        mode: AssetMode,
        filter: Option<&Regex>,
    ) -> Result<Vec<String>> {
        let file_name = file_name_from_url(url)?;

        match mode {
            AssetMode::Single => {
                self.download(url, &dir.join(&file_name)).await?;
            }
            AssetMode::Package => {
                let kind = archive_kind(&file_name)
                    .ok_or_else(|| anyhow!("unsupported archive format: {file_name}"))?;
                let archive = tempfile::Builder::new()
                    .prefix("archive-")
                    .tempfile_in(&self.temporary_directory)
                    .context("while creating archive file")?;
                self.download(url, archive.path()).await?;
                extract(kind, archive.path(), dir).await?;
            }
        }

        list_files(dir, filter)
    }
}

#[async_trait]
impl Loader for HttpLoader {
    async fn load(
        &self,
        url: &str,
        name: &str,
        mode: AssetMode,
        filter: Option<&str>,
    ) -> Result<LoadedContent> {
        let filter = filter
            .filter(|f| !f.is_empty())
            .map(Regex::new)
            .transpose()
            .context("while compiling filter")?;

        tokio::fs::create_dir_all(&self.temporary_directory)
            .await
            .with_context(|| {
                format!(
                    "while creating temporary directory {}",
                    self.temporary_directory.display()
                )
            })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{name}-"))
            .tempdir_in(&self.temporary_directory)
            .context("while creating temporary directory")?;

        // `dir` removes itself on drop if loading fails
        let files = self.load_into(dir.path(), url, mode, filter.as_ref()).await?;
        let base_path = dir.keep();

        info!(url, files = files.len(), path = %base_path.display(), "Content loaded");
        Ok(LoadedContent { base_path, files })
    }

    async fn clean(&self, base_path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(base_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %base_path.display(), error = %e, "Failed to clean loader directory");
                Err(e).with_context(|| format!("while removing {}", base_path.display()))
            }
        }
    }
}

/// Last path segment of a URL, without query or fragment
fn file_name_from_url(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid url {url}"))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("cannot determine file name from url {url}"))
}

fn archive_kind(file_name: &str) -> Option<ArchiveKind> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if lower.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else if lower.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else {
        None
    }
}

async fn extract(kind: ArchiveKind, archive: &Path, destination: &Path) -> Result<()> {
    let mut command = match kind {
        ArchiveKind::TarGz | ArchiveKind::Tar => {
            let mut command = Command::new("tar");
            command.arg(if kind == ArchiveKind::TarGz { "-xzf" } else { "-xf" });
            command.arg(archive).arg("-C").arg(destination);
            command
        }
        ArchiveKind::Zip => {
            let mut command = Command::new("unzip");
            command.arg("-q").arg("-o").arg(archive).arg("-d").arg(destination);
            command
        }
    };

    debug!(?kind, archive = %archive.display(), "Extracting archive");
    let output = command
        .output()
        .await
        .with_context(|| format!("while running extractor for {}", archive.display()))?;
    if !output.status.success() {
        bail!(
            "while extracting archive: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Regular files under `dir`, relative and `/`-separated, sorted
fn list_files(dir: &Path, filter: Option<&Regex>) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.context("while walking loaded content")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .context("while resolving relative path")?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if filter.is_none_or(|re| re.is_match(&relative)) {
            files.push(relative);
        }
    }
    files.sort();
    Ok(files)
}
