//! Fetch adapter: materializes a snapshot of the repository's default branch into an empty
//! directory, counting bytes as they arrive and aborting when the request is cancelled.
//!
//! The transfer is the host's tar.gz archive of `HEAD` (no history, one branch). It is streamed
//! through [`CountingReader`], gunzipped, and unpacked through the request's [`RequestFs`], so
//! every write is admitted by the limiter, retried on descriptor exhaustion, and refused after
//! cancellation. Symbolic links in the archive go to the no-op `symlink` shim.

use flate2::read::GzDecoder;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::AnalysisError;
use crate::pipeline::cancel::CancellationToken;
use crate::pipeline::fs::RequestFs;
use crate::types::{RepositorySource, TransferMetrics};

/// Repository transfer. `fs` carries the request's cancellation token; `metrics` is bumped as
/// bytes arrive and stays readable after a failure.
pub trait Fetch: Send + Sync {
    /// Populate `dest` and return the number of bytes transferred. The returned count is what
    /// the success TTL is derived from; `metrics` only serves progress and failure reporting.
    fn fetch(
        &self,
        source: &RepositorySource,
        dest: &Path,
        fs: &RequestFs,
        metrics: &TransferMetrics,
    ) -> Result<u64, AnalysisError>;
}

/// Download-and-unpack fetcher over a blocking HTTP client.
pub struct ArchiveFetcher {
    client: reqwest::blocking::Client,
}

impl ArchiveFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for ArchiveFetcher {
    fn fetch(
        &self,
        source: &RepositorySource,
        dest: &Path,
        fs: &RequestFs,
        metrics: &TransferMetrics,
    ) -> Result<u64, AnalysisError> {
        let cancel = fs.cancel();
        cancel.check()?;
        let url = archive_url(source)?;
        log::debug!("Fetching {} from {}", source, url);

        // A stalled read must not outlive the deadline.
        let timeout = cancel.remaining().max(Duration::from_millis(1));
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|e| transfer_error(cancel, "Failed to fetch repository", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::transfer(format!(
                "Failed to fetch repository: HTTP {}",
                status.as_u16()
            )));
        }

        let reader = CountingReader::new(response, metrics.clone(), cancel.clone());
        unpack_archive(GzDecoder::new(reader), dest, fs)?;
        let bytes = metrics.bytes_transferred();
        log::debug!("Fetched {} ({} bytes)", source, bytes);
        Ok(bytes)
    }
}

/// Cancellation takes precedence over whatever error the transport or decoder reported.
fn transfer_error(
    cancel: &CancellationToken,
    what: &str,
    err: impl std::fmt::Display,
) -> AnalysisError {
    if cancel.is_cancelled() {
        cancel.error()
    } else {
        AnalysisError::transfer(format!("{what}: {err}"))
    }
}

/// Where the host serves a tar.gz of the default branch.
///
/// - GitLab: `/<group>/.../<repo>/-/archive/HEAD/<repo>-HEAD.tar.gz`
/// - Bitbucket: `/<owner>/<repo>/get/HEAD.tar.gz`
/// - GitHub and Gitea-style hosts: `/<owner>/<repo>/archive/HEAD.tar.gz`
pub fn archive_url(source: &RepositorySource) -> Result<Url, AnalysisError> {
    let segments = source.repo_path();
    let origin = source.url().origin().ascii_serialization();
    let host = source.host();

    let path = if host == "gitlab.com" || host.starts_with("gitlab.") {
        let project: Vec<&str> = segments
            .iter()
            .map(String::as_str)
            .take_while(|s| *s != "-")
            .collect();
        let Some(repo) = project.last().filter(|_| project.len() >= 2) else {
            return Err(missing_repo_path(source));
        };
        format!("{}/-/archive/HEAD/{}-HEAD.tar.gz", project.join("/"), repo)
    } else {
        let [owner, repo, ..] = segments.as_slice() else {
            return Err(missing_repo_path(source));
        };
        if host == "bitbucket.org" {
            format!("{owner}/{repo}/get/HEAD.tar.gz")
        } else {
            format!("{owner}/{repo}/archive/HEAD.tar.gz")
        }
    };

    Url::parse(&format!("{origin}/{path}"))
        .map_err(|e| AnalysisError::transfer(format!("Failed to build archive URL: {e}")))
}

fn missing_repo_path(source: &RepositorySource) -> AnalysisError {
    AnalysisError::transfer(format!(
        "Failed to fetch repository: {} does not name an <owner>/<repo> path",
        source
    ))
}

/// Reader that adds every chunk to `metrics` and fails once `cancel` trips.
pub struct CountingReader<R> {
    inner: R,
    metrics: TransferMetrics,
    cancel: CancellationToken,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, metrics: TransferMetrics, cancel: CancellationToken) -> Self {
        Self {
            inner,
            metrics,
            cancel,
        }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Not `Interrupted`: std retries those transparently.
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("transfer cancelled"));
        }
        let n = self.inner.read(buf)?;
        self.metrics.add(n as u64);
        Ok(n)
    }
}

/// Unpack a tar stream into `dest`, dropping the archive's top-level directory.
///
/// Paths that are absolute or climb out with `..` fail the transfer. Hard links become copies of
/// their target; symbolic links are handed to [`RequestFs::symlink`]; other special entries are
/// ignored.
pub fn unpack_archive<R: Read>(reader: R, dest: &Path, fs: &RequestFs) -> Result<(), AnalysisError> {
    let cancel = fs.cancel();
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| transfer_error(cancel, "Failed to read archive", e))?;

    let mut files = 0_usize;
    for entry in entries {
        cancel.check()?;
        let mut entry = entry.map_err(|e| transfer_error(cancel, "Failed to read archive", e))?;
        let kind = entry.header().entry_type();
        if !(kind.is_dir() || kind.is_file() || kind.is_symlink() || kind.is_hard_link()) {
            continue;
        }
        let raw_path = entry
            .path()
            .map_err(|e| transfer_error(cancel, "Invalid archive entry path", e))?
            .into_owned();
        let Some(rel) = strip_top_level(&raw_path)? else {
            continue;
        };
        let target = dest.join(&rel);

        if kind.is_dir() {
            fs.create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs.create_dir_all(parent)?;
            }
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| transfer_error(cancel, "Failed to read archive", e))?;
            fs.write(&target, &content)?;
            files += 1;
        } else {
            let link_target = entry
                .link_name()
                .ok()
                .flatten()
                .map(|p| p.into_owned())
                .unwrap_or_default();
            if kind.is_hard_link() {
                if copy_hard_link(&link_target, &target, dest, fs)? {
                    files += 1;
                }
            } else {
                fs.symlink(&link_target, &target)?;
            }
        }
    }
    log::debug!("Unpacked {} files into {}", files, dest.display());
    Ok(())
}

/// Materialize a hard link as a copy of its target, which names an earlier entry by its archive
/// path. Returns `false` when the target was not unpacked (the link is skipped with a warning).
fn copy_hard_link(
    link_target: &Path,
    target: &Path,
    dest: &Path,
    fs: &RequestFs,
) -> Result<bool, AnalysisError> {
    let Some(rel) = strip_top_level(link_target)? else {
        return Ok(false);
    };
    let source = dest.join(rel);
    let content = match fs.read(&source) {
        Ok(content) => content,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            log::warn!("Skipping hard link {}: {}", target.display(), e);
            return Ok(false);
        }
    };
    if let Some(parent) = target.parent() {
        fs.create_dir_all(parent)?;
    }
    fs.write(target, &content)?;
    Ok(true)
}

/// Relative path below the archive's top-level directory. `None` for the top-level directory
/// itself.
fn strip_top_level(path: &Path) -> Result<Option<PathBuf>, AnalysisError> {
    let mut rel = PathBuf::new();
    let mut seen_top = false;
    for component in path.components() {
        match component {
            Component::Normal(part) if seen_top => rel.push(part),
            Component::Normal(_) => seen_top = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(AnalysisError::transfer(format!(
                    "Failed to read archive: unsafe entry path {}",
                    path.display()
                )));
            }
        }
    }
    Ok((!rel.as_os_str().is_empty()).then_some(rel))
}
