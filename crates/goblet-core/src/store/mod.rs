// Copyright © 2026 The Goblet Authors
//
// This file is part of goblet, distributed under the terms of the GNU General
// Public License version 3 or later. For full terms see the included LICENSE
// file.

//! The local bare-repository store: on-disk init, ref listing, upstream
//! fetch, and `upload-pack` serving.
//!
//! Repository contents are read and written through `git2` (libgit2
//! bindings) wherever libgit2 exposes the operation directly (init, ref
//! enumeration). Serving `upload-pack` and performing the actual network
//! fetch are instead done by spawning the `git` binary, piping its stdio,
//! the way `gitd-lib::git_subprocess` drives `git-upload-pack`/
//! `git-receive-pack` over SSH — adapted here to a stateless-RPC subprocess
//! with no signal forwarding, since an HTTP request has no SIGINT to
//! propagate.

pub mod refs;

use std::{
    path::Path,
    process::Stdio,
    time::{Duration, SystemTime},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    process::Command,
};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};

pub use refs::{MirroredRef, RefAdvertisement, SymrefTarget};

const LAST_FETCH_SIDECAR: &str = ".goblet-last-fetch";

/// Substrings that show up in `git upload-pack`'s stderr when the client
/// asked for an object this repository does not have, as opposed to a
/// generic subprocess failure. Matched loosely since the exact wording
/// varies across `git` versions.
const MISSING_OBJECT_MARKERS: &[&str] = &["not our ref", "bad object", "does not have", "unable to read"];

fn looks_like_missing_object(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    MISSING_OBJECT_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Handle onto the on-disk cache. Stateless beyond the root path: all
/// per-repository concurrency control lives in the registry, not here.
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: std::path::PathBuf,
}

impl Store {
    pub fn new(cache_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Whether `repo_path` already holds an initialized bare repository.
    pub fn is_initialized(&self, repo_path: &Path) -> bool {
        git2::Repository::open_bare(repo_path).is_ok()
    }

    /// Create `repo_path` as an empty bare repository if it does not
    /// already exist. Idempotent.
    #[instrument(skip(self))]
    pub fn ensure_initialized(&self, repo_path: &Path) -> Result<()> {
        if self.is_initialized(repo_path) {
            return Ok(());
        }
        tokio_fs_create_dir_all_blocking(repo_path)?;
        git2::Repository::init_bare(repo_path)?;
        debug!(path = %repo_path.display(), "initialized bare repository");
        Ok(())
    }

    /// List every ref currently on disk, HEAD first, ordered the way
    /// `git-upload-pack`'s v0 advertisement orders them (HEAD, then
    /// lexicographic by name), with one level of symref resolution (`HEAD
    /// -> refs/heads/main`, not transitively beyond that).
    #[instrument(skip(self))]
    pub fn read_refs(&self, repo_path: &Path) -> Result<Vec<RefAdvertisement>> {
        let repo = git2::Repository::open_bare(repo_path)?;
        refs::read_refs(&repo)
    }

    /// Fetch all refs from `upstream_url` into `repo_path`, pruning refs
    /// that no longer exist upstream. Runs `git fetch` as a subprocess
    /// rather than through libgit2's network stack, matching
    /// `gitd-lib`'s preference for the real `git` binary over
    /// reimplementing transport negotiation.
    #[instrument(skip(self))]
    pub async fn upstream_fetch(&self, repo_path: &Path, upstream_url: &str, timeout: Duration) -> Result<()> {
        self.ensure_initialized(repo_path)?;

        let mut command = Command::new("git");
        command
            .arg("-C")
            .arg(repo_path)
            .arg("fetch")
            .arg("--prune")
            .arg("--force")
            .arg(upstream_url)
            .arg("+refs/*:refs/*")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| Error::Internal(format!("git fetch against {upstream_url} timed out after {timeout:?}")))?
            .map_err(Error::from)?;

        if !output.status.success() {
            return Err(Error::Internal(format!(
                "git fetch exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    /// Read the wall-clock time of the last successful [`Self::upstream_fetch`]
    /// from the `.goblet-last-fetch` sidecar file, if present. Used to seed
    /// a handle's freshness on first reference after a process restart,
    /// since the in-process registry starts out empty every time.
    pub fn read_last_fetch(&self, repo_path: &Path) -> Result<Option<SystemTime>> {
        let sidecar = repo_path.join(LAST_FETCH_SIDECAR);
        match std::fs::read_to_string(&sidecar) {
            Ok(contents) => match humantime::parse_rfc3339(contents.trim()) {
                Ok(at) => Ok(Some(at)),
                Err(e) => {
                    warn!(path = %sidecar.display(), error = %e, "ignoring unparseable last-fetch sidecar");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// Persist `at` to the `.goblet-last-fetch` sidecar so staleness survives
    /// a process restart.
    pub fn write_last_fetch(&self, repo_path: &Path, at: SystemTime) -> Result<()> {
        let sidecar = repo_path.join(LAST_FETCH_SIDECAR);
        std::fs::write(&sidecar, humantime::format_rfc3339(at).to_string()).map_err(Error::from)
    }

    /// Mirror the refs advertised in a raw `ls-refs` v2 response into the
    /// local bare repository, without transferring any objects. Direct refs
    /// are pointed at the advertised oid (dangling is fine: this is purely
    /// ref-table bookkeeping, not a guarantee the object is fetchable
    /// locally); `HEAD` is re-pointed symbolically when a `symref-target`
    /// attribute is present.
    #[instrument(skip(self, response))]
    pub async fn mirror_refs_from_ls_refs_response(&self, repo_path: &Path, response: &[u8]) -> Result<()> {
        let mirrored = refs::parse_ls_refs_response(response).await?;
        if mirrored.is_empty() {
            return Ok(());
        }
        self.ensure_initialized(repo_path)?;
        let repo = git2::Repository::open_bare(repo_path)?;
        for r in mirrored {
            if r.name == "HEAD" {
                if let Some(target) = &r.symref_target {
                    repo.reference_symbolic("HEAD", target, true, "mirror ls-refs")?;
                    continue;
                }
            }
            if let Some(oid) = r.oid {
                if !oid.is_zero() {
                    repo.reference(&r.name, oid.into(), true, "mirror ls-refs")?;
                }
            }
        }
        Ok(())
    }

    /// Drive `git upload-pack --stateless-rpc` against `repo_path`,
    /// forwarding `input` to its stdin and its stdout to `output`
    /// unmodified. The caller is responsible for having already consumed
    /// and validated the pkt-line command/argument lines that precede the
    /// raw stream handed to `git upload-pack` (this function is a dumb
    /// pipe once invoked).
    #[instrument(skip(self, input, output))]
    pub async fn serve_upload_pack<R, W>(
        &self,
        repo_path: &Path,
        protocol_v2: bool,
        input: R,
        output: W,
        timeout: Duration,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tokio::time::timeout(timeout, self.run_upload_pack(repo_path, protocol_v2, input, output))
            .await
            .map_err(|_| Error::Internal(format!("git upload-pack timed out after {timeout:?}")))?
    }

    async fn run_upload_pack<R, W>(&self, repo_path: &Path, protocol_v2: bool, mut input: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut command = Command::new("git");
        command
            .arg("upload-pack")
            .arg("--stateless-rpc")
            .arg(repo_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if protocol_v2 {
            command.env("GIT_PROTOCOL", "version=2");
        }
        let mut child = command.spawn().map_err(Error::from)?;

        let mut child_stdin = child.stdin.take().expect("stdin piped");
        let mut child_stdout = child.stdout.take().expect("stdout piped");
        let mut child_stderr = child.stderr.take().expect("stderr piped");

        let copy_in = async {
            tokio::io::copy(&mut input, &mut child_stdin).await?;
            child_stdin.shutdown().await
        };
        let copy_out = tokio::io::copy(&mut child_stdout, &mut output);
        let mut stderr_buf = Vec::new();
        let copy_err = child_stderr.read_to_end(&mut stderr_buf);

        let (in_result, out_result, _err_result) = tokio::join!(copy_in, copy_out, copy_err);
        in_result.map_err(Error::from)?;
        out_result.map_err(Error::from)?;

        let status = child.wait().await.map_err(Error::from)?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_buf);
            if looks_like_missing_object(&stderr) {
                return Err(Error::MissingObject);
            }
            return Err(Error::Internal(format!("git upload-pack exited with {status}: {stderr}")));
        }
        Ok(())
    }
}

fn tokio_fs_create_dir_all_blocking(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_initialized_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("repo");
        let store = Store::new(dir.path());
        store.ensure_initialized(&repo_path).unwrap();
        assert!(store.is_initialized(&repo_path));
        store.ensure_initialized(&repo_path).unwrap();
    }

    #[test]
    fn read_refs_on_empty_repo_is_empty() {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("repo");
        let store = Store::new(dir.path());
        store.ensure_initialized(&repo_path).unwrap();
        let refs = store.read_refs(&repo_path).unwrap();
        assert!(refs.is_empty());
    }

    #[test]
    fn last_fetch_sidecar_round_trips() {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("repo");
        let store = Store::new(dir.path());
        store.ensure_initialized(&repo_path).unwrap();

        assert_eq!(store.read_last_fetch(&repo_path).unwrap(), None);

        let now = SystemTime::now();
        store.write_last_fetch(&repo_path, now).unwrap();
        let read_back = store.read_last_fetch(&repo_path).unwrap().unwrap();
        // RFC-3339 formatting truncates sub-second precision.
        assert!(read_back.duration_since(now).unwrap_or_default() < Duration::from_secs(1));
    }

    #[test]
    fn missing_object_markers_are_recognized() {
        assert!(looks_like_missing_object("fatal: remote error: upload-pack: not our ref deadbeef"));
        assert!(looks_like_missing_object("error: Could not read deadbeef: bad object"));
        assert!(!looks_like_missing_object("fatal: unable to fork"));
    }

    #[tokio::test]
    async fn mirror_refs_from_ls_refs_response_updates_head_symref() {
        use crate::pktline::Frame;
        use bytes::Bytes;

        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("repo");
        let store = Store::new(dir.path());
        store.ensure_initialized(&repo_path).unwrap();

        let line = "4b825dc642cb6eb9a060e54bf8d69288fbee4904 HEAD symref-target=refs/heads/trunk\n";
        let mut buf = Vec::new();
        buf.extend_from_slice(&Frame::data(Bytes::from(line.as_bytes().to_vec())).encode());
        buf.extend_from_slice(&Frame::flush().encode());

        store.mirror_refs_from_ls_refs_response(&repo_path, &buf).await.unwrap();

        let repo = git2::Repository::open_bare(&repo_path).unwrap();
        let target = refs::head_symref_target(&repo).unwrap().unwrap();
        assert_eq!(target.target, "refs/heads/trunk");
    }
}
