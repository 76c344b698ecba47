//! Temporary staging paths for one relay job.
//!
//! A [`StagedPath`] is a scoped guard: the file behind it and its `.part`
//! sibling are removed when the guard is released or dropped, whichever
//! happens first.
//!
//! Writes go through [`publish_blocking`], which never lets a blocking task
//! outlive its caller's interest: once the awaiting future is dropped (for
//! example by a step timeout), the task discards its output instead of
//! renaming it into place.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Random bytes in every staged file name.
const NAME_ENTROPY_BYTES: usize = 16;

/// Exclusively owned temporary file path, removed on release or drop.
#[derive(Debug)]
pub struct StagedPath {
    path: PathBuf,
    released: bool,
}

impl StagedPath {
    /// Allocate a fresh path in the system temp directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS random source is unavailable.
    pub fn allocate(extension: &str) -> io::Result<Self> {
        Self::allocate_in(&std::env::temp_dir(), extension)
    }

    /// Allocate a fresh path inside `dir`.
    ///
    /// The name is 32 hex characters of OS randomness followed by
    /// `extension` (a leading dot is added when missing). Nothing is created
    /// on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS random source is unavailable.
    pub fn allocate_in(dir: &Path, extension: &str) -> io::Result<Self> {
        let mut bytes = [0u8; NAME_ENTROPY_BYTES];
        getrandom::fill(&mut bytes).map_err(|e| io::Error::other(e.to_string()))?;

        let extension = extension.trim_start_matches('.');
        let name = if extension.is_empty() {
            hex::encode(bytes)
        } else {
            format!("{}.{extension}", hex::encode(bytes))
        };

        Ok(Self {
            path: dir.join(name),
            released: false,
        })
    }

    /// The staged path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staged file and any partial write now.
    ///
    /// # Errors
    ///
    /// Returns an error if either file exists but cannot be removed.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        release_with_partial(&self.path)
    }
}

impl Drop for StagedPath {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = release_with_partial(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staged file");
        }
    }
}

fn release_with_partial(path: &Path) -> io::Result<()> {
    let partial = release(&partial_path(path));
    release(path).and(partial)
}

/// Remove `path` if present. A missing file is not an error.
///
/// # Errors
///
/// Returns an error for any failure other than the file being absent.
pub fn release(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed staged file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Write `bytes` to `target` through a sibling `.part` file and a rename, so
/// `target` only ever holds a complete payload.
///
/// # Errors
///
/// Returns an error if writing or renaming fails; the partial file is
/// removed in that case.
pub async fn write_atomic(target: &Path, bytes: Vec<u8>) -> io::Result<()> {
    publish_blocking(target, move || Ok::<_, io::Error>(bytes))
        .await
        .map(drop)
}

/// Run `render` on the blocking pool and publish its bytes at `target`.
///
/// `render` always runs to completion, but the rename into `target` happens
/// only while the returned future is still alive. When the future is dropped
/// first, the rendered bytes are discarded and the `.part` file is removed,
/// so a caller that has already released `target` never sees it reappear.
///
/// Returns the number of bytes published.
///
/// # Errors
///
/// Returns the error from `render`, or an io error if writing, renaming or
/// joining the blocking task fails.
pub async fn publish_blocking<F, E>(target: &Path, render: F) -> Result<u64, E>
where
    F: FnOnce() -> Result<Vec<u8>, E> + Send + 'static,
    E: From<io::Error> + Send + 'static,
{
    let live = Arc::new(Mutex::new(true));
    let _abandon = AbandonOnDrop(Arc::clone(&live));
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let bytes = render()?;
        let partial = partial_path(&target);

        let result = if is_live(&live) {
            std::fs::write(&partial, &bytes).and_then(|()| {
                // Held across the rename so an abandoning caller waits for it
                let guard = live.lock().unwrap_or_else(PoisonError::into_inner);
                if *guard {
                    std::fs::rename(&partial, &target)
                } else {
                    Err(abandoned())
                }
            })
        } else {
            Err(abandoned())
        };

        if result.is_err() {
            if let Err(e) = release(&partial) {
                warn!(path = %partial.display(), error = %e, "Failed to remove partial write");
            }
        }
        result.map(|()| bytes.len() as u64).map_err(E::from)
    })
    .await
    .map_err(|e| E::from(io::Error::other(e)))?
}

/// Marks a [`publish_blocking`] call as abandoned when its future is dropped.
struct AbandonOnDrop(Arc<Mutex<bool>>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

fn is_live(live: &Mutex<bool>) -> bool {
    *live.lock().unwrap_or_else(PoisonError::into_inner)
}

fn abandoned() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "staged write abandoned by caller")
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
