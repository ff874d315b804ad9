use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, format_err, Error};

/// Filesystem backed scratch area for in-flight blob uploads.
///
/// The store owns a single directory and an aggregate byte counter checked
/// against a configurable quota. It performs no file I/O on behalf of its
/// callers apart from the startup sweep; sessions create and remove the blob
/// files themselves under paths allocated here.
pub struct SessionStore {
    directory: PathBuf,
    quota: u64,
    current: AtomicU64,
}

impl SessionStore {
    /// Opens the scratch directory and reclaims leftover state.
    ///
    /// The directory must exist (possibly behind a symlink) and be writable
    /// by the process. Every pre-existing entry is removed so the store never
    /// accounts for files it did not create; failure to remove any entry is
    /// fatal, the service must not start on a directory it cannot control.
    pub fn open<P: Into<PathBuf>>(directory: P, quota: u64) -> Result<Self, Error> {
        let directory = directory.into();

        let metadata = std::fs::metadata(&directory)
            .map_err(|err| format_err!("session store {:?} does not exist - {}", directory, err))?;
        if !metadata.is_dir() {
            bail!("session store {:?} is not a directory", directory);
        }
        nix::unistd::access(&directory, nix::unistd::AccessFlags::W_OK)
            .map_err(|err| format_err!("session store {:?} is not writable - {}", directory, err))?;

        for entry in std::fs::read_dir(&directory)? {
            let entry = entry?;
            let path = entry.path();
            let result = if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(err) = result {
                bail!(
                    "{:?} remains in the session store directory ({:?}) - {}",
                    path,
                    directory,
                    err
                );
            }
        }

        Ok(Self {
            directory,
            quota,
            current: AtomicU64::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Allocates the scratch file name for a blob. Pure naming, no I/O.
    pub fn blob_path(&self, blob_id: u64, prefix: &str) -> PathBuf {
        self.directory.join(format!("{}_{}", prefix, blob_id))
    }

    /// Tries to account `size` additional bytes against the quota.
    ///
    /// The counter is bumped first and the post-value checked afterwards; a
    /// losing reservation takes its bytes back before reporting failure, so
    /// the counter is unchanged as observed before and after a failed call.
    /// A quota of 0 disables accounting entirely.
    pub fn reserve(&self, size: u64) -> bool {
        if self.quota == 0 {
            return true;
        }
        let previous = self.current.fetch_add(size, Ordering::SeqCst);
        if previous + size <= self.quota {
            return true;
        }
        self.current.fetch_sub(size, Ordering::SeqCst);
        false
    }

    /// Returns `size` previously reserved bytes to the pool.
    pub fn release(&self, size: u64) {
        if self.quota != 0 {
            self.current.fetch_sub(size, Ordering::SeqCst);
        }
    }

    /// Aggregate bytes currently reserved.
    pub fn current_size(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}
