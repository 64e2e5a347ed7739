//! Filesystem-backed stem store with atomic publish.

use crate::error::{StoreError, StoreResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use stemwell_core::config::GcConfig;
use stemwell_core::{Fingerprint, StemKind, StemSet};
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Directory under the store root holding in-progress separation output.
const STAGING_DIR: &str = ".staging";

/// Content-addressed store for separated stems.
///
/// Entries live at `<root>/<fingerprint>/` and contain the fixed stem file
/// set. An entry is only ever created by renaming a fully written staging
/// directory into place, so a reader never observes a key that exists but
/// is incomplete. Publish is linearized per fingerprint by the coordinator's
/// lock; the store itself needs no locking for reads.
pub struct StemStore {
    root: PathBuf,
    staging_root: PathBuf,
}

/// A staging directory for one in-progress separation.
///
/// The engine writes stem files here; the directory is either published
/// atomically or discarded. A staging dir abandoned by a crash is removed
/// by the GC sweep once its grace period passes.
#[derive(Debug)]
pub struct Staging {
    fingerprint: Fingerprint,
    dir: PathBuf,
}

impl Staging {
    /// The fingerprint this staging belongs to.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Directory the engine should write stem files into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Statistics from a garbage collection sweep.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SweepStats {
    pub staging_removed: u64,
    pub entries_removed: u64,
    pub bytes_reclaimed: u64,
    pub errors: u64,
}

impl StemStore {
    /// Open a store, creating the root and staging directories if needed.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let staging_root = root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root).await?;

        let meta = fs::metadata(&root).await?;
        if !meta.is_dir() {
            return Err(StoreError::InvalidRoot(root.display().to_string()));
        }

        Ok(Self { root, staging_root })
    }

    /// Final directory for a fingerprint's committed entry.
    pub fn entry_dir(&self, fingerprint: Fingerprint) -> PathBuf {
        // Fingerprints render as fixed-length lowercase hex, so keys cannot
        // traverse outside the root by construction.
        self.root.join(fingerprint.to_hex())
    }

    /// Allocate a fresh staging directory for a separation run.
    #[instrument(skip(self))]
    pub async fn begin(&self, fingerprint: Fingerprint) -> StoreResult<Staging> {
        let dir = self
            .staging_root
            .join(format!("{}-{}", fingerprint.to_hex(), Uuid::new_v4()));
        fs::create_dir_all(&dir).await?;
        Ok(Staging { fingerprint, dir })
    }

    /// Discard a staging directory without publishing.
    #[instrument(skip(self, staging), fields(fingerprint = %staging.fingerprint))]
    pub async fn discard(&self, staging: Staging) -> StoreResult<()> {
        match fs::remove_dir_all(&staging.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Atomically publish a fully written staging directory under its
    /// final key.
    ///
    /// Every stem file is verified present and non-empty and flushed to disk
    /// before the rename, so the final key is never observable in a partial
    /// state. If another publish for the same fingerprint already won, the
    /// staging output is discarded and the committed entry is returned.
    #[instrument(skip(self, staging), fields(fingerprint = %staging.fingerprint))]
    pub async fn publish(&self, staging: Staging) -> StoreResult<StemSet> {
        let fingerprint = staging.fingerprint;

        for kind in StemKind::ALL {
            let path = staging.dir.join(kind.file_name());
            let meta = match fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StoreError::MissingArtifact {
                        fingerprint: fingerprint.to_hex(),
                        stem: kind,
                    });
                }
                Err(e) => return Err(StoreError::Io(e)),
            };
            if meta.len() == 0 {
                return Err(StoreError::EmptyArtifact {
                    fingerprint: fingerprint.to_hex(),
                    stem: kind,
                });
            }
            // Flush file contents to disk before the rename makes the
            // entry visible.
            let file = fs::File::open(&path).await?;
            file.sync_all().await?;
        }

        let final_dir = self.entry_dir(fingerprint);
        if fs::try_exists(&final_dir).await? {
            debug!(%fingerprint, "entry already committed, discarding duplicate output");
            self.discard(staging).await?;
            return Ok(self.stem_set(fingerprint));
        }

        fs::rename(&staging.dir, &final_dir).await?;
        Ok(self.stem_set(fingerprint))
    }

    /// Look up a committed entry, verifying completeness rather than mere
    /// existence.
    ///
    /// An entry whose backing directory exists but lacks the expected stem
    /// set is treated as corrupt: it is removed and the lookup reports a
    /// miss, so the caller reprocesses instead of serving partial data.
    #[instrument(skip(self))]
    pub async fn lookup(&self, fingerprint: Fingerprint) -> StoreResult<Option<StemSet>> {
        let dir = self.entry_dir(fingerprint);
        if !fs::try_exists(&dir).await? {
            return Ok(None);
        }

        for kind in StemKind::ALL {
            let complete = match fs::metadata(dir.join(kind.file_name())).await {
                Ok(meta) => meta.len() > 0,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(StoreError::Io(e)),
            };
            if !complete {
                warn!(
                    %fingerprint,
                    stem = %kind,
                    "cache entry incomplete, removing and treating as miss"
                );
                fs::remove_dir_all(&dir).await?;
                return Ok(None);
            }
        }

        Ok(Some(self.stem_set(fingerprint)))
    }

    /// Remove orphaned staging directories and expired committed entries.
    #[instrument(skip(self, gc))]
    pub async fn sweep(&self, gc: &GcConfig) -> StoreResult<SweepStats> {
        let mut stats = SweepStats::default();
        let now = SystemTime::now();

        let staging_grace = Duration::from_secs(gc.staging_grace_secs);
        let mut entries = fs::read_dir(&self.staging_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            match Self::age_of(&entry, now).await {
                Ok(age) if age > staging_grace => {
                    stats.bytes_reclaimed += dir_size(&entry.path()).await;
                    if let Err(e) = fs::remove_dir_all(entry.path()).await {
                        warn!(path = %entry.path().display(), error = %e, "failed to remove orphaned staging");
                        stats.errors += 1;
                    } else {
                        stats.staging_removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to stat staging entry");
                    stats.errors += 1;
                }
            }
        }

        if gc.entry_ttl_secs > 0 {
            let entry_ttl = Duration::from_secs(gc.entry_ttl_secs);
            let mut entries = fs::read_dir(&self.root).await?;
            while let Some(entry) = entries.next_entry().await? {
                // Dot-prefixed dirs (staging, upload spool) are not entries.
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                match Self::age_of(&entry, now).await {
                    Ok(age) if age > entry_ttl => {
                        stats.bytes_reclaimed += dir_size(&entry.path()).await;
                        if let Err(e) = fs::remove_dir_all(entry.path()).await {
                            warn!(path = %entry.path().display(), error = %e, "failed to remove expired entry");
                            stats.errors += 1;
                        } else {
                            stats.entries_removed += 1;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "failed to stat cache entry");
                        stats.errors += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    fn stem_set(&self, fingerprint: Fingerprint) -> StemSet {
        let dir = self.entry_dir(fingerprint);
        StemSet::build(|kind| dir.join(kind.file_name()).display().to_string())
    }

    async fn age_of(entry: &fs::DirEntry, now: SystemTime) -> std::io::Result<Duration> {
        let modified = entry.metadata().await?.modified()?;
        Ok(now.duration_since(modified).unwrap_or(Duration::ZERO))
    }
}

/// Total size of the files directly inside a directory.
///
/// Best-effort: unreadable files count as zero.
async fn dir_size(dir: &Path) -> u64 {
    let mut total = 0;
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(meta) = entry.metadata().await {
            if meta.is_file() {
                total += meta.len();
            }
        }
    }
    total
}
