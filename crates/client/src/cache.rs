//! Tiered result cache: a fast in-memory LRU over a slow disk tier.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, warn};

/// Cache tier budgets and TTLs.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Byte budget for the in-memory tier.
    pub fast_budget_bytes: u64,
    /// TTL for in-memory entries.
    pub fast_ttl: Duration,
    /// Directory backing the disk tier.
    pub slow_dir: PathBuf,
    /// Byte budget for the disk tier.
    pub slow_budget_bytes: u64,
    /// TTL for disk entries; survives process restarts.
    pub slow_ttl: Duration,
}

impl CacheConfig {
    pub fn new(slow_dir: impl Into<PathBuf>) -> Self {
        Self {
            fast_budget_bytes: 8 * 1024 * 1024,
            fast_ttl: Duration::from_secs(3600),
            slow_dir: slow_dir.into(),
            slow_budget_bytes: 256 * 1024 * 1024,
            slow_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

/// Sidecar metadata stored next to each disk entry.
#[derive(Debug, Serialize, Deserialize)]
struct SlowMeta {
    created_at: u64,
    size: u64,
}

struct FastEntry {
    value: Vec<u8>,
    created_at: Instant,
    last_accessed_at: Instant,
    /// Insertion sequence, breaks last-access ties deterministically.
    seq: u64,
}

#[derive(Default)]
struct FastState {
    entries: HashMap<String, FastEntry>,
    used: u64,
    next_seq: u64,
}

/// Two-tier cache with promotion.
///
/// Reads check the fast tier first and fall back to the disk tier,
/// promoting hits. Writes land in both tiers independently; an item too
/// large for the fast budget skips that tier outright rather than evicting
/// everything else to make room. If the disk tier's backing storage fails,
/// the cache degrades to fast-only operation instead of surfacing errors.
pub struct TieredCache {
    config: CacheConfig,
    fast: Mutex<FastState>,
    degraded: AtomicBool,
}

impl TieredCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            fast: Mutex::new(FastState::default()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the disk tier has been disabled after an I/O failure.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Bytes currently held in the fast tier.
    pub fn fast_used(&self) -> u64 {
        self.fast.lock().expect("cache lock poisoned").used
    }

    /// Look up a key, checking the fast tier then the disk tier.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        {
            let mut fast = self.fast.lock().expect("cache lock poisoned");
            match fast.entries.get_mut(key) {
                Some(entry) if entry.created_at.elapsed() <= self.config.fast_ttl => {
                    entry.last_accessed_at = Instant::now();
                    return Some(entry.value.clone());
                }
                Some(_) => {
                    // Expired in place; evict and fall through to disk.
                    if let Some(entry) = fast.entries.remove(key) {
                        fast.used -= entry.value.len() as u64;
                    }
                }
                None => {}
            }
        }

        let value = self.slow_get(key).await?;
        self.insert_fast(key, &value);
        Some(value)
    }

    /// Insert a value into both tiers.
    pub async fn set(&self, key: &str, value: Vec<u8>) {
        self.insert_fast(key, &value);
        self.slow_set(key, &value).await;
    }

    /// Remove a key from both tiers.
    pub async fn remove(&self, key: &str) {
        {
            let mut fast = self.fast.lock().expect("cache lock poisoned");
            if let Some(entry) = fast.entries.remove(key) {
                fast.used -= entry.value.len() as u64;
            }
        }
        if !self.is_degraded() {
            let _ = fs::remove_file(self.data_path(key)).await;
            let _ = fs::remove_file(self.meta_path(key)).await;
        }
    }

    fn insert_fast(&self, key: &str, value: &[u8]) {
        let size = value.len() as u64;
        if size > self.config.fast_budget_bytes {
            // An eviction loop for one oversized item would empty the
            // whole tier; skip it instead.
            debug!(key, size, budget = self.config.fast_budget_bytes, "value too large for fast tier, skipping");
            return;
        }

        let mut fast = self.fast.lock().expect("cache lock poisoned");
        if let Some(old) = fast.entries.remove(key) {
            fast.used -= old.value.len() as u64;
        }

        while fast.used + size > self.config.fast_budget_bytes {
            let victim = fast
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_accessed_at, e.seq))
                .map(|(k, _)| k.clone());
            match victim {
                Some(victim) => {
                    if let Some(entry) = fast.entries.remove(&victim) {
                        fast.used -= entry.value.len() as u64;
                        debug!(key = %victim, "evicted from fast tier");
                    }
                }
                None => break,
            }
        }

        let now = Instant::now();
        let seq = fast.next_seq;
        fast.next_seq += 1;
        fast.used += size;
        fast.entries.insert(
            key.to_string(),
            FastEntry {
                value: value.to_vec(),
                created_at: now,
                last_accessed_at: now,
                seq,
            },
        );
    }

    async fn slow_get(&self, key: &str) -> Option<Vec<u8>> {
        if self.is_degraded() {
            return None;
        }

        let meta_raw = match fs::read(self.meta_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                self.degrade(&e);
                return None;
            }
        };
        let meta: SlowMeta = serde_json::from_slice(&meta_raw).ok()?;

        if epoch_ms().saturating_sub(meta.created_at) > self.config.slow_ttl.as_millis() as u64 {
            let _ = fs::remove_file(self.data_path(key)).await;
            let _ = fs::remove_file(self.meta_path(key)).await;
            return None;
        }

        match fs::read(self.data_path(key)).await {
            Ok(value) => Some(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                self.degrade(&e);
                None
            }
        }
    }

    async fn slow_set(&self, key: &str, value: &[u8]) {
        if self.is_degraded() {
            return;
        }
        if value.len() as u64 > self.config.slow_budget_bytes {
            debug!(key, size = value.len(), "value too large for slow tier, skipping");
            return;
        }

        let result: std::io::Result<()> = async {
            fs::create_dir_all(&self.config.slow_dir).await?;
            self.slow_make_room(value.len() as u64).await?;
            fs::write(self.data_path(key), value).await?;
            let meta = SlowMeta {
                created_at: epoch_ms(),
                size: value.len() as u64,
            };
            let raw = serde_json::to_vec(&meta).map_err(std::io::Error::other)?;
            fs::write(self.meta_path(key), raw).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.degrade(&e);
        }
    }

    /// Evict oldest disk entries until `incoming` fits in the budget.
    async fn slow_make_room(&self, incoming: u64) -> std::io::Result<()> {
        let mut entries: Vec<(String, SlowMeta)> = Vec::new();
        let mut used = 0u64;

        let mut dir = fs::read_dir(&self.config.slow_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let name = name.to_string_lossy();
            if let Some(key) = name.strip_suffix(".meta.json") {
                if let Ok(raw) = fs::read(item.path()).await {
                    if let Ok(meta) = serde_json::from_slice::<SlowMeta>(&raw) {
                        used += meta.size;
                        entries.push((key.to_string(), meta));
                    }
                }
            }
        }

        entries.sort_by_key(|(_, meta)| meta.created_at);
        let mut entries = entries.into_iter();
        while used + incoming > self.config.slow_budget_bytes {
            let Some((key, meta)) = entries.next() else {
                break;
            };
            remove_if_present(self.config.slow_dir.join(format!("{key}.bin"))).await?;
            remove_if_present(self.config.slow_dir.join(format!("{key}.meta.json"))).await?;
            used -= meta.size;
            debug!(key, "evicted from slow tier");
        }
        Ok(())
    }

    fn degrade(&self, cause: &std::io::Error) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(error = %cause, "disk cache tier unavailable, continuing fast-only");
        }
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.config.slow_dir.join(format!("{}.bin", sanitize_key(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.config.slow_dir.join(format!("{}.meta.json", sanitize_key(key)))
    }
}

async fn remove_if_present(path: PathBuf) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Map a cache key to a safe file name. Keys are fingerprints or job IDs
/// in practice, so this is a guard, not an encoding.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

