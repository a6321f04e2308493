use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::buffer::{Buffer, SharedBuffer};
use crate::channel::{Response, Transport};

/// Cached outcome for one canonical path. Never evicted.
#[derive(Clone, Debug)]
pub enum CacheEntry {
    Loaded(SharedBuffer),
    Failed,
}

/// Result of a cache-only lookup.
#[derive(Clone, Debug)]
pub enum Resolution {
    Hit(SharedBuffer),
    /// The peer already said it cannot supply this path.
    Failed,
    /// Not cached, or never eligible for virtualization.
    Miss,
}

/// Canonicalizes paths and memoizes what the peer answered for each.
pub struct PathResolver<T: Transport> {
    excluded: Vec<PathBuf>,
    inner: Mutex<ResolverInner<T>>,
}

struct ResolverInner<T> {
    entries: HashMap<PathBuf, CacheEntry>,
    transport: Option<T>,
    round_trips: u64,
}

impl<T: Transport> PathResolver<T> {
    /// `transport` is `None` when the channel could not be opened; every
    /// uncached path then misses.
    pub fn new(transport: Option<T>, excluded: Vec<PathBuf>) -> Self {
        Self {
            excluded,
            inner: Mutex::new(ResolverInner {
                entries: HashMap::new(),
                transport,
                round_trips: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResolverInner<T>> {
        // A panic while holding the lock leaves only fully inserted entries behind.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_excluded(&self, canonical: &Path) -> bool {
        self.excluded.iter().any(|prefix| canonical.starts_with(prefix))
    }

    pub fn resolve(&self, path: &Path) -> Resolution {
        let canonical = canonicalize(path);
        if self.is_excluded(&canonical) {
            return Resolution::Miss;
        }
        lookup(&self.lock().entries, &canonical)
    }

    /// Store the peer's answer for `path`. If an answer is already cached it
    /// wins and is returned instead.
    pub fn record(&self, path: &Path, response: Response) -> Resolution {
        let canonical = canonicalize(path);
        let mut inner = self.lock();
        record_entry(&mut inner.entries, canonical, response)
    }

    /// Cached buffer for `path`, fetching it from the peer on first access.
    /// `None` means the caller must fall back to the real filesystem.
    ///
    /// The lock is held across the round trip so concurrent first accesses to
    /// one path cost exactly one exchange and all observe its outcome.
    pub fn load(&self, path: &Path) -> Option<SharedBuffer> {
        let canonical = canonicalize(path);
        if self.is_excluded(&canonical) {
            trace!("{} is excluded from virtualization", canonical.display());
            return None;
        }
        let mut inner = self.lock();
        match lookup(&inner.entries, &canonical) {
            Resolution::Hit(buffer) => {
                trace!("cache hit for {}", canonical.display());
                return Some(buffer);
            }
            Resolution::Failed => return None,
            Resolution::Miss => {}
        }
        let Some(transport) = inner.transport.as_mut() else {
            return None;
        };
        let response = match transport.fetch(canonical.as_os_str().as_encoded_bytes()) {
            Ok(response) => response,
            Err(crate::error::ShmfsError::PayloadTooLarge { len, capacity }) => {
                warn!(
                    "path {} ({len} bytes) does not fit the channel ({capacity})",
                    canonical.display()
                );
                Response::Unavailable
            }
            Err(e) => {
                warn!("channel exchange for {} failed: {e}", canonical.display());
                return None;
            }
        };
        inner.round_trips += 1;
        match record_entry(&mut inner.entries, canonical, response) {
            Resolution::Hit(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn round_trips(&self) -> u64 {
        self.lock().round_trips
    }

    pub fn cached_paths(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn has_transport(&self) -> bool {
        self.lock().transport.is_some()
    }

    /// Take the transport out for teardown; later misses fall through.
    pub fn shutdown(&self) -> Option<T> {
        self.lock().transport.take()
    }
}

fn lookup(entries: &HashMap<PathBuf, CacheEntry>, canonical: &Path) -> Resolution {
    match entries.get(canonical) {
        Some(CacheEntry::Loaded(buffer)) => Resolution::Hit(buffer.clone()),
        Some(CacheEntry::Failed) => Resolution::Failed,
        None => Resolution::Miss,
    }
}

fn record_entry(
    entries: &mut HashMap<PathBuf, CacheEntry>,
    canonical: PathBuf,
    response: Response,
) -> Resolution {
    if let Some(existing) = entries.get(&canonical) {
        return match existing {
            CacheEntry::Loaded(buffer) => Resolution::Hit(buffer.clone()),
            CacheEntry::Failed => Resolution::Failed,
        };
    }
    match response {
        Response::Content(data) => {
            let buffer = Buffer::new(data);
            entries.insert(canonical, CacheEntry::Loaded(buffer.clone()));
            Resolution::Hit(buffer)
        }
        Response::Unavailable => {
            info!("peer cannot supply {}, remembering", canonical.display());
            entries.insert(canonical, CacheEntry::Failed);
            Resolution::Failed
        }
    }
}

/// Absolute form of `path`: the real path when it exists locally, otherwise a
/// lexical normalization against the working directory.
pub fn canonicalize(path: &Path) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => Path::new("/").join(path),
        }
    };
    normalize_lexically(&absolute)
}

pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}
