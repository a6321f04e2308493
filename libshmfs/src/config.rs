use std::os::fd::RawFd;
use std::path::PathBuf;

use crate::channel::layout::HEADER_LEN;

pub static DEFAULT_SEMAPHORE_PREFIX: &str = "/PGDBSemaphore";
pub static DEFAULT_SEGMENT_PREFIX: &str = "/PGDBMem";
pub const DEFAULT_SEGMENT_SIZE: usize = 32 * 1024 * 1024;
/// High enough that a process would have to keep ~65k real files open to collide.
pub const DEFAULT_FD_BASE: RawFd = 65535;
/// The header's length field is 4 bytes wide.
pub const MAX_SEGMENT_SIZE: usize = HEADER_LEN + u32::MAX as usize;
pub static DEFAULT_EXCLUDES: [&str; 3] = ["/proc", "/sys", "/dev"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShmfsConfig {
    pub semaphore_prefix: String,
    pub segment_prefix: String,
    pub host: String,
    /// Total size of the shared region, header included.
    pub segment_size: usize,
    pub fd_base: RawFd,
    pub excluded: Vec<PathBuf>,
    pub disabled: bool,
    pub unlink_on_exit: bool,
}

impl Default for ShmfsConfig {
    fn default() -> Self {
        Self {
            semaphore_prefix: DEFAULT_SEMAPHORE_PREFIX.to_string(),
            segment_prefix: DEFAULT_SEGMENT_PREFIX.to_string(),
            host: local_hostname(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            fd_base: DEFAULT_FD_BASE,
            excluded: DEFAULT_EXCLUDES.iter().map(PathBuf::from).collect(),
            disabled: false,
            unlink_on_exit: true,
        }
    }
}

impl ShmfsConfig {
    /// Defaults overridden by `SHMFS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(prefix) = lookup("SHMFS_SEMAPHORE_PREFIX") {
            config.semaphore_prefix = prefix;
        }
        if let Some(prefix) = lookup("SHMFS_SEGMENT_PREFIX") {
            config.segment_prefix = prefix;
        }
        if let Some(host) = lookup("SHMFS_HOST").filter(|h| !h.is_empty()) {
            config.host = host;
        }
        if let Some(raw) = lookup("SHMFS_SEGMENT_SIZE") {
            match raw.trim().parse::<usize>() {
                Ok(size) if size > HEADER_LEN && size <= MAX_SEGMENT_SIZE => {
                    config.segment_size = size
                }
                _ => warn!("ignoring SHMFS_SEGMENT_SIZE={raw:?}, using {DEFAULT_SEGMENT_SIZE}"),
            }
        }
        if let Some(raw) = lookup("SHMFS_FD_BASE") {
            match raw.trim().parse::<RawFd>() {
                Ok(base) if base > 0 => config.fd_base = base,
                _ => warn!("ignoring SHMFS_FD_BASE={raw:?}, using {DEFAULT_FD_BASE}"),
            }
        }
        if let Some(raw) = lookup("SHMFS_EXCLUDE") {
            config.excluded = raw
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(raw) = lookup("SHMFS_DISABLE") {
            config.disabled = parse_flag(&raw);
        }
        if let Some(raw) = lookup("SHMFS_UNLINK_ON_EXIT") {
            config.unlink_on_exit = parse_flag(&raw);
        }
        config
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("gethostname failed: {e}");
            String::new()
        }
    }
}
