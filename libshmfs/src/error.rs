use std::os::fd::RawFd;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShmfsError>;

#[derive(Debug, Error)]
pub enum ShmfsError {
    /// The peer's segment or semaphore could not be opened; the whole process
    /// stays in passthrough mode.
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The peer answered with the error sentinel for this path.
    #[error("peer could not supply {}", .0.display())]
    LoadFailure(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("virtualized files are read-only")]
    WriteUnsupported,

    #[error("descriptor {0} is not a virtual descriptor")]
    BadDescriptor(RawFd),

    #[error("synthetic descriptor space exhausted")]
    DescriptorsExhausted,

    #[error("payload of {len} bytes exceeds channel capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error(transparent)]
    Nix(#[from] nix::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShmfsError {
    /// The errno value a libc caller observes for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            ShmfsError::ChannelUnavailable(_) | ShmfsError::LoadFailure(_) => libc::ENOENT,
            ShmfsError::InvalidArgument(_) => libc::EINVAL,
            ShmfsError::WriteUnsupported => libc::EIO,
            ShmfsError::BadDescriptor(_) => libc::EBADF,
            ShmfsError::DescriptorsExhausted => libc::EMFILE,
            ShmfsError::PayloadTooLarge { .. } => libc::EFBIG,
            ShmfsError::Nix(e) => *e as i32,
            ShmfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
