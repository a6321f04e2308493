use std::fs::File;

use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;

use super::layout::HEADER_LEN;
use crate::error::{Result, ShmfsError};

/// A mapped POSIX shared-memory object holding the channel header and payload.
pub struct SharedSegment {
    map: MmapMut,
}

impl SharedSegment {
    /// Map an existing segment. A segment shorter than `size` is mapped at
    /// its real length so no access can run past the object.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::S_IRUSR | Mode::S_IWUSR)?;
        let file = File::from(fd);
        let actual = file.metadata()?.len() as usize;
        let len = size.min(actual);
        if len <= HEADER_LEN {
            return Err(ShmfsError::ChannelUnavailable(format!(
                "segment {name} is {actual} bytes, too small for the channel header"
            )));
        }
        Self::map(&file, len)
    }

    /// Exclusively create a zeroed segment of `size` bytes.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        if size <= HEADER_LEN {
            return Err(ShmfsError::InvalidArgument("segment smaller than header"));
        }
        let fd = shm_open(
            name,
            OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_EXCL,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        let file = File::from(fd);
        if let Err(e) = file.set_len(size as u64) {
            let _ = shm_unlink(name);
            return Err(e.into());
        }
        let mut segment = Self::map(&file, size)?;
        segment.region_mut()[..HEADER_LEN].fill(0);
        Ok(segment)
    }

    fn map(file: &File, len: usize) -> Result<Self> {
        // The descriptor may be closed once mapped; the mapping keeps the object alive.
        let map = unsafe { MmapOptions::new().len(len).map_mut(file) }?;
        Ok(Self { map })
    }

    pub fn region(&self) -> &[u8] {
        &self.map
    }

    pub fn region_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Remove a segment name. Absent names are not an error.
    pub fn unlink(name: &str) -> Result<bool> {
        match shm_unlink(name) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
