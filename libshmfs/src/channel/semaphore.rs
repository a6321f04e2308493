use std::ffi::CString;
use std::ptr::NonNull;

use nix::errno::Errno;

use crate::error::{Result, ShmfsError};

/// A POSIX named semaphore used as a cross-process binary lock.
pub struct NamedSemaphore {
    name: CString,
    sem: NonNull<libc::sem_t>,
}

// sem_wait/sem_post are thread-safe on a shared handle.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Open a semaphore some other process created.
    pub fn open(name: &str) -> Result<Self> {
        let name = to_cstring(name)?;
        let sem = unsafe { libc::sem_open(name.as_ptr(), 0) };
        Self::from_raw(name, sem)
    }

    /// Exclusively create a semaphore with the given initial value.
    pub fn create(name: &str, value: u32) -> Result<Self> {
        let name = to_cstring(name)?;
        let sem = unsafe {
            libc::sem_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                value as libc::c_uint,
            )
        };
        Self::from_raw(name, sem)
    }

    fn from_raw(name: CString, sem: *mut libc::sem_t) -> Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(Errno::last().into());
        }
        match NonNull::new(sem) {
            Some(sem) => Ok(Self { name, sem }),
            None => Err(Errno::EINVAL.into()),
        }
    }

    /// Block until the semaphore is acquired; released when the guard drops.
    pub fn acquire(&self) -> Result<SemGuard<'_>> {
        loop {
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(SemGuard { sem: self });
            }
            match Errno::last() {
                Errno::EINTR => continue,
                e => return Err(e.into()),
            }
        }
    }

    fn release(&self) -> Result<()> {
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == 0 {
            Ok(())
        } else {
            Err(Errno::last().into())
        }
    }

    /// Remove a name from the system. Absent names are not an error.
    pub fn unlink(name: &str) -> Result<bool> {
        let name = to_cstring(name)?;
        if unsafe { libc::sem_unlink(name.as_ptr()) } == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::ENOENT => Ok(false),
            e => Err(e.into()),
        }
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        if unsafe { libc::sem_close(self.sem.as_ptr()) } != 0 {
            warn!(
                "failed to close semaphore {:?}: {}",
                self.name,
                Errno::last()
            );
        }
    }
}

pub struct SemGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl Drop for SemGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.release() {
            warn!("failed to release semaphore {:?}: {e}", self.sem.name);
        }
    }
}

fn to_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| ShmfsError::InvalidArgument("resource name contains NUL"))
}
