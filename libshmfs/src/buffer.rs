//! Immutable file payloads shared between the cache and open handles.
//!
//! A [`SharedBuffer`] is held by at most one cache entry and by any number of
//! open handles and mappings; the payload is freed when the last holder drops
//! its reference. While the cache holds a buffer its count never drops below 1.
use std::sync::Arc;

pub type SharedBuffer = Arc<Buffer>;

#[derive(Debug)]
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    /// Wrap loaded content. The address of the payload is fixed for the
    /// buffer's whole lifetime, which is what lets `mmap` hand it out.
    pub fn new(data: Vec<u8>) -> SharedBuffer {
        Arc::new(Self {
            data: data.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Number of live holders: the cache entry plus every handle and mapping.
    pub fn ref_count(this: &SharedBuffer) -> usize {
        Arc::strong_count(this)
    }

    /// Copy up to `out.len()` bytes starting at `offset`; 0 means end of data.
    pub fn read_at(&self, offset: u64, out: &mut [u8]) -> usize {
        let Ok(start) = usize::try_from(offset) else {
            return 0;
        };
        if start >= self.data.len() {
            return 0;
        }
        let n = out.len().min(self.data.len() - start);
        out[..n].copy_from_slice(&self.data[start..start + n]);
        n
    }
}
