use std::collections::HashMap;
use std::os::fd::RawFd;

use crate::buffer::SharedBuffer;
use crate::error::{Result, ShmfsError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl Whence {
    pub fn from_raw(whence: libc::c_int) -> Result<Self> {
        match whence {
            libc::SEEK_SET => Ok(Whence::Set),
            libc::SEEK_CUR => Ok(Whence::Cur),
            libc::SEEK_END => Ok(Whence::End),
            _ => Err(ShmfsError::InvalidArgument("unknown whence")),
        }
    }
}

/// One virtual open: a buffer reference plus an independent cursor.
#[derive(Debug)]
pub struct OpenHandle {
    buffer: SharedBuffer,
    cursor: u64,
}

impl OpenHandle {
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn at_end(&self) -> bool {
        self.cursor >= self.buffer.len() as u64
    }
}

/// Synthetic descriptor bookkeeping.
///
/// Descriptors come from a counter seeded well above anything the kernel hands
/// out. The counter never wraps: once it would overflow, allocation fails and
/// callers fall back to the real filesystem.
#[derive(Debug)]
pub struct HandleTable {
    next_fd: RawFd,
    handles: HashMap<RawFd, OpenHandle>,
    /// Payload address -> one buffer reference per outstanding mapping.
    mappings: HashMap<usize, Vec<SharedBuffer>>,
}

impl HandleTable {
    pub fn new(fd_base: RawFd) -> Self {
        Self {
            next_fd: fd_base,
            handles: HashMap::new(),
            mappings: HashMap::new(),
        }
    }

    pub fn allocate(&mut self, buffer: SharedBuffer) -> Result<RawFd> {
        let fd = self.next_fd;
        self.next_fd = fd.checked_add(1).ok_or(ShmfsError::DescriptorsExhausted)?;
        self.handles.insert(fd, OpenHandle { buffer, cursor: 0 });
        Ok(fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.handles.contains_key(&fd)
    }

    pub fn lookup(&self, fd: RawFd) -> Option<&OpenHandle> {
        self.handles.get(&fd)
    }

    fn handle_mut(&mut self, fd: RawFd) -> Result<&mut OpenHandle> {
        self.handles
            .get_mut(&fd)
            .ok_or(ShmfsError::BadDescriptor(fd))
    }

    /// Drop the handle and with it one reference to its buffer.
    pub fn close(&mut self, fd: RawFd) -> Result<()> {
        self.handles
            .remove(&fd)
            .map(drop)
            .ok_or(ShmfsError::BadDescriptor(fd))
    }

    /// New descriptor on the same buffer, starting at the same cursor.
    pub fn duplicate(&mut self, fd: RawFd) -> Result<RawFd> {
        let (buffer, cursor) = {
            let handle = self.handle_mut(fd)?;
            (handle.buffer.clone(), handle.cursor)
        };
        let dup = self.allocate(buffer)?;
        self.handle_mut(dup)?.cursor = cursor;
        Ok(dup)
    }

    /// Copy from the cursor and advance it. `Ok(0)` is end of data.
    pub fn read(&mut self, fd: RawFd, out: &mut [u8]) -> Result<usize> {
        let handle = self.handle_mut(fd)?;
        let n = handle.buffer.read_at(handle.cursor, out);
        handle.cursor += n as u64;
        Ok(n)
    }

    /// Read at `offset` without touching the cursor.
    pub fn pread(&self, fd: RawFd, out: &mut [u8], offset: i64) -> Result<usize> {
        let handle = self.lookup(fd).ok_or(ShmfsError::BadDescriptor(fd))?;
        let offset = u64::try_from(offset)
            .map_err(|_| ShmfsError::InvalidArgument("negative offset"))?;
        Ok(handle.buffer.read_at(offset, out))
    }

    /// Reposition the cursor. Past-the-end positions are allowed; a negative
    /// result or unknown whence fails and leaves the cursor where it was.
    pub fn seek(&mut self, fd: RawFd, offset: i64, whence: libc::c_int) -> Result<u64> {
        let handle = self.handle_mut(fd)?;
        let base = match Whence::from_raw(whence)? {
            Whence::Set => 0i128,
            Whence::Cur => handle.cursor as i128,
            Whence::End => handle.buffer.len() as i128,
        };
        let target = base + offset as i128;
        if target < 0 || target > i64::MAX as i128 {
            return Err(ShmfsError::InvalidArgument("seek out of range"));
        }
        handle.cursor = target as u64;
        Ok(handle.cursor)
    }

    pub fn tell(&self, fd: RawFd) -> Result<u64> {
        self.lookup(fd)
            .map(OpenHandle::cursor)
            .ok_or(ShmfsError::BadDescriptor(fd))
    }

    pub fn write(&mut self, fd: RawFd, _data: &[u8]) -> Result<usize> {
        self.handle_mut(fd)?;
        Err(ShmfsError::WriteUnsupported)
    }

    /// Hand out the payload address of `fd`'s buffer, keeping the buffer alive
    /// until [`HandleTable::unmap`] is called with the same address.
    pub fn map(&mut self, fd: RawFd, len: usize, offset: i64) -> Result<*const u8> {
        let buffer = self
            .lookup(fd)
            .ok_or(ShmfsError::BadDescriptor(fd))?
            .buffer
            .clone();
        if len == 0 {
            return Err(ShmfsError::InvalidArgument("zero-length mapping"));
        }
        if buffer.is_empty() {
            return Err(ShmfsError::InvalidArgument("empty file cannot be mapped"));
        }
        let offset = usize::try_from(offset)
            .ok()
            .filter(|o| *o < buffer.len())
            .ok_or(ShmfsError::InvalidArgument("mapping offset outside file"))?;
        let addr = unsafe { buffer.as_ptr().add(offset) };
        self.mappings.entry(addr as usize).or_default().push(buffer);
        Ok(addr)
    }

    /// Release a mapping made by [`HandleTable::map`]; false if `addr` is not ours.
    pub fn unmap(&mut self, addr: usize) -> bool {
        let Some(holders) = self.mappings.get_mut(&addr) else {
            return false;
        };
        holders.pop();
        if holders.is_empty() {
            self.mappings.remove(&addr);
        }
        true
    }

    pub fn open_count(&self) -> usize {
        self.handles.len()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.values().map(Vec::len).sum()
    }

    /// Copy up to `out.len()` bytes from the cursor, stopping after the first
    /// newline. Used for line-oriented stream reads.
    pub fn read_line(&mut self, fd: RawFd, out: &mut [u8]) -> Result<usize> {
        self.read_until(fd, b'\n', out)
    }

    /// Copy up to `out.len()` bytes from the cursor, stopping after the first
    /// `delim`, and advance the cursor past what was copied.
    pub fn read_until(&mut self, fd: RawFd, delim: u8, out: &mut [u8]) -> Result<usize> {
        let handle = self.handle_mut(fd)?;
        let data = handle.buffer.as_slice();
        let start = usize::try_from(handle.cursor)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let window = &data[start..data.len().min(start.saturating_add(out.len()))];
        let n = match window.iter().position(|b| *b == delim) {
            Some(at) => at + 1,
            None => window.len(),
        };
        out[..n].copy_from_slice(&window[..n]);
        handle.cursor += n as u64;
        Ok(n)
    }

    /// How many bytes [`HandleTable::read_until`] would copy given unlimited
    /// room. 0 at or past the end.
    pub fn span_until(&self, fd: RawFd, delim: u8) -> Result<usize> {
        let handle = self.lookup(fd).ok_or(ShmfsError::BadDescriptor(fd))?;
        let data = handle.buffer.as_slice();
        let start = usize::try_from(handle.cursor)
            .unwrap_or(usize::MAX)
            .min(data.len());
        let rest = &data[start..];
        Ok(rest
            .iter()
            .position(|b| *b == delim)
            .map_or(rest.len(), |at| at + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;

    fn table_with(content: &[u8]) -> (HandleTable, SharedBuffer, RawFd) {
        let mut table = HandleTable::new(65535);
        let buffer = Buffer::new(content.to_vec());
        let fd = table.allocate(buffer.clone()).unwrap();
        (table, buffer, fd)
    }

    #[test]
    fn test_read_advances_cursor_until_end() {
        let (mut table, _buffer, fd) = table_with(b"INT MAIN");
        let mut out = [0u8; 3];
        assert_eq!(table.read(fd, &mut out).unwrap(), 3);
        assert_eq!(&out, b"INT");
        assert_eq!(table.tell(fd).unwrap(), 3);
        let mut out = [0u8; 5];
        assert_eq!(table.read(fd, &mut out).unwrap(), 5);
        assert_eq!(&out, b" MAIN");
        assert_eq!(table.tell(fd).unwrap(), 8);
        assert!(table.lookup(fd).unwrap().at_end());
        assert_eq!(table.read(fd, &mut out).unwrap(), 0);
    }

    #[test]
    fn test_seek_variants() {
        let (mut table, _buffer, fd) = table_with(b"0123456789");
        assert_eq!(table.seek(fd, 4, libc::SEEK_SET).unwrap(), 4);
        assert_eq!(table.seek(fd, 2, libc::SEEK_CUR).unwrap(), 6);
        assert_eq!(table.seek(fd, -3, libc::SEEK_END).unwrap(), 7);
        let mut out = [0u8; 8];
        assert_eq!(table.read(fd, &mut out).unwrap(), 3);
        assert_eq!(&out[..3], b"789");

        assert_eq!(table.seek(fd, 5, libc::SEEK_END).unwrap(), 15);
        assert_eq!(table.read(fd, &mut out).unwrap(), 0);

        assert_eq!(table.seek(fd, 0, libc::SEEK_SET).unwrap(), 0);
        let mut all = [0u8; 10];
        assert_eq!(table.read(fd, &mut all).unwrap(), 10);
        assert_eq!(&all, b"0123456789");
    }

    #[test]
    fn test_bad_seek_leaves_cursor() {
        let (mut table, _buffer, fd) = table_with(b"0123456789");
        table.seek(fd, 4, libc::SEEK_SET).unwrap();
        assert!(matches!(
            table.seek(fd, 0, 42),
            Err(ShmfsError::InvalidArgument(_))
        ));
        assert!(matches!(
            table.seek(fd, -5, libc::SEEK_SET),
            Err(ShmfsError::InvalidArgument(_))
        ));
        assert_eq!(table.tell(fd).unwrap(), 4);
    }

    #[test]
    fn test_pread_keeps_cursor() {
        let (mut table, _buffer, fd) = table_with(b"0123456789");
        let mut out = [0u8; 4];
        assert_eq!(table.pread(fd, &mut out, 6).unwrap(), 4);
        assert_eq!(&out, b"6789");
        assert_eq!(table.tell(fd).unwrap(), 0);
        assert!(table.pread(fd, &mut out, -1).is_err());
        assert_eq!(table.read(fd, &mut out).unwrap(), 4);
        assert_eq!(&out, b"0123");
    }

    #[test]
    fn test_write_is_rejected() {
        let (mut table, _buffer, fd) = table_with(b"abc");
        assert!(matches!(
            table.write(fd, b"x"),
            Err(ShmfsError::WriteUnsupported)
        ));
        assert!(matches!(
            table.write(3, b"x"),
            Err(ShmfsError::BadDescriptor(3))
        ));
    }

    #[test]
    fn test_refcount_returns_to_cached_value() {
        let mut table = HandleTable::new(65535);
        let cached = Buffer::new(b"abc".to_vec());
        let fds: Vec<_> = (0..5)
            .map(|_| table.allocate(cached.clone()).unwrap())
            .collect();
        assert_eq!(Buffer::ref_count(&cached), 6);
        let mut unique = fds.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        for fd in fds {
            table.close(fd).unwrap();
        }
        assert_eq!(Buffer::ref_count(&cached), 1);
        assert_eq!(cached.as_slice(), b"abc");
    }

    #[test]
    fn test_close_unknown_descriptor() {
        let mut table = HandleTable::new(65535);
        assert!(matches!(table.close(7), Err(ShmfsError::BadDescriptor(7))));
    }

    #[test]
    fn test_counter_exhaustion_fails() {
        let mut table = HandleTable::new(RawFd::MAX);
        let buffer = Buffer::new(vec![1]);
        assert!(matches!(
            table.allocate(buffer.clone()),
            Err(ShmfsError::DescriptorsExhausted)
        ));
        assert_eq!(table.open_count(), 0);
        assert_eq!(Buffer::ref_count(&buffer), 1);
    }

    #[test]
    fn test_duplicate_has_independent_cursor() {
        let (mut table, _buffer, fd) = table_with(b"abcdef");
        table.seek(fd, 2, libc::SEEK_SET).unwrap();
        let dup = table.duplicate(fd).unwrap();
        assert_ne!(dup, fd);
        assert_eq!(table.tell(dup).unwrap(), 2);
        let mut out = [0u8; 2];
        table.read(dup, &mut out).unwrap();
        assert_eq!(table.tell(dup).unwrap(), 4);
        assert_eq!(table.tell(fd).unwrap(), 2);
    }

    #[test]
    fn test_map_and_unmap_hold_a_reference() {
        let (mut table, buffer, fd) = table_with(b"ELF....");
        let addr = table.map(fd, 7, 0).unwrap();
        assert_eq!(addr, buffer.as_ptr());
        table.close(fd).unwrap();
        assert_eq!(Buffer::ref_count(&buffer), 2);
        assert!(table.unmap(addr as usize));
        assert!(!table.unmap(addr as usize));
        assert_eq!(Buffer::ref_count(&buffer), 1);
    }

    #[test]
    fn test_empty_file_cannot_be_mapped() {
        let (mut table, buffer, fd) = table_with(b"");
        assert!(matches!(
            table.map(fd, 4096, 0),
            Err(ShmfsError::InvalidArgument(_))
        ));
        assert_eq!(table.mapping_count(), 0);
        assert_eq!(Buffer::ref_count(&buffer), 2);
    }

    #[test]
    fn test_read_until_custom_delimiter() {
        let (mut table, _buffer, fd) = table_with(b"a:bb:ccc");
        assert_eq!(table.span_until(fd, b':').unwrap(), 2);
        let mut out = [0u8; 16];
        assert_eq!(table.read_until(fd, b':', &mut out).unwrap(), 2);
        assert_eq!(&out[..2], b"a:");
        assert_eq!(table.span_until(fd, b':').unwrap(), 3);
        assert_eq!(table.read_until(fd, b':', &mut out[..2]).unwrap(), 2);
        assert_eq!(&out[..2], b"bb");
        assert_eq!(table.read_until(fd, b':', &mut out).unwrap(), 1);
        assert_eq!(table.span_until(fd, b':').unwrap(), 3);
        assert_eq!(table.read_until(fd, b':', &mut out).unwrap(), 3);
        assert_eq!(&out[..3], b"ccc");
        assert_eq!(table.span_until(fd, b':').unwrap(), 0);
        assert_eq!(table.read_until(fd, b':', &mut out).unwrap(), 0);
        table.seek(fd, 100, libc::SEEK_SET).unwrap();
        assert_eq!(table.span_until(fd, b':').unwrap(), 0);
    }

    #[test]
    fn test_repeated_mappings_are_counted() {
        let (mut table, buffer, fd) = table_with(b"ELF....");
        let first = table.map(fd, 7, 0).unwrap();
        let second = table.map(fd, 7, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.mapping_count(), 2);
        assert!(table.unmap(first as usize));
        assert!(table.unmap(second as usize));
        assert!(!table.unmap(first as usize));
        assert_eq!(Buffer::ref_count(&buffer), 2);
    }

    #[test]
    fn test_read_line_stops_after_newline() {
        let (mut table, _buffer, fd) = table_with(b"one\ntwo\nlast");
        let mut out = [0u8; 16];
        assert_eq!(table.read_line(fd, &mut out).unwrap(), 4);
        assert_eq!(&out[..4], b"one\n");
        let mut small = [0u8; 2];
        assert_eq!(table.read_line(fd, &mut small).unwrap(), 2);
        assert_eq!(&small, b"tw");
        assert_eq!(table.read_line(fd, &mut out).unwrap(), 2);
        assert_eq!(&out[..2], b"o\n");
        assert_eq!(table.read_line(fd, &mut out).unwrap(), 4);
        assert_eq!(&out[..4], b"last");
        assert_eq!(table.read_line(fd, &mut out).unwrap(), 0);
    }

    #[test]
    fn test_map_rejects_bad_ranges() {
        let (mut table, _buffer, fd) = table_with(b"ELF");
        assert!(table.map(fd, 0, 0).is_err());
        assert!(table.map(fd, 3, 3).is_err());
        assert!(table.map(fd, 3, -1).is_err());
        assert_eq!(table.mapping_count(), 0);
    }
}
