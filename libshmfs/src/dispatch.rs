//! Decision layer between the exported C entry points and the real libc.
//!
//! Every operation first asks whether its descriptor, stream or address is one
//! of ours. If not, the call is forwarded unchanged to [`RealIo`]. Failures of
//! virtual operations are reported the C way: a sentinel return plus `errno`.
use std::ffi::{CStr, OsStr};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::{Mutex, MutexGuard};

use libc::{FILE, c_char, c_int, c_long, c_void, mode_t, off_t, size_t, ssize_t};
use nix::errno::Errno;

use crate::channel::Transport;
use crate::config::ShmfsConfig;
use crate::error::{Result, ShmfsError};
use crate::handle::HandleTable;
use crate::real::RealIo;
use crate::resolver::PathResolver;
use crate::stream::StreamTable;

/// Block size reported by `fstat` for virtual files.
const VIRTUAL_BLKSIZE: i64 = 4096;

struct OpenState {
    handles: HandleTable,
    streams: StreamTable,
}

pub struct Dispatcher<R: RealIo, T: Transport> {
    real: R,
    resolver: PathResolver<T>,
    state: Mutex<OpenState>,
}

/// `open` flags that may be served from the cache.
pub fn is_read_only_open(flags: c_int) -> bool {
    flags & libc::O_ACCMODE == libc::O_RDONLY
        && flags & (libc::O_CREAT | libc::O_TRUNC | libc::O_DIRECTORY | libc::O_PATH) == 0
}

/// `fopen`/`fdopen` modes that may be served from the cache.
pub fn is_read_only_mode(mode: &[u8]) -> bool {
    mode.first() == Some(&b'r') && !mode.contains(&b'+')
}

/// Whether `size * n` bytes fit an object of `object` bytes, as the fortified
/// `fread` requires.
pub fn items_fit(size: size_t, n: size_t, object: size_t) -> bool {
    size.checked_mul(n).is_some_and(|total| total <= object)
}

fn fail<V>(op: &str, err: ShmfsError, ret: V) -> V {
    debug!("virtual {op} failed: {err}");
    errno::set_errno(errno::Errno(err.errno()));
    ret
}

unsafe fn out_slice<'a>(buf: *mut c_void, count: size_t) -> Result<&'a mut [u8]> {
    if count == 0 {
        return Ok(&mut []);
    }
    if buf.is_null() {
        return Err(Errno::EFAULT.into());
    }
    Ok(unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), count) })
}

unsafe fn c_path<'a>(path: *const c_char) -> &'a Path {
    Path::new(OsStr::from_bytes(unsafe { CStr::from_ptr(path) }.to_bytes()))
}

unsafe fn read_items(
    handles: &mut HandleTable,
    fd: RawFd,
    ptr: *mut c_void,
    size: size_t,
    n: size_t,
) -> Result<size_t> {
    let total = size
        .checked_mul(n)
        .ok_or(ShmfsError::InvalidArgument("fread size overflows"))?;
    if total == 0 {
        return Ok(0);
    }
    let out = unsafe { out_slice(ptr, total) }?;
    Ok(handles.read(fd, out)? / size)
}

impl<R: RealIo, T: Transport> Dispatcher<R, T> {
    /// `transport` is `None` when the channel could not be opened; the
    /// dispatcher is then a pure passthrough.
    pub fn new(real: R, transport: Option<T>, config: &ShmfsConfig) -> Self {
        let transport = if config.disabled { None } else { transport };
        Self {
            real,
            resolver: PathResolver::new(transport, config.excluded.clone()),
            state: Mutex::new(OpenState {
                handles: HandleTable::new(config.fd_base),
                streams: StreamTable::new(),
            }),
        }
    }

    pub fn real(&self) -> &R {
        &self.real
    }

    pub fn resolver(&self) -> &PathResolver<T> {
        &self.resolver
    }

    fn lock(&self) -> MutexGuard<'_, OpenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` under the state lock if `fd` is a virtual descriptor.
    fn on_virtual<V>(&self, fd: RawFd, f: impl FnOnce(&mut OpenState) -> V) -> Option<V> {
        let mut state = self.lock();
        if state.handles.contains(fd) {
            Some(f(&mut *state))
        } else {
            None
        }
    }

    /// Run `f` with the token and descriptor if `stream` is a virtual stream.
    fn on_stream<V>(
        &self,
        stream: *mut FILE,
        f: impl FnOnce(&mut OpenState, usize, RawFd) -> V,
    ) -> Option<V> {
        let token = stream as usize;
        let mut state = self.lock();
        let fd = state.streams.fd(token)?;
        Some(f(&mut *state, token, fd))
    }

    /// Synthetic descriptor for `path`, or `None` when the call must fall
    /// through to the real filesystem.
    pub fn open_path(&self, path: &Path) -> Option<RawFd> {
        let buffer = self.resolver.load(path)?;
        match self.lock().handles.allocate(buffer) {
            Ok(fd) => {
                debug!("opened {} as virtual fd {fd}", path.display());
                Some(fd)
            }
            Err(e) => {
                warn!("cannot virtualize {}: {e}", path.display());
                None
            }
        }
    }

    pub fn is_virtual(&self, fd: RawFd) -> bool {
        self.lock().handles.contains(fd)
    }

    pub fn is_virtual_stream(&self, stream: *mut FILE) -> bool {
        self.lock().streams.contains(stream as usize)
    }

    pub fn open_count(&self) -> usize {
        self.lock().handles.open_count()
    }

    pub fn stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    pub fn mapping_count(&self) -> usize {
        self.lock().handles.mapping_count()
    }

    /// Release the channel. Open handles, streams and mappings stay valid so
    /// late users (other destructors) keep reading from the cache.
    pub fn shutdown(&self) -> Option<T> {
        info!(
            "shutting down: {} cached paths, {} round trips",
            self.resolver.cached_paths(),
            self.resolver.round_trips()
        );
        self.resolver.shutdown()
    }

    pub unsafe fn open(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        if !path.is_null() && is_read_only_open(flags) {
            if let Some(fd) = self.open_path(unsafe { c_path(path) }) {
                return fd;
            }
        }
        unsafe { self.real.open(path, flags, mode) }
    }

    pub unsafe fn close(&self, fd: c_int) -> c_int {
        match self.on_virtual(fd, |s| s.handles.close(fd)) {
            Some(Ok(())) => {
                debug!("closed virtual fd {fd}");
                0
            }
            Some(Err(e)) => fail("close", e, -1),
            None => unsafe { self.real.close(fd) },
        }
    }

    pub unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        let read = self.on_virtual(fd, |s| {
            let out = unsafe { out_slice(buf, count) }?;
            s.handles.read(fd, out)
        });
        match read {
            Some(Ok(n)) => n as ssize_t,
            Some(Err(e)) => fail("read", e, -1),
            None => unsafe { self.real.read(fd, buf, count) },
        }
    }

    pub unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        match self.on_virtual(fd, |s| s.handles.write(fd, &[])) {
            Some(Ok(n)) => n as ssize_t,
            Some(Err(e)) => fail("write", e, -1),
            None => unsafe { self.real.write(fd, buf, count) },
        }
    }

    pub unsafe fn fcntl(&self, fd: c_int, cmd: c_int, arg: usize) -> c_int {
        let result = self.on_virtual(fd, |s| match cmd {
            libc::F_GETFL => Ok(libc::O_RDONLY),
            libc::F_DUPFD | libc::F_DUPFD_CLOEXEC => s.handles.duplicate(fd),
            _ => Ok(0),
        });
        match result {
            Some(Ok(ret)) => ret,
            Some(Err(e)) => fail("fcntl", e, -1),
            None => unsafe { self.real.fcntl(fd, cmd, arg) },
        }
    }

    pub unsafe fn fstat(&self, fd: c_int, buf: *mut libc::stat) -> c_int {
        let len = self.on_virtual(fd, |s| s.handles.lookup(fd).map_or(0, |h| h.buffer().len()));
        let Some(len) = len else {
            return unsafe { self.real.fstat(fd, buf) };
        };
        if buf.is_null() {
            return fail("fstat", Errno::EFAULT.into(), -1);
        }
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        st.st_mode = libc::S_IFREG | 0o444;
        st.st_size = len as off_t;
        st.st_blksize = VIRTUAL_BLKSIZE as libc::blksize_t;
        unsafe { buf.write(st) };
        0
    }

    pub unsafe fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> off_t {
        match self.on_virtual(fd, |s| s.handles.seek(fd, offset, whence)) {
            Some(Ok(pos)) => pos as off_t,
            Some(Err(e)) => fail("lseek", e, -1),
            None => unsafe { self.real.lseek(fd, offset, whence) },
        }
    }

    pub unsafe fn pread(
        &self,
        fd: c_int,
        buf: *mut c_void,
        count: size_t,
        offset: off_t,
    ) -> ssize_t {
        let read = self.on_virtual(fd, |s| {
            let out = unsafe { out_slice(buf, count) }?;
            s.handles.pread(fd, out, offset)
        });
        match read {
            Some(Ok(n)) => n as ssize_t,
            Some(Err(e)) => fail("pread", e, -1),
            None => unsafe { self.real.pread(fd, buf, count, offset) },
        }
    }

    pub unsafe fn fopen(&self, path: *const c_char, mode: *const c_char) -> *mut FILE {
        if !path.is_null()
            && !mode.is_null()
            && is_read_only_mode(unsafe { CStr::from_ptr(mode) }.to_bytes())
        {
            if let Some(fd) = self.open_path(unsafe { c_path(path) }) {
                return self.lock().streams.open(fd) as *mut FILE;
            }
        }
        unsafe { self.real.fopen(path, mode) }
    }

    pub unsafe fn fdopen(&self, fd: c_int, mode: *const c_char) -> *mut FILE {
        let readable =
            !mode.is_null() && is_read_only_mode(unsafe { CStr::from_ptr(mode) }.to_bytes());
        let result = self.on_virtual(fd, |s| {
            if readable {
                Ok(s.streams.open(fd))
            } else {
                Err(ShmfsError::InvalidArgument("stream mode needs write access"))
            }
        });
        match result {
            Some(Ok(token)) => token as *mut FILE,
            Some(Err(e)) => fail("fdopen", e, ptr::null_mut()),
            None => unsafe { self.real.fdopen(fd, mode) },
        }
    }

    pub unsafe fn fclose(&self, stream: *mut FILE) -> c_int {
        let closed = self.on_stream(stream, |s, token, fd| {
            s.streams.close(token);
            s.handles.close(fd)
        });
        match closed {
            Some(Ok(())) => 0,
            Some(Err(e)) => fail("fclose", e, libc::EOF),
            None => unsafe { self.real.fclose(stream) },
        }
    }

    pub unsafe fn fread(
        &self,
        ptr: *mut c_void,
        size: size_t,
        n: size_t,
        stream: *mut FILE,
    ) -> size_t {
        let read = self.on_stream(stream, |s, token, fd| {
            let read = unsafe { read_items(&mut s.handles, fd, ptr, size, n) };
            if read.is_err() {
                s.streams.set_error(token);
            }
            read
        });
        match read {
            Some(Ok(items)) => items,
            Some(Err(e)) => fail("fread", e, 0),
            None => unsafe { self.real.fread(ptr, size, n, stream) },
        }
    }

    pub unsafe fn fwrite(
        &self,
        ptr: *const c_void,
        size: size_t,
        n: size_t,
        stream: *mut FILE,
    ) -> size_t {
        let written = self.on_stream(stream, |s, token, fd| {
            s.streams.set_error(token);
            s.handles.write(fd, &[])
        });
        match written {
            Some(Ok(n)) => n,
            Some(Err(e)) => fail("fwrite", e, 0),
            None => unsafe { self.real.fwrite(ptr, size, n, stream) },
        }
    }

    pub unsafe fn fgetc(&self, stream: *mut FILE) -> c_int {
        let byte = self.on_stream(stream, |s, _, fd| {
            let mut byte = [0u8; 1];
            s.handles.read(fd, &mut byte).map(|n| (n == 1).then_some(byte[0]))
        });
        match byte {
            Some(Ok(Some(b))) => c_int::from(b),
            Some(Ok(None)) => libc::EOF,
            Some(Err(e)) => fail("fgetc", e, libc::EOF),
            None => unsafe { self.real.fgetc(stream) },
        }
    }

    pub unsafe fn fgets(&self, s: *mut c_char, n: c_int, stream: *mut FILE) -> *mut c_char {
        let filled = self.on_stream(stream, |state, token, fd| -> Result<bool> {
            let len = usize::try_from(n)
                .ok()
                .filter(|len| *len > 0)
                .ok_or(ShmfsError::InvalidArgument("fgets size must be positive"))?;
            let out = unsafe { out_slice(s.cast::<c_void>(), len) }?;
            let (line, rest) = out.split_at_mut(len - 1);
            let got = state.handles.read_line(fd, line).inspect_err(|_| {
                state.streams.set_error(token);
            })?;
            if got == 0 && !line.is_empty() {
                return Ok(false);
            }
            match line.get_mut(got) {
                Some(end) => *end = 0,
                None => rest[0] = 0,
            }
            Ok(true)
        });
        match filled {
            Some(Ok(true)) => s,
            Some(Ok(false)) => ptr::null_mut(),
            Some(Err(e)) => fail("fgets", e, ptr::null_mut()),
            None => unsafe { self.real.fgets(s, n, stream) },
        }
    }

    /// `getdelim(3)`: grow `*lineptr` with `realloc` as needed and copy up to
    /// and including `delim`, NUL-terminated. -1 at end of data.
    pub unsafe fn getdelim(
        &self,
        lineptr: *mut *mut c_char,
        n: *mut size_t,
        delim: c_int,
        stream: *mut FILE,
    ) -> ssize_t {
        let got = self.on_stream(stream, |state, token, fd| -> Result<Option<usize>> {
            if lineptr.is_null() || n.is_null() {
                return Err(ShmfsError::InvalidArgument("getdelim needs a line buffer"));
            }
            let delim = delim as u8;
            let len = state.handles.span_until(fd, delim)?;
            if len == 0 {
                return Ok(None);
            }
            let needed = len + 1;
            unsafe {
                if (*lineptr).is_null() || *n < needed {
                    let grown = libc::realloc((*lineptr).cast::<c_void>(), needed);
                    if grown.is_null() {
                        state.streams.set_error(token);
                        return Err(Errno::ENOMEM.into());
                    }
                    *lineptr = grown.cast::<c_char>();
                    *n = needed;
                }
                let out = std::slice::from_raw_parts_mut((*lineptr).cast::<u8>(), needed);
                let got = state.handles.read_until(fd, delim, &mut out[..len])?;
                out[got] = 0;
                Ok(Some(got))
            }
        });
        match got {
            Some(Ok(Some(len))) => len as ssize_t,
            Some(Ok(None)) => -1,
            Some(Err(e)) => fail("getdelim", e, -1),
            None => unsafe { self.real.getdelim(lineptr, n, delim, stream) },
        }
    }

    pub unsafe fn clearerr(&self, stream: *mut FILE) {
        if self.on_stream(stream, |s, token, _| s.streams.clear_error(token)).is_none() {
            unsafe { self.real.clearerr(stream) }
        }
    }

    pub unsafe fn feof(&self, stream: *mut FILE) -> c_int {
        let eof = self.on_stream(stream, |s, _, fd| {
            s.handles.lookup(fd).is_none_or(|h| h.at_end())
        });
        match eof {
            Some(eof) => c_int::from(eof),
            None => unsafe { self.real.feof(stream) },
        }
    }

    pub unsafe fn ferror(&self, stream: *mut FILE) -> c_int {
        match self.on_stream(stream, |s, token, _| s.streams.has_error(token)) {
            Some(error) => c_int::from(error),
            None => unsafe { self.real.ferror(stream) },
        }
    }

    pub unsafe fn fileno(&self, stream: *mut FILE) -> c_int {
        match self.on_stream(stream, |_, _, fd| fd) {
            Some(fd) => fd,
            None => unsafe { self.real.fileno(stream) },
        }
    }

    pub unsafe fn fileno_unlocked(&self, stream: *mut FILE) -> c_int {
        match self.on_stream(stream, |_, _, fd| fd) {
            Some(fd) => fd,
            None => unsafe { self.real.fileno_unlocked(stream) },
        }
    }

    fn seek_stream(&self, stream: *mut FILE, offset: i64, whence: c_int) -> Option<c_int> {
        self.on_stream(stream, |s, _, fd| s.handles.seek(fd, offset, whence))
            .map(|seek| match seek {
                Ok(_) => 0,
                Err(e) => fail("fseek", e, -1),
            })
    }

    pub unsafe fn fseek(&self, stream: *mut FILE, offset: c_long, whence: c_int) -> c_int {
        match self.seek_stream(stream, offset, whence) {
            Some(ret) => ret,
            None => unsafe { self.real.fseek(stream, offset, whence) },
        }
    }

    pub unsafe fn fseeko(&self, stream: *mut FILE, offset: off_t, whence: c_int) -> c_int {
        match self.seek_stream(stream, offset, whence) {
            Some(ret) => ret,
            None => unsafe { self.real.fseeko(stream, offset, whence) },
        }
    }

    fn tell_stream(&self, stream: *mut FILE) -> Option<i64> {
        self.on_stream(stream, |s, _, fd| s.handles.tell(fd))
            .map(|tell| match tell {
                Ok(pos) => pos as i64,
                Err(e) => fail("ftell", e, -1),
            })
    }

    pub unsafe fn ftell(&self, stream: *mut FILE) -> c_long {
        match self.tell_stream(stream) {
            Some(pos) => pos,
            None => unsafe { self.real.ftell(stream) },
        }
    }

    pub unsafe fn ftello(&self, stream: *mut FILE) -> off_t {
        match self.tell_stream(stream) {
            Some(pos) => pos,
            None => unsafe { self.real.ftello(stream) },
        }
    }

    pub unsafe fn rewind(&self, stream: *mut FILE) {
        let rewound = self.on_stream(stream, |s, token, fd| {
            s.streams.clear_error(token);
            s.handles.seek(fd, 0, libc::SEEK_SET)
        });
        match rewound {
            Some(Ok(_)) => {}
            Some(Err(e)) => fail("rewind", e, ()),
            None => unsafe { self.real.rewind(stream) },
        }
    }

    pub unsafe fn mmap(
        &self,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        let mapped = self.on_virtual(fd, |s| -> Result<*const u8> {
            if flags & libc::MAP_FIXED != 0 {
                return Err(Errno::ENOMEM.into());
            }
            if prot & libc::PROT_WRITE != 0 {
                return Err(Errno::EACCES.into());
            }
            s.handles.map(fd, len, offset)
        });
        match mapped {
            Some(Ok(addr)) => addr.cast_mut().cast::<c_void>(),
            Some(Err(e)) => fail("mmap", e, libc::MAP_FAILED),
            None => unsafe { self.real.mmap(addr, len, prot, flags, fd, offset) },
        }
    }

    pub unsafe fn munmap(&self, addr: *mut c_void, len: size_t) -> c_int {
        if self.lock().handles.unmap(addr as usize) {
            return 0;
        }
        unsafe { self.real.munmap(addr, len) }
    }
}
