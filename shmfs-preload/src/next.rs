//! The next definition of every interposed symbol, found with
//! `dlsym(RTLD_NEXT, ..)` on first use and cached for the life of the process.
use std::ffi::CStr;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{FILE, c_char, c_int, c_long, c_void, mode_t, off_t, size_t, ssize_t};
use libshmfs::RealIo;

struct Slot {
    name: &'static CStr,
    addr: AtomicPtr<c_void>,
}

impl Slot {
    const fn new(name: &'static CStr) -> Self {
        Self {
            name,
            addr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn resolve(&self) -> Option<*mut c_void> {
        let cached = self.addr.load(Ordering::Acquire);
        if !cached.is_null() {
            return Some(cached);
        }
        let addr = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr()) };
        if addr.is_null() {
            return None;
        }
        self.addr.store(addr, Ordering::Release);
        Some(addr)
    }
}

struct Slots {
    open: Slot,
    close: Slot,
    read: Slot,
    write: Slot,
    fcntl: Slot,
    fstat: Slot,
    lseek: Slot,
    pread: Slot,
    fopen: Slot,
    fdopen: Slot,
    fclose: Slot,
    fread: Slot,
    fwrite: Slot,
    fgetc: Slot,
    fgets: Slot,
    getdelim: Slot,
    clearerr: Slot,
    feof: Slot,
    ferror: Slot,
    fileno: Slot,
    fileno_unlocked: Slot,
    fseek: Slot,
    fseeko: Slot,
    ftell: Slot,
    ftello: Slot,
    rewind: Slot,
    mmap: Slot,
    munmap: Slot,
}

static SLOTS: Slots = Slots {
    open: Slot::new(c"open"),
    close: Slot::new(c"close"),
    read: Slot::new(c"read"),
    write: Slot::new(c"write"),
    fcntl: Slot::new(c"fcntl"),
    fstat: Slot::new(c"fstat"),
    lseek: Slot::new(c"lseek"),
    pread: Slot::new(c"pread"),
    fopen: Slot::new(c"fopen"),
    fdopen: Slot::new(c"fdopen"),
    fclose: Slot::new(c"fclose"),
    fread: Slot::new(c"fread"),
    fwrite: Slot::new(c"fwrite"),
    fgetc: Slot::new(c"fgetc"),
    fgets: Slot::new(c"fgets"),
    getdelim: Slot::new(c"getdelim"),
    clearerr: Slot::new(c"clearerr"),
    feof: Slot::new(c"feof"),
    ferror: Slot::new(c"ferror"),
    fileno: Slot::new(c"fileno"),
    fileno_unlocked: Slot::new(c"fileno_unlocked"),
    fseek: Slot::new(c"fseek"),
    fseeko: Slot::new(c"fseeko"),
    ftell: Slot::new(c"ftell"),
    ftello: Slot::new(c"ftello"),
    rewind: Slot::new(c"rewind"),
    mmap: Slot::new(c"mmap"),
    munmap: Slot::new(c"munmap"),
};

/// Call the resolved symbol, or fail with `ENOSYS` when nothing follows us in
/// the lookup order.
macro_rules! forward {
    ($slot:ident, fn($($arg:ident: $ty:ty),*) -> $ret:ty, $missing:expr) => {{
        match SLOTS.$slot.resolve() {
            Some(addr) => {
                let f: unsafe extern "C" fn($($ty),*) -> $ret =
                    unsafe { std::mem::transmute(addr) };
                unsafe { f($($arg),*) }
            }
            None => {
                errno::set_errno(errno::Errno(libc::ENOSYS));
                $missing
            }
        }
    }};
}

/// Handle to the libc definitions shadowed by this library.
#[derive(Clone, Copy, Debug, Default)]
pub struct NextSymbols;

impl RealIo for NextSymbols {
    unsafe fn open(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        forward!(open, fn(path: *const c_char, flags: c_int, mode: mode_t) -> c_int, -1)
    }

    unsafe fn close(&self, fd: c_int) -> c_int {
        forward!(close, fn(fd: c_int) -> c_int, -1)
    }

    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        forward!(read, fn(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t, -1)
    }

    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        forward!(write, fn(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t, -1)
    }

    unsafe fn fcntl(&self, fd: c_int, cmd: c_int, arg: usize) -> c_int {
        match SLOTS.fcntl.resolve() {
            Some(addr) => {
                let f: unsafe extern "C" fn(c_int, c_int, ...) -> c_int =
                    unsafe { std::mem::transmute(addr) };
                unsafe { f(fd, cmd, arg) }
            }
            None => {
                errno::set_errno(errno::Errno(libc::ENOSYS));
                -1
            }
        }
    }

    unsafe fn fstat(&self, fd: c_int, buf: *mut libc::stat) -> c_int {
        forward!(fstat, fn(fd: c_int, buf: *mut libc::stat) -> c_int, -1)
    }

    unsafe fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> off_t {
        forward!(lseek, fn(fd: c_int, offset: off_t, whence: c_int) -> off_t, -1)
    }

    unsafe fn pread(&self, fd: c_int, buf: *mut c_void, count: size_t, offset: off_t)
    -> ssize_t {
        forward!(
            pread,
            fn(fd: c_int, buf: *mut c_void, count: size_t, offset: off_t) -> ssize_t,
            -1
        )
    }

    unsafe fn fopen(&self, path: *const c_char, mode: *const c_char) -> *mut FILE {
        forward!(
            fopen,
            fn(path: *const c_char, mode: *const c_char) -> *mut FILE,
            ptr::null_mut()
        )
    }

    unsafe fn fdopen(&self, fd: c_int, mode: *const c_char) -> *mut FILE {
        forward!(fdopen, fn(fd: c_int, mode: *const c_char) -> *mut FILE, ptr::null_mut())
    }

    unsafe fn fclose(&self, stream: *mut FILE) -> c_int {
        forward!(fclose, fn(stream: *mut FILE) -> c_int, libc::EOF)
    }

    unsafe fn fread(&self, ptr: *mut c_void, size: size_t, n: size_t, stream: *mut FILE)
    -> size_t {
        forward!(
            fread,
            fn(ptr: *mut c_void, size: size_t, n: size_t, stream: *mut FILE) -> size_t,
            0
        )
    }

    unsafe fn fwrite(
        &self,
        ptr: *const c_void,
        size: size_t,
        n: size_t,
        stream: *mut FILE,
    ) -> size_t {
        forward!(
            fwrite,
            fn(ptr: *const c_void, size: size_t, n: size_t, stream: *mut FILE) -> size_t,
            0
        )
    }

    unsafe fn fgetc(&self, stream: *mut FILE) -> c_int {
        forward!(fgetc, fn(stream: *mut FILE) -> c_int, libc::EOF)
    }

    unsafe fn fgets(&self, s: *mut c_char, n: c_int, stream: *mut FILE) -> *mut c_char {
        forward!(
            fgets,
            fn(s: *mut c_char, n: c_int, stream: *mut FILE) -> *mut c_char,
            ptr::null_mut()
        )
    }

    unsafe fn getdelim(
        &self,
        lineptr: *mut *mut c_char,
        n: *mut size_t,
        delim: c_int,
        stream: *mut FILE,
    ) -> ssize_t {
        forward!(
            getdelim,
            fn(lineptr: *mut *mut c_char, n: *mut size_t, delim: c_int, stream: *mut FILE)
                -> ssize_t,
            -1
        )
    }

    unsafe fn clearerr(&self, stream: *mut FILE) {
        forward!(clearerr, fn(stream: *mut FILE) -> (), ())
    }

    unsafe fn feof(&self, stream: *mut FILE) -> c_int {
        forward!(feof, fn(stream: *mut FILE) -> c_int, 0)
    }

    unsafe fn ferror(&self, stream: *mut FILE) -> c_int {
        forward!(ferror, fn(stream: *mut FILE) -> c_int, 0)
    }

    unsafe fn fileno(&self, stream: *mut FILE) -> c_int {
        forward!(fileno, fn(stream: *mut FILE) -> c_int, -1)
    }

    unsafe fn fileno_unlocked(&self, stream: *mut FILE) -> c_int {
        forward!(fileno_unlocked, fn(stream: *mut FILE) -> c_int, -1)
    }

    unsafe fn fseek(&self, stream: *mut FILE, offset: c_long, whence: c_int) -> c_int {
        forward!(fseek, fn(stream: *mut FILE, offset: c_long, whence: c_int) -> c_int, -1)
    }

    unsafe fn fseeko(&self, stream: *mut FILE, offset: off_t, whence: c_int) -> c_int {
        forward!(fseeko, fn(stream: *mut FILE, offset: off_t, whence: c_int) -> c_int, -1)
    }

    unsafe fn ftell(&self, stream: *mut FILE) -> c_long {
        forward!(ftell, fn(stream: *mut FILE) -> c_long, -1)
    }

    unsafe fn ftello(&self, stream: *mut FILE) -> off_t {
        forward!(ftello, fn(stream: *mut FILE) -> off_t, -1)
    }

    unsafe fn rewind(&self, stream: *mut FILE) {
        forward!(rewind, fn(stream: *mut FILE) -> (), ())
    }

    unsafe fn mmap(
        &self,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void {
        forward!(
            mmap,
            fn(
                addr: *mut c_void,
                len: size_t,
                prot: c_int,
                flags: c_int,
                fd: c_int,
                offset: off_t
            ) -> *mut c_void,
            libc::MAP_FAILED
        )
    }

    unsafe fn munmap(&self, addr: *mut c_void, len: size_t) -> c_int {
        forward!(munmap, fn(addr: *mut c_void, len: size_t) -> c_int, -1)
    }
}
