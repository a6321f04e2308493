//! The real implementations behind every intercepted entry point.
//!
//! The preload shim resolves these with `dlsym(RTLD_NEXT, ..)`; tests supply
//! fakes. Signatures follow the 64-bit glibc ABI, where `off_t` is 64 bits
//! and the `*64` variants are aliases of the plain ones.
use libc::{FILE, c_char, c_int, c_long, c_void, mode_t, off_t, size_t, ssize_t};

#[allow(clippy::missing_safety_doc)]
pub trait RealIo: Send + Sync {
    unsafe fn open(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int;
    unsafe fn close(&self, fd: c_int) -> c_int;
    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t;
    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t;
    unsafe fn fcntl(&self, fd: c_int, cmd: c_int, arg: usize) -> c_int;
    unsafe fn fstat(&self, fd: c_int, buf: *mut libc::stat) -> c_int;
    unsafe fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> off_t;
    unsafe fn pread(&self, fd: c_int, buf: *mut c_void, count: size_t, offset: off_t)
    -> ssize_t;

    unsafe fn fopen(&self, path: *const c_char, mode: *const c_char) -> *mut FILE;
    unsafe fn fdopen(&self, fd: c_int, mode: *const c_char) -> *mut FILE;
    unsafe fn fclose(&self, stream: *mut FILE) -> c_int;
    unsafe fn fread(&self, ptr: *mut c_void, size: size_t, n: size_t, stream: *mut FILE)
    -> size_t;
    unsafe fn fwrite(
        &self,
        ptr: *const c_void,
        size: size_t,
        n: size_t,
        stream: *mut FILE,
    ) -> size_t;
    unsafe fn fgetc(&self, stream: *mut FILE) -> c_int;
    unsafe fn fgets(&self, s: *mut c_char, n: c_int, stream: *mut FILE) -> *mut c_char;
    unsafe fn getdelim(
        &self,
        lineptr: *mut *mut c_char,
        n: *mut size_t,
        delim: c_int,
        stream: *mut FILE,
    ) -> ssize_t;
    unsafe fn clearerr(&self, stream: *mut FILE);
    unsafe fn feof(&self, stream: *mut FILE) -> c_int;
    unsafe fn ferror(&self, stream: *mut FILE) -> c_int;
    unsafe fn fileno(&self, stream: *mut FILE) -> c_int;
    unsafe fn fileno_unlocked(&self, stream: *mut FILE) -> c_int;
    unsafe fn fseek(&self, stream: *mut FILE, offset: c_long, whence: c_int) -> c_int;
    unsafe fn fseeko(&self, stream: *mut FILE, offset: off_t, whence: c_int) -> c_int;
    unsafe fn ftell(&self, stream: *mut FILE) -> c_long;
    unsafe fn ftello(&self, stream: *mut FILE) -> off_t;
    unsafe fn rewind(&self, stream: *mut FILE);

    unsafe fn mmap(
        &self,
        addr: *mut c_void,
        len: size_t,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
    ) -> *mut c_void;
    unsafe fn munmap(&self, addr: *mut c_void, len: size_t) -> c_int;
}
