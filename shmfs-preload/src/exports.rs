//! Exported libc entry points.
//!
//! `open` and `fcntl` are variadic in C; they are declared here with their
//! widest fixed form, which is call-compatible on the supported ABIs. The
//! `*64` names are aliases of the plain ones because `off_t` is 64 bits.
//!
//! `_FORTIFY_SOURCE` builds call the `__*_chk` variants, and `getc` and the
//! `*_unlocked` family are separate symbols; all of them are routed here too,
//! with the object-size checks glibc performs before the call.
use libc::{FILE, c_char, c_int, c_long, c_void, mode_t, off_t, size_t, ssize_t};
use libshmfs::RealIo;
use libshmfs::dispatch::items_fit;

use crate::next::NextSymbols;
use crate::runtime;

unsafe extern "C" {
    /// glibc's fortify failure: reports a buffer overflow and aborts.
    fn __chk_fail() -> !;
}

macro_rules! route {
    ($method:ident($($arg:expr),* $(,)?)) => {
        match runtime::enter() {
            Some(active) => unsafe { active.dispatcher.$method($($arg),*) },
            None => unsafe { NextSymbols.$method($($arg),*) },
        }
    };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    route!(open(path, flags, mode))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    route!(open(path, flags, mode))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    route!(close(fd))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    route!(read(fd, buf, count))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    route!(write(fd, buf, count))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: usize) -> c_int {
    route!(fcntl(fd, cmd, arg))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int {
    route!(fstat(fd, buf))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn lseek(fd: c_int, offset: off_t, whence: c_int) -> off_t {
    route!(lseek(fd, offset, whence))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn lseek64(fd: c_int, offset: off_t, whence: c_int) -> off_t {
    route!(lseek(fd, offset, whence))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pread(
    fd: c_int,
    buf: *mut c_void,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    route!(pread(fd, buf, count, offset))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pread64(
    fd: c_int,
    buf: *mut c_void,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    route!(pread(fd, buf, count, offset))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    route!(fopen(path, mode))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    route!(fopen(path, mode))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fdopen(fd: c_int, mode: *const c_char) -> *mut FILE {
    route!(fdopen(fd, mode))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fclose(stream: *mut FILE) -> c_int {
    route!(fclose(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fread(
    ptr: *mut c_void,
    size: size_t,
    n: size_t,
    stream: *mut FILE,
) -> size_t {
    route!(fread(ptr, size, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fwrite(
    ptr: *const c_void,
    size: size_t,
    n: size_t,
    stream: *mut FILE,
) -> size_t {
    route!(fwrite(ptr, size, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fgetc(stream: *mut FILE) -> c_int {
    route!(fgetc(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fgets(s: *mut c_char, n: c_int, stream: *mut FILE) -> *mut c_char {
    route!(fgets(s, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clearerr(stream: *mut FILE) {
    route!(clearerr(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn feof(stream: *mut FILE) -> c_int {
    route!(feof(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferror(stream: *mut FILE) -> c_int {
    route!(ferror(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fileno(stream: *mut FILE) -> c_int {
    route!(fileno(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fileno_unlocked(stream: *mut FILE) -> c_int {
    route!(fileno_unlocked(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fseek(stream: *mut FILE, offset: c_long, whence: c_int) -> c_int {
    route!(fseek(stream, offset, whence))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fseeko(stream: *mut FILE, offset: off_t, whence: c_int) -> c_int {
    route!(fseeko(stream, offset, whence))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fseeko64(stream: *mut FILE, offset: off_t, whence: c_int) -> c_int {
    route!(fseeko(stream, offset, whence))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ftell(stream: *mut FILE) -> c_long {
    route!(ftell(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ftello(stream: *mut FILE) -> off_t {
    route!(ftello(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ftello64(stream: *mut FILE) -> off_t {
    route!(ftello(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rewind(stream: *mut FILE) {
    route!(rewind(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mmap(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    route!(mmap(addr, len, prot, flags, fd, offset))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn mmap64(
    addr: *mut c_void,
    len: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: off_t,
) -> *mut c_void {
    route!(mmap(addr, len, prot, flags, fd, offset))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn munmap(addr: *mut c_void, len: size_t) -> c_int {
    route!(munmap(addr, len))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn getdelim(
    lineptr: *mut *mut c_char,
    n: *mut size_t,
    delim: c_int,
    stream: *mut FILE,
) -> ssize_t {
    route!(getdelim(lineptr, n, delim, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __getdelim(
    lineptr: *mut *mut c_char,
    n: *mut size_t,
    delim: c_int,
    stream: *mut FILE,
) -> ssize_t {
    route!(getdelim(lineptr, n, delim, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn getline(
    lineptr: *mut *mut c_char,
    n: *mut size_t,
    stream: *mut FILE,
) -> ssize_t {
    route!(getdelim(lineptr, n, b'\n' as c_int, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn getc(stream: *mut FILE) -> c_int {
    route!(fgetc(stream))
}

#[allow(non_snake_case)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _IO_getc(stream: *mut FILE) -> c_int {
    route!(fgetc(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn getc_unlocked(stream: *mut FILE) -> c_int {
    route!(fgetc(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fgetc_unlocked(stream: *mut FILE) -> c_int {
    route!(fgetc(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fread_unlocked(
    ptr: *mut c_void,
    size: size_t,
    n: size_t,
    stream: *mut FILE,
) -> size_t {
    route!(fread(ptr, size, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fgets_unlocked(
    s: *mut c_char,
    n: c_int,
    stream: *mut FILE,
) -> *mut c_char {
    route!(fgets(s, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn feof_unlocked(stream: *mut FILE) -> c_int {
    route!(feof(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ferror_unlocked(stream: *mut FILE) -> c_int {
    route!(ferror(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn clearerr_unlocked(stream: *mut FILE) {
    route!(clearerr(stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __read_chk(
    fd: c_int,
    buf: *mut c_void,
    count: size_t,
    buflen: size_t,
) -> ssize_t {
    if count > buflen {
        unsafe { __chk_fail() }
    }
    route!(read(fd, buf, count))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __pread_chk(
    fd: c_int,
    buf: *mut c_void,
    count: size_t,
    offset: off_t,
    buflen: size_t,
) -> ssize_t {
    if count > buflen {
        unsafe { __chk_fail() }
    }
    route!(pread(fd, buf, count, offset))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __pread64_chk(
    fd: c_int,
    buf: *mut c_void,
    count: size_t,
    offset: off_t,
    buflen: size_t,
) -> ssize_t {
    if count > buflen {
        unsafe { __chk_fail() }
    }
    route!(pread(fd, buf, count, offset))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __fread_chk(
    ptr: *mut c_void,
    ptrlen: size_t,
    size: size_t,
    n: size_t,
    stream: *mut FILE,
) -> size_t {
    if !items_fit(size, n, ptrlen) {
        unsafe { __chk_fail() }
    }
    route!(fread(ptr, size, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __fread_unlocked_chk(
    ptr: *mut c_void,
    ptrlen: size_t,
    size: size_t,
    n: size_t,
    stream: *mut FILE,
) -> size_t {
    if !items_fit(size, n, ptrlen) {
        unsafe { __chk_fail() }
    }
    route!(fread(ptr, size, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __fgets_chk(
    s: *mut c_char,
    size: size_t,
    n: c_int,
    stream: *mut FILE,
) -> *mut c_char {
    if usize::try_from(n).is_ok_and(|n| n > size) {
        unsafe { __chk_fail() }
    }
    route!(fgets(s, n, stream))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __fgets_unlocked_chk(
    s: *mut c_char,
    size: size_t,
    n: c_int,
    stream: *mut FILE,
) -> *mut c_char {
    if usize::try_from(n).is_ok_and(|n| n > size) {
        unsafe { __chk_fail() }
    }
    route!(fgets(s, n, stream))
}
