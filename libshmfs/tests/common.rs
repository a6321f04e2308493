#![allow(dead_code)]
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use libc::{FILE, c_char, c_int, c_long, c_void, mode_t, off_t, size_t, ssize_t};
use libshmfs::channel::ShmPeer;
use libshmfs::{ChannelNames, RealIo, ShmfsError};

/// Skip the test when the sandbox refuses POSIX shared memory, unless
/// `RUN_SHM_TESTS=1` demands it.
#[allow(unused_macros)]
macro_rules! peer_or_skip {
    ($names:expr) => {{
        match $crate::common::start_peer($names) {
            Ok(peer) => peer,
            Err(e) if $crate::common::is_refused(&e) => {
                if std::env::var("RUN_SHM_TESTS").ok().as_deref() == Some("1") {
                    panic!("shm refused while RUN_SHM_TESTS=1: {e:?}");
                }
                eprintln!("skip (shm refused): {e:?}");
                return;
            }
            Err(e) => panic!("failed to create peer: {e:?}"),
        }
    }};
}

pub fn is_refused(e: &ShmfsError) -> bool {
    matches!(e.errno(), libc::EPERM | libc::EACCES | libc::ENOSYS)
}

/// Route library logs through the test harness; `RUST_LOG=debug` shows them.
pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .is_test(true)
        .try_init();
}

pub fn test_names(tag: &str) -> ChannelNames {
    init_logger();
    ChannelNames {
        segment: format!("/shmfs-it-mem-{}-{tag}", std::process::id()),
        semaphore: format!("/shmfs-it-sem-{}-{tag}", std::process::id()),
        size: 64 * 1024,
    }
}

/// A peer serving a fixed file table from a background thread.
pub struct PeerThread {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Vec<Vec<u8>>>>,
}

pub fn start_peer(names: &ChannelNames) -> Result<PeerBuilder, ShmfsError> {
    let _ = ShmPeer::remove_stale(names);
    ShmPeer::create(names).map(|peer| PeerBuilder { peer })
}

pub struct PeerBuilder {
    peer: ShmPeer,
}

impl PeerBuilder {
    pub fn serve(self, files: &[(&str, &[u8])]) -> PeerThread {
        let files: HashMap<Vec<u8>, Vec<u8>> = files
            .iter()
            .map(|(p, d)| (p.as_bytes().to_vec(), d.to_vec()))
            .collect();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let mut peer = self.peer;
        let worker = std::thread::spawn(move || {
            let mut served = Vec::new();
            while !flag.load(Ordering::Acquire) {
                match peer.serve_one(|path| files.get(path).cloned()) {
                    Ok(Some(request)) => served.push(request),
                    Ok(None) => std::thread::yield_now(),
                    Err(e) => panic!("peer failed: {e}"),
                }
            }
            served
        });
        PeerThread {
            stop,
            worker: Some(worker),
        }
    }
}

impl PeerThread {
    /// Stop serving and return every request that was answered.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        self.stop.store(true, Ordering::Release);
        self.worker
            .take()
            .map(|w| w.join().unwrap())
            .unwrap_or_default()
    }
}

impl Drop for PeerThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Calls straight into libc; nothing is interposed in the test binary.
pub struct LibcIo;

unsafe extern "C" {
    fn clearerr(stream: *mut FILE);
    fn fileno_unlocked(stream: *mut FILE) -> c_int;
    fn getdelim(
        lineptr: *mut *mut c_char,
        n: *mut size_t,
        delim: c_int,
        stream: *mut FILE,
    ) -> ssize_t;
}

impl RealIo for LibcIo {
    unsafe fn open(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        unsafe { libc::open(path, flags, mode) }
    }
    unsafe fn close(&self, fd: c_int) -> c_int {
        unsafe { libc::close(fd) }
    }
    unsafe fn read(&self, fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
        unsafe { libc::read(fd, buf, count) }
    }
    unsafe fn write(&self, fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
        unsafe { libc::write(fd, buf, count) }
    }
    unsafe fn fcntl(&self, fd: c_int, cmd: c_int, arg: usize) -> c_int {
        unsafe { libc::fcntl(fd, cmd, arg) }
    }
    unsafe fn fstat(&self, fd: c_int, buf: *mut libc::stat) -> c_int {
        unsafe { libc::fstat(fd, buf) }
    }
    unsafe fn lseek(&self, fd: c_int, offset: off_t, whence: c_int) -> off_t {
        unsafe { libc::lseek(fd, offset, whence) }
    }
    unsafe fn pread(&self, fd: c_int, buf: *mut c_void, count: size_t, offset: off_t) -> ssize_t {
        unsafe { libc::pread(fd, buf, count, offset) }
    }
    unsafe fn fopen(&self, path: *const c_char, mode: *const c_char) -> *mut FILE {
        unsafe { libc::fopen(path, mode) }
    }
    unsafe fn fdopen(&self, fd: c_int, mode: *const c_char) -> *mut FILE {
        unsafe { libc::fdopen(fd, mode) }
    }
    unsafe fn fclose(&self, stream: *mut FILE) -> c_int {
        unsafe { libc::fclose(stream) }
    }
    unsafe fn fread(&self, ptr: *mut c_void, size: size_t, n: size_t, f: *mut FILE) -> size_t {
        unsafe { libc::fread(ptr, size, n, f) }
    }
    unsafe fn fwrite(&self, ptr: *const c_void, size: size_t, n: size_t, f: *mut FILE) -> size_t {
        unsafe { libc::fwrite(ptr, size, n, f) }
    }
    unsafe fn fgetc(&self, stream: *mut FILE) -> c_int {
        unsafe { libc::fgetc(stream) }
    }
    unsafe fn fgets(&self, s: *mut c_char, n: c_int, stream: *mut FILE) -> *mut c_char {
        unsafe { libc::fgets(s, n, stream) }
    }
    unsafe fn getdelim(
        &self,
        lineptr: *mut *mut c_char,
        n: *mut size_t,
        delim: c_int,
        stream: *mut FILE,
    ) -> ssize_t {
        unsafe { getdelim(lineptr, n, delim, stream) }
    }
    unsafe fn clearerr(&self, stream: *mut FILE) {
        unsafe { clearerr(stream) }
    }
    unsafe fn feof(&self, stream: *mut FILE) -> c_int {
        unsafe { libc::feof(stream) }
    }
    unsafe fn ferror(&self, stream: *mut FILE) -> c_int {
        unsafe { libc::ferror(stream) }
    }
    unsafe fn fileno(&self, stream: *mut FILE) -> c_int {
        unsafe { libc::fileno(stream) }
    }
    unsafe fn fileno_unlocked(&self, stream: *mut FILE) -> c_int {
        unsafe { fileno_unlocked(stream) }
    }
    unsafe fn fseek(&self, stream: *mut FILE, offset: c_long, whence: c_int) -> c_int {
        unsafe { libc::fseek(stream, offset, whence) }
    }
    unsafe fn fseeko(&self, stream: *mut FILE, offset: off_t, whence: c_int) -> c_int {
        unsafe { libc::fseeko(stream, offset, whence) }
    }
    unsafe fn ftell(&self, stream: *mut FILE) -> c_long {
        unsafe { libc::ftell(stream) }
    }
    unsafe fn ftello(&self, stream: *mut FILE) -> off_t {
        unsafe { libc::ftello(stream) }
    }
    unsafe fn rewind(&self, stream: *mut FILE) {
        unsafe { libc::rewind(stream) }
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
        unsafe { libc::mmap(addr, len, prot, flags, fd, offset) }
    }
    unsafe fn munmap(&self, addr: *mut c_void, len: size_t) -> c_int {
        unsafe { libc::munmap(addr, len) }
    }
}
