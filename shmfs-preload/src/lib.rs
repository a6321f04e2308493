//! `LD_PRELOAD` shim serving read-only file access from the per-host peer.
//!
//! ```text
//! SHMFS_LOG=debug LD_PRELOAD=target/release/libshmfs_preload.so gdb ./a.out
//! ```
//!
//! Every exported symbol enters the `libshmfs` dispatcher, which either serves
//! the call from its cache or forwards it to the next definition in the lookup
//! order. The channel is opened when the library is loaded and released when
//! it is unloaded.
//!
//! Virtual streams are tokens, not glibc `FILE` objects. Anything that reaches
//! into a `FILE` without going through an exported symbol here (the `scanf`
//! family, `ungetc`, `getc_unlocked` when the compiler inlines it) must not be
//! given one; use `SHMFS_EXCLUDE` for paths such programs read that way.
#![allow(clippy::missing_safety_doc)]

#[cfg(not(all(target_os = "linux", target_pointer_width = "64")))]
compile_error!("shmfs-preload supports 64-bit Linux only");

#[macro_use]
extern crate log;

mod exports;
mod next;
mod runtime;

extern "C" fn on_load() {
    runtime::initialize();
}

extern "C" fn on_unload() {
    runtime::teardown();
}

#[used]
#[unsafe(link_section = ".init_array")]
static INIT: extern "C" fn() = on_load;

#[used]
#[unsafe(link_section = ".fini_array")]
static FINI: extern "C" fn() = on_unload;
