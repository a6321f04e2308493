//! Per-thread reentrancy guard for intercepted calls.
//!
//! Anything the library does internally (logging, canonicalizing, mapping the
//! segment) may itself hit an intercepted symbol. Those nested calls must go
//! straight to libc.
use std::cell::Cell;

thread_local! {
    static INSIDE: Cell<bool> = const { Cell::new(false) };
}

pub struct ReentrancyGuard {
    _private: (),
}

impl ReentrancyGuard {
    /// `None` when this thread is already inside the library, or while its
    /// thread-locals are being torn down.
    pub fn enter() -> Option<Self> {
        INSIDE
            .try_with(|inside| {
                if inside.get() {
                    None
                } else {
                    inside.set(true);
                    Some(Self { _private: () })
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        let _ = INSIDE.try_with(|inside| inside.set(false));
    }
}
