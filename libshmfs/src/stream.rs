use std::collections::HashMap;
use std::os::fd::RawFd;

/// Per-stream state behind an opaque `FILE*` token.
#[derive(Debug)]
struct StreamState {
    fd: RawFd,
    error: bool,
}

/// Buffered-stream tokens for virtual descriptors.
///
/// Each token is the address of a boxed [`StreamState`] owned by this table, so
/// it can never coincide with a live `FILE` from libc. Tokens are only compared,
/// never dereferenced.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: HashMap<usize, Box<StreamState>>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, fd: RawFd) -> usize {
        let state = Box::new(StreamState { fd, error: false });
        let token = &*state as *const StreamState as usize;
        self.streams.insert(token, state);
        token
    }

    pub fn contains(&self, token: usize) -> bool {
        self.streams.contains_key(&token)
    }

    pub fn fd(&self, token: usize) -> Option<RawFd> {
        self.streams.get(&token).map(|s| s.fd)
    }

    /// Forget the token; returns the descriptor it wrapped.
    pub fn close(&mut self, token: usize) -> Option<RawFd> {
        self.streams.remove(&token).map(|s| s.fd)
    }

    pub fn set_error(&mut self, token: usize) {
        if let Some(state) = self.streams.get_mut(&token) {
            state.error = true;
        }
    }

    pub fn has_error(&self, token: usize) -> bool {
        self.streams.get(&token).is_some_and(|s| s.error)
    }

    pub fn clear_error(&mut self, token: usize) {
        if let Some(state) = self.streams.get_mut(&token) {
            state.error = false;
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
