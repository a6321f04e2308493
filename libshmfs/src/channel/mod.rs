//! Request/response exchange with the co-located peer.
//!
//! Both sides share one fixed-size region (see [`layout`]) guarded by one named
//! semaphore. The semaphore only provides mutual exclusion; readiness travels
//! through the two header flags, so whoever waits polls.
pub mod layout;
pub mod peer;
pub mod segment;
pub mod semaphore;
pub mod transport;

pub use peer::ShmPeer;
pub use transport::ShmChannel;

use crate::config::ShmfsConfig;
use crate::error::Result;

/// What the peer answered for one requested path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Content(Vec<u8>),
    /// The error sentinel: the peer cannot supply this path.
    Unavailable,
}

impl Response {
    pub fn from_payload(payload: Vec<u8>) -> Self {
        if payload.as_slice() == layout::ERROR_SENTINEL {
            Response::Unavailable
        } else {
            Response::Content(payload)
        }
    }
}

/// One round trip to whatever supplies file contents.
pub trait Transport: Send {
    fn fetch(&mut self, request: &[u8]) -> Result<Response>;
}

/// Host-qualified names of the segment and semaphore.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelNames {
    pub segment: String,
    pub semaphore: String,
    pub size: usize,
}

impl ChannelNames {
    pub fn for_host(config: &ShmfsConfig) -> Self {
        Self {
            segment: format!("{}{}", config.segment_prefix, config.host),
            semaphore: format!("{}{}", config.semaphore_prefix, config.host),
            size: config.segment_size,
        }
    }
}
