//! File virtualization over a shared-memory channel.
//!
//! A consumer process opens paths as usual; for paths the co-located peer can
//! supply, the bytes arrive once over a fixed shared-memory region and are then
//! served from an in-process cache through synthetic descriptors. Everything the
//! peer cannot supply falls through to the real libc implementation.
#[macro_use]
extern crate log;

pub mod buffer;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod handle;
pub mod real;
pub mod resolver;
pub mod stream;

pub use buffer::{Buffer, SharedBuffer};
pub use channel::{ChannelNames, Response, Transport};
pub use config::ShmfsConfig;
pub use dispatch::Dispatcher;
pub use error::{Result, ShmfsError};
pub use real::RealIo;
