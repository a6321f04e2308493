//! Byte layout of the shared region.
//!
//! ```text
//! [0]     peer-ready flag       set by the peer once a response is written
//! [1]     requester-ready flag  set by us once a request is written
//! [2..6)  payload length        u32, native byte order
//! [6..)   payload bytes
//! ```
//! Every accessor here must only be called while the channel semaphore is held.

pub const PEER_READY: usize = 0;
pub const REQUESTER_READY: usize = 1;
pub const LENGTH: usize = 2;
pub const HEADER_LEN: usize = 6;

/// Response payload meaning "the peer could not supply this path".
pub const ERROR_SENTINEL: &[u8; 5] = b"error";

pub fn flag(region: &[u8], at: usize) -> bool {
    // The other process writes this byte; never let a poll loop reuse a stale load.
    unsafe { std::ptr::read_volatile(&region[at]) == 1 }
}

pub fn set_flag(region: &mut [u8], at: usize, on: bool) {
    region[at] = on as u8;
}

pub fn payload_len(region: &[u8]) -> usize {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&region[LENGTH..HEADER_LEN]);
    u32::from_ne_bytes(raw) as usize
}

/// Largest payload a region of `region_len` bytes carries. Capped so the
/// length always fits the 4-byte header field.
pub fn capacity_for(region_len: usize) -> usize {
    region_len.saturating_sub(HEADER_LEN).min(u32::MAX as usize)
}

pub fn capacity(region: &[u8]) -> usize {
    capacity_for(region.len())
}

/// Write `payload` and its length. The caller checked it against [`capacity`].
pub fn write_payload(region: &mut [u8], payload: &[u8]) {
    debug_assert!(payload.len() <= capacity(region));
    let len = payload.len() as u32;
    region[LENGTH..HEADER_LEN].copy_from_slice(&len.to_ne_bytes());
    region[HEADER_LEN..HEADER_LEN + payload.len()].copy_from_slice(payload);
}

/// Copy the payload out. `None` when the length field claims more than the
/// region holds.
pub fn read_payload(region: &[u8]) -> Option<Vec<u8>> {
    let len = payload_len(region);
    if len > capacity(region) {
        return None;
    }
    Some(region[HEADER_LEN..HEADER_LEN + len].to_vec())
}
