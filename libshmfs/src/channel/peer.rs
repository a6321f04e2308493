use super::layout::{self, ERROR_SENTINEL, PEER_READY, REQUESTER_READY};
use super::segment::SharedSegment;
use super::semaphore::NamedSemaphore;
use super::ChannelNames;
use crate::error::Result;

/// Responder side of the channel. Owns the named resources: creates them on
/// construction and unlinks them on drop.
pub struct ShmPeer {
    names: ChannelNames,
    segment: SharedSegment,
    semaphore: NamedSemaphore,
}

impl ShmPeer {
    pub fn create(names: &ChannelNames) -> Result<Self> {
        let segment = SharedSegment::create(&names.segment, names.size)?;
        let semaphore = match NamedSemaphore::create(&names.semaphore, 1) {
            Ok(sem) => sem,
            Err(e) => {
                let _ = SharedSegment::unlink(&names.segment);
                return Err(e);
            }
        };
        info!(
            "created channel {} ({} bytes) / {}",
            names.segment, names.size, names.semaphore
        );
        Ok(Self {
            names: names.clone(),
            segment,
            semaphore,
        })
    }

    pub fn capacity(&self) -> usize {
        layout::capacity(self.segment.region())
    }

    /// Take the pending request, if the requester raised its flag.
    pub fn poll_request(&mut self) -> Result<Option<Vec<u8>>> {
        let _guard = self.semaphore.acquire()?;
        let region = self.segment.region_mut();
        if !layout::flag(region, REQUESTER_READY) {
            return Ok(None);
        }
        layout::set_flag(region, REQUESTER_READY, false);
        Ok(Some(take_request(region)))
    }

    /// Publish a response and raise the peer-ready flag. `None` sends the
    /// error sentinel, as does content too large for the region.
    pub fn respond(&mut self, content: Option<&[u8]>) -> Result<()> {
        let _guard = self.semaphore.acquire()?;
        let capacity = layout::capacity(self.segment.region());
        let region = self.segment.region_mut();
        write_response(region, content, capacity);
        Ok(())
    }

    /// Answer one pending request under a single semaphore hold. Returns the
    /// request that was served, or `None` when nothing was pending.
    pub fn serve_one<F>(&mut self, handler: F) -> Result<Option<Vec<u8>>>
    where
        F: FnOnce(&[u8]) -> Option<Vec<u8>>,
    {
        let _guard = self.semaphore.acquire()?;
        let capacity = layout::capacity(self.segment.region());
        let region = self.segment.region_mut();
        if !layout::flag(region, REQUESTER_READY) {
            return Ok(None);
        }
        layout::set_flag(region, REQUESTER_READY, false);
        let request = take_request(region);
        let content = if request.is_empty() {
            None
        } else {
            handler(&request)
        };
        write_response(region, content.as_deref(), capacity);
        Ok(Some(request))
    }

    /// Unlink resources a crashed peer left behind. Returns which existed.
    pub fn remove_stale(names: &ChannelNames) -> Result<(bool, bool)> {
        let segment = SharedSegment::unlink(&names.segment)?;
        let semaphore = NamedSemaphore::unlink(&names.semaphore)?;
        Ok((segment, semaphore))
    }
}

/// A request whose length does not fit the region comes back empty, which no
/// handler can satisfy.
fn take_request(region: &[u8]) -> Vec<u8> {
    layout::read_payload(region).unwrap_or_else(|| {
        warn!(
            "request announced {} bytes, more than the region holds",
            layout::payload_len(region)
        );
        Vec::new()
    })
}

fn write_response(region: &mut [u8], content: Option<&[u8]>, capacity: usize) {
    let payload: &[u8] = match content {
        Some(bytes) if bytes.len() <= capacity => bytes,
        Some(bytes) => {
            warn!(
                "response of {} bytes exceeds capacity {capacity}, sending error",
                bytes.len()
            );
            ERROR_SENTINEL
        }
        None => ERROR_SENTINEL,
    };
    layout::write_payload(region, payload);
    layout::set_flag(region, PEER_READY, true);
}

impl Drop for ShmPeer {
    fn drop(&mut self) {
        if let Err(e) = Self::remove_stale(&self.names) {
            warn!("failed to remove channel {}: {e}", self.names.segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Response, ShmChannel, Transport};
    use crate::unwrap_or_skip_shm;
    use serial_test::serial;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_names(tag: &str, size: usize) -> ChannelNames {
        ChannelNames {
            segment: format!("/shmfs-test-mem-{}-{tag}", std::process::id()),
            semaphore: format!("/shmfs-test-sem-{}-{tag}", std::process::id()),
            size,
        }
    }

    #[test]
    #[serial]
    fn test_round_trip_between_threads() {
        let names = test_names("rt", 4096);
        let _ = ShmPeer::remove_stale(&names);
        let mut peer = unwrap_or_skip_shm!(ShmPeer::create(&names), "create peer");
        let mut channel = ShmChannel::open(&names, false).expect("open channel");

        let done = Arc::new(AtomicBool::new(false));
        let stop = done.clone();
        let responder = std::thread::spawn(move || {
            let mut served = Vec::new();
            while !stop.load(Ordering::Acquire) {
                let request = peer
                    .serve_one(|path| match path {
                        b"/x/a.out" => Some(b"INT MAIN".to_vec()),
                        _ => None,
                    })
                    .expect("serve");
                match request {
                    Some(r) => served.push(r),
                    None => std::thread::yield_now(),
                }
            }
            served
        });

        assert_eq!(
            channel.fetch(b"/x/a.out").unwrap(),
            Response::Content(b"INT MAIN".to_vec())
        );
        assert_eq!(channel.fetch(b"/missing").unwrap(), Response::Unavailable);

        done.store(true, Ordering::Release);
        let served = responder.join().unwrap();
        assert_eq!(served, vec![b"/x/a.out".to_vec(), b"/missing".to_vec()]);
    }

    #[test]
    #[serial]
    fn test_oversized_content_becomes_error() {
        let names = test_names("big", 64);
        let _ = ShmPeer::remove_stale(&names);
        let mut peer = unwrap_or_skip_shm!(ShmPeer::create(&names), "create peer");
        let mut channel = ShmChannel::open(&names, false).expect("open channel");
        assert_eq!(channel.capacity(), 58);

        channel.send_request(b"/big").unwrap();
        assert_eq!(peer.poll_request().unwrap(), Some(b"/big".to_vec()));
        assert_eq!(peer.poll_request().unwrap(), None);
        peer.respond(Some(&[7u8; 100])).unwrap();
        let held = channel.await_response().unwrap();
        assert_eq!(held.payload(), Some(&b"error"[..]));
        assert_eq!(held.into_response(), Response::Unavailable);
    }

    #[test]
    #[serial]
    fn test_announced_length_beyond_region_is_a_load_failure() {
        let names = test_names("len", 64);
        let _ = ShmPeer::remove_stale(&names);
        let mut peer = unwrap_or_skip_shm!(ShmPeer::create(&names), "create peer");
        let mut channel = ShmChannel::open(&names, false).expect("open channel");

        channel.send_request(b"/x/a.out").unwrap();
        assert_eq!(peer.poll_request().unwrap(), Some(b"/x/a.out".to_vec()));
        {
            let _guard = peer.semaphore.acquire().unwrap();
            let region = peer.segment.region_mut();
            region[layout::HEADER_LEN..].fill(b'Z');
            region[layout::LENGTH..layout::HEADER_LEN].copy_from_slice(&1000u32.to_ne_bytes());
            layout::set_flag(region, PEER_READY, true);
        }
        let held = channel.await_response().unwrap();
        assert_eq!(held.payload(), None);
        assert_eq!(held.into_response(), Response::Unavailable);
    }

    #[test]
    #[serial]
    fn test_request_with_bad_length_is_refused() {
        let names = test_names("badreq", 64);
        let _ = ShmPeer::remove_stale(&names);
        let mut peer = unwrap_or_skip_shm!(ShmPeer::create(&names), "create peer");
        let mut channel = ShmChannel::open(&names, false).expect("open channel");

        channel.send_request(b"/x/a.out").unwrap();
        {
            let region = peer.segment.region_mut();
            region[layout::LENGTH..layout::HEADER_LEN].copy_from_slice(&u32::MAX.to_ne_bytes());
        }
        let served = peer
            .serve_one(|_| Some(b"INT MAIN".to_vec()))
            .unwrap();
        assert_eq!(served, Some(Vec::new()));
        assert_eq!(
            channel.await_response().unwrap().into_response(),
            Response::Unavailable
        );
    }

    #[test]
    #[serial]
    fn test_request_larger_than_region_is_rejected() {
        let names = test_names("req", 16);
        let _ = ShmPeer::remove_stale(&names);
        let _peer = unwrap_or_skip_shm!(ShmPeer::create(&names), "create peer");
        let mut channel = ShmChannel::open(&names, false).expect("open channel");
        let err = channel.send_request(&[b'a'; 11]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ShmfsError::PayloadTooLarge { len: 11, capacity: 10 }
        ));
    }

    #[test]
    #[serial]
    fn test_open_without_peer_is_unavailable() {
        let names = test_names("absent", 4096);
        let _ = ShmPeer::remove_stale(&names);
        let err = ShmChannel::open(&names, false).err().expect("no peer");
        assert!(matches!(
            err,
            crate::error::ShmfsError::ChannelUnavailable(_)
        ));
    }

    #[test]
    #[serial]
    fn test_drop_unlinks_resources() {
        let names = test_names("drop", 4096);
        let _ = ShmPeer::remove_stale(&names);
        let peer = unwrap_or_skip_shm!(ShmPeer::create(&names), "create peer");
        drop(peer);
        assert_eq!(ShmPeer::remove_stale(&names).unwrap(), (false, false));
    }
}
