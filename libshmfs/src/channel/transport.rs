use super::layout::{self, PEER_READY, REQUESTER_READY};
use super::segment::SharedSegment;
use super::semaphore::{NamedSemaphore, SemGuard};
use super::{ChannelNames, Response, Transport};
use crate::error::{Result, ShmfsError};

/// Requester side of the channel: opens the peer's resources, never creates them.
pub struct ShmChannel {
    names: ChannelNames,
    segment: SharedSegment,
    semaphore: NamedSemaphore,
    unlink_on_drop: bool,
}

impl ShmChannel {
    pub fn open(names: &ChannelNames, unlink_on_drop: bool) -> Result<Self> {
        let semaphore = NamedSemaphore::open(&names.semaphore).map_err(|e| {
            ShmfsError::ChannelUnavailable(format!(
                "failed to open semaphore {}: {e}",
                names.semaphore
            ))
        })?;
        let segment = SharedSegment::open(&names.segment, names.size).map_err(|e| match e {
            ShmfsError::ChannelUnavailable(_) => e,
            e => ShmfsError::ChannelUnavailable(format!(
                "failed to map shared memory {}: {e}",
                names.segment
            )),
        })?;
        info!(
            "opened channel {} ({} bytes) / {}",
            names.segment,
            segment.region().len(),
            names.semaphore
        );
        Ok(Self {
            names: names.clone(),
            segment,
            semaphore,
            unlink_on_drop,
        })
    }

    pub fn capacity(&self) -> usize {
        layout::capacity(self.segment.region())
    }

    /// Publish a request and raise the requester-ready flag.
    pub fn send_request(&mut self, request: &[u8]) -> Result<()> {
        let capacity = self.capacity();
        if request.len() > capacity {
            return Err(ShmfsError::PayloadTooLarge {
                len: request.len(),
                capacity,
            });
        }
        let _guard = self.semaphore.acquire()?;
        let region = self.segment.region_mut();
        layout::write_payload(region, request);
        layout::set_flag(region, REQUESTER_READY, true);
        Ok(())
    }

    /// Poll until the peer raises its flag. The returned response still holds
    /// the semaphore; dropping it (or taking the payload) releases it.
    pub fn await_response(&mut self) -> Result<HeldResponse<'_>> {
        loop {
            let guard = self.semaphore.acquire()?;
            let region = self.segment.region_mut();
            if layout::flag(region, PEER_READY) {
                layout::set_flag(region, PEER_READY, false);
                let payload = layout::read_payload(region);
                if payload.is_none() {
                    warn!(
                        "peer announced {} bytes, more than the {} the region holds",
                        layout::payload_len(region),
                        layout::capacity(region)
                    );
                }
                return Ok(HeldResponse {
                    _guard: guard,
                    payload,
                });
            }
            drop(guard);
            std::thread::yield_now();
        }
    }
}

impl Transport for ShmChannel {
    fn fetch(&mut self, request: &[u8]) -> Result<Response> {
        self.send_request(request)?;
        let response = self.await_response()?.into_response();
        match &response {
            Response::Content(data) => debug!(
                "round trip for {} returned {} bytes",
                String::from_utf8_lossy(request),
                data.len()
            ),
            Response::Unavailable => debug!(
                "round trip for {} returned no content",
                String::from_utf8_lossy(request)
            ),
        }
        Ok(response)
    }
}

impl Drop for ShmChannel {
    fn drop(&mut self) {
        if !self.unlink_on_drop {
            return;
        }
        if let Err(e) = SharedSegment::unlink(&self.names.segment) {
            warn!("failed to unlink shared memory {}: {e}", self.names.segment);
        }
        if let Err(e) = NamedSemaphore::unlink(&self.names.semaphore) {
            warn!("failed to unlink semaphore {}: {e}", self.names.semaphore);
        }
    }
}

/// A response copied out of the region, still holding the semaphore.
/// `payload` is `None` when the announced length did not fit the region.
pub struct HeldResponse<'a> {
    _guard: SemGuard<'a>,
    payload: Option<Vec<u8>>,
}

impl HeldResponse<'_> {
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// A malformed length reads as the error sentinel.
    pub fn into_response(self) -> Response {
        match self.payload {
            Some(payload) => Response::from_payload(payload),
            None => Response::Unavailable,
        }
    }
}
