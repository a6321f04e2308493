use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use libshmfs::ChannelNames;
use libshmfs::channel::ShmPeer;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::cli::ServeArgs;
use crate::policy::LoadPolicy;

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_: c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> anyhow::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(request_stop),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { sigaction(signal, &action) }
            .with_context(|| format!("failed to install {signal:?} handler"))?;
    }
    Ok(())
}

pub fn serve(args: &ServeArgs) -> anyhow::Result<()> {
    let policy = LoadPolicy::new(&args.patterns, &args.allow, args.all)
        .context("invalid --pattern")?;
    let names = args.channel.names();
    clean(&names)?;
    let mut peer = ShmPeer::create(&names)
        .with_context(|| format!("failed to create channel {}", names.segment))?;
    install_signal_handlers()?;
    info!(
        "serving {} / {} with {} bytes of payload capacity",
        names.segment,
        names.semaphore,
        peer.capacity()
    );

    let mut served = 0u64;
    while !STOP.load(Ordering::SeqCst) {
        match peer.serve_one(|request| policy.answer(request))? {
            Some(_) => {
                served += 1;
                if args.once {
                    break;
                }
            }
            None => std::thread::yield_now(),
        }
    }
    info!("stopping after {served} requests");
    Ok(())
}

/// Unlink leftovers of a previous peer for `names`.
pub fn clean(names: &ChannelNames) -> anyhow::Result<()> {
    let (segment, semaphore) = ShmPeer::remove_stale(names)
        .with_context(|| format!("failed to remove channel {}", names.segment))?;
    if segment {
        warn!("removed stale segment {}", names.segment);
    }
    if semaphore {
        warn!("removed stale semaphore {}", names.semaphore);
    }
    Ok(())
}
