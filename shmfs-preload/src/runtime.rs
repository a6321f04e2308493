use libshmfs::channel::ShmChannel;
use libshmfs::guard::ReentrancyGuard;
use libshmfs::{ChannelNames, Dispatcher, ShmfsConfig};
use once_cell::sync::OnceCell;

use crate::next::NextSymbols;

pub type Preload = Dispatcher<NextSymbols, ShmChannel>;

static DISPATCHER: OnceCell<Preload> = OnceCell::new();

/// An intercepted call that may use the dispatcher. Holding it marks the
/// thread as inside the library.
pub struct Active {
    _guard: ReentrancyGuard,
    pub dispatcher: &'static Preload,
}

/// `None` for nested calls made by the library itself; those must go
/// straight to libc.
pub fn enter() -> Option<Active> {
    let guard = ReentrancyGuard::enter()?;
    let dispatcher = DISPATCHER.get_or_init(|| {
        let saved = errno::errno();
        let dispatcher = build();
        errno::set_errno(saved);
        dispatcher
    });
    Some(Active {
        _guard: guard,
        dispatcher,
    })
}

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::new().filter_or("SHMFS_LOG", "warn"))
        .format_timestamp_micros()
        .try_init();
}

fn build() -> Preload {
    init_logging();
    let config = ShmfsConfig::from_env();
    let transport = if config.disabled {
        info!("virtualization disabled by SHMFS_DISABLE");
        None
    } else {
        let names = ChannelNames::for_host(&config);
        match ShmChannel::open(&names, config.unlink_on_exit) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("{e}; all file access passes through");
                None
            }
        }
    };
    Dispatcher::new(NextSymbols, transport, &config)
}

pub fn initialize() {
    drop(enter());
}

/// Release the channel. Virtual descriptors stay readable for anything that
/// runs after us.
pub fn teardown() {
    let Some(_guard) = ReentrancyGuard::enter() else {
        return;
    };
    if let Some(dispatcher) = DISPATCHER.get() {
        drop(dispatcher.shutdown());
    }
}
