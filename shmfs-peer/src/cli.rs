use clap::{Args, Parser, Subcommand};
use libshmfs::ChannelNames;
use libshmfs::config::{
    DEFAULT_SEGMENT_PREFIX, DEFAULT_SEGMENT_SIZE, DEFAULT_SEMAPHORE_PREFIX, MAX_SEGMENT_SIZE,
    ShmfsConfig, local_hostname,
};
use libshmfs::channel::layout::HEADER_LEN;

#[derive(Parser, Debug)]
#[command(name = "shmfs-peer")]
#[command(
    version,
    about = "Serve file contents to libshmfs requesters on this host",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Create the channel and answer file requests until interrupted")]
    Serve(ServeArgs),
    #[command(about = "Remove a segment and semaphore left behind by a crashed peer")]
    Clean(ChannelArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ChannelArgs {
    /// Host qualifier appended to both resource names (defaults to the hostname)
    #[arg(long, env = "SHMFS_HOST")]
    pub host: Option<String>,

    /// Shared-memory segment name prefix
    #[arg(long, env = "SHMFS_SEGMENT_PREFIX", default_value = DEFAULT_SEGMENT_PREFIX)]
    pub segment_prefix: String,

    /// Semaphore name prefix
    #[arg(long, env = "SHMFS_SEMAPHORE_PREFIX", default_value = DEFAULT_SEMAPHORE_PREFIX)]
    pub semaphore_prefix: String,

    /// Segment size in bytes, header included
    #[arg(
        long,
        env = "SHMFS_SEGMENT_SIZE",
        default_value_t = DEFAULT_SEGMENT_SIZE,
        value_parser = parse_segment_size
    )]
    pub size: usize,
}

fn parse_segment_size(raw: &str) -> Result<usize, String> {
    let size: usize = raw.parse().map_err(|e| format!("{e}"))?;
    if size <= HEADER_LEN || size > MAX_SEGMENT_SIZE {
        return Err(format!(
            "must be between {} and {MAX_SEGMENT_SIZE}",
            HEADER_LEN + 1
        ));
    }
    Ok(size)
}

impl ChannelArgs {
    pub fn names(&self) -> ChannelNames {
        let config = ShmfsConfig {
            host: self.host.clone().unwrap_or_else(local_hostname),
            segment_prefix: self.segment_prefix.clone(),
            semaphore_prefix: self.semaphore_prefix.clone(),
            segment_size: self.size,
            ..ShmfsConfig::default()
        };
        ChannelNames::for_host(&config)
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub channel: ChannelArgs,

    /// Basename pattern admitted for loading; repeatable
    #[arg(long = "pattern", value_name = "REGEX", default_value = r".*\.so.*")]
    pub patterns: Vec<String>,

    /// Basename always admitted; repeatable
    #[arg(long = "allow", value_name = "NAME")]
    pub allow: Vec<String>,

    /// Admit every readable file
    #[arg(long)]
    pub all: bool,

    /// Exit after answering one request
    #[arg(long)]
    pub once: bool,
}
