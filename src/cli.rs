use clap::{Parser, Subcommand};

/// frontierd cli
#[derive(Parser)]
#[command(name = "frontierd")]
#[command(about = "Control plane for a distributed web crawler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the coordinator HTTP server
    Serve {
        /// Address to bind the HTTP listener on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: String,

        /// Directory for snapshots, page metadata, blobs and logs
        #[arg(short, long, default_value = "./data")]
        data_dir: String,

        /// Seconds between embedded maintenance ticks (0 disables the
        /// internal timer; /on-cron keeps working either way)
        #[arg(long, default_value = "60")]
        cron_interval_secs: u64,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
