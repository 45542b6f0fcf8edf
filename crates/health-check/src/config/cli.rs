use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::check::CheckArgs;
use crate::config::probe::ProbeArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect cluster state, evaluate capacity and print a health report
    Check(Box<CheckArgs>),
    /// Run the GPU probe against a single node and print its samples
    Probe(ProbeArgs),
}
