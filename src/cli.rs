//! Command line interface for the `interceptor-chain` demo binary.
//!
//! Kept free of library types so the build script can include it to render
//! the manual page.

use clap::{Parser, ValueEnum};

/// What an asynchronous interceptor's timeout does to its edits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Fallback {
    /// Keep the edits made before the deadline.
    Continue,
    /// Roll the edits back.
    #[default]
    Failure,
}

/// Command line arguments for the `interceptor-chain` binary.
///
/// Simulates several connections sending PUBREC packets through a demo
/// chain: a tagger, a flaky interceptor and an asynchronous lookup.
#[derive(Debug, Parser)]
#[command(
    name = "interceptor-chain",
    version,
    about = "Run PUBREC packets through a demo interceptor chain"
)]
pub struct Cli {
    /// Number of simulated connections.
    #[arg(short, long, default_value_t = 3)]
    pub connections: u64,

    /// Packets sent on each connection.
    #[arg(short, long, default_value_t = 4)]
    pub packets: u16,

    /// The flaky interceptor fails on every packet identifier divisible by
    /// this value. Zero disables it.
    #[arg(long, default_value_t = 3)]
    pub flaky_every: u16,

    /// Delay before the asynchronous lookup resumes, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub async_delay_ms: u64,

    /// Timeout of the asynchronous lookup, in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub async_timeout_ms: u64,

    /// Behaviour when the asynchronous lookup times out.
    #[arg(long, value_enum, default_value_t = Fallback::Failure)]
    pub fallback: Fallback,

    /// Drop packets carrying this identifier.
    #[arg(long)]
    pub drop_identifier: Option<u16>,

    /// Print the Prometheus rendering of the pipeline metrics on exit.
    #[arg(long)]
    pub metrics: bool,
}
