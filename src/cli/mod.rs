//! Command-line interface definitions for the `edgeward-queue` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `edgeward-queue` binary.
#[derive(Debug, Parser)]
#[command(
    name = "edgeward-queue",
    about = "Inspect and feed the SAN certificate request queue",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Append a SAN certificate request to the queue.
    #[command(name = "enqueue", about = "Append a SAN certificate request")]
    Enqueue(EnqueueCommand),
    /// Remove and print the oldest request.
    #[command(name = "dequeue", about = "Remove and print the oldest request")]
    Dequeue(DequeueCommand),
    /// Print every queued request without removing any.
    #[command(name = "list", about = "Print queued requests without removing them")]
    List,
    /// Take the oldest request and apply it to the SAN certificate property.
    #[command(
        name = "process",
        about = "Apply the oldest request to the SAN certificate property"
    )]
    Process(ProcessCommand),
}

/// Arguments for the `edgeward-queue enqueue` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct EnqueueCommand {
    /// Domain to add to the shared certificate.
    #[arg(long, value_name = "DOMAIN")]
    pub(crate) domain: String,
    /// Certificate type recorded with the request.
    #[arg(long, value_name = "TYPE", default_value = "san")]
    pub(crate) cert_type: String,
    /// Flavor of the service owning the domain.
    #[arg(long, value_name = "FLAVOR")]
    pub(crate) flavor: String,
    /// Record `validate_service: true` on the request. Informational only;
    /// `process` does not act on it.
    #[arg(long)]
    pub(crate) validate: bool,
}

/// Arguments for the `edgeward-queue dequeue` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DequeueCommand {
    /// Wait until a request is available instead of returning at once.
    #[arg(long)]
    pub(crate) block: bool,
}

/// Arguments for the `edgeward-queue process` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ProcessCommand {
    /// Wait until a request is available instead of returning at once.
    #[arg(long)]
    pub(crate) block: bool,
}
