//! Binary entry point for the `edgeward-queue` operator tool.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use serde_json::{Value, json};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use edgeward::config::{ConfigError, EdgewardConfig};
use edgeward::flow::{ModSanWorker, PapiError, ReqwestPapiClient, WorkerError};
use edgeward::model::ModSanRequest;
use edgeward::queue::{FsCoordinationBackend, ModSanQueue, QueueError};

mod cli;

use cli::{Cli, DequeueCommand, EnqueueCommand, ProcessCommand};

const LOG_ENV: &str = "EDGEWARD_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("vendor client error: {0}")]
    Client(#[from] PapiError),
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli, &mut io::stdout()).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    let config = EdgewardConfig::load_without_cli_args()?;
    config.validate()?;
    let queue = open_queue(&config)?;

    match cli {
        Cli::Enqueue(command) => enqueue(&queue, command, out),
        Cli::Dequeue(command) => dequeue(&queue, &command, out).await,
        Cli::List => list(&queue, out),
        Cli::Process(command) => process_next(&config, queue, &command, out).await,
    }
}

fn open_queue(config: &EdgewardConfig) -> Result<ModSanQueue, CliError> {
    let backend = FsCoordinationBackend::open(&config.queue_dir())?;
    Ok(ModSanQueue::new(Arc::new(backend)).with_poll_interval(config.poll_interval()))
}

fn enqueue(
    queue: &ModSanQueue,
    command: EnqueueCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let domain = command.domain.trim();
    if domain.is_empty() {
        return Err(CliError::InvalidArgument(String::from(
            "--domain must not be empty",
        )));
    }
    let request = ModSanRequest {
        cert_type: command.cert_type,
        domain_name: domain.to_owned(),
        flavor_id: command.flavor,
        validate_service: command.validate.then_some(true),
    };
    queue.enqueue(&request.to_payload()?)?;
    tracing::info!(domain = %request.domain_name, "queued SAN certificate request");
    write_line(out, &serde_json::to_value(&request)?)
}

async fn dequeue(
    queue: &ModSanQueue,
    command: &DequeueCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    match queue.dequeue(command.block).await? {
        Some(payload) => write_line(out, &payload_value(&payload)),
        None => {
            tracing::info!("queue is empty");
            Ok(())
        }
    }
}

fn list(queue: &ModSanQueue, out: &mut impl Write) -> Result<(), CliError> {
    for payload in queue.traverse()? {
        write_line(out, &payload_value(&payload))?;
    }
    Ok(())
}

async fn process_next(
    config: &EdgewardConfig,
    queue: ModSanQueue,
    command: &ProcessCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    config.validate_worker()?;
    let client = ReqwestPapiClient::new(config.papi_base_url.trim(), config.provider_timeout())?;
    let worker = ModSanWorker::new(
        queue,
        Arc::new(client),
        config.property_settings(),
        config.san_cert_hostname.trim(),
    )
    .with_notify_emails(config.notify_emails());

    match worker.process_next(command.block).await? {
        Some(report) => write_line(
            out,
            &json!({
                "request": report.request,
                "version": report.version,
                "activation_link": report.activation_link,
            }),
        ),
        None => {
            tracing::info!("queue is empty");
            Ok(())
        }
    }
}

/// Decodes a queued payload for display, falling back to its text form when
/// it is not JSON.
fn payload_value(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

fn write_line(out: &mut impl Write, value: &Value) -> Result<(), CliError> {
    writeln!(out, "{value}")?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    use edgeward::queue::CoordinationBackend;
    use tempfile::TempDir;

    fn temp_queue() -> (TempDir, ModSanQueue) {
        let dir = TempDir::new().expect("tempdir");
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("queue"))
            .expect("utf8 temp path");
        let backend: Arc<dyn CoordinationBackend> =
            Arc::new(FsCoordinationBackend::open(&path).expect("open queue"));
        (dir, ModSanQueue::new(backend))
    }

    fn lines(buffer: Vec<u8>) -> Vec<Value> {
        String::from_utf8(buffer)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_prints_request() {
        let (_dir, queue) = temp_queue();
        let mut out = Vec::new();
        enqueue(
            &queue,
            EnqueueCommand {
                domain: String::from(" www.abc.com "),
                cert_type: String::from("san"),
                flavor: String::from("premium"),
                validate: true,
            },
            &mut out,
        )
        .expect("enqueue");
        dequeue(&queue, &DequeueCommand { block: false }, &mut out)
            .await
            .expect("dequeue");

        let printed = lines(out);
        assert_eq!(printed.len(), 2);
        assert_eq!(printed.first(), printed.last());
        let first = printed.first().expect("line");
        assert_eq!(first.get("domain_name"), Some(&json!("www.abc.com")));
        assert_eq!(first.get("validate_service"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn dequeue_on_empty_queue_prints_nothing() {
        let (_dir, queue) = temp_queue();
        let mut out = Vec::new();
        dequeue(&queue, &DequeueCommand { block: false }, &mut out)
            .await
            .expect("dequeue");
        assert!(out.is_empty());
    }

    #[test]
    fn enqueue_rejects_blank_domain() {
        let (_dir, queue) = temp_queue();
        let err = enqueue(
            &queue,
            EnqueueCommand {
                domain: String::from("  "),
                cert_type: String::from("san"),
                flavor: String::from("premium"),
                validate: false,
            },
            &mut Vec::new(),
        )
        .expect_err("blank domain");
        assert!(matches!(err, CliError::InvalidArgument(_)), "{err}");
        assert!(queue.is_empty().expect("len"));
    }

    #[test]
    fn list_keeps_entries_and_shows_raw_payloads() {
        let (_dir, queue) = temp_queue();
        queue.enqueue(b"{\"domain_name\":\"a.com\"}").expect("enqueue");
        queue.enqueue(b"not json").expect("enqueue");
        let mut out = Vec::new();
        list(&queue, &mut out).expect("list");

        assert_eq!(
            lines(out),
            vec![json!({"domain_name": "a.com"}), json!("not json")]
        );
        assert_eq!(queue.len().expect("len"), 2);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::InvalidArgument(String::from("--domain must not be empty"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(
            rendered.contains("invalid argument: --domain must not be empty"),
            "rendered: {rendered}"
        );
    }
}
