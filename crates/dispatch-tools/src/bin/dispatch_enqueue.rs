use std::fmt;
use std::io::{self, Read};
use std::process::ExitCode;
use std::sync::Arc;

use dispatch_helpers::logging::{self, LogSettings};
use dispatch_helpers::shutdown;
use dispatch_proto::{BatchEnqueueRequest, EnqueueRequest};
use dispatch_queue::{AmqpBroker, Backoff, Broker, Ingress, QueueTopology, redact_url};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EX_TEMPFAIL: u8 = 75;
const EX_USAGE: u8 = 64;
const MAX_INPUT_BYTES: u64 = 1024 * 1024;
const USAGE: &str = "usage: dispatch-enqueue --broker amqp://... [--queue email.queue] [--dlq failed.queue] [--consumer-tag tag] [--test recipient] [file|-]";

type Result<T> = std::result::Result<T, EnqueueError>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    logging::init_logging(&LogSettings {
        default_filter: "dispatch_queue=warn,lapin=warn",
        filter_env: "DISPATCH_LOG",
        format_env: "DISPATCH_LOG_FORMAT",
        service_name: "dispatch-enqueue",
    });

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = match err {
                EnqueueError::Usage(_) => EX_USAGE,
                EnqueueError::Runtime(_) => EX_TEMPFAIL,
            };
            eprintln!("dispatch-enqueue error: {err}");
            ExitCode::from(code)
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse(std::env::args().skip(1))?;
    let submission = match &cli.test_recipient {
        Some(recipient) => Submission::Single(EnqueueRequest::test_email(recipient.as_str())),
        None => parse_submission(&read_input(cli.input.as_deref())?)?,
    };

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown::listen_shutdown(shutdown_token.clone()));

    info!(
        "enqueue starting: broker={}, queue={}, dlq={}",
        redact_url(&cli.broker),
        cli.queue,
        cli.dlq
    );

    let broker = Arc::new(
        AmqpBroker::connect_with_backoff(
            &cli.broker,
            &cli.consumer_tag,
            &Backoff::default(),
            &shutdown_token,
        )
        .await
        .map_err(|err| runtime_err("failed to connect broker", err))?,
    );

    let result = declare_and_submit(broker.clone(), &cli, submission).await;
    broker.close().await;

    println!("{}", result?);
    Ok(())
}

async fn declare_and_submit(
    broker: Arc<dyn Broker>,
    cli: &Cli,
    submission: Submission,
) -> Result<String> {
    broker
        .declare_topology(&QueueTopology::new(&cli.queue, &cli.dlq))
        .await
        .map_err(|err| runtime_err("failed to declare queue topology", err))?;

    submit(&Ingress::new(broker, &cli.queue), submission).await
}

#[derive(Debug)]
enum Submission {
    Single(EnqueueRequest),
    Batch(BatchEnqueueRequest),
}

/// A document with an `emails` array is a batch; anything else must be a
/// single request.
fn parse_submission(raw: &[u8]) -> Result<Submission> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|err| EnqueueError::Usage(format!("input is not JSON: {err}")))?;

    let is_batch = value.get("emails").is_some_and(Value::is_array);
    if is_batch {
        serde_json::from_value(value)
            .map(Submission::Batch)
            .map_err(|err| EnqueueError::Usage(format!("invalid batch request: {err}")))
    } else {
        serde_json::from_value(value)
            .map(Submission::Single)
            .map_err(|err| EnqueueError::Usage(format!("invalid email request: {err}")))
    }
}

/// Enqueues and renders the response as JSON. Fails only when nothing at all
/// reached the queue.
async fn submit(ingress: &Ingress, submission: Submission) -> Result<String> {
    let (rendered, queued_any) = match submission {
        Submission::Single(request) => {
            let response = ingress.enqueue(request).await;
            (serde_json::to_string_pretty(&response), response.success)
        }
        Submission::Batch(batch) => {
            let response = ingress.enqueue_batch(batch).await;
            (serde_json::to_string_pretty(&response), response.processed_count > 0)
        }
    };

    let rendered = rendered.map_err(|err| runtime_err("failed to encode response", err))?;
    if !queued_any {
        warn!("enqueue finished, nothing queued: queue={}", ingress.work_queue());
        return Err(EnqueueError::Runtime(format!("nothing was queued:\n{rendered}")));
    }
    info!("enqueue finished: queue={}", ingress.work_queue());
    Ok(rendered)
}

fn read_input(path: Option<&str>) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    match path {
        None | Some("-") => io::stdin()
            .take(MAX_INPUT_BYTES + 1)
            .read_to_end(&mut raw)
            .map_err(|err| runtime_err("failed to read request from stdin", err))?,
        Some(path) => std::fs::File::open(path)
            .and_then(|file| file.take(MAX_INPUT_BYTES + 1).read_to_end(&mut raw))
            .map_err(|err| runtime_err(format!("failed to read {path}"), err))?,
    };

    if raw.len() as u64 > MAX_INPUT_BYTES {
        return Err(EnqueueError::Usage(format!(
            "request too large: max {MAX_INPUT_BYTES} bytes"
        )));
    }
    Ok(raw)
}

#[derive(Debug)]
struct Cli {
    broker: String,
    queue: String,
    dlq: String,
    consumer_tag: String,
    test_recipient: Option<String>,
    input: Option<String>,
}

impl Cli {
    fn parse<I>(mut args: I) -> Result<Self>
    where
        I: Iterator<Item = String>,
    {
        let mut broker = None;
        let mut queue = "email.queue".to_string();
        let mut dlq = "failed.queue".to_string();
        let mut consumer_tag = "dispatch-enqueue".to_string();
        let mut test_recipient = None;
        let mut input = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--broker" => broker = Some(required_value(&mut args, "--broker")?),
                "--queue" => queue = required_value(&mut args, "--queue")?,
                "--dlq" => dlq = required_value(&mut args, "--dlq")?,
                "--consumer-tag" => {
                    consumer_tag = required_value(&mut args, "--consumer-tag")?;
                }
                "--test" => test_recipient = Some(required_value(&mut args, "--test")?),
                "-h" | "--help" => return Err(EnqueueError::Usage(USAGE.to_string())),
                other if other.starts_with("--") => {
                    return Err(EnqueueError::Usage(format!("unknown argument: {other}")));
                }
                _ if input.is_none() => input = Some(arg),
                _ => {
                    return Err(EnqueueError::Usage(format!("unexpected argument: {arg}")));
                }
            }
        }

        if test_recipient.is_some() && input.is_some() {
            return Err(EnqueueError::Usage(
                "--test and an input file are mutually exclusive".to_string(),
            ));
        }
        if queue == dlq {
            return Err(EnqueueError::Usage("--queue and --dlq must differ".to_string()));
        }

        Ok(Self {
            broker: broker.ok_or_else(|| {
                EnqueueError::Usage("missing required argument --broker".to_string())
            })?,
            queue,
            dlq,
            consumer_tag,
            test_recipient,
            input,
        })
    }
}

fn required_value<I>(args: &mut I, flag: &str) -> Result<String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| EnqueueError::Usage(format!("missing value for {flag}")))
}

#[derive(Debug)]
enum EnqueueError {
    Usage(String),
    Runtime(String),
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Usage(msg) => write!(f, "{msg}"),
            EnqueueError::Runtime(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EnqueueError {}

fn runtime_err(context: impl Into<String>, err: impl fmt::Display) -> EnqueueError {
    EnqueueError::Runtime(format!("{}: {err}", context.into()))
}
