use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use url::Url;

use echo_gateway::config::ObservabilityConfig;
use echo_gateway::observability::logging;
use echo_gateway::probe::{run_probe, ProbeConfig, TlsVerification, DEFAULT_MESSAGE};
use echo_gateway::telemetry::{PropagationFormat, TraceContext};

#[derive(Parser)]
#[command(name = "echo-probe")]
#[command(about = "Send one message to an echo gateway and check the reply", long_about = None)]
struct Cli {
    /// Target, e.g. ws://localhost:9001 or wss://localhost:9002
    url: Url,

    /// Message to send
    #[arg(short, long, default_value = DEFAULT_MESSAGE)]
    message: String,

    /// Prefix the gateway is expected to prepend
    #[arg(long, default_value = "Server received from client: ")]
    prefix: String,

    /// Accept any server certificate (self-signed test setups)
    #[arg(long, conflicts_with = "ca_file")]
    accept_invalid: bool,

    /// Trust anchors for wss:// instead of the platform roots
    #[arg(long)]
    ca_file: Option<String>,

    /// Attach a fresh sampled trace context to the handshake
    #[arg(long, value_enum)]
    trace: Option<Format>,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    W3c,
    Jaeger,
    B3,
}

impl From<Format> for PropagationFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::W3c => PropagationFormat::W3c,
            Format::Jaeger => PropagationFormat::Jaeger,
            Format::B3 => PropagationFormat::B3,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init_logging(&ObservabilityConfig::default()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let mut config = ProbeConfig::new(cli.url);
    config.message = cli.message;
    config.expected_prefix = cli.prefix;
    config.timeout = Duration::from_secs(cli.timeout_secs);
    config.tls = if cli.accept_invalid {
        TlsVerification::AcceptInvalid
    } else {
        TlsVerification::Strict { ca_path: cli.ca_file }
    };

    if let Some(format) = cli.trace {
        let context = TraceContext::random(true);
        config.headers = PropagationFormat::from(format).propagator().encode(&context);
        tracing::info!(trace_id = %context.trace_id, span_id = %context.span_id, "Attaching trace context");
    }

    match run_probe(&config).await {
        Ok(outcome) => {
            println!("{outcome:?}");
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
