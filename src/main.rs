use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::Parser;
use streamfold::config::{load_config, AppConfig};
use streamfold::observability::{init_tracing, log_reconcile_complete};
use streamfold::protocol::canonical::{CanonicalPayload, ProviderKind};
use streamfold::stream::{reconcile, Delta, IncompletePolicy, SseTokenizer};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(name = "streamfold")]
#[command(about = "Fold a captured LLM response stream into one canonical payload")]
struct Args {
    /// YAML config file (default: config.yaml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Vendor wire format: anthropic | gemini | llama
    #[arg(short, long, value_name = "PROVIDER", env = "STREAMFOLD_PROVIDER")]
    provider: Option<ProviderKind>,

    /// What to do with blocks that never completed: strict | best-effort
    #[arg(long, value_name = "POLICY")]
    policy: Option<IncompletePolicy>,

    /// The transcript is one JSON response document instead of an SSE capture
    #[arg(long)]
    non_streaming: bool,

    /// Do not print deltas while folding
    #[arg(short, long)]
    quiet: bool,

    /// Print the payload in the vendor's response shape instead of canonical JSON
    #[arg(long)]
    wire: bool,

    /// Captured SSE stream or response document
    #[arg(value_name = "TRANSCRIPT")]
    transcript: PathBuf,
}

fn resolve_config(args: &Args) -> AppConfig {
    let path = match &args.config {
        Some(path) => path.clone(),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => PathBuf::from(DEFAULT_CONFIG_PATH),
        None => return AppConfig::default(),
    };
    load_config(&path.to_string_lossy()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from {}: {e}", path.display());
        std::process::exit(1);
    })
}

fn print_delta(out: &mut impl Write, delta: &Delta) -> io::Result<()> {
    if let Some(thinking) = &delta.thinking {
        write!(out, "\x1b[2m{thinking}\x1b[0m")?;
    }
    if let Some(text) = &delta.text {
        write!(out, "{text}")?;
    }
    out.flush()
}

/// Deltas are written to `out` until the first write error; the fold then
/// stops printing and the error is returned after the payload is built.
fn fold_transcript(
    provider: ProviderKind,
    policy: IncompletePolicy,
    transcript: &str,
    mut out: Option<&mut dyn Write>,
) -> Result<CanonicalPayload, Box<dyn std::error::Error>> {
    let started = Instant::now();
    let units = SseTokenizer::tokenize(transcript);
    tracing::debug!(provider = provider.as_str(), units = units.len(), "tokenized transcript");

    let mut reconciler = provider.reconciler(policy);
    let mut printed = false;
    let mut write_error: Option<io::Error> = None;
    let result = reconcile(&mut reconciler, units, &mut |delta| {
        let Some(out) = out.as_mut() else {
            return;
        };
        if write_error.is_some() {
            return;
        }
        match print_delta(out, &delta) {
            Ok(()) => printed = true,
            Err(e) => write_error = Some(e),
        }
    });
    let payload = result.map_err(|e| {
        tracing::error!(
            provider = provider.as_str(),
            category = e.category().as_str(),
            error = %e,
            "reconcile failed"
        );
        e
    })?;
    if let Some(e) = write_error {
        return Err(Box::new(e));
    }
    if let Some(out) = out.as_mut().filter(|_| printed) {
        writeln!(out)?;
    }
    log_reconcile_complete(provider, &payload, &reconciler.stats(), started.elapsed());
    Ok(payload)
}

fn decode_document(
    provider: ProviderKind,
    transcript: &str,
) -> Result<CanonicalPayload, Box<dyn std::error::Error>> {
    let document: serde_json::Value = serde_json::from_str(transcript)?;
    Ok(provider.decode_response(&document)?)
}

fn main() {
    let args = Args::parse();
    let config = resolve_config(&args);
    init_tracing(&config.features.log_level, config.features.log_format);

    let provider = match args.provider {
        Some(provider) => provider,
        None => config.reconcile.provider_kind().unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        }),
    };
    let policy = args.policy.unwrap_or(config.reconcile.incomplete_policy);
    let emit_deltas = config.reconcile.emit_deltas && !args.quiet;

    let transcript = std::fs::read_to_string(&args.transcript).unwrap_or_else(|e| {
        eprintln!("Failed to read {}: {e}", args.transcript.display());
        std::process::exit(1);
    });

    let result = if args.non_streaming {
        decode_document(provider, &transcript)
    } else {
        let mut stdout = io::stdout().lock();
        let out = emit_deltas.then_some(&mut stdout as &mut dyn Write);
        fold_transcript(provider, policy, &transcript, out)
    };
    let payload = result.unwrap_or_else(|e| {
        eprintln!("Failed to reconcile {}: {e}", args.transcript.display());
        std::process::exit(2);
    });

    let output = if args.wire {
        provider.encode_response(&payload)
    } else {
        payload.to_json()
    };
    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Failed to serialize payload: {e}");
            std::process::exit(1);
        }
    }
}
