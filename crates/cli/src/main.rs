use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::Stream;
use hidwatch_core::{decode, tag_name, Decoded, RawEvent};
use hidwatch_store::{
    forward, seed, spawn_ingest, ChannelSink, IngestConfig, NotificationKind, NotificationSink, StaticSnapshot, TracingSink,
    View,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "hidwatchctl", version, about = "Replay and inspect HID job event streams")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a captured event stream (JSON lines) through the ingest loop and print the final view
    Replay {
        /// Event capture, one `{"type":..,"values":[..]}` per line ("-" for stdin)
        input: String,
        /// Running jobs snapshot (JSON array of {id, vmId, scriptSource}) applied before the stream
        #[arg(long = "snapshot")]
        snapshot: Option<PathBuf>,
        /// Capacity of both the log and the job event history (overrides HIDWATCH_MAX_ENTRIES)
        #[arg(long = "max-entries")]
        max_entries: Option<usize>,
    },
    /// Classify each line of a capture without applying it
    Decode {
        /// Event capture ("-" for stdin)
        input: String,
    },
}

fn init_tracing() {
    let env = std::env::var("HIDWATCH_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("HIDWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid HIDWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let f = tokio::fs::File::open(input).await.with_context(|| format!("opening {}", input))?;
    Ok(Box::new(BufReader::new(f)))
}

/// Parse a JSON-lines capture lazily; blank lines and `#` comments are skipped,
/// unparseable lines are reported and skipped.
fn event_lines(reader: Box<dyn AsyncBufRead + Unpin + Send>) -> impl Stream<Item = RawEvent> {
    futures::stream::unfold((reader.lines(), 0usize), |(mut lines, mut lineno)| async move {
        loop {
            lineno += 1;
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let t = line.trim();
                    if t.is_empty() || t.starts_with('#') { continue; }
                    match RawEvent::from_json(t) {
                        Ok(ev) => return Some((ev, (lines, lineno))),
                        Err(e) => warn!(line = lineno, error = %e, "skipping unparseable event line"),
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(line = lineno, error = %e, "read error; ending event stream");
                    return None;
                }
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { input, snapshot, max_entries } => {
            info!(input = %input, snapshot = ?snapshot, "replay invoked");
            let mut cfg = IngestConfig::from_env()?;
            if let Some(n) = max_entries { cfg = cfg.with_max_entries(n); }
            // Notifications go to stderr so stdout carries only the final view.
            // Json output leaves them to the structured log.
            let (sink, printer) = match cli.output {
                Output::Human => {
                    let (sink, mut notes) = ChannelSink::new();
                    let printer = tokio::spawn(async move {
                        while let Some(n) = notes.recv().await {
                            let mark = match n.kind { NotificationKind::Positive => "✔", NotificationKind::Negative => "✘" };
                            eprintln!("{} {}: {}", mark, n.message, n.detail);
                        }
                    });
                    let sink: Arc<dyn NotificationSink> = Arc::new(sink);
                    (sink, Some(printer))
                }
                Output::Json => {
                    let sink: Arc<dyn NotificationSink> = Arc::new(TracingSink);
                    (sink, None)
                }
            };
            let (tx, backend) = spawn_ingest(cfg, sink)?;

            if let Some(path) = snapshot {
                let text = tokio::fs::read_to_string(&path).await.with_context(|| format!("reading {}", path.display()))?;
                let service = StaticSnapshot::from_json(&text)?;
                seed(&service, &tx).await?;
            }

            let events = event_lines(open_input(&input).await?);
            tokio::select! {
                n = forward(events, &tx) => info!(forwarded = n, "replay input exhausted"),
                _ = signal::ctrl_c() => info!("Ctrl-C received; stopping replay"),
            }

            // Closing the queue lets the ingest loop drain, publish and exit.
            drop(tx);
            backend.stopped().await;
            if let Some(printer) = printer {
                let _ = printer.await;
            }
            let view = backend.current();
            match cli.output {
                Output::Human => print_view(&view),
                Output::Json => println!("{}", serde_json::to_string_pretty(&*view)?),
            }
        }
        Commands::Decode { input } => {
            info!(input = %input, "decode invoked");
            let mut lines = open_input(&input).await?.lines();
            let mut lineno = 0usize;
            let (mut ok, mut bad) = (0usize, 0usize);
            while let Some(line) = lines.next_line().await? {
                lineno += 1;
                let t = line.trim();
                if t.is_empty() || t.starts_with('#') { continue; }
                let raw = match RawEvent::from_json(t) {
                    Ok(raw) => raw,
                    Err(e) => {
                        bad += 1;
                        print_classified(cli.output, lineno, "invalid", &e.to_string());
                        continue;
                    }
                };
                match decode(&raw) {
                    Ok(Decoded::Log(rec)) => {
                        ok += 1;
                        let text = format!("[{}] {} ({}): {}", rec.time, rec.source, rec.level, rec.message);
                        print_classified(cli.output, lineno, "log", &text);
                    }
                    Ok(Decoded::Job(ev)) => {
                        ok += 1;
                        let text = format!("[{}] job {} vm {} {}: {}", ev.time, ev.job_id, ev.vm_id, ev.kind, ev.message);
                        print_classified(cli.output, lineno, "job", &text);
                    }
                    Err(e) if e.is_unhandled() => {
                        print_classified(cli.output, lineno, "unhandled", tag_name(raw.tag));
                    }
                    Err(e) => {
                        bad += 1;
                        print_classified(cli.output, lineno, "malformed", &e.to_string());
                    }
                }
            }
            info!(decoded = ok, rejected = bad, "decode done");
        }
    }

    Ok(())
}

fn print_classified(output: Output, lineno: usize, class: &str, text: &str) {
    match output {
        Output::Human => println!("{:>5} {:<10} {}", lineno, class, text),
        Output::Json => println!("{}", serde_json::json!({ "line": lineno, "class": class, "detail": text })),
    }
}

fn job_status(failed: bool, succeeded: bool) -> &'static str {
    match (failed, succeeded) {
        (false, false) => "running",
        (true, false) => "failed",
        (false, true) => "succeeded",
        (true, true) => "unknown",
    }
}

fn print_view(view: &View) {
    println!("JOB    VM   STATUS     UPDATED    MESSAGE              RESULT");
    for j in view.jobs_sorted() {
        println!(
            "{:<6} {:<4} {:<10} {:<10} {:<20} {}",
            j.id,
            j.vm_id,
            job_status(j.has_failed, j.has_succeeded),
            if j.last_update_time.is_empty() { "-" } else { j.last_update_time.as_str() },
            j.last_message,
            j.text_result
        );
    }
    println!();
    println!("LOG ({} entries)", view.logs.len());
    for l in view.logs.iter() {
        println!("[{}] {} ({}): {}", l.time, l.source, l.level, l.message);
    }
    println!();
    println!("HID EVENTS ({} entries)", view.events.len());
    for e in view.events.iter() {
        println!("[{}] job {} vm {} {}", e.time, e.job_id, e.vm_id, e.kind);
    }
}
