//! Tutor CLI
//!
//! Runs problems through the tutor pipeline from the command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tutor_pipeline::{
    extract_analysis, AnalysisRecord, Config, EventSink, HistoryStore, HttpGateway, Identity,
    ImagePayload, InMemoryHistory, Orchestrator, PipelineResult, RawInput, RelayOutcome,
    SseWriter, StreamEvent,
};

/// Tutor - worked solutions for school problems
///
/// Recognizes a typed or photographed problem, classifies it, and writes a
/// step-by-step solution using OpenAI-compatible model endpoints.
#[derive(Parser, Debug)]
#[command(name = "tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline: recognize, analyze and solve
    Solve {
        /// Problem text
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        text: Option<String>,

        /// Problem image: a file path or a data URL
        #[arg(long, value_name = "IMAGE")]
        image: Option<String>,

        /// Stream the solution as it is generated
        #[arg(long)]
        stream: bool,

        /// Write the stream as server-sent-events frames
        #[arg(long, requires = "stream")]
        sse: bool,

        /// Caller id, recorded with the solved problem
        #[arg(long, requires = "actor_name")]
        actor_id: Option<String>,

        /// Caller display name
        #[arg(long, requires = "actor_id")]
        actor_name: Option<String>,
    },

    /// Transcribe a problem image
    Recognize {
        /// Problem image: a file path or a data URL
        #[arg(long, value_name = "IMAGE")]
        image: String,
    },

    /// Classify a problem
    Analyze {
        /// Problem text
        #[arg(long)]
        text: String,
    },

    /// Write a solution for an already analyzed problem
    Generate {
        /// Problem text
        #[arg(long)]
        text: String,

        /// Analysis record as JSON
        #[arg(long, value_name = "JSON")]
        analysis: String,

        /// Stream the solution as it is generated
        #[arg(long)]
        stream: bool,

        /// Write the stream as server-sent-events frames
        #[arg(long, requires = "stream")]
        sse: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout carries results
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Executes one command. Returns `false` when the pipeline reported a failure.
async fn run(args: Args) -> anyhow::Result<bool> {
    let config = load_config(args.config.as_deref())?;
    tracing::info!(
        vision_model = %config.vision.model,
        text_model = %config.text.model,
        timeout_secs = config.request_timeout_secs,
        "Configuration loaded"
    );

    let gateway = HttpGateway::new(&config)?;
    let history = Arc::new(InMemoryHistory::new());
    let orchestrator = Orchestrator::new(Arc::new(gateway), &config)
        .with_history(Arc::clone(&history) as Arc<dyn HistoryStore>);

    match args.command {
        Command::Solve {
            text,
            image,
            stream,
            sse,
            actor_id,
            actor_name,
        } => {
            let input = match (text, image) {
                (Some(text), _) => RawInput::text(text),
                (None, Some(image)) => RawInput::Image(load_image(&image)?),
                (None, None) => anyhow::bail!("Either --text or --image is required"),
            };
            let identity = actor_id.zip(actor_name).map(|(id, name)| Identity::new(id, name));

            let result = if stream {
                if identity.is_some() {
                    tracing::warn!("Streamed runs are not recorded in history");
                }
                let cancel = CancellationToken::new();
                let (printer, mut sink) = spawn_printer(config.stream_buffer, sse);
                let watcher = cancel_on_ctrl_c(cancel.clone());
                let result = orchestrator.solve_streaming(input, &mut sink, &cancel).await;
                drop(sink);
                printer.await??;
                watcher.abort();
                result
            } else {
                orchestrator.solve(input, identity.as_ref()).await
            };
            print_result(&result, stream && sse)
        }

        Command::Recognize { image } => {
            let image = load_image(&image)?;
            match orchestrator.recognize(&image).await {
                Ok(text) => {
                    println!("{text}");
                    Ok(true)
                }
                Err(e) => report_failure(&e),
            }
        }

        Command::Analyze { text } => match orchestrator.analyze(&text).await {
            Ok(analysis) => {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
                Ok(true)
            }
            Err(e) => report_failure(&e),
        },

        Command::Generate {
            text,
            analysis,
            stream,
            sse,
        } => {
            let analysis = parse_analysis(&analysis)?;
            if stream {
                let cancel = CancellationToken::new();
                let (printer, mut sink) = spawn_printer(config.stream_buffer, sse);
                let watcher = cancel_on_ctrl_c(cancel.clone());
                let outcome = orchestrator
                    .generate_streaming(&text, &analysis, &mut sink, &cancel)
                    .await;
                drop(sink);
                printer.await??;
                watcher.abort();
                match outcome {
                    Ok(RelayOutcome::Completed) => Ok(true),
                    Ok(other) => {
                        tracing::info!(outcome = ?other, "Stream ended early");
                        Ok(false)
                    }
                    Err(e) => report_failure(&e),
                }
            } else {
                match orchestrator.generate(&text, &analysis).await {
                    Ok(solution) => {
                        println!("{}", serde_json::to_string_pretty(&solution)?);
                        Ok(true)
                    }
                    Err(e) => report_failure(&e),
                }
            }
        }
    }
}

fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => Config::load()?,
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Reads `--image` as a data URL or, failing that, as a file path.
fn load_image(image: &str) -> anyhow::Result<ImagePayload> {
    if image.trim_start().starts_with("data:") {
        return Ok(ImagePayload::parse(image)?);
    }
    let path = PathBuf::from(image);
    if !path.exists() {
        anyhow::bail!(
            "Image not found: '{}'\n\nSuggestion: Pass a readable image file or a data: URL",
            path.display()
        );
    }
    Ok(ImagePayload::load(&path)?)
}

fn parse_analysis(analysis: &str) -> anyhow::Result<AnalysisRecord> {
    extract_analysis(analysis).map_err(|_| {
        anyhow::anyhow!(
            "Invalid --analysis value\n\nSuggestion: Pass the JSON printed by `tutor analyze`"
        )
    })
}

/// Spawns the stdout writer and returns it with the bounded channel feeding it.
fn spawn_printer(
    capacity: usize,
    sse: bool,
) -> (
    tokio::task::JoinHandle<std::io::Result<()>>,
    mpsc::Sender<StreamEvent>,
) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tokio::spawn(print_events(rx, sse)), tx)
}

async fn print_events(mut rx: mpsc::Receiver<StreamEvent>, sse: bool) -> std::io::Result<()> {
    if sse {
        let mut writer = SseWriter::new(tokio::io::stdout());
        while let Some(event) = rx.recv().await {
            if writer.send(event).await.is_err() {
                break;
            }
        }
        return Ok(());
    }

    let mut stdout = tokio::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Content(fragment) => stdout.write_all(fragment.as_bytes()).await?,
            StreamEvent::Done => stdout.write_all(b"\n").await?,
            StreamEvent::Error(message) => {
                stdout.write_all(b"\n").await?;
                eprintln!("Error: {message}");
            }
        }
        stdout.flush().await?;
    }
    Ok(())
}

fn cancel_on_ctrl_c(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling stream");
            cancel.cancel();
        }
    })
}

/// Prints a pipeline result. In SSE mode stdout is reserved for frames.
fn print_result(result: &PipelineResult, sse: bool) -> anyhow::Result<bool> {
    let json = serde_json::to_string_pretty(result)?;
    if sse {
        eprintln!("{json}");
    } else {
        println!("{json}");
    }
    Ok(result.is_success())
}

fn report_failure(error: &tutor_pipeline::PipelineError) -> anyhow::Result<bool> {
    tracing::debug!(error = %error, "Stage failed");
    eprintln!("Error: {}", error.user_message());
    Ok(false)
}
