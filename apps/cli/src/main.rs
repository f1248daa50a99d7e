//! hearsay — record, replay, and analyze speech-to-intent sessions.
//!
//! Exit codes: 0 success, 1 bad arguments or missing file, 2 operational
//! error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use hearsay_events::{
    ChannelEventBus, EventBusRef, ManualClock, SessionClock, SessionEvent, SessionPayload,
    UtteranceKind,
};
use hearsay_intent::{ClassifierConfig, IntentClassifier, OpenAiClassifier, StrategyMode};
use hearsay_pipeline::{run_session, Pipeline, PipelineConfig, ReplaySource, RunnerOptions};
use hearsay_session::{evaluate, load_ground_truth, SessionPlayer, SessionReport};

#[derive(Parser, Debug)]
#[command(name = "hearsay", version, about = "streaming speech-to-intent pipeline")]
struct Cli {
    /// Recording to create during live capture (also accepted positionally).
    #[arg(long, value_name = "FILE.jsonl")]
    recording: Option<PathBuf>,

    /// Positional recording path.
    #[arg(value_name = "FILE.jsonl")]
    recording_pos: Option<PathBuf>,

    /// Replay a recorded session through the pipeline.
    #[arg(long, value_name = "FILE.jsonl", conflicts_with = "analyze")]
    playback: Option<PathBuf>,

    /// Non-interactive playback: no pacing, print a summary report.
    #[arg(long, requires = "playback")]
    headless: bool,

    /// Generate a report from a recording without playback.
    #[arg(long, value_name = "FILE.jsonl")]
    analyze: Option<PathBuf>,

    /// Human-labeled reference for evaluation.
    #[arg(long, value_name = "FILE.json")]
    ground_truth: Option<PathBuf>,

    /// Capture from the microphone.
    #[arg(long, conflicts_with = "loopback")]
    mic: bool,

    /// Capture system loopback audio.
    #[arg(long)]
    loopback: bool,

    /// Intent detection strategy.
    #[arg(long, value_name = "heuristic|llm|parallel", default_value = "heuristic")]
    mode: String,

    /// Also write a WAV sidecar of the captured audio.
    #[arg(long)]
    save_audio: bool,
}

enum CliError {
    /// Bad arguments or a missing input file: exit 1.
    Usage(String),
    /// Everything else that goes wrong at runtime: exit 2.
    Operational(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        Self::Operational(err)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(1),
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hearsay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("hearsay: failed to start runtime: {err}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(message)) => {
            eprintln!("hearsay: {message}");
            ExitCode::from(1)
        }
        Err(CliError::Operational(err)) => {
            eprintln!("hearsay: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if let Some(path) = &cli.analyze {
        return analyze(path, cli.ground_truth.as_deref());
    }
    if let Some(path) = cli.playback.clone() {
        return playback(&cli, &path).await;
    }

    let recording = cli.recording.clone().or_else(|| cli.recording_pos.clone());
    if cli.mic || cli.loopback {
        let recording = recording.ok_or_else(|| {
            CliError::Usage("live capture needs a recording path (--recording)".to_string())
        })?;
        tracing::debug!(
            recording = %recording.display(),
            save_audio = cli.save_audio,
            source = if cli.mic { "mic" } else { "loopback" },
            "live capture requested"
        );
        // Device capture and provider streaming live outside this binary;
        // the pipeline consumes ASR events through an injected source.
        return Err(CliError::Operational(anyhow::anyhow!(
            "no ASR provider configured for live capture; \
             use --playback or --analyze on an existing recording"
        )));
    }

    Err(CliError::Usage(
        "nothing to do; pass --playback, --analyze, or an audio source".to_string(),
    ))
}

fn analyze(path: &Path, ground_truth: Option<&Path>) -> Result<(), CliError> {
    let player = load_player(path)?;
    let report = player.report();
    println!("{report}");
    if player.skipped() > 0 {
        println!("  ({} record(s) of unknown kind skipped)", player.skipped());
    }

    if let Some(labels_path) = ground_truth {
        let labels = load_ground_truth(labels_path).map_err(|err| match err {
            hearsay_session::PlayerError::Io(_) => {
                CliError::Usage(format!("cannot read {}", labels_path.display()))
            }
            other => CliError::Operational(other.into()),
        })?;
        println!("{}", evaluate(player.events(), &labels));
    }

    write_report(path, &report)?;
    Ok(())
}

async fn playback(cli: &Cli, path: &Path) -> Result<(), CliError> {
    // Fail on unreadable input before constructing anything.
    load_player(path)?;

    let mode: StrategyMode = cli.mode.parse().map_err(CliError::Usage)?;
    let config = PipelineConfig {
        mode,
        ..PipelineConfig::default()
    };
    let (bus, bus_rx) = ChannelEventBus::new(config.channel_capacity);
    let bus: EventBusRef = Arc::new(bus);

    let classifier = classifier_from_env();
    let source = ReplaySource::from_recording(path, !cli.headless)
        .map_err(|err| CliError::Operational(err.into()))?;

    let (pipeline, drive_clock) = if cli.headless {
        let clock = Arc::new(ManualClock::new());
        let pipeline = Pipeline::new(&config, bus, clock.clone(), classifier)
            .map_err(|err| CliError::Operational(err.into()))?;
        (Arc::new(pipeline), Some(clock))
    } else {
        let pipeline = Pipeline::new(&config, bus, Arc::new(SessionClock::new()), classifier)
            .map_err(|err| CliError::Operational(err.into()))?;
        (Arc::new(pipeline), None)
    };

    let on_event: Option<Box<dyn FnMut(&SessionEvent) + Send>> = if cli.headless {
        None
    } else {
        Some(Box::new(|event: &SessionEvent| {
            if let Some(line) = describe(event) {
                println!("{line}");
            }
        }))
    };

    let events = run_session(
        pipeline,
        Box::new(source),
        bus_rx,
        None,
        CancellationToken::new(),
        config.poll_interval_ms,
        RunnerOptions {
            drive_clock,
            on_event,
        },
    )
    .await
    .map_err(|err| CliError::Operational(err.into()))?;

    let report = SessionReport::from_events(&events);
    println!("{report}");
    if cli.headless {
        write_report(path, &report)?;
    }
    Ok(())
}

fn load_player(path: &Path) -> Result<SessionPlayer, CliError> {
    SessionPlayer::load(path).map_err(|err| match err {
        hearsay_session::PlayerError::Io(_) => {
            CliError::Usage(format!("cannot read {}", path.display()))
        }
        other => CliError::Operational(other.into()),
    })
}

fn write_report(recording: &Path, report: &SessionReport) -> Result<(), CliError> {
    let path = recording.with_extension("report.json");
    let json = serde_json::to_string_pretty(report)
        .map_err(|err| CliError::Operational(err.into()))?;
    std::fs::write(&path, json).map_err(|err| CliError::Operational(err.into()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}

/// The binary is the only place environment variables are read; the core
/// consumes them via injected configuration.
fn classifier_from_env() -> Option<Arc<dyn IntentClassifier>> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    if api_key.is_empty() {
        return None;
    }
    let config = ClassifierConfig {
        api_key,
        ..ClassifierConfig::default()
    };
    match OpenAiClassifier::new(config) {
        Ok(classifier) => Some(Arc::new(classifier)),
        Err(err) => {
            tracing::warn!(%err, "classifier setup failed, continuing without");
            None
        }
    }
}

fn describe(event: &SessionEvent) -> Option<String> {
    let at = event.offset_ms as f64 / 1_000.0;
    match &event.payload {
        SessionPayload::Asr(asr) => {
            let marker = if asr.is_final { "final  " } else { "partial" };
            Some(format!("[{at:7.2}s] asr     {marker} {:?}", asr.text))
        }
        SessionPayload::Utterance(utt) => {
            let phase = match utt.kind {
                UtteranceKind::Open => "open  ",
                UtteranceKind::Update => "update",
                UtteranceKind::Final => "final ",
            };
            Some(format!("[{at:7.2}s] utter   {phase}  {:?}", utt.stable_text))
        }
        SessionPayload::Intent(intent_event) => {
            let marker = if intent_event.is_candidate {
                "candidate"
            } else {
                "final    "
            };
            Some(format!(
                "[{at:7.2}s] intent  {marker} {:?}/{:?} {:.2} {:?}",
                intent_event.intent.intent_type,
                intent_event.intent.subtype,
                intent_event.intent.confidence,
                intent_event.intent.source_text,
            ))
        }
        SessionPayload::IntentCorrection(correction) => Some(format!(
            "[{at:7.2}s] correct {:?} -> {:?}/{:?}",
            correction.correction,
            correction.corrected_intent.intent_type,
            correction.corrected_intent.subtype,
        )),
        SessionPayload::Action(action) => Some(format!(
            "[{at:7.2}s] action  {:?} debounced={}",
            action.action, action.was_debounced,
        )),
    }
}
