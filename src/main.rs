use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use microsentry::bus::EventBus;
use microsentry::config::{load_config, EngineConfig};
use microsentry::engine::pipeline::Pipeline;
use microsentry::engine::runner::LiveRunner;
use microsentry::feeds::binance::BinanceConnector;
use microsentry::feeds::bybit::BybitConnector;
use microsentry::feeds::Connector;
use microsentry::ids::session_stamp;
use microsentry::journal::{JournalTap, JournalWriter};
use microsentry::replay::ReplayEngine;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Replay a journal through the full pipeline without execution.
    Shadow,
    /// Alias of shadow for recorded sessions.
    Replay,
    /// Connect to the live venues; intents stay shadow-only.
    ShadowLive,
    /// Replay with the paper execution adapter acking and filling.
    PaperExec,
}

#[derive(Parser, Debug)]
#[command(name = "microsentry", version, about = "Cross-venue microstructure intrusion detection engine")]
struct Cli {
    #[arg(long, value_enum, default_value = "shadow")]
    mode: Mode,
    /// Engine configuration file (YAML).
    #[arg(long)]
    config: PathBuf,
    /// Journal to replay (required for shadow/replay/paper-exec).
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if matches!(cli.mode, Mode::Shadow | Mode::Replay | Mode::PaperExec) && cli.replay.is_none() {
        Cli::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "--replay is required for shadow/replay/paper-exec mode",
            )
            .exit();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "engine failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli.config)?;

    match cli.mode {
        Mode::Shadow | Mode::Replay | Mode::PaperExec => {
            let Some(replay_path) = cli.replay.as_deref() else {
                return Err("--replay is required for shadow/replay/paper-exec mode".into());
            };
            let paper = cli.mode == Mode::PaperExec;
            let intents = run_replay(config, replay_path, paper)?;
            info!(intents, paper, "replay complete");
            Ok(())
        }
        Mode::ShadowLive => run_live(config).await,
    }
}

fn run_replay(
    config: EngineConfig,
    replay_path: &Path,
    paper: bool,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut bus = EventBus::new();
    let pipeline = if paper {
        Pipeline::paper_exec(config)
    } else {
        Pipeline::shadow(config)
    };
    let pipeline = Pipeline::attach(&mut bus, pipeline);

    let published = ReplayEngine::market_data().run(&mut bus, replay_path)?;
    info!(published, "journal replayed");

    let count = pipeline.borrow().intents.len();
    Ok(count)
}

async fn run_live(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !live_mode_allowed(&std::env::vars().collect()) {
        return Err("shadow-live mode is disabled under a test harness".into());
    }

    let leader = config.symbols.leader.clone();
    let live = config.live.clone();

    let journal_dir = PathBuf::from(&live.out_dir).join(session_stamp(chrono::Utc::now()));
    std::fs::create_dir_all(&journal_dir)?;
    let journal_path = journal_dir.join(live.journal_filename_for(&leader));
    info!(path = %journal_path.display(), "journaling live session");

    let mut bus = EventBus::new();
    bus.subscribe(Box::new(JournalTap::new(JournalWriter::create(
        &journal_path,
    )?)));
    let pipeline = Pipeline::attach(&mut bus, Pipeline::shadow(config));

    let connectors: Vec<Box<dyn Connector>> = vec![
        Box::new(BybitConnector::new(
            leader.clone(),
            live.bybit_depth,
            live.bybit_ws.clone(),
        )),
        Box::new(BinanceConnector::new(
            leader,
            live.binance_depth,
            live.binance_depth_interval_ms,
            live.binance_ws.clone(),
            live.binance_rest.clone(),
        )),
    ];

    LiveRunner::new(connectors).run(&mut bus, &pipeline).await;
    Ok(())
}

/// Live trading must never start from inside a test harness; the check is
/// explicit so the refusal itself is testable.
fn live_mode_allowed(env: &HashMap<String, String>) -> bool {
    !env.contains_key("RUST_TEST_THREADS") && !env.contains_key("NEXTEST")
}
