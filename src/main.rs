use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use umbrasol::brain::BrainClient;
use umbrasol::config::Config;
use umbrasol::hands;
use umbrasol::internet::Internet;
use umbrasol::observability::telemetry;
use umbrasol::orchestrator::{lock::ProcessLock, Orchestrator};
use umbrasol::store::Store;

#[derive(Parser, Debug)]
#[command(name = "umbrasol", about = "A local, always-on autonomous agent")]
struct Cli {
    /// Run the hands-free voice loop instead of a single command
    #[arg(long)]
    voice: bool,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<String>,

    /// A single natural-language request to execute
    request: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let _telemetry_guard = telemetry::init_tracing(&config.paths.log_dir)?;
    let _lock = ProcessLock::acquire(&config.paths.log_dir)?;

    let store = Arc::new(Store::open(&config.paths.db_path)?);
    let hands_backend = hands::current_platform();
    let brain = Arc::new(BrainClient::new(
        config.endpoint.clone(),
        config.model.clone(),
        config.brain.clone(),
    ));
    let internet = Arc::new(Internet::new());

    let mut voice_config = config.clone();
    voice_config.voice_mode = cli.voice;

    let orchestrator = Arc::new(Orchestrator::new(
        store,
        hands_backend,
        brain,
        internet,
        voice_config,
    ));

    if let Err(e) = orchestrator.recover_pending_tasks().await {
        error!("failed to recover pending tasks: {e}");
    }

    let shutdown_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        info!("received termination signal, shutting down");
        let _ = shutdown_orchestrator.liveness().await;
        std::process::exit(0);
    });

    match (cli.voice, cli.request) {
        (true, _) => run_voice_loop(&orchestrator).await,
        (false, Some(request)) => {
            let response = orchestrator.handle_request(&request, None).await;
            println!("{response}");
        }
        (false, None) => {
            println!("usage: umbrasol --voice | umbrasol \"<command>\"");
        }
    }

    Ok(())
}

/// Waits for either an interrupt (SIGINT / Ctrl+C) or, on unix, a graceful
/// termination request (SIGTERM), the signal `systemctl stop` and friends
/// send.
#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_voice_loop(orchestrator: &Arc<Orchestrator>) {
    use tokio::io::AsyncBufReadExt;
    info!("voice loop active (speech-to-text is an external collaborator; reading stdin lines here)");
    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = orchestrator.handle_request(&line, None).await;
        println!("{response}");
    }
}
