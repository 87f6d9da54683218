//! voice-ballot-daemon: audio-guided voting terminal
//!
//! This daemon runs one voting session and provides:
//! - A dialogue state machine loaded from a JSON dialogue file
//! - Keypad input read from stdin on a dedicated thread
//! - Captions echoed to stdout alongside the spoken prompts
//! - IPC server for the button GUI (status, presses, voice controls)
//!
//! Exits non-zero when the session halts on a fatal fault.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use voice_ballot::config::Config;
use voice_ballot::dialogue::{ActionRegistry, Dialogue};
use voice_ballot::ipc::Server;
use voice_ballot::keypad::KeypadListener;
use voice_ballot::lifecycle::ShutdownSignal;
use voice_ballot::playback::{ClockPlayback, ConsoleCaptions};
use voice_ballot::{EngineEvent, FiniteStateMachine, InputCode};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-ballot-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.dialogue_path, "configuration loaded");

    let dialogue = Dialogue::load(&config.dialogue_path)
        .with_context(|| format!("failed to load {}", config.dialogue_path.display()))?;

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Keypad listener -> state machine
    let (keypad_tx, keypad_rx) = mpsc::channel(32);
    // State machine -> IPC subscribers and the event log
    let (event_tx, mut event_rx) = broadcast::channel::<EngineEvent>(64);

    let mut fsm = FiniteStateMachine::new(
        Arc::new(ClockPlayback::new(config.nominal_duration)),
        Arc::new(ConsoleCaptions::stdout()),
        config.engine.clone(),
        event_tx,
    );

    let mut actions = ActionRegistry::new();
    actions.register("record-selection", |input: InputCode| {
        info!(input = %input, "selection recorded");
    });
    dialogue
        .build(&mut fsm, &actions)
        .context("failed to build dialogue")?;
    info!(states = fsm.len(), "dialogue loaded");

    let machine = Arc::new(fsm);

    // Start the keypad listener (runs on dedicated thread)
    let keypad = KeypadListener::new(keypad_tx, config.key_map.clone());
    match keypad.start(std::io::stdin()) {
        Ok(()) => {
            info!("keypad listener started");
        }
        Err(e) => {
            error!(?e, "failed to start keypad listener");
            warn!("continuing with IPC input only");
        }
    }

    let server = Server::new(&config.socket_path, Arc::clone(&machine))?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    let outcome = tokio::select! {
        // Run the voting session (processes keypad events)
        result = machine.run(keypad_rx) => {
            info!("state machine exited");
            result
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
            Ok(())
        }

        // Log engine events
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => info!(%event, "engine event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "engine event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("engine event handler exited");
            Ok(())
        }

        // Wait for shutdown signal
        reason = shutdown.wait() => {
            info!(%reason, "shutdown signal received");
            Ok(())
        }
    };

    // Cleanup
    info!("shutting down...");

    machine.stop();
    keypad.stop();
    server.shutdown().await;

    info!(history = machine.history().len(), "voice-ballot-daemon stopped");

    outcome.context("voting session halted")
}
