//! Long-running commands: the engine in the foreground and the snapshot
//! stream.

use std::io::Write;

use log::info;
use vigil::{Orchestrator, SnapshotEvent};

/// Starts the scheduler, process guard and maintenance loop, then blocks
/// until Ctrl-C.
pub fn run(orch: &Orchestrator) -> Result<(), String> {
    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| format!("Failed to set signal handler: {e}"))?;

    let engine = orch
        .start_background()
        .map_err(|e| format!("Failed to start engine: {e}"))?;
    info!("vigild running, press Ctrl-C to stop");

    let _ = stop_rx.recv();
    info!("Shutting down");
    engine.join();
    Ok(())
}

/// Prints every snapshot event as one JSON line until Ctrl-C or until
/// stdout goes away.
pub fn watch(orch: &Orchestrator, batch_id: Option<String>) -> Result<(), String> {
    let mut subscription = orch.subscribe(batch_id).map_err(|e| e.to_string())?;

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })
    .map_err(|e| format!("Failed to set signal handler: {e}"))?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to build runtime: {e}"))?;

    rt.block_on(async move {
        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => {
                        if let Err(e) = print_event(&event) {
                            info!("Output closed: {}", e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = stop_rx.changed() => break,
            }
        }
    });
    Ok(())
}

fn print_event(event: &SnapshotEvent) -> std::io::Result<()> {
    let line = serde_json::to_string(event)?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()
}
