use butterfly_agent::{ChannelHost, EnforcementAgent, UsageReporter};
use butterfly_core::{HostCommand, HostEvent};
use butterfly_scheduler::PolicyRefreshService;
use std::io::BufRead;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::Services;

/// Reads one JSON host event per line until stdin closes. Runs on its own
/// thread so a pending read never holds up runtime shutdown.
fn stdin_to_events(events: mpsc::Sender<HostEvent>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read host events");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostEvent>(line) {
            Ok(event) => {
                if events.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, line = %line, "Ignoring malformed host event"),
        }
    }
    debug!("stdin closed");
}

/// Writes one JSON host command per line until the agent drops its sender.
async fn commands_to_stdout(mut commands: mpsc::Receiver<HostCommand>) {
    let mut stdout = tokio::io::stdout();
    while let Some(command) = commands.recv().await {
        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to encode host command");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to write host command");
            break;
        }
        let _ = stdout.flush().await;
    }
}

pub async fn run(offline: bool) -> anyhow::Result<()> {
    let services = Services::open(offline)?;
    let credentials = services.storage.credentials();

    // ── Shutdown channel ──
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // ── Policy refresh ──
    let refresh_service = Arc::new(
        PolicyRefreshService::new(services.policies.clone(), credentials.clone())
            .with_interval(services.config.enforcement.refresh_interval()),
    );
    let (refresh_handle, refresh_requests) = PolicyRefreshService::channel();

    // ── Agent ──
    let (event_tx, event_rx) = mpsc::channel::<HostEvent>(64);
    let (host, command_rx) = ChannelHost::channel(64);
    let agent = EnforcementAgent::new(
        services.config.enforcement.clone(),
        services.policies.clone(),
        services.quota.clone(),
        UsageReporter::new(services.authority.clone(), credentials.clone()),
        credentials,
        Arc::new(host),
    );
    // Offline, credential changes re-hydrate from the cache instead.
    let agent = Arc::new(if offline {
        agent
    } else {
        agent.with_refresh(refresh_handle)
    });
    agent.init().await;

    let refresh_task = if offline {
        info!("Offline mode, policy refresh disabled");
        drop(refresh_requests);
        None
    } else {
        let shutdown_rx = shutdown_tx.subscribe();
        let service = refresh_service.clone();
        Some(tokio::spawn(async move {
            service.run_loop(refresh_requests, shutdown_rx).await;
        }))
    };

    let mut agent_handle = {
        let agent = agent.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            agent.run_loop(event_rx, shutdown_rx).await;
        })
    };
    drop(agent);

    std::thread::spawn(move || stdin_to_events(event_tx));
    let writer_handle = tokio::spawn(commands_to_stdout(command_rx));

    info!("butterfly agent running, reading host events from stdin");

    // ── Wait for the agent to stop or a shutdown signal ──
    let agent_done = tokio::select! {
        result = &mut agent_handle => {
            if let Err(e) = result {
                warn!(error = %e, "Agent task ended abnormally");
            }
            true
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown signal received, flushing usage...");
            false
        }
    };

    let _ = shutdown_tx.send(());
    if !agent_done {
        if let Err(e) = agent_handle.await {
            warn!(error = %e, "Agent task ended abnormally");
        }
    }
    if let Some(handle) = refresh_task {
        let _ = handle.await;
    }

    let _ = writer_handle.await;

    info!("butterfly agent stopped");
    Ok(())
}
