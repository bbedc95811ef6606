//! Interactive session: events to stdout, commands from stdin.

use anyhow::{Context, Result};
use courier_realtime::{
    ArbiterConfig, ArbiterEvent, ConnectionConfig, ConnectionEvent, ConnectionManager,
    NotificationArbiter, NotificationBridge,
};
use courier_settings::CourierSettings;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::commands::Command;
use crate::output::{self, emit};

/// Run until stdin closes, `:quit`, or Ctrl-C.
pub async fn run(settings: &CourierSettings, token: String) -> Result<()> {
    let manager =
        ConnectionManager::with_tungstenite(ConnectionConfig::from(&settings.connection));
    manager.set_token(token);
    let arbiter = NotificationArbiter::new(ArbiterConfig::from(&settings.notifications));
    let bridge = NotificationBridge::attach(&manager, arbiter.clone());

    let _ = manager.subscribe_fn(|event: &ConnectionEvent| emit(&output::connection_event(event)));
    let _ = arbiter.subscribe_fn(|event: &ArbiterEvent| emit(&output::arbiter_event(event)));

    if let Err(err) = manager.connect().await {
        warn!(error = %err, "initial connect failed");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        match until_interrupted(execute(command, &manager, &arbiter), tokio::signal::ctrl_c()).await {
                            Some(Ok(())) => {}
                            Some(Err(err)) => {
                                emit(&json!({"event": "command_failed", "error": format!("{err:#}")}));
                            }
                            None => {
                                info!("interrupted during command");
                                break;
                            }
                        }
                    }
                    Err(crate::commands::CommandError::Empty) => {}
                    Err(err) => emit(&json!({"event": "command_rejected", "error": err.to_string()})),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    let _ = bridge.detach();
    arbiter.reset();
    manager.dispose();
    Ok(())
}

/// Resolve `work`, or `None` when `interrupt` completes first.
async fn until_interrupted<F: Future, I: Future>(work: F, interrupt: I) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = interrupt => None,
        output = work => Some(output),
    }
}

async fn execute(
    command: Command,
    manager: &ConnectionManager,
    arbiter: &NotificationArbiter,
) -> Result<()> {
    match command {
        Command::Send(frame) => {
            let sent = manager.send_message(&frame)?;
            emit(&json!({"event": "send", "queued": !sent, "queueLength": manager.queue_len()}));
        }
        Command::Push(envelope) => {
            emit(&output::decision(&arbiter.handle_push_notification(envelope)));
        }
        Command::Local(envelope) => {
            emit(&output::decision(&arbiter.handle_local_notification(envelope)));
        }
        Command::Hide(id) => {
            let found = arbiter.hide_notification(&id);
            emit(&json!({"event": "hide", "id": id, "found": found}));
        }
        Command::Token(token) => {
            manager
                .update_token(token)
                .await
                .context("reconnect with new token failed")?;
        }
        Command::Connect => manager.connect().await.context("connect failed")?,
        Command::Disconnect => manager.disconnect(),
        Command::Status => emit(&serde_json::to_value(manager.status())?),
        Command::Stats => emit(&serde_json::to_value(arbiter.stats())?),
        Command::Clear => {
            let dropped = manager.clear_queue();
            emit(&json!({"event": "queue_cleared", "dropped": dropped}));
        }
        Command::Quit => {}
    }
    Ok(())
}
