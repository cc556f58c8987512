//! Implementation of the `clinical-orchestrator stream` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::info;

use super::{InputArgs, Runtime};
use crate::cli::output::{format_aggregate, format_snapshot_line};
use crate::domain::models::{SessionSnapshot, SessionState};

#[derive(Args, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

fn is_finished(snapshot: &SessionSnapshot) -> bool {
    snapshot.active_stream.is_none()
        && matches!(snapshot.state, SessionState::Idle | SessionState::Errored)
}

fn print_snapshot(snapshot: &SessionSnapshot, json_mode: bool) {
    if json_mode {
        // One object per line so the output can be piped
        println!("{}", serde_json::to_string(snapshot).unwrap_or_default());
    } else {
        println!("{}", format_snapshot_line(snapshot));
    }
}

pub async fn execute(args: StreamArgs, root: &Path, json_mode: bool) -> Result<()> {
    let runtime = Runtime::start(root)?;
    let subject = args.input.subject_id();
    let input = args.input.clinical_input().await?;

    let session = runtime.registry.get(&subject);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = session.subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });

    let stream_id = session
        .start_stream(input)
        .await
        .context("Failed to open analysis stream")?;
    info!(subject = %subject, stream_id = %stream_id, "streaming analysis");

    let mut last = None;
    let mut interrupted = false;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal.context("Failed to listen for interrupt")?;
                interrupted = true;
                session.stop_stream();
            }
            received = rx.recv() => {
                let Some(snapshot) = received else { break };
                print_snapshot(&snapshot, json_mode);
                let finished = is_finished(&snapshot);
                last = Some(snapshot);
                if finished {
                    break;
                }
            }
        }
    }

    subscription.unsubscribe();
    runtime.registry.release(&subject);

    match last {
        Some(snapshot) if snapshot.state == SessionState::Errored => {
            anyhow::bail!(
                "Stream ended with an error: {}",
                snapshot.last_error.unwrap_or_default()
            )
        }
        Some(snapshot) if !json_mode => {
            println!("\n{}", format_aggregate(&snapshot.aggregate));
            Ok(())
        }
        _ => Ok(()),
    }
}
