//! Implementation of the `clinical-orchestrator analyze` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{InputArgs, Runtime};
use crate::cli::output::{format_aggregate, output, CommandOutput};
use crate::domain::models::{AggregateAnalysis, SessionSnapshot, SessionState, SubjectId};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Give up if the analysis has not settled after this many seconds
    #[arg(long, default_value = "120")]
    pub wait_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeOutput {
    pub success: bool,
    pub subject: SubjectId,
    pub generation: u64,
    pub state: SessionState,
    pub aggregate: AggregateAnalysis,
    pub last_error: Option<String>,
}

impl AnalyzeOutput {
    fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            success: !snapshot.aggregate.all_failed(),
            subject: snapshot.subject,
            generation: snapshot.generation,
            state: snapshot.state,
            aggregate: snapshot.aggregate,
            last_error: snapshot.last_error,
        }
    }
}

impl CommandOutput for AnalyzeOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Analysis for subject {}", self.subject)];
        lines.push(format_aggregate(&self.aggregate));
        if let Some(error) = &self.last_error {
            lines.push(format!("\nError: {error}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Wait for the snapshot that settles `generation`.
async fn wait_for_settled(
    rx: &mut mpsc::UnboundedReceiver<SessionSnapshot>,
    generation: u64,
) -> Option<SessionSnapshot> {
    while let Some(snapshot) = rx.recv().await {
        if snapshot.generation == generation && snapshot.in_flight_generation.is_none() {
            return Some(snapshot);
        }
    }
    None
}

pub async fn execute(args: AnalyzeArgs, root: &Path, json_mode: bool) -> Result<()> {
    let runtime = Runtime::start(root)?;
    let subject = args.input.subject_id();
    let input = args.input.clinical_input().await?;

    let session = runtime.registry.get(&subject);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = session.subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });

    let generation = session.trigger_now(input);
    let settled = tokio::time::timeout(
        Duration::from_secs(args.wait_secs),
        wait_for_settled(&mut rx, generation),
    )
    .await
    .with_context(|| format!("Analysis did not settle within {}s", args.wait_secs))?
    .context("Session closed before the analysis settled")?;

    subscription.unsubscribe();
    runtime.registry.release(&subject);

    output(&AnalyzeOutput::from_snapshot(settled), json_mode);
    Ok(())
}
