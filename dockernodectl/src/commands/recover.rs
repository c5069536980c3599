//! Recover command - drive a crashed run to a safe state

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use node_step::execution::BodyStatus;
use node_step::{resume, BodyOutcome, Resumption};
use tracing::info;

use super::{settings, StderrSink};

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Run id printed when the run started
    #[arg(value_name = "RUN_ID")]
    pub run_id: String,

    /// Checkpoint directory
    #[arg(long, env = "DOCKERNODE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Upper bound on releasing the node, e.g. 30s or 2m
    #[arg(long, value_parser = humantime::parse_duration)]
    pub teardown_timeout: Option<Duration>,
}

pub async fn run(args: RecoverArgs) -> Result<()> {
    let settings = settings(args.state_dir, args.teardown_timeout)?;
    let store = Arc::new(settings.checkpoint_store());
    let registry = settings.registry();

    let resumption = resume(&args.run_id, store, &registry, settings.teardown_timeout)
        .await
        .with_context(|| format!("recovering run {}", args.run_id))?;

    match resumption {
        Resumption::Settled { run_id, phase } => {
            println!("Run {run_id} already finished ({phase:?}); nothing to do");
        }
        Resumption::Released { run_id, result } => {
            result.with_context(|| format!("releasing node of run {run_id}"))?;
            println!("Run {run_id}: released node");
        }
        Resumption::AwaitingBody(resumed) => {
            let run_id = resumed.run_id().to_string();
            // The process that ran the workload is gone; use what it recorded, if anything.
            let outcome: BodyOutcome<()> = match resumed.recorded_outcome() {
                Some(BodyStatus::Succeeded) => BodyOutcome::Succeeded(()),
                Some(BodyStatus::Failed { message }) => BodyOutcome::Failed(anyhow!(message.clone())),
                Some(BodyStatus::Cancelled) | None => BodyOutcome::Cancelled,
            };
            info!(run_id = %run_id, container = %resumed.node().container_id, "releasing node of interrupted run");

            let outcome = resumed
                .with_sink(Arc::new(StderrSink))
                .complete(outcome)
                .await;
            if let Some(err) = &outcome.teardown_warning {
                return Err(anyhow!("releasing node of run {run_id}: {err}"));
            }
            println!("Run {run_id}: released node");
        }
    }
    Ok(())
}
