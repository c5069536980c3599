//! Run command - execute one command inside a one-shot node

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use config_loader::load_step;
use node_step::{
    BindContext, ConnectorRef, DockerNodeStep, FlowNodeId, LaunchCommand, NodeContext,
    TeardownError,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{settings, StderrSink};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container image to provision
    #[arg(long, required_unless_present = "config")]
    pub image: Option<String>,

    /// Container runtime endpoint
    #[arg(long)]
    pub docker_host: Option<String>,

    /// Id of the TLS credentials used to reach the runtime
    #[arg(long)]
    pub credentials_id: Option<String>,

    /// Working directory inside the container
    #[arg(long)]
    pub remote_fs: Option<String>,

    /// Connector kind (default: attach)
    #[arg(long)]
    pub connector: Option<String>,

    /// Step definition file; flags override its fields
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Checkpoint directory
    #[arg(long, env = "DOCKERNODE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Upper bound on releasing the node, e.g. 30s or 2m
    #[arg(long, value_parser = humantime::parse_duration)]
    pub teardown_timeout: Option<Duration>,

    /// Command to run on the node
    #[arg(last = true, required = true, value_name = "CMD")]
    pub command: Vec<String>,
}

fn build_step(args: &RunArgs) -> Result<DockerNodeStep> {
    let mut step = match &args.config {
        Some(path) => load_step(path)
            .with_context(|| format!("loading step definition {}", path.display()))?,
        None => DockerNodeStep::new(args.image.clone().unwrap_or_default())?,
    };

    if args.config.is_some() {
        if let Some(image) = &args.image {
            let mut replaced = DockerNodeStep::new(image.as_str())?;
            replaced.set_docker_host(step.docker_host());
            replaced.set_credentials_id(step.credentials_id());
            replaced.set_remote_fs(step.remote_fs());
            replaced.set_connector(step.raw_connector().cloned());
            step = replaced;
        }
    }
    if let Some(host) = &args.docker_host {
        step.set_docker_host(Some(host));
    }
    if let Some(id) = &args.credentials_id {
        step.set_credentials_id(Some(id));
    }
    if let Some(dir) = &args.remote_fs {
        step.set_remote_fs(Some(dir));
    }
    if let Some(kind) = &args.connector {
        step.set_connector(Some(ConnectorRef::of_kind(kind.as_str())));
    }
    Ok(step)
}

/// Returns the exit code of the command run on the node.
pub async fn run(args: RunArgs) -> Result<i32> {
    let settings = settings(args.state_dir.clone(), args.teardown_timeout)?;
    let step = build_step(&args)?;
    let registry = settings.registry();

    let execution = step
        .start(
            BindContext::new(Arc::new(StderrSink), FlowNodeId("dockernodectl".into())),
            &registry,
        )?
        .with_checkpoints(Arc::new(settings.checkpoint_store()))
        .with_teardown_timeout(settings.teardown_timeout);
    info!(run_id = %execution.run_id(), state_dir = %settings.state_dir.display(), "starting run");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let command = LaunchCommand::new(args.command);
    let outcome = execution
        .run(
            move |node: NodeContext| async move {
                node.log(&format!("$ {}", command.args.join(" ")));
                node.launcher.launch(&command).await
            },
            cancel,
        )
        .await;

    let run_id = outcome.run_id.clone();
    if let Some(warning) = teardown_notice(&run_id, outcome.teardown_warning.as_ref()) {
        eprintln!("{warning}");
    }
    let output = outcome
        .into_result()
        .with_context(|| format!("run {run_id} failed"))?;
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(output.exit_code.unwrap_or(1))
}

/// Line telling the operator a node may have been left behind.
fn teardown_notice(run_id: &str, warning: Option<&TeardownError>) -> Option<String> {
    warning.map(|err| {
        format!("warning: node of run {run_id} was not released: {err}; retry with `dockernodectl recover {run_id}`")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn flags_build_the_step() {
        let harness = Harness::parse_from([
            "run",
            "--image",
            "ubuntu:20.04",
            "--remote-fs",
            "/srv",
            "--connector",
            "attach",
            "--",
            "uname",
            "-a",
        ]);
        assert_eq!(harness.args.command, vec!["uname", "-a"]);

        let step = build_step(&harness.args).unwrap();
        assert_eq!(step.image(), "ubuntu:20.04");
        assert_eq!(step.remote_fs(), Some("/srv"));
        assert_eq!(step.raw_connector(), None);
    }

    #[test]
    fn teardown_warning_names_the_run_and_cause() {
        let err = TeardownError::Release {
            container: "dockernode-r1".into(),
            message: "daemon went away".into(),
        };
        let notice = teardown_notice("r1", Some(&err)).unwrap();
        assert!(notice.starts_with("warning: node of run r1 was not released"));
        assert!(notice.contains("daemon went away"));
        assert!(notice.contains("dockernodectl recover r1"));
        assert_eq!(teardown_notice("r1", None), None);
    }

    #[test]
    fn blank_image_is_rejected() {
        let harness = Harness::parse_from(["run", "--image", " ", "--", "true"]);
        assert!(build_step(&harness.args).is_err());
    }
}
