pub mod recover;
pub mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config_loader::ControllerSettings;
use node_step::OutputSink;

/// Environment settings with command-line overrides applied.
pub fn settings(
    state_dir: Option<PathBuf>,
    teardown_timeout: Option<Duration>,
) -> Result<ControllerSettings> {
    let mut settings = ControllerSettings::from_env()?;
    if let Some(dir) = state_dir {
        settings.state_dir = dir;
    }
    if let Some(timeout) = teardown_timeout {
        settings.teardown_timeout = timeout;
    }
    Ok(settings)
}

/// Progress goes to stderr so stdout carries only the command's output.
pub struct StderrSink;

impl OutputSink for StderrSink {
    fn line(&self, line: &str) {
        eprintln!("[dockernode] {line}");
    }
}
