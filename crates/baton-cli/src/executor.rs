use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use baton_core::config::StagesConfig;
use baton_core::error::{BatonError, Result};
use baton_core::stage::{Stage, StageExecutor, StageOutcome};

use crate::signal;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs each stage's configured shell command in the working directory,
/// self-interrupting at the soft deadline or on SIGINT/SIGTERM so the
/// invocation still has time to checkpoint.
pub struct ShellStageExecutor {
    working_dir: PathBuf,
    stages: StagesConfig,
}

impl ShellStageExecutor {
    pub fn new(working_dir: PathBuf, stages: StagesConfig) -> Self {
        Self {
            working_dir,
            stages,
        }
    }

    fn script_for(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Init => self.stages.init.as_deref(),
            Stage::Build => self.stages.build.as_deref(),
            Stage::BuildDist => self.stages.build_dist.as_deref(),
            Stage::Package => None,
        }
    }
}

fn command_for_script(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

impl StageExecutor for ShellStageExecutor {
    fn run_stage(&mut self, stage: Stage, deadline: DateTime<Utc>) -> Result<StageOutcome> {
        let Some(script) = self.script_for(stage) else {
            info!(%stage, "no command configured, treating stage as a no-op");
            return Ok(StageOutcome::Success);
        };

        let remaining = (deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            warn!(%stage, "soft deadline already passed, not starting stage work");
            return Ok(StageOutcome::TimedOut);
        }

        info!(%stage, budget_secs = remaining.as_secs(), "running stage command");
        // Stage output goes straight to the worker's log stream.
        let mut child = command_for_script(script)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| BatonError::Stage(format!("failed to spawn stage {stage}: {e}")))?;

        let hard_stop = Instant::now() + remaining;
        loop {
            match child
                .try_wait()
                .map_err(|e| BatonError::Stage(format!("wait for stage {stage} failed: {e}")))?
            {
                Some(status) if status.success() => return Ok(StageOutcome::Success),
                Some(status) => {
                    error!(%stage, code = status.code().unwrap_or(-1), "stage command failed");
                    return Ok(StageOutcome::Failed);
                }
                None => {
                    if signal::shutdown_requested() || Instant::now() >= hard_stop {
                        let reason = if signal::shutdown_requested() {
                            "shutdown signal"
                        } else {
                            "soft deadline"
                        };
                        warn!(%stage, reason, "interrupting stage command");
                        let _ = child.kill();
                        let _ = child.wait();
                        return Ok(StageOutcome::TimedOut);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}
