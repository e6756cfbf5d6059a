//! Orchestrator: one bounded stage execution per invocation.
//!
//! Flow: restore the working tree if a checkpoint exists, read the stage
//! marker, run the current stage under the soft deadline, then either
//! finalize (terminal), or checkpoint and hand the baton to the next
//! invocation. Stage timeout and failure are expected, non-fatal outcomes;
//! only a failed checkpoint write escalates to a fatal error.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use baton_storage::BlobStore;

use crate::checkpoint::{self, CheckpointOptions, CheckpointStrategy};
use crate::error::{BatonError, Result};
use crate::stage::{soft_deadline, Stage, StageExecutor, StageMachine, StageOutcome};

pub struct RunnerConfig {
    pub working_dir: PathBuf,
    pub checkpoint_name: String,
    /// Paths (relative to `working_dir`) to checkpoint; empty means the
    /// whole working directory.
    pub checkpoint_paths: Vec<String>,
    pub strategy: CheckpointStrategy,
    pub secret: Option<String>,
    pub full_build: bool,
    pub job_start: DateTime<Utc>,
    pub max_build_time: Duration,
    pub safety_margin: Duration,
    /// Directory (relative to `working_dir`) uploaded as the final package.
    pub package_dir: Option<String>,
    pub checkpoint: CheckpointOptions,
}

/// What one invocation accomplished. `finished == false` with `Ok` means
/// "resume later" and maps to process exit code 0.
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub finished: bool,
    pub stage: Stage,
    pub outcome: StageOutcome,
}

pub struct Runner<'a> {
    store: &'a dyn BlobStore,
    cfg: RunnerConfig,
}

impl<'a> Runner<'a> {
    pub fn new(store: &'a dyn BlobStore, cfg: RunnerConfig) -> Self {
        Self { store, cfg }
    }

    pub fn run(&self, executor: &mut dyn StageExecutor) -> Result<RunReport> {
        std::fs::create_dir_all(&self.cfg.working_dir)?;
        self.resume()?;

        let machine = StageMachine::new(&self.cfg.working_dir, self.cfg.full_build);
        let stage = machine.current()?;
        if stage == Stage::Init {
            // Environment initialization creates the marker.
            machine.record(Stage::Init)?;
        }

        if stage.is_terminal() {
            // A previous invocation advanced to PACKAGE but did not get to
            // finalize; do it now.
            self.finalize()?;
            return Ok(RunReport {
                finished: true,
                stage,
                outcome: StageOutcome::Success,
            });
        }

        let deadline = soft_deadline(
            self.cfg.job_start,
            self.cfg.max_build_time,
            self.cfg.safety_margin,
        );
        info!(stage = %stage, deadline = %deadline, "executing stage");

        let outcome = match executor.run_stage(stage, deadline) {
            Ok(outcome) => outcome,
            Err(e) => {
                // An uncaught executor error is survivable as long as the
                // checkpoint lands; if that fails too, the run is lost.
                error!(stage = %stage, error = %e, "stage executor error");
                self.save_checkpoint().map_err(|ckpt_err| {
                    error!(error = %ckpt_err, "checkpoint after executor error also failed");
                    ckpt_err
                })?;
                return Ok(RunReport {
                    finished: false,
                    stage,
                    outcome: StageOutcome::Failed,
                });
            }
        };

        match outcome {
            StageOutcome::Success => {
                let next = machine
                    .advance(stage)?
                    .expect("non-terminal stage always has a successor");
                info!(from = %stage, to = %next, "stage complete");

                if next.is_terminal() {
                    self.finalize()?;
                    Ok(RunReport {
                        finished: true,
                        stage,
                        outcome,
                    })
                } else {
                    self.save_checkpoint()?;
                    Ok(RunReport {
                        finished: false,
                        stage,
                        outcome,
                    })
                }
            }
            StageOutcome::TimedOut => {
                warn!(stage = %stage, "stage hit the soft deadline, checkpointing for resume");
                self.save_checkpoint()?;
                Ok(RunReport {
                    finished: false,
                    stage,
                    outcome,
                })
            }
            StageOutcome::Failed => {
                error!(stage = %stage, "stage failed; checkpointing so the next run can retry");
                self.save_checkpoint()?;
                Ok(RunReport {
                    finished: false,
                    stage,
                    outcome,
                })
            }
        }
    }

    /// Restore the working tree from the last checkpoint, if one exists.
    fn resume(&self) -> Result<()> {
        match checkpoint::load(
            self.cfg.strategy,
            self.store,
            &self.cfg.working_dir,
            &self.cfg.checkpoint_name,
            self.cfg.secret.as_deref(),
        ) {
            Ok(()) => {
                info!(name = %self.cfg.checkpoint_name, "working tree restored");
                Ok(())
            }
            Err(BatonError::ManifestNotFound(_)) => {
                info!(name = %self.cfg.checkpoint_name, "no checkpoint found, fresh start");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn save_checkpoint(&self) -> Result<()> {
        let rel_paths = self.effective_paths()?;
        let count = checkpoint::save(
            self.cfg.strategy,
            self.store,
            &self.cfg.working_dir,
            &rel_paths,
            &self.cfg.checkpoint_name,
            self.cfg.secret.as_deref(),
            &self.cfg.checkpoint,
        )?;
        info!(volumes = count, "checkpoint saved");
        Ok(())
    }

    /// Terminal success: upload the final package, then discard the
    /// checkpoint blobs. Cleanup is best-effort and never overrides the
    /// package upload's outcome.
    fn finalize(&self) -> Result<()> {
        if let Some(package_dir) = &self.cfg.package_dir {
            let abs = self.cfg.working_dir.join(package_dir);
            if abs.is_dir() {
                let name = format!("{}-package", self.cfg.checkpoint_name);
                checkpoint::whole::write_whole(
                    self.store,
                    &self.cfg.working_dir,
                    std::slice::from_ref(package_dir),
                    &name,
                    self.cfg.secret.as_deref(),
                    &self.cfg.checkpoint,
                )?;
                info!(artifact = %name, "final package uploaded");
            } else {
                warn!(dir = %abs.display(), "package directory missing, nothing to upload");
            }
        }

        checkpoint::discard(
            self.store,
            &self.cfg.checkpoint_name,
            self.cfg.checkpoint.max_volumes,
        );
        info!("build finished, checkpoints discarded");
        Ok(())
    }

    /// Checkpoint paths from config, or every top-level entry of the
    /// working directory (the stage marker rides along either way).
    fn effective_paths(&self) -> Result<Vec<String>> {
        if !self.cfg.checkpoint_paths.is_empty() {
            let mut paths = self.cfg.checkpoint_paths.clone();
            // The stage marker must ride along or the resumed run restarts
            // from INIT.
            let marker = crate::stage::STAGE_MARKER_FILE.to_string();
            if !paths.contains(&marker) {
                paths.push(marker);
            }
            return Ok(paths);
        }
        let mut paths: Vec<String> = std::fs::read_dir(&self.cfg.working_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        paths.sort();
        Ok(paths)
    }
}
