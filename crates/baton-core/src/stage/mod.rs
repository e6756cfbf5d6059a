//! Build stage state machine: `INIT → BUILD → [BUILD_DIST] → PACKAGE`.
//!
//! The current stage lives in a small plain-text marker file under the
//! working directory, so it rides along inside every checkpoint and is the
//! first thing a resumed invocation reads.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{BatonError, Result};

/// Marker file name, relative to the working directory.
pub const STAGE_MARKER_FILE: &str = ".baton-stage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Build,
    /// Second build pass, taken only in full-build mode.
    BuildDist,
    /// Terminal: the build output is ready to finalize.
    Package,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "INIT",
            Stage::Build => "BUILD",
            Stage::BuildDist => "BUILD_DIST",
            Stage::Package => "PACKAGE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "INIT" => Ok(Stage::Init),
            "BUILD" => Ok(Stage::Build),
            "BUILD_DIST" => Ok(Stage::BuildDist),
            "PACKAGE" => Ok(Stage::Package),
            other => Err(BatonError::Other(format!("unknown stage marker '{other}'"))),
        }
    }

    /// The stage that follows a successful run of this one. `BUILD_DIST` is
    /// only visited in full-build mode.
    pub fn next(self, full_build: bool) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::Build),
            Stage::Build if full_build => Some(Stage::BuildDist),
            Stage::Build => Some(Stage::Package),
            Stage::BuildDist => Some(Stage::Package),
            Stage::Package => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Package
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running one stage's external work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    /// Self-interrupted at the soft deadline; do not advance, checkpoint.
    TimedOut,
    /// Stage work failed; do not advance, checkpoint, surface diagnostics.
    Failed,
}

/// External stage executor. Consulted once per stage per invocation; the
/// deadline tells long-running work when to self-interrupt so enough
/// wall-clock remains to write a checkpoint afterwards.
pub trait StageExecutor {
    fn run_stage(&mut self, stage: Stage, deadline: DateTime<Utc>) -> Result<StageOutcome>;
}

/// Durable stage marker plus transition rules.
pub struct StageMachine {
    marker_path: PathBuf,
    full_build: bool,
}

impl StageMachine {
    pub fn new(working_dir: &Path, full_build: bool) -> Self {
        Self {
            marker_path: working_dir.join(STAGE_MARKER_FILE),
            full_build,
        }
    }

    /// Current stage; a missing marker means a fresh environment at `INIT`.
    pub fn current(&self) -> Result<Stage> {
        match std::fs::read_to_string(&self.marker_path) {
            Ok(content) => Stage::parse(content.trim()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Stage::Init),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the marker, atomically, with the given stage.
    pub fn record(&self, stage: Stage) -> Result<()> {
        let dir = self
            .marker_path
            .parent()
            .ok_or_else(|| BatonError::Other("stage marker has no parent directory".into()))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        writeln!(tmp, "{stage}")?;
        tmp.persist(&self.marker_path)
            .map_err(|e| BatonError::Io(e.error))?;
        Ok(())
    }

    /// Record the transition out of `from` and return the new stage.
    /// `None` if `from` is already terminal.
    pub fn advance(&self, from: Stage) -> Result<Option<Stage>> {
        match from.next(self.full_build) {
            Some(next) => {
                self.record(next)?;
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }
}

/// Soft deadline for stage work: leave `safety_margin` of the platform's
/// hard limit unspent so the follow-up checkpoint always fits. Margins are
/// empirical per platform, hence configuration rather than constants.
pub fn soft_deadline(
    job_start: DateTime<Utc>,
    max_build_time: Duration,
    safety_margin: Duration,
) -> DateTime<Utc> {
    let budget = max_build_time.saturating_sub(safety_margin);
    job_start + chrono::Duration::from_std(budget).unwrap_or_else(|_| chrono::Duration::zero())
}
