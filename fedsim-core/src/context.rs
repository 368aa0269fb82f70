//! Run context
//!
//! Owns everything that lives for exactly one run: output locations, the
//! start instant and the progress log. Opened when a run starts and closed
//! once it reaches its terminal phase.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::RunConfig;
use crate::error::Result;
use crate::record::RunKey;

const OBJECTS_DIR: &str = "objects";

#[derive(Debug)]
pub struct RunContext {
    key: RunKey,
    output_dir: PathBuf,
    objects_dir: PathBuf,
    started: Instant,
    log: Vec<String>,
}

impl RunContext {
    /// Create `<output_dir>/objects` and start the clock
    pub fn open(config: &RunConfig) -> Result<Self> {
        let output_dir = config.output_dir.clone();
        let objects_dir = output_dir.join(OBJECTS_DIR);
        std::fs::create_dir_all(&objects_dir)?;

        let key = RunKey::from_config(config);
        info!(run = %key, dir = %output_dir.display(), "run context opened");
        Ok(Self {
            key,
            output_dir,
            objects_dir,
            started: Instant::now(),
            log: Vec::new(),
        })
    }

    pub fn key(&self) -> &RunKey {
        &self.key
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Where run records are written
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Append a line to the run's progress log
    pub fn log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.log
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// End the run, returning total run time and the collected log
    pub fn close(mut self) -> ClosedRun {
        let elapsed = self.elapsed();
        self.log(format!("Total Run Time: {:.4}s", elapsed.as_secs_f64()));
        info!(run = %self.key, secs = elapsed.as_secs_f64(), "run context closed");
        ClosedRun {
            elapsed,
            log: self.log,
        }
    }
}

/// What remains of a context after [`RunContext::close`]
#[derive(Debug, Clone)]
pub struct ClosedRun {
    pub elapsed: Duration,
    pub log: Vec<String>,
}
