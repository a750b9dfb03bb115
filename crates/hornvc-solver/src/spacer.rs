//! Spacer subprocess backend
//!
//! Writes the HORN script to a temporary file, runs a `z4` or `z3` binary
//! on it with a hard timeout, and classifies the output. The call is
//! synchronous: solving is the one long-latency step of the pipeline and
//! is fully materialized before reconstruction starts.
//!
//! Derivation recovery from raw Spacer refutations is out of reach of a
//! textual backend, so `unsat` maps to `Invalid` without a derivation;
//! callers degrade to a counterexample-less report.

use crate::outcome::{parse_spacer_statistics, FixpointOutcome, HornQuery, SolverError};
use crate::FixpointSolver;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Locate an executable on `PATH`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Configuration for the Spacer backend.
#[derive(Debug, Clone)]
pub struct SpacerConfig {
    /// Hard wall-clock limit for one solver run.
    pub timeout: Duration,
    /// Explicit binary path; otherwise `z4` then `z3` from `PATH`.
    pub binary: Option<PathBuf>,
    /// Ask the solver for statistics output.
    pub statistics: bool,
}

impl Default for SpacerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            binary: None,
            statistics: true,
        }
    }
}

/// The Spacer-based fixpoint backend.
#[derive(Debug, Clone, Default)]
pub struct SpacerSolver {
    config: SpacerConfig,
}

impl SpacerSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SpacerConfig) -> Self {
        Self { config }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.binary = Some(path.into());
        self
    }

    /// Resolve the solver binary, preferring `z4` over `z3`.
    pub fn binary(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.binary {
            return Some(path.clone());
        }
        find_executable("z4").or_else(|| find_executable("z3"))
    }

    /// True when some usable binary is on this machine. Tests gate on this.
    pub fn available() -> bool {
        SpacerSolver::new().binary().is_some()
    }

    fn run(&self, script_path: &Path) -> Result<(String, Duration), SolverError> {
        let binary = self
            .binary()
            .ok_or_else(|| SolverError::NotFound("no z4 or z3 binary on PATH".to_string()))?;

        let mut cmd = Command::new(&binary);
        cmd.arg(script_path);
        if self.config.statistics {
            cmd.arg("-st");
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!(?binary, script = %script_path.display(), "running fixpoint solver");

        let mut child = cmd
            .spawn()
            .map_err(|e| SolverError::ExecutionFailed(e.to_string()))?;

        let start = Instant::now();
        let status = child
            .wait_timeout(self.config.timeout)
            .map_err(|e| SolverError::ExecutionFailed(e.to_string()))?;
        let elapsed = start.elapsed();

        if status.is_none() {
            warn!(timeout = ?self.config.timeout, "fixpoint solver timed out");
            let _ = child.kill();
            let _ = child.wait();
            return Err(SolverError::Timeout(self.config.timeout));
        }

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        let mut stderr = String::new();
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }
        Ok((format!("{stdout}\n{stderr}"), elapsed))
    }

    fn classify(&self, output: &str, elapsed: Duration) -> FixpointOutcome {
        let mut stats = parse_spacer_statistics(output);
        stats.solve_time = elapsed;
        let verdict = output
            .lines()
            .map(str::trim)
            .find(|l| matches!(*l, "sat" | "unsat" | "unknown"));
        match verdict {
            Some("sat") => FixpointOutcome::Valid {
                model: extract_model(output),
                stats,
            },
            Some("unsat") => FixpointOutcome::Invalid {
                derivation: None,
                stats,
            },
            Some("unknown") => FixpointOutcome::Unknown {
                reason: extract_reason(output)
                    .unwrap_or_else(|| "solver returned unknown".to_string()),
                stats,
            },
            _ => FixpointOutcome::Unknown {
                reason: format!(
                    "unexpected solver output: {}",
                    output.lines().next().unwrap_or("empty")
                ),
                stats,
            },
        }
    }
}

impl FixpointSolver for SpacerSolver {
    fn solve(&self, query: &HornQuery) -> Result<FixpointOutcome, SolverError> {
        let dir = tempfile::tempdir().map_err(|e| SolverError::ExecutionFailed(e.to_string()))?;
        let script_path = dir.path().join("query.smt2");
        std::fs::write(&script_path, query.to_smt2())
            .map_err(|e| SolverError::ExecutionFailed(e.to_string()))?;
        let (output, elapsed) = self.run(&script_path)?;
        let outcome = self.classify(&output, elapsed);
        debug!(%outcome, "fixpoint solver finished");
        Ok(outcome)
    }
}

/// Extract the `(model ...)` or define-fun block following `sat`.
fn extract_model(output: &str) -> Option<String> {
    let sat_pos = output.find("sat")?;
    let rest = &output[sat_pos..];
    let start = rest.find('(')?;
    let mut depth = 0;
    for (i, c) in rest[start..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(rest[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract `(:reason-unknown ...)` when present.
fn extract_reason(output: &str) -> Option<String> {
    let start = output.find("(:reason-unknown")?;
    let rest = &output[start..];
    let end = rest.find(')')?;
    Some(rest[..=end].to_string())
}
