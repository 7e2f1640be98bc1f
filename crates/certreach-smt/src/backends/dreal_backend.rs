//! dReal backend driven through its command-line interface.
//!
//! dReal is not incremental, so the backend keeps declarations and
//! assertions in memory and writes a complete script for every check.
//! Answers are `unsat` (sound) or `delta-sat` with a box model; a
//! delta-sat box is reported as `Sat` with the box midpoint as the model so
//! the caller can confirm it numerically.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::backends::smtlib_printer::ScriptWriter;
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

static SCRIPT_COUNTER: AtomicUsize = AtomicUsize::new(0);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum DRealError {
    #[error("dReal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dReal not found: {0}")]
    NotFound(String),
    #[error("dReal error: {0}")]
    SolverError(String),
    #[error("Failed to parse dReal output: {0}")]
    ParseError(String),
}

enum Decl {
    Free(String, SmtSort),
    Bounded(String, f64, f64),
}

pub struct DRealSolver {
    command: String,
    precision: f64,
    timeout: Option<Duration>,
    decls: Vec<Decl>,
    assertions: Vec<SmtTerm>,
    scopes: Vec<(usize, usize)>,
    cancel: Option<Arc<AtomicBool>>,
    last_model: HashMap<String, f64>,
}

impl DRealSolver {
    pub fn new(precision: f64) -> Self {
        Self::with_command("dreal", precision, None)
    }

    pub fn with_timeout_secs(precision: f64, timeout_secs: u64) -> Self {
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));
        Self::with_command("dreal", precision, timeout)
    }

    pub fn with_command(cmd: &str, precision: f64, timeout: Option<Duration>) -> Self {
        Self {
            command: cmd.to_string(),
            precision,
            timeout,
            decls: Vec::new(),
            assertions: Vec::new(),
            scopes: Vec::new(),
            cancel: None,
            last_model: HashMap::new(),
        }
    }

    /// Render the current declarations and assertions as a dReal script.
    pub fn script(&self) -> String {
        let mut writer = ScriptWriter::new("QF_NRA");
        for decl in &self.decls {
            match decl {
                Decl::Free(name, sort) => writer.declare(name, sort),
                Decl::Bounded(name, lo, hi) => writer.declare_bounded(name, *lo, *hi),
            }
        }
        for a in &self.assertions {
            writer.assert(a);
        }
        writer.finish()
    }

    fn script_path() -> PathBuf {
        let n = SCRIPT_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("certreach-{}-{n}.smt2", std::process::id()))
    }

    /// Run dReal on `path` until it exits, the timeout passes, or the
    /// cancel flag is raised.
    fn run(&self, path: &Path) -> Result<RunOutcome, DRealError> {
        let mut child = Command::new(&self.command)
            .arg("--precision")
            .arg(self.precision.to_string())
            .arg("--model")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DRealError::NotFound(format!("{}: {e}", self.command)))?;

        // Both pipes are read concurrently so a full pipe buffer never
        // stalls the solver.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            let cancelled = self
                .cancel
                .as_ref()
                .is_some_and(|f| f.load(Ordering::Relaxed));
            let timed_out = deadline.is_some_and(|d| Instant::now() >= d);
            if cancelled || timed_out {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(if cancelled {
                    RunOutcome::Cancelled
                } else {
                    RunOutcome::TimedOut
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stdout = collect(stdout)?;
        if !status.success() {
            let stderr = collect(stderr).unwrap_or_default();
            return Err(DRealError::SolverError(format!(
                "exit status {status}: {}",
                stderr.trim()
            )));
        }
        Ok(RunOutcome::Finished(stdout))
    }
}

/// How one dReal process ended.
enum RunOutcome {
    Finished(String),
    TimedOut,
    Cancelled,
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<String>> {
    std::thread::spawn(move || {
        let mut text = String::new();
        pipe.read_to_string(&mut text)?;
        Ok(text)
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<String>>>) -> Result<String, DRealError> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    let text = reader
        .join()
        .map_err(|_| DRealError::SolverError("dReal output reader panicked".into()))??;
    Ok(text)
}

impl SmtSolver for DRealSolver {
    type Error = DRealError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), DRealError> {
        self.decls.push(Decl::Free(name.to_string(), sort.clone()));
        Ok(())
    }

    fn declare_bounded_var(&mut self, name: &str, lo: f64, hi: f64) -> Result<(), DRealError> {
        self.decls.push(Decl::Bounded(name.to_string(), lo, hi));
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), DRealError> {
        self.assertions.push(term.clone());
        Ok(())
    }

    fn push(&mut self) -> Result<(), DRealError> {
        self.scopes.push((self.decls.len(), self.assertions.len()));
        Ok(())
    }

    fn pop(&mut self) -> Result<(), DRealError> {
        let (decls, assertions) = self
            .scopes
            .pop()
            .ok_or_else(|| DRealError::SolverError("pop without matching push".into()))?;
        self.decls.truncate(decls);
        self.assertions.truncate(assertions);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, DRealError> {
        self.last_model.clear();
        let path = Self::script_path();
        std::fs::write(&path, self.script())?;
        let output = self.run(&path);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove dReal script");
        }
        let stdout = match output? {
            RunOutcome::Finished(stdout) => stdout,
            RunOutcome::TimedOut => return Ok(SatResult::Unknown("timeout".into())),
            RunOutcome::Cancelled => return Ok(SatResult::Unknown("cancelled".into())),
        };
        let (result, model) = parse_dreal_output(&stdout)?;
        debug!(result = ?result, vars = model.len(), "dReal check finished");
        self.last_model = model;
        Ok(result)
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), DRealError> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }
        let mut values = HashMap::new();
        for &(name, _) in var_names {
            let v = self.last_model.get(name).copied().ok_or_else(|| {
                DRealError::ParseError(format!("model has no value for `{name}`"))
            })?;
            values.insert(name.to_string(), ModelValue::Real(v));
        }
        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn reset(&mut self) -> Result<(), DRealError> {
        self.decls.clear();
        self.assertions.clear();
        self.scopes.clear();
        self.last_model.clear();
        Ok(())
    }
}

/// Parse `unsat`, or `delta-sat ...` followed by `name : [lo, hi]` lines.
fn parse_dreal_output(stdout: &str) -> Result<(SatResult, HashMap<String, f64>), DRealError> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let head = lines
        .next()
        .ok_or_else(|| DRealError::ParseError("empty output".into()))?;
    if head == "unsat" {
        return Ok((SatResult::Unsat, HashMap::new()));
    }
    if head == "unknown" {
        return Ok((SatResult::Unknown("dReal returned unknown".into()), HashMap::new()));
    }
    if !head.starts_with("delta-sat") {
        return Err(DRealError::ParseError(head.to_string()));
    }
    let mut model = HashMap::new();
    for line in lines {
        let (name, value) = parse_dreal_assignment(line)?;
        model.insert(name, value);
    }
    Ok((SatResult::Sat, model))
}

fn parse_dreal_assignment(line: &str) -> Result<(String, f64), DRealError> {
    let bad = || DRealError::ParseError(format!("model line `{line}`"));
    let (name, range) = line.split_once(':').ok_or_else(bad)?;
    let range = range.trim().trim_start_matches('[').trim_end_matches(']');
    let (lo, hi) = range.split_once(',').ok_or_else(bad)?;
    let lo: f64 = lo.trim().parse().map_err(|_| bad())?;
    let hi: f64 = hi.trim().parse().map_err(|_| bad())?;
    let mid = if lo.is_finite() && hi.is_finite() {
        lo + 0.5 * (hi - lo)
    } else if lo.is_finite() {
        lo
    } else {
        hi
    };
    Ok((name.trim().to_string(), mid))
}
