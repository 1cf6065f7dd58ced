use std::collections::HashSet;
use std::path::Path;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use cpl_artifacts::{write_json, AtomicWriteError, FsArtifactStore};

use crate::gates::standard_gates;
use crate::rule::{apply_derived, Gate, GateInput, MANIFEST_EXISTS};
use crate::types::{GateParams, GateResult, Verdict};

#[derive(Debug, Error)]
pub enum GateEngineError {
    #[error("write back validation result: {0}")]
    Write(#[from] AtomicWriteError),
    #[error("serialize verdict: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Runs an ordered list of gates over a run document and folds them into a
/// single [`Verdict`].
pub struct GateEngine {
    gates: Vec<Box<dyn Gate>>,
    params: GateParams,
}

impl GateEngine {
    pub fn new(params: GateParams) -> Self {
        Self { gates: standard_gates(), params }
    }

    pub fn with_gates(params: GateParams, gates: Vec<Box<dyn Gate>>) -> Self {
        Self { gates, params }
    }

    pub fn params(&self) -> &GateParams {
        &self.params
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    /// Evaluate all gates against `document` in order, applying derived
    /// fields as they are produced. A gate whose prerequisites did not all
    /// pass is skipped and left out of the results. Does not touch disk.
    pub fn evaluate(&self, run_dir: &Path, document: &mut Value) -> Vec<GateResult> {
        let mut passed: HashSet<&'static str> = HashSet::new();
        let mut results = Vec::with_capacity(self.gates.len());

        for gate in &self.gates {
            let name = gate.name();
            if let Some(missing) = gate.requires().iter().find(|r| !passed.contains(*r)) {
                debug!(gate = name, prerequisite = *missing, "gate skipped");
                continue;
            }

            let outcome = gate.eval(&GateInput { run_dir, document: &*document }, &self.params);
            for field in &outcome.derived {
                apply_derived(document, field);
            }
            if outcome.passed {
                passed.insert(name);
            } else {
                debug!(gate = name, detail = %outcome.detail, "gate failed");
            }
            results.push(GateResult { name: name.to_string(), passed: outcome.passed, detail: outcome.detail });
        }
        results
    }

    /// Load `<run_dir>/manifest.json`, evaluate every gate and persist the
    /// verdict under `validation` in the same document.
    ///
    /// A missing or unreadable document yields a single failed
    /// `manifest_exists` result and nothing is written.
    pub fn validate_run(&self, run_dir: &Path) -> Result<Verdict, GateEngineError> {
        let path = FsArtifactStore::document_path(run_dir);
        let fallback_id = run_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        let mut document = match load_document(&path) {
            Ok(doc) => doc,
            Err(detail) => {
                warn!(path = %path.display(), %detail, "run document unavailable");
                let result = GateResult { name: MANIFEST_EXISTS.to_string(), passed: false, detail };
                return Ok(Verdict::from_results(fallback_id, vec![result], now()));
            }
        };

        let run_id = document
            .get("run_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback_id);

        let results = self.evaluate(run_dir, &mut document);
        let verdict = Verdict::from_results(run_id, results, now());

        if let Some(obj) = document.as_object_mut() {
            obj.insert(
                "validation".to_string(),
                json!({ "last_result": serde_json::to_value(&verdict)?, "passed": verdict.overall_pass }),
            );
            write_json(&path, &document)?;
        }

        info!(run_id = %verdict.run_id, pass = verdict.overall_pass, suspect = ?verdict.primary_suspect, "validation finished");
        Ok(verdict)
    }
}

impl Default for GateEngine {
    fn default() -> Self {
        Self::new(GateParams::default())
    }
}

fn load_document(path: &Path) -> Result<Value, String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(format!("{} not found", path.display()));
        }
        Err(e) => return Err(format!("read {}: {e}", path.display())),
    };
    serde_json::from_str(&raw).map_err(|e| format!("parse {}: {e}", path.display()))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
