use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_EVIDENCE: usize = 1;
pub const DEFAULT_MIN_STABILITY: f64 = 0.8;
pub const DEFAULT_MIN_OUTPUT_BYTES: u64 = 100 * 1024;

/// Thresholds shared by every gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateParams {
    pub min_evidence: usize,
    pub min_stability: f64,
    pub require_video: bool,
    pub min_output_bytes: u64,
    pub max_pacing_ratio: f64,
}

impl Default for GateParams {
    fn default() -> Self {
        Self {
            min_evidence: DEFAULT_MIN_EVIDENCE,
            min_stability: DEFAULT_MIN_STABILITY,
            require_video: true,
            min_output_bytes: DEFAULT_MIN_OUTPUT_BYTES,
            max_pacing_ratio: cpl_core::DEFAULT_HARD_CEILING,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub run_id: String,
    pub overall_pass: bool,
    pub gates: Vec<GateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_suspect: Option<String>,
    pub timestamp: String,
}

impl Verdict {
    /// `gates` holds evaluated gates only, in evaluation order.
    pub fn from_results(run_id: impl Into<String>, gates: Vec<GateResult>, timestamp: impl Into<String>) -> Self {
        let primary_suspect = gates.iter().find(|g| !g.passed).map(|g| g.name.clone());
        Self {
            run_id: run_id.into(),
            overall_pass: primary_suspect.is_none(),
            gates,
            primary_suspect,
            timestamp: timestamp.into(),
        }
    }

    pub fn failing(&self) -> impl Iterator<Item = &GateResult> {
        self.gates.iter().filter(|g| !g.passed)
    }

    pub fn passed_count(&self) -> usize {
        self.gates.iter().filter(|g| g.passed).count()
    }

    /// `PASS 9/9` or `FAIL 7/9 primary_suspect=pacing`.
    pub fn summary_line(&self) -> String {
        let head = if self.overall_pass { "PASS" } else { "FAIL" };
        let mut line = format!("{head} {}/{} gates passed", self.passed_count(), self.gates.len());
        if let Some(suspect) = &self.primary_suspect {
            line.push_str(&format!(" primary_suspect={suspect}"));
        }
        line
    }
}
