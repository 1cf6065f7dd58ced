//! The publish-readiness gates, in their fixed evaluation order.

use serde_json::{json, Value};

use crate::rule::{Gate, GateInput, GateOutcome, MANIFEST_EXISTS};
use crate::types::GateParams;

pub const STATUS_READY: &str = "status_ready";
pub const METADATA_COMPLETE: &str = "metadata_complete";
pub const RENDER_PRESENT: &str = "render_present";
pub const RENDER_OUTPUT: &str = "render_output";
pub const CLAIMS_EVIDENCE: &str = "claims_evidence";
pub const AUDIO_PROOF: &str = "audio_proof";
pub const SOUNDTRACK_SAFE_MODE: &str = "soundtrack_safe_mode";
pub const SOUNDTRACK_COMPLIANCE: &str = "soundtrack_compliance";
pub const PACING: &str = "pacing";

pub const GATE_ORDER: [&str; 10] = [
    MANIFEST_EXISTS,
    STATUS_READY,
    METADATA_COMPLETE,
    RENDER_PRESENT,
    RENDER_OUTPUT,
    CLAIMS_EVIDENCE,
    AUDIO_PROOF,
    SOUNDTRACK_SAFE_MODE,
    SOUNDTRACK_COMPLIANCE,
    PACING,
];

const PUBLISHABLE_STATUSES: [&str; 3] = ["done", "rendered", "ready"];
const LICENSE_TIERS: [&str; 3] = ["GREEN", "AMBER", "RED"];
const AUTO_PUBLISH: &str = "AUTO_PUBLISH";

pub fn standard_gates() -> Vec<Box<dyn Gate>> {
    vec![
        Box::new(ManifestExists),
        Box::new(StatusReady),
        Box::new(MetadataComplete),
        Box::new(RenderPresent),
        Box::new(RenderOutput),
        Box::new(ClaimsEvidence),
        Box::new(AudioProof),
        Box::new(SoundtrackSafeMode),
        Box::new(SoundtrackCompliance),
        Box::new(Pacing),
    ]
}

fn upper(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str).map(|s| s.trim().to_ascii_uppercase()).filter(|s| !s.is_empty())
}

pub struct ManifestExists;

impl Gate for ManifestExists {
    fn name(&self) -> &'static str {
        MANIFEST_EXISTS
    }

    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    fn eval(&self, input: &GateInput<'_>, _params: &GateParams) -> GateOutcome {
        if input.document.is_object() {
            GateOutcome::pass("manifest loaded")
        } else {
            GateOutcome::fail("manifest is not a JSON object")
        }
    }
}

pub struct StatusReady;

impl Gate for StatusReady {
    fn name(&self) -> &'static str {
        STATUS_READY
    }

    fn eval(&self, input: &GateInput<'_>, _params: &GateParams) -> GateOutcome {
        match input.document.get("status").and_then(Value::as_str) {
            None => GateOutcome::fail("status field missing"),
            Some(s) if PUBLISHABLE_STATUSES.contains(&s.trim().to_ascii_lowercase().as_str()) => {
                GateOutcome::pass(format!("status={s}"))
            }
            Some(s) => GateOutcome::fail(format!(
                "status '{s}' is not publishable (expected {})",
                PUBLISHABLE_STATUSES.join("|")
            )),
        }
    }
}

pub struct MetadataComplete;

impl Gate for MetadataComplete {
    fn name(&self) -> &'static str {
        METADATA_COMPLETE
    }

    fn eval(&self, input: &GateInput<'_>, _params: &GateParams) -> GateOutcome {
        let Some(meta) = input.block("metadata") else {
            return GateOutcome::fail("metadata block missing");
        };
        match meta.get("title").and_then(Value::as_str).map(str::trim) {
            Some(t) if !t.is_empty() => GateOutcome::pass(format!("title '{t}'")),
            _ => GateOutcome::fail("metadata.title missing or empty"),
        }
    }
}

pub struct RenderPresent;

impl Gate for RenderPresent {
    fn name(&self) -> &'static str {
        RENDER_PRESENT
    }

    fn eval(&self, input: &GateInput<'_>, _params: &GateParams) -> GateOutcome {
        if input.block("render").is_some() {
            GateOutcome::pass("render block present")
        } else {
            GateOutcome::fail("render block missing")
        }
    }
}

pub struct RenderOutput;

impl Gate for RenderOutput {
    fn name(&self) -> &'static str {
        RENDER_OUTPUT
    }

    fn requires(&self) -> &'static [&'static str] {
        &[MANIFEST_EXISTS, RENDER_PRESENT]
    }

    fn eval(&self, input: &GateInput<'_>, params: &GateParams) -> GateOutcome {
        let Some(render) = input.block("render") else {
            return GateOutcome::fail("render block missing");
        };

        if let Some(d) = render.get("duration_sec") {
            match d.as_f64() {
                Some(secs) if secs > 0.0 => {}
                _ => return GateOutcome::fail(format!("render.duration_sec must be a positive number, got {d}")),
            }
        }

        let video = render.get("video_path").and_then(Value::as_str).filter(|s| !s.trim().is_empty());
        let Some(video) = video else {
            return if params.require_video {
                GateOutcome::fail("render.video_path missing")
            } else {
                GateOutcome::not_applicable("video not required")
            };
        };

        let path = input.run_dir.join(video);
        let size = match std::fs::metadata(&path) {
            Ok(m) if m.is_file() => m.len(),
            _ => return GateOutcome::fail(format!("render output {} not found", path.display())),
        };
        if size < params.min_output_bytes {
            return GateOutcome::fail(format!(
                "render output {} is {size} bytes, below {} byte floor",
                path.display(),
                params.min_output_bytes
            ));
        }
        GateOutcome::pass(format!("render output {} ({size} bytes)", path.display()))
    }
}

pub struct ClaimsEvidence;

impl Gate for ClaimsEvidence {
    fn name(&self) -> &'static str {
        CLAIMS_EVIDENCE
    }

    fn eval(&self, input: &GateInput<'_>, params: &GateParams) -> GateOutcome {
        let Some(claims) = input.enabled_block("claims") else {
            return GateOutcome::not_applicable("claims disabled");
        };
        let Some(items) = claims.get("items").and_then(Value::as_array) else {
            return GateOutcome::fail("claims.items missing");
        };

        let short: Vec<String> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                let count = item.get("evidence").and_then(Value::as_array).map_or(0, Vec::len);
                count < params.min_evidence
            })
            .map(|(i, item)| {
                item.get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("#{i}"))
            })
            .collect();

        if short.is_empty() {
            GateOutcome::pass(format!("{} claims with >= {} evidence", items.len(), params.min_evidence))
        } else {
            GateOutcome::fail(format!(
                "claims {} have fewer than {} evidence entries",
                short.join(", "),
                params.min_evidence
            ))
        }
    }
}

pub struct AudioProof;

impl Gate for AudioProof {
    fn name(&self) -> &'static str {
        AUDIO_PROOF
    }

    fn eval(&self, input: &GateInput<'_>, params: &GateParams) -> GateOutcome {
        let Some(proof) = input.enabled_block("audio_proof") else {
            return GateOutcome::not_applicable("audio proof disabled");
        };
        match proof.get("stability_score").and_then(Value::as_f64) {
            None => GateOutcome::fail("audio_proof.stability_score missing"),
            Some(score) if score < params.min_stability => GateOutcome::fail(format!(
                "stability_score {score:.2} below minimum {:.2}",
                params.min_stability
            )),
            Some(score) => GateOutcome::pass(format!("stability_score {score:.2}")),
        }
    }
}

/// Derives `soundtrack.safe_mode` for later gates and external readers.
/// Informational only: it always passes.
pub struct SoundtrackSafeMode;

impl Gate for SoundtrackSafeMode {
    fn name(&self) -> &'static str {
        SOUNDTRACK_SAFE_MODE
    }

    fn eval(&self, input: &GateInput<'_>, _params: &GateParams) -> GateOutcome {
        let Some(soundtrack) = input.enabled_block("soundtrack") else {
            return GateOutcome::not_applicable("soundtrack disabled");
        };
        let tier = upper(soundtrack.get("license_tier"));
        // unknown tiers are treated as restricted
        let safe_mode = tier.as_deref() != Some("GREEN");
        GateOutcome::pass(format!(
            "safe_mode={safe_mode} (license_tier={})",
            tier.as_deref().unwrap_or("unset")
        ))
        .with_derived(vec!["soundtrack", "safe_mode"], json!(safe_mode))
    }
}

pub struct SoundtrackCompliance;

impl Gate for SoundtrackCompliance {
    fn name(&self) -> &'static str {
        SOUNDTRACK_COMPLIANCE
    }

    fn requires(&self) -> &'static [&'static str] {
        &[MANIFEST_EXISTS, SOUNDTRACK_SAFE_MODE]
    }

    fn eval(&self, input: &GateInput<'_>, _params: &GateParams) -> GateOutcome {
        let Some(soundtrack) = input.enabled_block("soundtrack") else {
            return GateOutcome::not_applicable("soundtrack disabled");
        };
        let tier = match upper(soundtrack.get("license_tier")) {
            Some(t) if LICENSE_TIERS.contains(&t.as_str()) => t,
            Some(t) => return GateOutcome::fail(format!("unknown license_tier={t}")),
            None => return GateOutcome::fail("soundtrack.license_tier missing"),
        };
        let Some(policy) = upper(soundtrack.get("publish_policy")) else {
            return GateOutcome::fail("soundtrack.publish_policy missing");
        };
        // absent flag is read as monetized
        let monetized = soundtrack.get("monetized").and_then(Value::as_bool).unwrap_or(true);
        let safe_mode = soundtrack.get("safe_mode").and_then(Value::as_bool).unwrap_or(true);

        if monetized && policy == AUTO_PUBLISH {
            if tier == "RED" {
                return GateOutcome::fail(format!(
                    "license_tier={tier} incompatible with publish_policy={policy} on monetized soundtrack"
                ));
            }
            let attribution = soundtrack
                .get("attribution")
                .and_then(Value::as_str)
                .map_or(false, |s| !s.trim().is_empty());
            if safe_mode && tier == "AMBER" && !attribution {
                return GateOutcome::fail(format!(
                    "license_tier={tier} with publish_policy={policy} requires attribution in safe mode"
                ));
            }
        }
        GateOutcome::pass(format!("license_tier={tier} publish_policy={policy} monetized={monetized}"))
    }
}

pub struct Pacing;

impl Gate for Pacing {
    fn name(&self) -> &'static str {
        PACING
    }

    fn eval(&self, input: &GateInput<'_>, params: &GateParams) -> GateOutcome {
        let Some(pacing) = input.enabled_block("pacing") else {
            return GateOutcome::not_applicable("pacing disabled");
        };
        let Some(segments) = pacing.get("segments").and_then(Value::as_array) else {
            return GateOutcome::fail("pacing.segments missing");
        };

        let mut over = Vec::new();
        let mut checked = 0usize;
        for (i, seg) in segments.iter().enumerate() {
            let target = seg.get("target_sec").and_then(Value::as_f64).unwrap_or(0.0);
            if target <= 0.0 {
                continue;
            }
            let Some(actual) = seg.get("actual_sec").and_then(Value::as_f64) else {
                return GateOutcome::fail(format!("pacing segment #{i} has target_sec but no actual_sec"));
            };
            checked += 1;
            let ratio = actual / target;
            if ratio > params.max_pacing_ratio {
                let id = seg.get("id").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| format!("#{i}"));
                over.push(format!("{id} ({ratio:.2}x)"));
            }
        }

        if over.is_empty() {
            GateOutcome::pass(format!("{checked} segments within {:.2}x", params.max_pacing_ratio))
        } else {
            GateOutcome::fail(format!(
                "segments {} exceed pacing ceiling {:.2}x",
                over.join(", "),
                params.max_pacing_ratio
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;

    fn eval(gate: &dyn Gate, doc: &Value) -> GateOutcome {
        gate.eval(&GateInput { run_dir: Path::new("/nonexistent"), document: doc }, &GateParams::default())
    }

    #[test]
    fn order_matches_standard_gates() {
        let names: Vec<_> = standard_gates().iter().map(|g| g.name()).collect();
        assert_eq!(names, GATE_ORDER.to_vec());
    }

    #[test]
    fn status_must_be_publishable() {
        assert!(eval(&StatusReady, &json!({"status": "Rendered"})).passed);
        assert!(!eval(&StatusReady, &json!({"status": "draft"})).passed);
        assert!(!eval(&StatusReady, &json!({})).passed);
    }

    #[test]
    fn metadata_requires_title() {
        assert!(eval(&MetadataComplete, &json!({"metadata": {"title": "Hi"}})).passed);
        assert!(!eval(&MetadataComplete, &json!({"metadata": {"title": "  "}})).passed);
        assert_eq!(eval(&MetadataComplete, &json!({})).detail, "metadata block missing");
    }

    #[test]
    fn missing_video_depends_on_requirement() {
        let doc = json!({"render": {}});
        assert!(!eval(&RenderOutput, &doc).passed);
        let relaxed = GateParams { require_video: false, ..GateParams::default() };
        let out = RenderOutput.eval(&GateInput { run_dir: Path::new("."), document: &doc }, &relaxed);
        assert!(out.passed);
        assert!(out.detail.starts_with("not applicable"));
    }

    #[test]
    fn non_positive_render_duration_fails() {
        let out = eval(&RenderOutput, &json!({"render": {"duration_sec": 0}}));
        assert!(!out.passed);
    }

    #[test]
    fn claims_need_enough_evidence() {
        let doc = json!({"claims": {"items": [
            {"id": "c1", "evidence": ["a", "b"]},
            {"id": "c2", "evidence": []},
            {"evidence": ["x"]}
        ]}});
        let params = GateParams { min_evidence: 2, ..GateParams::default() };
        let out = ClaimsEvidence.eval(&GateInput { run_dir: Path::new("."), document: &doc }, &params);
        assert!(!out.passed);
        assert_eq!(out.detail, "claims c2, #2 have fewer than 2 evidence entries");
        assert!(eval(&ClaimsEvidence, &json!({"claims": {"enabled": false}})).passed);
    }

    #[test]
    fn audio_proof_checks_stability() {
        assert!(eval(&AudioProof, &json!({"audio_proof": {"stability_score": 0.9}})).passed);
        let low = eval(&AudioProof, &json!({"audio_proof": {"stability_score": 0.5}}));
        assert_eq!(low.detail, "stability_score 0.50 below minimum 0.80");
        assert!(!eval(&AudioProof, &json!({"audio_proof": {"enabled": true}})).passed);
        assert!(eval(&AudioProof, &json!({})).passed);
    }

    #[test]
    fn safe_mode_is_derived_and_always_passes() {
        let out = eval(&SoundtrackSafeMode, &json!({"soundtrack": {"license_tier": "red"}}));
        assert!(out.passed);
        assert_eq!(out.derived.len(), 1);
        assert_eq!(out.derived[0].value, json!(true));
        let green = eval(&SoundtrackSafeMode, &json!({"soundtrack": {"license_tier": "GREEN"}}));
        assert_eq!(green.derived[0].value, json!(false));
        assert!(eval(&SoundtrackSafeMode, &json!({})).derived.is_empty());
    }

    #[test]
    fn red_auto_publish_on_monetized_soundtrack_fails() {
        let doc = json!({"soundtrack": {
            "enabled": true, "monetized": true, "safe_mode": true,
            "license_tier": "RED", "publish_policy": "AUTO_PUBLISH"
        }});
        let out = eval(&SoundtrackCompliance, &doc);
        assert!(!out.passed);
        assert!(out.detail.contains("license_tier=RED"));
        assert!(out.detail.contains("publish_policy=AUTO_PUBLISH"));
    }

    #[test]
    fn compliance_edge_cases() {
        let manual = json!({"soundtrack": {"license_tier": "RED", "publish_policy": "MANUAL_REVIEW"}});
        assert!(eval(&SoundtrackCompliance, &manual).passed);
        let unknown = json!({"soundtrack": {"license_tier": "PURPLE", "publish_policy": "MANUAL_REVIEW"}});
        assert!(!eval(&SoundtrackCompliance, &unknown).passed);
        let amber = json!({"soundtrack": {"license_tier": "AMBER", "publish_policy": "AUTO_PUBLISH", "safe_mode": true}});
        assert!(!eval(&SoundtrackCompliance, &amber).passed);
        let attributed = json!({"soundtrack": {
            "license_tier": "AMBER", "publish_policy": "AUTO_PUBLISH", "safe_mode": true, "attribution": "Artist - Track"
        }});
        assert!(eval(&SoundtrackCompliance, &attributed).passed);
    }

    #[test]
    fn pacing_flags_slow_segments() {
        let doc = json!({"pacing": {"segments": [
            {"id": "s1", "target_sec": 10.0, "actual_sec": 10.5},
            {"id": "s2", "target_sec": 10.0, "actual_sec": 12.0},
            {"id": "s3", "target_sec": 0, "actual_sec": 99.0}
        ]}});
        let out = eval(&Pacing, &doc);
        assert!(!out.passed);
        assert_eq!(out.detail, "segments s2 (1.20x) exceed pacing ceiling 1.10x");
    }
}
