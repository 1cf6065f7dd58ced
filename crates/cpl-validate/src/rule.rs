use std::path::Path;

use serde_json::{Map, Value};

use crate::types::GateParams;

pub const MANIFEST_EXISTS: &str = "manifest_exists";

/// A field computed by a gate and written back onto the document.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedField {
    pub path: Vec<&'static str>,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GateOutcome {
    pub passed: bool,
    pub detail: String,
    pub derived: Vec<DerivedField>,
}

impl GateOutcome {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self { passed: true, detail: detail.into(), derived: vec![] }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self { passed: false, detail: detail.into(), derived: vec![] }
    }

    /// The governed feature is off or absent; counts as a pass.
    pub fn not_applicable(what: &str) -> Self {
        Self::pass(format!("not applicable: {what}"))
    }

    pub fn with_derived(mut self, path: Vec<&'static str>, value: Value) -> Self {
        self.derived.push(DerivedField { path, value });
        self
    }
}

/// What a gate sees: the run directory (for artifact lookups) and the
/// document as left by the gates before it.
#[derive(Clone, Copy, Debug)]
pub struct GateInput<'a> {
    pub run_dir: &'a Path,
    pub document: &'a Value,
}

impl<'a> GateInput<'a> {
    pub fn block(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.document.get(key).and_then(Value::as_object)
    }

    /// Feature block that is present and not switched off. A block without
    /// an `enabled` field counts as enabled.
    pub fn enabled_block(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.block(key)
            .filter(|b| b.get("enabled").and_then(Value::as_bool).unwrap_or(true))
    }
}

pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Gates that must have been evaluated and passed before this one runs.
    fn requires(&self) -> &'static [&'static str] {
        &[MANIFEST_EXISTS]
    }

    fn eval(&self, input: &GateInput<'_>, params: &GateParams) -> GateOutcome;
}

/// Set `value` at `path`, creating intermediate objects. Non-object parents
/// are left alone.
pub fn apply_derived(document: &mut Value, field: &DerivedField) {
    let Some((last, parents)) = field.path.split_last() else {
        return;
    };
    let mut cursor = document;
    for key in parents {
        let Some(obj) = cursor.as_object_mut() else {
            return;
        };
        cursor = obj.entry(key.to_string()).or_insert_with(|| Value::Object(Map::new()));
    }
    if let Some(obj) = cursor.as_object_mut() {
        obj.insert(last.to_string(), field.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_field_lands_on_nested_path() {
        let mut doc = json!({"soundtrack": {"license_tier": "RED"}});
        apply_derived(&mut doc, &DerivedField { path: vec!["soundtrack", "safe_mode"], value: json!(true) });
        assert_eq!(doc["soundtrack"]["safe_mode"], json!(true));
        assert_eq!(doc["soundtrack"]["license_tier"], json!("RED"));
    }

    #[test]
    fn disabled_block_is_not_enabled() {
        let doc = json!({"claims": {"enabled": false}, "pacing": {}});
        let input = GateInput { run_dir: Path::new("."), document: &doc };
        assert!(input.enabled_block("claims").is_none());
        assert!(input.enabled_block("pacing").is_some());
        assert!(input.enabled_block("audio_proof").is_none());
    }
}
