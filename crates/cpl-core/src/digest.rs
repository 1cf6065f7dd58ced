use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Voice settings that, together with the text, identify a synthesis request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub voice_id: String,
    pub model: String,
    #[serde(default = "default_stability")]
    pub stability: f64,
    #[serde(default)]
    pub style: f64,
}

fn default_stability() -> f64 {
    0.5
}

impl VoiceProfile {
    pub fn fingerprint(&self, text: &str) -> String {
        digest(&self.voice_id, text, &self.model, self.stability, self.style)
    }
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn canonical_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Recursively sort object keys for stable hashing.
fn sort_json(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut new_map = serde_json::Map::new();
            for (k, child) in entries {
                new_map.insert(k, sort_json(child));
            }
            serde_json::Value::Object(new_map)
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

/// Fingerprint of a synthesis request: sha256 over the key-sorted JSON
/// encoding of the tuple, hex encoded.
pub fn digest(voice_id: &str, text: &str, model: &str, stability: f64, style: f64) -> String {
    let doc = sort_json(serde_json::json!({
        "voice_id": voice_id,
        "text": canonical_text(text),
        "model": model,
        "stability": stability,
        "style": style,
    }));
    let mut hasher = Sha256::new();
    hasher.update(doc.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
