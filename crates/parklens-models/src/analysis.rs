//! Analysis result payloads.
//!
//! The inference API returns loosely shaped JSON. Before anything else reads
//! it, [`normalize_result`] maps legacy key names onto the canonical ones so
//! the rest of the system only sees `path` and `lng`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, ModelResult};
use crate::timestamp::parse_timestamp;

/// Canonical key for the travel-path sequence.
pub const PATH_KEY: &str = "path";

/// Legacy travel-path keys, in order of preference.
pub const PATH_KEY_ALIASES: &[&str] = &["travel_path", "gps_path"];

/// Canonical longitude key inside path points and spots.
pub const LNG_KEY: &str = "lng";

/// Legacy longitude keys, in order of preference.
pub const LNG_KEY_ALIASES: &[&str] = &["lon", "long", "longitude"];

/// Key holding the detected spots.
pub const SPOTS_KEY: &str = "spots";

/// Map legacy key names in a raw result onto the canonical ones.
///
/// If the canonical key is already present it wins and the legacy keys are
/// dropped. Non-object values are returned unchanged. Applying this twice
/// yields the same value as applying it once.
pub fn normalize_result(value: Value) -> Value {
    let Value::Object(mut root) = value else {
        return value;
    };

    rename_aliases(&mut root, PATH_KEY, PATH_KEY_ALIASES);

    for key in [PATH_KEY, SPOTS_KEY] {
        if let Some(Value::Array(items)) = root.get_mut(key) {
            for item in items.iter_mut() {
                if let Value::Object(fields) = item {
                    rename_aliases(fields, LNG_KEY, LNG_KEY_ALIASES);
                }
            }
        }
    }

    Value::Object(root)
}

fn rename_aliases(map: &mut Map<String, Value>, canonical: &str, aliases: &[&str]) {
    let mut found = None;
    for alias in aliases {
        if let Some(v) = map.remove(*alias) {
            found.get_or_insert(v);
        }
    }

    if let Some(v) = found {
        if !map.contains_key(canonical) {
            map.insert(canonical.to_string(), v);
        }
    }
}

/// Normalized result of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Detected parking spots
    #[serde(default)]
    pub spots: Vec<Spot>,

    /// Travel path of the recording vehicle
    #[serde(default)]
    pub path: Vec<PathPoint>,

    /// Every other key the inference API returned, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalysisResult {
    /// Normalize and parse a raw JSON value.
    pub fn from_value(value: Value) -> ModelResult<Self> {
        if !value.is_object() {
            return Err(ModelError::malformed_result("expected a JSON object"));
        }
        serde_json::from_value(normalize_result(value))
            .map_err(|e| ModelError::malformed_result(e.to_string()))
    }

    /// Normalize and parse raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> ModelResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ModelError::malformed_result(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One detected parking spot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Where in the video the spot was seen (seconds or a clock string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,

    /// Frame image reference: a bare file name from the runner, an
    /// artifact URL once materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Spot {
    /// Timestamp in seconds, if present and parseable.
    pub fn timestamp_secs(&self) -> Option<f64> {
        match self.timestamp.as_ref()? {
            Value::Number(n) => n.as_f64().filter(|s| s.is_finite() && *s >= 0.0),
            Value::String(s) => parse_timestamp(s).ok(),
            _ => None,
        }
    }
}

/// One point of the travel path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept numbers, numeric strings and null for coordinate fields.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid coordinate '{}'", s))),
        other => Err(serde::de::Error::custom(format!(
            "invalid coordinate {}",
            other
        ))),
    }
}
