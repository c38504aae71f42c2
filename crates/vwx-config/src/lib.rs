//! Layered YAML configuration for the execution engine.
//!
//! Documents are merged in order (later documents override earlier ones,
//! objects merge key by key, everything else is replaced), converted to
//! JSON, hashed, and finally deserialized into a typed [`EngineConfig`].
//! Unknown keys anywhere in the tree are a load error.
//!
//! The hash is SHA-256 over the canonical JSON rendering. `serde_json`'s
//! default map keeps keys sorted, so key order in the source YAML never
//! changes the hash.

use std::fs;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use vwx_execution::ExecutionConfig;
use vwx_md::SessionConfig;

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

/// The `runtime:` section; only the concurrent runtime reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Input queue depth, and the lane backlog beyond which a lane is
    /// reported as falling behind.
    pub lane_queue_capacity: usize,
    /// Broadcast buffer for execution notifications.
    pub notification_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lane_queue_capacity: 1024,
            notification_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub session: SessionConfig,
    pub runtime: RuntimeConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.execution
            .validate()
            .context("CONFIG_INVALID execution")?;
        if self.runtime.lane_queue_capacity == 0 {
            bail!("CONFIG_INVALID runtime.lane_queue_capacity must be > 0");
        }
        if self.runtime.notification_capacity == 0 {
            bail!("CONFIG_INVALID runtime.notification_capacity must be > 0");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
    pub config: EngineConfig,
}

pub fn load_layered_yaml<P: AsRef<std::path::Path>>(paths: &[P]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let p = p.as_ref();
        let raw = fs::read_to_string(p)
            .with_context(|| format!("failed to read yaml path: {}", p.display()))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for (i, raw) in yaml_docs.iter().enumerate() {
        let v_yaml: serde_yaml::Value =
            serde_yaml::from_str(raw).with_context(|| format!("invalid yaml (layer {i})"))?;
        let v_json = match serde_json::to_value(v_yaml).context("yaml->json conversion failed")? {
            // An empty document is an empty layer.
            Value::Null => serde_json::json!({}),
            v => v,
        };
        merged = deep_merge(merged, v_json);
    }

    let config: EngineConfig =
        serde_json::from_value(merged.clone()).context("CONFIG_SCHEMA_MISMATCH")?;
    config.validate()?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
        config,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
