//! Command handler modules for the `vwx` CLI.
//!
//! Shared helpers (config loading, target files, JSON output) live here;
//! command-specific logic lives in the submodules.

pub mod replay;

use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use vwx_config::LoadedConfig;
use vwx_md::Instrument;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load layered config files; no paths means built-in defaults.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    vwx_config::load_layered_yaml(paths).context("config load failed")
}

pub fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize summary json failed")?;
    match out {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("write summary failed: {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Target files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TargetRow {
    ts_ms: i64,
    symbol: String,
    venue: String,
    quantity: i64,
    #[serde(default)]
    deadline_ms: Option<i64>,
}

/// One row of a target file: a signed delta, or an absolute position when
/// replayed with `--absolute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedTarget {
    pub ts_ms: i64,
    pub instrument: Instrument,
    pub quantity: i64,
    pub deadline_ms: Option<i64>,
}

pub fn load_targets(path: &Path) -> Result<Vec<TimedTarget>> {
    let file = fs::File::open(path)
        .with_context(|| format!("open targets file failed: {}", path.display()))?;
    parse_targets(file).with_context(|| format!("parse targets failed: {}", path.display()))
}

/// Rows are returned sorted by timestamp; rows with equal timestamps keep
/// file order.
pub fn parse_targets<R: Read>(reader: R) -> Result<Vec<TimedTarget>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut out = Vec::new();
    for (i, row) in rdr.deserialize::<TargetRow>().enumerate() {
        let row = row.with_context(|| format!("target row {}", i + 1))?;
        out.push(TimedTarget {
            ts_ms: row.ts_ms,
            instrument: Instrument::new(row.symbol, row.venue),
            quantity: row.quantity,
            deadline_ms: row.deadline_ms,
        });
    }
    out.sort_by_key(|t| t.ts_ms);
    Ok(out)
}
