//! CSV ingestion for tick files (read side only).
//!
//! ## Column contract (order-independent, exact lowercase names, whitespace trimmed)
//!
//! | Column   | Type / example   | Notes                          |
//! |----------|------------------|--------------------------------|
//! | `symbol` | `SPY`            |                                |
//! | `venue`  | `USA`            |                                |
//! | `ts_ms`  | `1381156200000`  | UTC epoch milliseconds         |
//! | `price`  | `144.57`         | Decimal string; no floats      |
//! | `volume` | `1200`           | Integer >= 0; 0 = quote tick   |
//!
//! Structural problems (unreadable file, missing header column) fail the
//! whole parse. Row-level problems reject only that row and are reported
//! alongside the accepted updates, mirroring the live path where a bad tick
//! is dropped and the stream continues.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::normalizer::{normalize, NormalizerError, RawTick};
use crate::MarketUpdate;

const REQUIRED_COLUMNS: [&str; 5] = ["symbol", "venue", "ts_ms", "price", "volume"];

#[derive(Debug, Error)]
pub enum CsvIngestError {
    #[error("csv io error: {0}")]
    Io(String),

    #[error("csv missing required header column: '{0}'")]
    MissingHeader(String),
}

/// Why a single row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowRejection {
    #[error("row {row}: {message}")]
    Decode { row: usize, message: String },

    #[error("row {row}: {source}")]
    Normalize {
        row: usize,
        #[source]
        source: NormalizerError,
    },
}

#[derive(Debug, Default)]
pub struct TickIngest {
    /// Accepted updates in file order.
    pub updates: Vec<MarketUpdate>,
    pub rejected: Vec<RowRejection>,
}

pub fn parse_csv_file(path: &Path) -> Result<TickIngest, CsvIngestError> {
    let file = std::fs::File::open(path)
        .map_err(|e| CsvIngestError::Io(format!("open '{}': {e}", path.display())))?;
    parse_csv_reader(file)
}

/// Parse from a string slice (tests, embedded fixtures).
pub fn parse_csv_str(src: &str) -> Result<TickIngest, CsvIngestError> {
    parse_csv_reader(src.as_bytes())
}

pub fn parse_csv_reader<R: Read>(reader: R) -> Result<TickIngest, CsvIngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| CsvIngestError::Io(e.to_string()))?
        .clone();
    if headers.is_empty() {
        return Ok(TickIngest::default());
    }
    for col in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == col) {
            return Err(CsvIngestError::MissingHeader(col.to_string()));
        }
    }

    let mut out = TickIngest::default();
    for (i, record) in rdr.deserialize::<RawTick>().enumerate() {
        // 1-based data rows; the header is row 0.
        let row = i + 1;
        match record {
            Ok(raw) => match normalize(&raw) {
                Ok(update) => out.updates.push(update),
                Err(source) => out.rejected.push(RowRejection::Normalize { row, source }),
            },
            Err(e) if e.is_io_error() => return Err(CsvIngestError::Io(e.to_string())),
            Err(e) => out.rejected.push(RowRejection::Decode {
                row,
                message: e.to_string(),
            }),
        }
    }
    Ok(out)
}
