//! Small per-person side files: heights by marker id and marker ids by
//! person number. Both are two whitespace separated columns with optional
//! `#` comment lines.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

fn read_pairs<R, K, V>(input: R, key: &str, value: &str) -> Result<HashMap<K, V>>
where
    R: BufRead,
    K: FromStr + Eq + std::hash::Hash + std::fmt::Display + Copy,
    V: FromStr,
{
    let mut map = HashMap::new();

    for (idx, line) in input.lines().enumerate() {
        let line = line?;
        let nr = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        let (Some(k), Some(v), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(Error::parse(nr, format!("expected `{} {}`", key, value)));
        };

        let k: K = k
            .parse()
            .map_err(|_| Error::parse(nr, format!("invalid {} `{}`", key, k)))?;
        let v: V = v
            .parse()
            .map_err(|_| Error::parse(nr, format!("invalid {} `{}`", value, v)))?;

        if map.insert(k, v).is_some() {
            warn!("line {}: {} {} given twice, keeping the last one", nr, key, k);
        }
    }

    Ok(map)
}

/// `markerID height` lines, heights in cm.
pub fn read_height_file<R: BufRead>(input: R) -> Result<HashMap<i32, f64>> {
    let map: HashMap<i32, f64> = read_pairs(input, "marker id", "height")?;

    if let Some((id, h)) = map.iter().find(|(_, h)| h.is_nan() || **h <= 0.0) {
        return Err(Error::InvalidConfig(format!("marker {} has invalid height {}", id, h)));
    }

    Ok(map)
}

/// `personID markerID` lines.
pub fn read_marker_id_file<R: BufRead>(input: R) -> Result<HashMap<i32, i32>> {
    read_pairs(input, "person id", "marker id")
}

pub fn load_height_file<P: AsRef<Path>>(path: P) -> Result<HashMap<i32, f64>> {
    let map = read_height_file(BufReader::new(File::open(path.as_ref())?))?;
    info!("read {} heights from {}", map.len(), path.as_ref().display());

    Ok(map)
}

pub fn load_marker_id_file<P: AsRef<Path>>(path: P) -> Result<HashMap<i32, i32>> {
    let map = read_marker_id_file(BufReader::new(File::open(path.as_ref())?))?;
    info!("read {} marker ids from {}", map.len(), path.as_ref().display());

    Ok(map)
}
