//! JSON snapshots of the dataflow graph.
//!
//! The initial graph is loaded from a snapshot file at startup; the
//! current graph can be serialized on demand for dashboards and the
//! operator `show` command.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{DfgError, DfgResult};
use crate::types::Dfg;

/// Serialize the graph to pretty-printed JSON.
pub fn to_json(dfg: &Dfg) -> DfgResult<String> {
    serde_json::to_string_pretty(dfg).map_err(|e| DfgError::Snapshot(e.to_string()))
}

/// Parse a graph from a JSON snapshot.
pub fn from_json(json: &str) -> DfgResult<Dfg> {
    serde_json::from_str(json).map_err(|e| DfgError::Snapshot(e.to_string()))
}

/// Load the initial graph from a snapshot file.
pub fn load_file(path: &Path) -> DfgResult<Dfg> {
    let contents = fs::read_to_string(path)
        .map_err(|e| DfgError::Snapshot(format!("{}: {e}", path.display())))?;
    let dfg = from_json(&contents)?;
    info!(
        path = %path.display(),
        types = dfg.msu_types.len(),
        msus = dfg.msus.len(),
        runtimes = dfg.runtimes.len(),
        "dfg snapshot loaded"
    );
    Ok(dfg)
}

/// Write the current graph to a snapshot file.
pub fn save_file(dfg: &Dfg, path: &Path) -> DfgResult<()> {
    let json = to_json(dfg)?;
    fs::write(path, json).map_err(|e| DfgError::Snapshot(format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), "dfg snapshot written");
    Ok(())
}
