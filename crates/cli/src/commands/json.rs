use std::path::Path;

use cycler_core::{ProcedureDocument, ProtocolResult, ScheduleDocument};

use super::{fail, is_schedule};
use crate::OutputFormat;

/// The mirror is JSON in both output formats.
pub(crate) fn cmd_json(file: &Path, format: OutputFormat, quiet: bool) {
    let mirror = mirror(file).unwrap_or_else(|e| fail(&e, format, quiet));
    let pretty = serde_json::to_string_pretty(&mirror)
        .unwrap_or_else(|e| format!("serialization error: {}", e));
    println!("{}", pretty);
}

fn mirror(file: &Path) -> ProtocolResult<serde_json::Value> {
    if is_schedule(file) {
        ScheduleDocument::parse(file)?.to_json()
    } else {
        ProcedureDocument::parse(file)?.to_json()
    }
}
