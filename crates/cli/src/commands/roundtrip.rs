use std::path::Path;
use std::process;

use cycler_core::{ProcedureDocument, ProtocolError, ProtocolResult, ScheduleDocument};

use super::{fail, is_schedule, report};
use crate::OutputFormat;

pub(crate) fn cmd_roundtrip(file: &Path, format: OutputFormat, quiet: bool) {
    let original = std::fs::read(file)
        .map_err(|e| ProtocolError::io(file, e))
        .unwrap_or_else(|e| fail(&e, format, quiet));
    let rendered = render(file, &original).unwrap_or_else(|e| fail(&e, format, quiet));

    let identical = rendered == original;
    let first_difference = original
        .iter()
        .zip(&rendered)
        .position(|(a, b)| a != b)
        .or_else(|| (!identical).then(|| original.len().min(rendered.len())));
    report(
        serde_json::json!({
            "file": file.display().to_string(),
            "identical": identical,
            "first_difference": first_difference,
        }),
        &match first_difference {
            None => format!("{}: identical", file.display()),
            Some(at) => format!("{}: differs at byte {}", file.display(), at),
        },
        format,
        quiet,
    );
    if !identical {
        process::exit(1);
    }
}

fn render(file: &Path, bytes: &[u8]) -> ProtocolResult<Vec<u8>> {
    let origin = file.display().to_string();
    if is_schedule(file) {
        ScheduleDocument::from_bytes(bytes, &origin)?.to_bytes()
    } else {
        Ok(ProcedureDocument::from_bytes(bytes, &origin)?.to_bytes())
    }
}
