use std::path::Path;

use cycler_core::{ScheduleDocument, TemplateRef};

use super::{fail, report};
use crate::OutputFormat;

pub(crate) fn cmd_fast_charge(
    charge_rate: f64,
    capacity: f64,
    discharge_rate: f64,
    baseline: &Path,
    output: &Path,
    format: OutputFormat,
    quiet: bool,
) {
    let doc = ScheduleDocument::from_fast_charge_parameters(
        charge_rate,
        capacity,
        discharge_rate,
        TemplateRef::file(baseline),
    )
    .unwrap_or_else(|e| fail(&e, format, quiet));
    doc.serialize(output)
        .unwrap_or_else(|e| fail(&e, format, quiet));

    report(
        serde_json::json!({
            "output": output.display().to_string(),
            "baseline": baseline.display().to_string(),
        }),
        &format!("wrote {}", output.display()),
        format,
        quiet,
    );
}
