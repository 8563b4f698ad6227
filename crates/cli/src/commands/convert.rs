use std::path::Path;

use cycler_core::{ProcedureDocument, ProcedureToScheduleConverter, TemplateRef};

use super::{fail, report};
use crate::OutputFormat;

pub(crate) fn cmd_convert(
    procedure: &Path,
    baseline: &Path,
    output: &Path,
    config: Option<&Path>,
    format: OutputFormat,
    quiet: bool,
) {
    let config = match config {
        Some(path) => crate::config::load(path).unwrap_or_else(|e| fail(&e, format, quiet)),
        None => Default::default(),
    };
    let doc = ProcedureDocument::parse(procedure).unwrap_or_else(|e| fail(&e, format, quiet));
    let converter = ProcedureToScheduleConverter::from_procedure(&doc)
        .unwrap_or_else(|e| fail(&e, format, quiet))
        .with_config(config);
    let schedule = converter
        .create_schedule_file(TemplateRef::file(baseline), output)
        .unwrap_or_else(|e| fail(&e, format, quiet));

    let steps = schedule.step_count();
    report(
        serde_json::json!({
            "output": output.display().to_string(),
            "procedure": procedure.display().to_string(),
            "steps": steps,
        }),
        &format!("wrote {} ({} steps)", output.display(), steps),
        format,
        quiet,
    );
}
