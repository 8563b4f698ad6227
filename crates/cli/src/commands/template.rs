use std::path::Path;

use cycler_core::{ProcedureDocument, TemplateRef};

use super::{fail, report};
use crate::OutputFormat;

pub(crate) fn cmd_template(
    capacity: f64,
    charge_rate: f64,
    discharge_rate: f64,
    output: &Path,
    template: Option<&Path>,
    format: OutputFormat,
    quiet: bool,
) {
    let doc = ProcedureDocument::from_template_parameters(
        capacity,
        charge_rate,
        discharge_rate,
        template.map(TemplateRef::file),
    )
    .unwrap_or_else(|e| fail(&e, format, quiet));
    doc.serialize(output)
        .unwrap_or_else(|e| fail(&e, format, quiet));

    report(
        serde_json::json!({
            "output": output.display().to_string(),
            "steps": doc.step_count(),
        }),
        &format!("wrote {} ({} steps)", output.display(), doc.step_count()),
        format,
        quiet,
    );
}
