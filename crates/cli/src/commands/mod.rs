pub(crate) mod convert;
pub(crate) mod fast_charge;
pub(crate) mod json;
pub(crate) mod roundtrip;
pub(crate) mod template;

use std::path::Path;
use std::process;

use cycler_core::ProtocolError;

use crate::OutputFormat;

/// Report `e` on stderr and exit with status 1.
pub(crate) fn fail(e: &ProtocolError, output: OutputFormat, quiet: bool) -> ! {
    match output {
        OutputFormat::Json => {
            let err_json = serde_json::to_string_pretty(&e.to_json_value())
                .unwrap_or_else(|_| format!("{{\"error\": \"{:?}\"}}", e));
            eprintln!("{}", err_json);
        }
        OutputFormat::Text => {
            if !quiet {
                eprintln!("error: {}", e);
            }
        }
    }
    process::exit(1);
}

/// Print a success summary: `message` in text mode, `value` in json mode.
pub(crate) fn report(value: serde_json::Value, message: &str, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Json => {
            let pretty = serde_json::to_string_pretty(&value)
                .unwrap_or_else(|e| format!("serialization error: {}", e));
            println!("{}", pretty);
        }
        OutputFormat::Text => {
            if !quiet {
                println!("{}", message);
            }
        }
    }
}

/// Schedules are recognised by their `.sdu` extension; everything else is
/// read as a procedure.
pub(crate) fn is_schedule(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("sdu"))
}
