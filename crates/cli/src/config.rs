//! Converter settings file.
//!
//! ```toml
//! current_range = "Range2"
//! ```
//!
//! Every key is optional; unknown keys are rejected.

use std::path::Path;

use cycler_core::{ConverterConfig, ProtocolError, ProtocolResult};

pub(crate) fn load(path: &Path) -> ProtocolResult<ConverterConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| ProtocolError::io(path, e))?;
    parse(&text, &path.display().to_string())
}

fn parse(text: &str, origin: &str) -> ProtocolResult<ConverterConfig> {
    let config: ConverterConfig = toml::from_str(text).map_err(|e| {
        ProtocolError::format(origin, format!("invalid converter config: {}", e.message()))
    })?;
    tracing::debug!(origin, current_range = %config.current_range, "loaded converter config");
    Ok(config)
}
