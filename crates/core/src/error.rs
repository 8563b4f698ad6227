/// All errors produced while reading, converting, or writing protocol files.
///
/// Every variant carries enough context (origin path, step index, field or
/// placeholder name) to locate the problem without re-running anything.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Malformed input structure. Never auto-corrected.
    #[error("{origin}{}: {message}", location(.line, .step))]
    Format {
        origin: String,
        line: Option<u32>,
        step: Option<usize>,
        message: String,
    },

    /// A template placeholder or baseline field required by a substitution is absent.
    #[error("{origin}: missing parameter '{name}'")]
    MissingParameter { origin: String, name: String },

    /// The step type has no schedule counterpart.
    #[error("step {index}: unsupported step type '{step_type}'")]
    UnsupportedStepType { index: usize, step_type: String },

    /// An end or report condition has no schedule channel counterpart.
    #[error("step {index}: unsupported {kind} condition '{condition}'")]
    UnsupportedCondition {
        index: usize,
        kind: &'static str,
        condition: String,
    },

    /// Internal invariant violation (out-of-range index or reference).
    #[error("internal error: {message}")]
    Logic { message: String },

    /// File access failure.
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

fn location(line: &Option<u32>, step: &Option<usize>) -> String {
    match (line, step) {
        (Some(l), Some(s)) => format!(":{} (step {})", l, s),
        (Some(l), None) => format!(":{}", l),
        (None, Some(s)) => format!(" (step {})", s),
        (None, None) => String::new(),
    }
}

impl ProtocolError {
    pub fn format_at_line(origin: &str, line: u32, message: impl Into<String>) -> Self {
        ProtocolError::Format {
            origin: origin.to_owned(),
            line: Some(line),
            step: None,
            message: message.into(),
        }
    }

    pub fn format_at_step(origin: &str, step: usize, message: impl Into<String>) -> Self {
        ProtocolError::Format {
            origin: origin.to_owned(),
            line: None,
            step: Some(step),
            message: message.into(),
        }
    }

    pub fn format(origin: &str, message: impl Into<String>) -> Self {
        ProtocolError::Format {
            origin: origin.to_owned(),
            line: None,
            step: None,
            message: message.into(),
        }
    }

    pub fn missing(origin: &str, name: impl Into<String>) -> Self {
        ProtocolError::MissingParameter {
            origin: origin.to_owned(),
            name: name.into(),
        }
    }

    pub fn logic(message: impl Into<String>) -> Self {
        ProtocolError::Logic {
            message: message.into(),
        }
    }

    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        ProtocolError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Short machine-readable name of the error family.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Format { .. } => "format",
            ProtocolError::MissingParameter { .. } => "missing_parameter",
            ProtocolError::UnsupportedStepType { .. } => "unsupported_step_type",
            ProtocolError::UnsupportedCondition { .. } => "unsupported_condition",
            ProtocolError::Logic { .. } => "logic",
            ProtocolError::Io { .. } => "io",
        }
    }

    /// Structured rendering used by the CLI's JSON output mode.
    /// Absent context fields are emitted as null.
    pub fn to_json_value(&self) -> serde_json::Value {
        let (origin, line, step, field) = match self {
            ProtocolError::Format {
                origin, line, step, ..
            } => (Some(origin.as_str()), *line, *step, None),
            ProtocolError::MissingParameter { origin, name } => {
                (Some(origin.as_str()), None, None, Some(name.as_str()))
            }
            ProtocolError::UnsupportedStepType { index, .. }
            | ProtocolError::UnsupportedCondition { index, .. } => (None, None, Some(*index), None),
            ProtocolError::Logic { .. } => (None, None, None, None),
            ProtocolError::Io { path, .. } => (Some(path.as_str()), None, None, None),
        };
        serde_json::json!({
            "field":   field,
            "kind":    self.kind(),
            "line":    line,
            "message": self.to_string(),
            "origin":  origin,
            "step":    step,
        })
    }
}
