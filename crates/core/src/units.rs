//! Numeric text helpers shared by both file formats.

/// Format a setpoint with at most six decimals and no trailing zeros
/// (`0.172`, `2`, `3.96`).
pub fn format_setpoint(value: f64) -> String {
    let s = format!("{:.6}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_owned()
    } else {
        s.to_owned()
    }
}

/// Parse a procedure duration (`h:m:s`, any part may be empty, seconds may
/// carry a fraction: `03:00:00`, `::1.`, `0:0:0.5`) into seconds.
///
/// A bare number is taken as seconds already.
pub fn parse_duration_seconds(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let parts: Vec<&str> = text.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [s] => ("", "", *s),
        [m, s] => ("", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    let field = |p: &str| -> Option<f64> {
        let p = p.trim();
        if p.is_empty() {
            Some(0.0)
        } else {
            p.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
        }
    };
    Some(field(h)? * 3600.0 + field(m)? * 60.0 + field(s)?)
}

/// Negate a numeric setpoint textually, preserving its digits.
pub fn negate_setpoint(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('-') {
        Some(rest) => rest.to_owned(),
        None => format!("-{}", value),
    }
}
