//! Arbin schedule documents (`.sdu` files).
//!
//! The file is a flat sequence of `[Heading]` lines each followed by
//! `key=value` lines, encoded in Latin-1. Bytes map one-to-one onto the code
//! points U+0000..=U+00FF, so the in-memory text is exactly the file's byte
//! stream; nothing outside that range is ever written.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::markup::LineEnding;
use crate::schedule_step::{parse_step_heading, ScheduleStep};
use crate::source::TemplateRef;
use crate::units::format_setpoint;

/// Section holding document-level schedule fields such as `m_uStepNum`.
pub const SCHEDULE_SECTION: &str = "Schedule";
pub const STEP_COUNT_KEY: &str = "m_uStepNum";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Field { key: String, value: String },
    /// Whitespace-only line, kept verbatim.
    Blank { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub heading: String,
    pub entries: Vec<Entry>,
}

impl Section {
    pub fn new(heading: impl Into<String>) -> Self {
        Section {
            heading: heading.into(),
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find_map(|e| match e {
            Entry::Field { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Overwrite an existing field. Returns false if the key is absent.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        for e in &mut self.entries {
            if let Entry::Field { key: k, value: v } = e {
                if k == key {
                    *v = value.to_owned();
                    return true;
                }
            }
        }
        false
    }

    pub fn push(&mut self, key: &str, value: &str) {
        self.entries.push(Entry::Field {
            key: key.to_owned(),
            value: value.to_owned(),
        });
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Field { key, value } => Some((key.as_str(), value.as_str())),
            Entry::Blank { .. } => None,
        })
    }
}

/// Where the fast-charge setpoints live in a baseline schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastChargeFields {
    /// (section, key) of the first constant-current stage setpoint.
    pub charge_current: (String, String),
    /// (section, key) of the capacity at which the first stage ends.
    pub capacity: (String, String),
    /// (section, key) of the second stage setpoint, written as given.
    pub discharge_current: (String, String),
}

impl Default for FastChargeFields {
    fn default() -> Self {
        FastChargeFields {
            charge_current: ("Schedule_Step2".into(), "m_szCtrlValue".into()),
            capacity: ("Schedule_Step2_Limit0".into(), "Equation0_szRight".into()),
            discharge_current: ("Schedule_Step3".into(), "m_szCtrlValue".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDocument {
    #[serde(skip)]
    origin: String,
    /// Blank lines before the first heading.
    pub preamble: Vec<String>,
    pub sections: Vec<Section>,
    pub line_ending: LineEnding,
    pub trailing_newline: bool,
}

impl ScheduleDocument {
    pub fn parse(path: &Path) -> ProtocolResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| ProtocolError::io(path, e))?;
        Self::from_bytes(&bytes, &path.display().to_string())
    }

    pub fn from_bytes(bytes: &[u8], origin: &str) -> ProtocolResult<Self> {
        if bytes.is_empty() {
            return Err(ProtocolError::format(origin, "empty schedule"));
        }
        let text = decode_latin1(bytes);
        let line_ending = LineEnding::detect(&text);
        let mut lines: Vec<&str> = text.split(line_ending.as_str()).collect();
        let trailing_newline = lines.len() > 1 && lines.last() == Some(&"");
        if trailing_newline {
            lines.pop();
        }

        let mut preamble = Vec::new();
        let mut sections: Vec<Section> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let lineno = i as u32 + 1;
            let stray = match line_ending {
                LineEnding::Crlf => line.contains('\n') || line.contains('\r'),
                LineEnding::Lf => line.contains('\r'),
            };
            if stray {
                return Err(ProtocolError::format_at_line(origin, lineno, "mixed line endings"));
            }
            if let Some(heading) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push(Section::new(heading));
                continue;
            }
            if line.trim().is_empty() {
                match sections.last_mut() {
                    Some(s) => s.entries.push(Entry::Blank {
                        text: (*line).to_owned(),
                    }),
                    None => preamble.push((*line).to_owned()),
                }
                continue;
            }
            match (line.split_once('='), sections.last_mut()) {
                (Some((key, value)), Some(s)) => s.entries.push(Entry::Field {
                    key: key.to_owned(),
                    value: value.to_owned(),
                }),
                (Some(_), None) => {
                    return Err(ProtocolError::format_at_line(
                        origin,
                        lineno,
                        "field before the first [section] heading",
                    ))
                }
                (None, _) => {
                    return Err(ProtocolError::format_at_line(
                        origin,
                        lineno,
                        "expected a [section] heading or a key=value line",
                    ))
                }
            }
        }

        tracing::debug!(origin, sections = sections.len(), "parsed schedule");
        Ok(ScheduleDocument {
            origin: origin.to_owned(),
            preamble,
            sections,
            line_ending,
            trailing_newline,
        })
    }

    /// Encode the document. Fails if any heading, key or value would
    /// break onto a new line.
    pub fn to_bytes(&self) -> ProtocolResult<Vec<u8>> {
        let mut lines: Vec<String> = Vec::new();
        for text in &self.preamble {
            self.check_single_line(text, "preamble", lines.len())?;
            lines.push(text.clone());
        }
        for s in &self.sections {
            let at = format!("[{}]", s.heading);
            self.check_single_line(&s.heading, &at, lines.len())?;
            lines.push(at);
            for e in &s.entries {
                let line = match e {
                    Entry::Field { key, value } => {
                        let at = format!("[{}] {}", s.heading, key);
                        self.check_single_line(key, &at, lines.len())?;
                        self.check_single_line(value, &at, lines.len())?;
                        format!("{}={}", key, value)
                    }
                    Entry::Blank { text } => {
                        self.check_single_line(text, &format!("[{}]", s.heading), lines.len())?;
                        text.clone()
                    }
                };
                lines.push(line);
            }
        }
        let eol = self.line_ending.as_str();
        let mut text = lines.join(eol);
        if self.trailing_newline {
            text.push_str(eol);
        }
        encode_latin1(&text, &self.origin)
    }

    fn check_single_line(&self, text: &str, at: &str, index: usize) -> ProtocolResult<()> {
        if text.contains(['\r', '\n']) {
            return Err(ProtocolError::format_at_line(
                &self.origin,
                index as u32 + 1,
                format!("{} contains a line break", at),
            ));
        }
        Ok(())
    }

    /// Encode fully in memory, then write once.
    pub fn serialize(&self, path: &Path) -> ProtocolResult<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| ProtocolError::io(path, e))?;
        tracing::info!(path = %path.display(), "wrote schedule");
        Ok(())
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn section(&self, heading: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.heading == heading)
    }

    pub fn get(&self, heading: &str, key: &str) -> Option<&str> {
        self.section(heading).and_then(|s| s.get(key))
    }

    /// Overwrite an existing field; never inserts.
    pub fn set(&mut self, heading: &str, key: &str, value: &str) -> ProtocolResult<()> {
        let found = self
            .sections
            .iter_mut()
            .find(|s| s.heading == heading)
            .map(|s| s.set(key, value))
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(ProtocolError::missing(
                &self.origin,
                format!("[{}] {}", heading, key),
            ))
        }
    }

    pub fn step_count(&self) -> usize {
        self.sections
            .iter()
            .filter(|s| matches!(parse_step_heading(&s.heading), Some((_, None))))
            .count()
    }

    /// Typed view of the step blocks.
    pub fn steps(&self) -> ProtocolResult<Vec<ScheduleStep>> {
        let mut by_index: BTreeMap<usize, (Option<&Section>, Vec<(usize, &Section)>)> =
            BTreeMap::new();
        for s in &self.sections {
            match parse_step_heading(&s.heading) {
                Some((i, None)) => {
                    let slot = by_index.entry(i).or_default();
                    if slot.0.is_some() {
                        return Err(ProtocolError::format(
                            &self.origin,
                            format!("duplicate [{}]", s.heading),
                        ));
                    }
                    slot.0 = Some(s);
                }
                Some((i, Some(k))) => by_index.entry(i).or_default().1.push((k, s)),
                None => {}
            }
        }

        let mut steps = Vec::with_capacity(by_index.len());
        for (expected, (i, (step, mut limits))) in by_index.into_iter().enumerate() {
            if i != expected {
                return Err(ProtocolError::format(
                    &self.origin,
                    format!("step blocks are not contiguous: expected Schedule_Step{}", expected),
                ));
            }
            let step = step.ok_or_else(|| {
                ProtocolError::format(
                    &self.origin,
                    format!("limit blocks for step {} without [Schedule_Step{}]", i, i),
                )
            })?;
            limits.sort_by_key(|(k, _)| *k);
            for (pos, (k, _)) in limits.iter().enumerate() {
                if *k != pos {
                    return Err(ProtocolError::format(
                        &self.origin,
                        format!("limit blocks of step {} are not contiguous at Limit{}", i, pos),
                    ));
                }
            }
            let limit_sections: Vec<&Section> = limits.into_iter().map(|(_, s)| s).collect();
            steps.push(ScheduleStep::from_sections(step, &limit_sections, &self.origin)?);
        }
        Ok(steps)
    }

    /// Replace every step and limit block with `steps` and update the step
    /// count. New blocks go where the old ones started, or right after
    /// `[Schedule]` when the baseline has none.
    pub fn replace_steps(&mut self, steps: &[ScheduleStep]) -> ProtocolResult<()> {
        if self.get(SCHEDULE_SECTION, STEP_COUNT_KEY).is_none() {
            return Err(ProtocolError::missing(
                &self.origin,
                format!("[{}] {}", SCHEDULE_SECTION, STEP_COUNT_KEY),
            ));
        }
        let first = self
            .sections
            .iter()
            .position(|s| parse_step_heading(&s.heading).is_some());
        self.sections
            .retain(|s| parse_step_heading(&s.heading).is_none());
        let at = match first {
            Some(i) => i,
            None => self
                .sections
                .iter()
                .position(|s| s.heading == SCHEDULE_SECTION)
                .map(|i| i + 1)
                .unwrap_or(self.sections.len()),
        };
        let tail = self.sections.split_off(at);
        self.sections.extend(
            steps
                .iter()
                .enumerate()
                .flat_map(|(i, s)| s.to_sections(i)),
        );
        self.sections.extend(tail);
        self.set(SCHEDULE_SECTION, STEP_COUNT_KEY, &steps.len().to_string())
    }

    /// Derive a fast-charge schedule from a baseline, substituting only the
    /// setpoint fields named by [`FastChargeFields::default`].
    pub fn from_fast_charge_parameters(
        charge_rate: f64,
        capacity: f64,
        discharge_rate: f64,
        baseline: TemplateRef<'_>,
    ) -> ProtocolResult<Self> {
        Self::from_fast_charge_parameters_with(
            charge_rate,
            capacity,
            discharge_rate,
            baseline,
            &FastChargeFields::default(),
        )
    }

    pub fn from_fast_charge_parameters_with(
        charge_rate: f64,
        capacity: f64,
        discharge_rate: f64,
        baseline: TemplateRef<'_>,
        fields: &FastChargeFields,
    ) -> ProtocolResult<Self> {
        let origin = baseline.origin();
        for (name, v) in [
            ("charge rate", charge_rate),
            ("capacity", capacity),
            ("discharge rate", discharge_rate),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ProtocolError::format(
                    &origin,
                    format!("{} must be a non-negative number, got {}", name, v),
                ));
            }
        }
        let mut doc = Self::from_bytes(&baseline.read()?, &origin)?;
        let (section, key) = &fields.charge_current;
        doc.set(section, key, &format_setpoint(charge_rate))?;
        let (section, key) = &fields.capacity;
        doc.set(section, key, &format_setpoint(capacity))?;
        let (section, key) = &fields.discharge_current;
        doc.set(section, key, &format_setpoint(discharge_rate))?;
        tracing::debug!(
            origin = %origin,
            charge_rate,
            capacity,
            discharge_rate,
            "derived fast-charge schedule"
        );
        Ok(doc)
    }

    /// JSON mirror of the document; non-authoritative.
    pub fn to_json(&self) -> ProtocolResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| ProtocolError::logic(format!("schedule JSON mirror: {}", e)))
    }

    pub fn from_json(value: serde_json::Value, origin: &str) -> ProtocolResult<Self> {
        let mut doc: ScheduleDocument = serde_json::from_value(value)
            .map_err(|e| ProtocolError::format(origin, format!("invalid JSON mirror: {}", e)))?;
        doc.origin = origin.to_owned();
        Ok(doc)
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn encode_latin1(text: &str, origin: &str) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut line = 1u32;
    for c in text.chars() {
        if c == '\n' {
            line += 1;
        }
        let b = u8::try_from(u32::from(c)).map_err(|_| {
            ProtocolError::format_at_line(
                origin,
                line,
                format!("character U+{:04X} cannot be encoded in Latin-1", u32::from(c)),
            )
        })?;
        out.push(b);
    }
    Ok(out)
}
