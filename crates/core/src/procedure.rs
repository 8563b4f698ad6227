//! Maccor procedure documents (`.000` files).
//!
//! A [`ProcedureDocument`] owns the lossless markup tree of the file; the
//! typed [`Step`] list is extracted from it on demand by [`ProcedureDocument::steps`],
//! which is also where step types are classified into [`StepKind`] once.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::markup::{self, Content, Element, Markup};
use crate::source::TemplateRef;
use crate::units::format_setpoint;

pub const ROOT_ELEMENT: &str = "MaccorTestProcedure";
const HEADER: &str = "header";
const PROC_STEPS: &str = "ProcSteps";
const TEST_STEP: &str = "TestStep";

/// Template shipped with the crate, used when no template is given to
/// [`ProcedureDocument::from_template_parameters`].
pub const BUILTIN_TEMPLATE: &[u8] = include_bytes!("../templates/EXP.000");
pub const BUILTIN_TEMPLATE_ORIGIN: &str = "<builtin EXP.000>";

/// Placeholders every template must reference.
pub const REQUIRED_PLACEHOLDERS: [&str; 3] = ["CAPACITY", "CHARGE_CURRENT", "DISCHARGE_CURRENT"];

// ──────────────────────────────────────────────
// Typed step model
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Charge,
    Discharge,
    Rest,
    /// Opens loop `counter` (`Do 1` .. `Do 5`).
    Do { counter: u8 },
    /// Closes loop `counter`.
    Loop { counter: u8 },
    AdvanceCycle,
    End,
    /// Any other step type the exporter knows about.
    Other { name: String },
}

impl StepKind {
    pub fn classify(step_type: &str) -> StepKind {
        let t = step_type.trim();
        let counted = |prefix: &str| -> Option<u8> {
            t.strip_prefix(prefix)
                .map(str::trim)
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|n| *n >= 1)
        };
        match t {
            "Charge" => StepKind::Charge,
            "Dischrg" => StepKind::Discharge,
            "Rest" => StepKind::Rest,
            "AdvCycle" => StepKind::AdvanceCycle,
            "End" => StepKind::End,
            _ => {
                if let Some(counter) = counted("Do") {
                    StepKind::Do { counter }
                } else if let Some(counter) = counted("Loop") {
                    StepKind::Loop { counter }
                } else {
                    StepKind::Other { name: t.to_owned() }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Current,
    Voltage,
    Power,
    Resistance,
    None,
    Other(String),
}

impl ControlMode {
    pub fn classify(mode: &str) -> ControlMode {
        match mode.trim() {
            "Current" => ControlMode::Current,
            "Voltage" => ControlMode::Voltage,
            "Power" => ControlMode::Power,
            "Resistance" => ControlMode::Resistance,
            "" => ControlMode::None,
            other => ControlMode::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndKind {
    StepTime,
    TestTime,
    Voltage,
    Current,
    /// Current end condition on a voltage-clamped step: fires during the
    /// constant-voltage stage.
    CvStageCurrent,
    Capacity,
    Energy,
    Power,
    LoopCount,
    Other(String),
}

impl EndKind {
    pub fn classify(end_type: &str, voltage_clamped: bool) -> EndKind {
        match end_type.trim() {
            "StepTime" => EndKind::StepTime,
            "TestTime" => EndKind::TestTime,
            "Voltage" => EndKind::Voltage,
            "Current" if voltage_clamped => EndKind::CvStageCurrent,
            "Current" => EndKind::Current,
            "Ah" | "Capacity" => EndKind::Capacity,
            "Wh" | "Energy" => EndKind::Energy,
            "Power" => EndKind::Power,
            "Loop Cnt" | "LoopCnt" => EndKind::LoopCount,
            other => EndKind::Other(other.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLimit {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndEntry {
    /// End type as written, padding trimmed.
    pub end_type: String,
    pub kind: EndKind,
    /// Comparison operator, padding trimmed.
    pub operator: String,
    /// 1-based step number to continue at; `None` when the entry leaves it blank.
    pub goto: Option<usize>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub report_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub kind: StepKind,
    /// Step type as written, padding trimmed.
    pub step_type: String,
    pub note: String,
    pub mode: ControlMode,
    pub value: String,
    pub limits: Vec<StepLimit>,
    pub ends: Vec<EndEntry>,
    pub reports: Vec<ReportEntry>,
    pub range: String,
}

impl Step {
    /// Voltage clamp of a CC-CV style step.
    pub fn voltage_clamp(&self) -> Option<&str> {
        self.limits
            .iter()
            .find(|l| l.name == "Voltage" && !l.value.is_empty())
            .map(|l| l.value.as_str())
    }

    /// Repeat count carried by a `Loop` step's loop-count end entry.
    pub fn loop_count(&self) -> Option<&str> {
        self.ends
            .iter()
            .find(|e| e.kind == EndKind::LoopCount)
            .map(|e| e.value.as_str())
    }
}

// ──────────────────────────────────────────────
// Document
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureDocument {
    #[serde(skip)]
    origin: String,
    markup: Markup,
}

impl ProcedureDocument {
    /// Read and parse a procedure file.
    pub fn parse(path: &Path) -> ProtocolResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| ProtocolError::io(path, e))?;
        Self::from_bytes(&bytes, &path.display().to_string())
    }

    /// Parse procedure bytes. `origin` names the source in error messages.
    pub fn from_bytes(bytes: &[u8], origin: &str) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            let line = bytes[..e.valid_up_to()].iter().filter(|b| **b == b'\n').count() + 1;
            ProtocolError::format_at_line(origin, line as u32, "invalid UTF-8")
        })?;
        let markup = markup::parse_exact(text, origin)?;
        let doc = ProcedureDocument {
            origin: origin.to_owned(),
            markup,
        };
        let steps = doc.steps()?;
        tracing::debug!(origin, steps = steps.len(), "parsed procedure");
        Ok(doc)
    }

    /// Write the document to `path` in one write.
    pub fn serialize(&self, path: &Path) -> ProtocolResult<()> {
        std::fs::write(path, self.to_bytes()).map_err(|e| ProtocolError::io(path, e))?;
        tracing::info!(path = %path.display(), "wrote procedure");
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.markup.render().into_bytes()
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn markup(&self) -> &Markup {
        &self.markup
    }

    pub fn header(&self) -> Option<&Element> {
        self.markup.root.child(HEADER)
    }

    /// JSON mirror of the document; non-authoritative.
    pub fn to_json(&self) -> ProtocolResult<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| ProtocolError::logic(format!("procedure JSON mirror: {}", e)))
    }

    /// Rebuild a document from its JSON mirror, re-validating its structure.
    pub fn from_json(value: serde_json::Value, origin: &str) -> ProtocolResult<Self> {
        let mut doc: ProcedureDocument = serde_json::from_value(value)
            .map_err(|e| ProtocolError::format(origin, format!("invalid JSON mirror: {}", e)))?;
        doc.origin = origin.to_owned();
        doc.steps()?;
        Ok(doc)
    }

    fn step_elements(&self) -> ProtocolResult<&[Element]> {
        let root = &self.markup.root;
        if root.name != ROOT_ELEMENT {
            return Err(ProtocolError::format(
                &self.origin,
                format!("unexpected root element <{}>, expected <{}>", root.name, ROOT_ELEMENT),
            ));
        }
        let proc_steps = root.child(PROC_STEPS).ok_or_else(|| {
            ProtocolError::format(
                &self.origin,
                format!("<{}> is missing required <{}>", ROOT_ELEMENT, PROC_STEPS),
            )
        })?;
        if let Content::Text(t) = &proc_steps.content {
            if !t.trim().is_empty() {
                return Err(ProtocolError::format(
                    &self.origin,
                    format!("<{}> holds text instead of steps", PROC_STEPS),
                ));
            }
        }
        Ok(proc_steps.children())
    }

    fn step_elements_mut(&mut self) -> &mut [Element] {
        match self.markup.root.child_mut(PROC_STEPS) {
            Some(p) => p.children_mut(),
            None => &mut [],
        }
    }

    pub fn step_count(&self) -> usize {
        self.step_elements().map(|s| s.len()).unwrap_or(0)
    }

    /// Extract the typed, validated step list.
    pub fn steps(&self) -> ProtocolResult<Vec<Step>> {
        let elements = self.step_elements()?;
        let total = elements.len();
        elements
            .iter()
            .enumerate()
            .map(|(index, e)| {
                if e.name != TEST_STEP {
                    return Err(ProtocolError::format_at_step(
                        &self.origin,
                        index,
                        format!("unexpected element <{}> in <{}>", e.name, PROC_STEPS),
                    ));
                }
                read_step(e, index, total, &self.origin)
            })
            .collect()
    }

    /// Overwrite a step's control setpoint.
    pub fn set_step_value(&mut self, index: usize, value: &str) -> ProtocolResult<()> {
        let steps = self.step_elements_mut();
        let len = steps.len();
        let step = steps
            .get_mut(index)
            .ok_or_else(|| ProtocolError::logic(format!("step index {} outside 0..{}", index, len)))?;
        let field = step
            .child_mut("StepValue")
            .ok_or_else(|| ProtocolError::logic(format!("step {} has no <StepValue>", index)))?;
        field.set_text(value);
        Ok(())
    }

    /// Overwrite the threshold of one end entry.
    pub fn set_end_value(&mut self, index: usize, entry: usize, value: &str) -> ProtocolResult<()> {
        let steps = self.step_elements_mut();
        let len = steps.len();
        let step = steps
            .get_mut(index)
            .ok_or_else(|| ProtocolError::logic(format!("step index {} outside 0..{}", index, len)))?;
        let ends = step
            .child_mut("Ends")
            .ok_or_else(|| ProtocolError::logic(format!("step {} has no <Ends>", index)))?;
        let entries = ends.children_mut();
        let count = entries.len();
        let value_field = entries
            .get_mut(entry)
            .and_then(|e| e.child_mut("Value"))
            .ok_or_else(|| {
                ProtocolError::logic(format!(
                    "end entry {} outside 0..{} on step {}",
                    entry, count, index
                ))
            })?;
        value_field.set_text(value);
        Ok(())
    }

    /// Build a procedure from a template whose setpoints are written as
    /// `$NAME` placeholders.
    ///
    /// Rates are C-rates; the currents substituted for `$CHARGE_CURRENT` and
    /// `$DISCHARGE_CURRENT` are `rate * capacity`. `$CHARGE_RATE` and
    /// `$DISCHARGE_RATE` are also available. Uses [`BUILTIN_TEMPLATE`] when
    /// `template` is `None`.
    pub fn from_template_parameters(
        capacity: f64,
        charge_rate: f64,
        discharge_rate: f64,
        template: Option<TemplateRef<'_>>,
    ) -> ProtocolResult<Self> {
        let (bytes, origin) = match template {
            Some(t) => (t.read()?, t.origin()),
            None => (BUILTIN_TEMPLATE.to_vec(), BUILTIN_TEMPLATE_ORIGIN.to_owned()),
        };
        for (name, v) in [
            ("capacity", capacity),
            ("charge rate", charge_rate),
            ("discharge rate", discharge_rate),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(ProtocolError::format(
                    &origin,
                    format!("{} must be a positive number, got {}", name, v),
                ));
            }
        }

        let mut doc = Self::from_bytes(&bytes, &origin)?;
        let values = [
            ("CAPACITY", format_setpoint(capacity)),
            ("CHARGE_RATE", format_setpoint(charge_rate)),
            ("DISCHARGE_RATE", format_setpoint(discharge_rate)),
            ("CHARGE_CURRENT", format_setpoint(charge_rate * capacity)),
            ("DISCHARGE_CURRENT", format_setpoint(discharge_rate * capacity)),
        ];
        doc.substitute(&values)?;
        doc.steps()?;
        tracing::debug!(
            origin = %doc.origin,
            capacity,
            charge_rate,
            discharge_rate,
            "substituted procedure template"
        );
        Ok(doc)
    }

    fn substitute(&mut self, values: &[(&str, String)]) -> ProtocolResult<()> {
        let mut used: BTreeSet<String> = BTreeSet::new();
        let mut unknown: Option<String> = None;
        self.markup.root.walk_mut(&mut |e: &mut Element| {
            if unknown.is_some() {
                return;
            }
            if let Content::Text(raw) = &e.content {
                if !raw.contains('$') {
                    return;
                }
                match substitute_placeholders(raw, values, &mut used) {
                    Ok(replaced) => e.content = Content::Text(replaced),
                    Err(name) => unknown = Some(name),
                }
            }
        });
        if let Some(name) = unknown {
            return Err(ProtocolError::missing(&self.origin, name));
        }
        for required in REQUIRED_PLACEHOLDERS {
            if !used.contains(required) {
                return Err(ProtocolError::missing(&self.origin, required));
            }
        }
        Ok(())
    }
}

/// Replace every `$NAME` in `raw`. Returns the first unknown name on failure.
fn substitute_placeholders(
    raw: &str,
    values: &[(&str, String)],
    used: &mut BTreeSet<String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let tail = &rest[dollar + 1..];
        let len = tail
            .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(tail.len());
        let name = &tail[..len];
        if name.is_empty() {
            out.push('$');
            rest = tail;
            continue;
        }
        let value = values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| name.to_owned())?;
        out.push_str(value);
        used.insert(name.to_owned());
        rest = &tail[len..];
    }
    out.push_str(rest);
    Ok(out)
}

// ──────────────────────────────────────────────
// Step extraction
// ──────────────────────────────────────────────

fn required<'e>(e: &'e Element, name: &str, index: usize, origin: &str) -> ProtocolResult<&'e Element> {
    e.child(name).ok_or_else(|| {
        ProtocolError::format_at_step(
            origin,
            index,
            format!("<{}> is missing required <{}>", e.name, name),
        )
    })
}

fn text_of(e: &Element, index: usize, origin: &str) -> ProtocolResult<String> {
    e.text().ok_or_else(|| {
        ProtocolError::format_at_step(
            origin,
            index,
            format!("<{}> must hold text, not child elements", e.name),
        )
    })
}

fn entries<'e>(
    e: &'e Element,
    entry_name: &str,
    index: usize,
    origin: &str,
) -> ProtocolResult<&'e [Element]> {
    if let Content::Text(t) = &e.content {
        if !t.trim().is_empty() {
            return Err(ProtocolError::format_at_step(
                origin,
                index,
                format!("<{}> holds text instead of <{}> entries", e.name, entry_name),
            ));
        }
    }
    let children = e.children();
    if let Some(bad) = children.iter().find(|c| c.name != entry_name) {
        return Err(ProtocolError::format_at_step(
            origin,
            index,
            format!("unexpected element <{}> in <{}>", bad.name, e.name),
        ));
    }
    Ok(children)
}

fn read_step(e: &Element, index: usize, total: usize, origin: &str) -> ProtocolResult<Step> {
    let step_type = text_of(required(e, "StepType", index, origin)?, index, origin)?
        .trim()
        .to_owned();
    let mode = text_of(required(e, "StepMode", index, origin)?, index, origin)?;
    let value = text_of(required(e, "StepValue", index, origin)?, index, origin)?;

    let mut limits = Vec::new();
    if let Some(l) = e.child("Limits") {
        for c in l.children() {
            limits.push(StepLimit {
                name: c.name.clone(),
                value: text_of(c, index, origin)?.trim().to_owned(),
            });
        }
    }
    let clamped = limits
        .iter()
        .any(|l| l.name == "Voltage" && !l.value.is_empty());

    let ends = entries(required(e, "Ends", index, origin)?, "EndEntry", index, origin)?
        .iter()
        .map(|entry| read_end(entry, index, total, clamped, origin))
        .collect::<ProtocolResult<Vec<_>>>()?;

    let reports = entries(required(e, "Reports", index, origin)?, "ReportEntry", index, origin)?
        .iter()
        .map(|entry| {
            Ok(ReportEntry {
                report_type: text_of(required(entry, "ReportType", index, origin)?, index, origin)?
                    .trim()
                    .to_owned(),
                value: text_of(required(entry, "Value", index, origin)?, index, origin)?
                    .trim()
                    .to_owned(),
            })
        })
        .collect::<ProtocolResult<Vec<_>>>()?;

    let note = match e.child("StepNote") {
        Some(n) => text_of(n, index, origin)?.trim().to_owned(),
        None => String::new(),
    };
    let range = match e.child("Range") {
        Some(r) => text_of(r, index, origin)?.trim().to_owned(),
        None => String::new(),
    };

    Ok(Step {
        index,
        kind: StepKind::classify(&step_type),
        step_type,
        note,
        mode: ControlMode::classify(&mode),
        value: value.trim().to_owned(),
        limits,
        ends,
        reports,
        range,
    })
}

fn read_end(
    e: &Element,
    index: usize,
    total: usize,
    clamped: bool,
    origin: &str,
) -> ProtocolResult<EndEntry> {
    let end_type = text_of(required(e, "EndType", index, origin)?, index, origin)?
        .trim()
        .to_owned();
    let operator = text_of(required(e, "Oper", index, origin)?, index, origin)?
        .trim()
        .to_owned();
    let goto_text = text_of(required(e, "Step", index, origin)?, index, origin)?;
    let value = text_of(required(e, "Value", index, origin)?, index, origin)?
        .trim()
        .to_owned();

    let goto = match goto_text.trim() {
        "" => None,
        n => {
            let step: usize = n.parse().map_err(|_| {
                ProtocolError::format_at_step(
                    origin,
                    index,
                    format!("<Step> goto '{}' is not a step number", n),
                )
            })?;
            if step == 0 || step > total {
                return Err(ProtocolError::format_at_step(
                    origin,
                    index,
                    format!("<Step> goto {} is outside 1..={}", step, total),
                ));
            }
            Some(step)
        }
    };

    Ok(EndEntry {
        kind: EndKind::classify(&end_type, clamped),
        end_type,
        operator,
        goto,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(steps: &str) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\r\n",
                "<MaccorTestProcedure>\r\n",
                "  <header>\r\n",
                "    <ProcDesc>\r\n",
                "      <desc></desc>\r\n",
                "    </ProcDesc>\r\n",
                "  </header>\r\n",
                "  <ProcSteps>\r\n",
                "{}",
                "  </ProcSteps>\r\n",
                "</MaccorTestProcedure>\r\n",
            ),
            steps
        )
    }

    fn step(kind: &str, mode: &str, value: &str, ends: &str, note: &str) -> String {
        let ends = if ends.is_empty() {
            "      <Ends></Ends>\r\n".to_owned()
        } else {
            format!("      <Ends>\r\n{}      </Ends>\r\n", ends)
        };
        format!(
            concat!(
                "    <TestStep>\r\n",
                "      <StepType>{}</StepType>\r\n",
                "      <StepMode>{}</StepMode>\r\n",
                "      <StepValue>{}</StepValue>\r\n",
                "      <Limits/>\r\n",
                "{}",
                "      <Reports></Reports>\r\n",
                "      <Range>A</Range>\r\n",
                "      <StepNote>{}</StepNote>\r\n",
                "    </TestStep>\r\n",
            ),
            kind, mode, value, ends, note
        )
    }

    fn end(end_type: &str, oper: &str, goto: &str, value: &str) -> String {
        format!(
            concat!(
                "        <EndEntry>\r\n",
                "          <EndType>{}</EndType>\r\n",
                "          <SpecialType> </SpecialType>\r\n",
                "          <Oper>{}</Oper>\r\n",
                "          <Step>{}</Step>\r\n",
                "          <Value>{}</Value>\r\n",
                "        </EndEntry>\r\n",
            ),
            end_type, oper, goto, value
        )
    }

    #[test]
    fn classify_step_types() {
        assert_eq!(StepKind::classify("Charge  "), StepKind::Charge);
        assert_eq!(StepKind::classify("Dischrg "), StepKind::Discharge);
        assert_eq!(StepKind::classify("Do 1    "), StepKind::Do { counter: 1 });
        assert_eq!(StepKind::classify("Loop 2  "), StepKind::Loop { counter: 2 });
        assert_eq!(
            StepKind::classify("FastWave"),
            StepKind::Other {
                name: "FastWave".into()
            }
        );
        assert_eq!(
            StepKind::classify("Loop x"),
            StepKind::Other {
                name: "Loop x".into()
            }
        );
    }

    #[test]
    fn parses_steps_and_round_trips() {
        let src = doc(&format!(
            "{}{}",
            step(
                "Rest    ",
                "        ",
                "",
                &end("StepTime", " = ", "002", "00:10:00"),
                "initial rest"
            ),
            step(
                "Dischrg ",
                "Current ",
                "0.172",
                &end("Voltage ", "&lt;= ", "", "2.7"),
                ""
            ),
        ));
        let d = ProcedureDocument::from_bytes(src.as_bytes(), "t.000").unwrap();
        assert_eq!(d.to_bytes(), src.as_bytes());
        let steps = d.steps().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].note, "initial rest");
        assert_eq!(steps[0].ends[0].goto, Some(2));
        assert_eq!(steps[1].kind, StepKind::Discharge);
        assert_eq!(steps[1].mode, ControlMode::Current);
        assert_eq!(steps[1].ends[0].operator, "<=");
        assert_eq!(steps[1].ends[0].goto, None);
    }

    #[test]
    fn goto_outside_procedure_is_format_error() {
        let src = doc(&step(
            "Rest    ",
            "",
            "",
            &end("StepTime", " = ", "009", "00:10:00"),
            "",
        ));
        let err = ProcedureDocument::from_bytes(src.as_bytes(), "t.000").unwrap_err();
        assert!(matches!(err, ProtocolError::Format { step: Some(0), .. }));
    }

    #[test]
    fn missing_required_child_is_format_error() {
        let src = doc(&step("Rest    ", "", "", "", "")).replace("      <Reports></Reports>\r\n", "");
        let err = ProcedureDocument::from_bytes(src.as_bytes(), "t.000").unwrap_err();
        assert!(err.to_string().contains("missing required <Reports>"));
    }

    #[test]
    fn set_step_value_escapes_and_checks_range() {
        let src = doc(&step("Charge  ", "Current ", "1.0", "", ""));
        let mut d = ProcedureDocument::from_bytes(src.as_bytes(), "t.000").unwrap();
        d.set_step_value(0, "2.5").unwrap();
        assert_eq!(d.steps().unwrap()[0].value, "2.5");
        assert!(matches!(
            d.set_step_value(4, "1"),
            Err(ProtocolError::Logic { .. })
        ));
    }

    #[test]
    fn set_end_value_rewrites_one_threshold() {
        let src = doc(&step(
            "Charge  ",
            "Current ",
            "1.0",
            &format!(
                "{}{}",
                end("Voltage ", "&gt;= ", "", "4.2"),
                end("StepTime", " = ", "", "01:00:00")
            ),
            "",
        ));
        let mut d = ProcedureDocument::from_bytes(src.as_bytes(), "t.000").unwrap();
        d.set_end_value(0, 1, "02:00:00").unwrap();
        let steps = d.steps().unwrap();
        assert_eq!(steps[0].ends[0].value, "4.2");
        assert_eq!(steps[0].ends[1].value, "02:00:00");
        assert!(matches!(
            d.set_end_value(0, 2, "1"),
            Err(ProtocolError::Logic { .. })
        ));
        assert_eq!(
            d.header().and_then(|h| h.child("ProcDesc")).map(|p| p.children().len()),
            Some(1)
        );
    }

    #[test]
    fn placeholders_substitute_and_report_unknown_names() {
        let mut used = BTreeSet::new();
        let values = [("CHARGE_CURRENT", "0.172".to_owned())];
        assert_eq!(
            substitute_placeholders("$CHARGE_CURRENT", &values, &mut used).unwrap(),
            "0.172"
        );
        assert!(used.contains("CHARGE_CURRENT"));
        assert_eq!(
            substitute_placeholders("cost $ 5", &values, &mut used).unwrap(),
            "cost $ 5"
        );
        assert_eq!(
            substitute_placeholders("$VOLTAGE_MAX", &values, &mut used).unwrap_err(),
            "VOLTAGE_MAX"
        );
    }
}
