//! Typed schedule steps and the `[Schedule_Step<N>]` /
//! `[Schedule_Step<N>_Limit<M>]` blocks they occupy in a schedule file.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::schedule::Section;

/// Goto sentinel: continue with the following step.
pub const NEXT_STEP: &str = "Next Step";
/// Goto sentinel: terminate the test.
pub const END_TEST: &str = "End Test";
/// Control type of counter and cycle bookkeeping steps.
pub const SET_VARIABLES: &str = "Set Variable(s)";

/// Step block keys, in the order the schedule editor writes them.
pub const STEP_KEYS: [&str; 7] = [
    "m_szLabel",
    "m_szStepCtrlType",
    "m_szCtrlValue",
    "m_szExtCtrlValue1",
    "m_szExtCtrlValue2",
    "m_szCurrentRange",
    "m_uLimitNum",
];

/// Limit block keys, in editor order. Only `Equation0` is populated.
pub const LIMIT_KEYS: [&str; 12] = [
    "m_bStepLimit",
    "m_bLogDataLimit",
    "m_szGotoStep",
    "Equation0_szLeft",
    "Equation0_szCompareSign",
    "Equation0_szRight",
    "Equation1_szLeft",
    "Equation1_szCompareSign",
    "Equation1_szRight",
    "Equation2_szLeft",
    "Equation2_szCompareSign",
    "Equation2_szRight",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Literal(String),
    /// Reference to another channel or variable by name.
    Field(String),
}

impl Operand {
    /// Numbers, durations and anything not shaped like an identifier are
    /// literals; identifiers (`PV_CHAN_Voltage`, `TC_Counter1`) are fields.
    pub fn classify(text: &str) -> Operand {
        let t = text.trim();
        let identifier = t.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if identifier && t.parse::<f64>().is_err() {
            Operand::Field(t.to_owned())
        } else {
            Operand::Literal(t.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operand::Literal(s) | Operand::Field(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleLimit {
    pub left: String,
    pub compare_sign: String,
    pub right: Operand,
    /// Composite label, [`NEXT_STEP`] or [`END_TEST`].
    pub goto: String,
    /// Ends the step when it fires.
    pub step_limit: bool,
    /// Records a data point when it fires.
    pub log_data_limit: bool,
}

impl ScheduleLimit {
    pub fn step_limit(left: &str, compare_sign: &str, right: Operand, goto: &str) -> Self {
        ScheduleLimit {
            left: left.to_owned(),
            compare_sign: compare_sign.to_owned(),
            right,
            goto: goto.to_owned(),
            step_limit: true,
            log_data_limit: true,
        }
    }

    pub fn log_limit(left: &str, right: Operand) -> Self {
        ScheduleLimit {
            left: left.to_owned(),
            compare_sign: ">=".to_owned(),
            right,
            goto: NEXT_STEP.to_owned(),
            step_limit: false,
            log_data_limit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStep {
    pub label: String,
    pub control_type: String,
    pub ctrl_value: String,
    pub ext_ctrl_value1: String,
    pub ext_ctrl_value2: String,
    pub current_range: String,
    pub limits: Vec<ScheduleLimit>,
}

pub fn step_heading(index: usize) -> String {
    format!("Schedule_Step{}", index)
}

pub fn limit_heading(index: usize, limit: usize) -> String {
    format!("Schedule_Step{}_Limit{}", index, limit)
}

/// `Schedule_Step7` → `(7, None)`, `Schedule_Step7_Limit2` → `(7, Some(2))`.
pub fn parse_step_heading(heading: &str) -> Option<(usize, Option<usize>)> {
    let rest = heading.strip_prefix("Schedule_Step")?;
    let digits = |s: &str| -> Option<usize> {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            s.parse().ok()
        } else {
            None
        }
    };
    match rest.split_once("_Limit") {
        Some((step, limit)) => Some((digits(step)?, Some(digits(limit)?))),
        None => Some((digits(rest)?, None)),
    }
}

fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

impl ScheduleStep {
    /// Render the step block followed by its limit blocks.
    pub fn to_sections(&self, index: usize) -> Vec<Section> {
        let mut step = Section::new(step_heading(index));
        let limit_num = self.limits.len().to_string();
        let values = [
            self.label.as_str(),
            self.control_type.as_str(),
            self.ctrl_value.as_str(),
            self.ext_ctrl_value1.as_str(),
            self.ext_ctrl_value2.as_str(),
            self.current_range.as_str(),
            limit_num.as_str(),
        ];
        for (key, value) in STEP_KEYS.iter().zip(values) {
            step.push(key, value);
        }

        let mut sections = vec![step];
        for (k, limit) in self.limits.iter().enumerate() {
            let mut s = Section::new(limit_heading(index, k));
            let values = [
                flag(limit.step_limit),
                flag(limit.log_data_limit),
                limit.goto.as_str(),
                limit.left.as_str(),
                limit.compare_sign.as_str(),
                limit.right.as_str(),
                "",
                "",
                "",
                "",
                "",
                "",
            ];
            for (key, value) in LIMIT_KEYS.iter().zip(values) {
                s.push(key, value);
            }
            sections.push(s);
        }
        sections
    }

    /// Read a step back from its step block and its limit blocks (in order).
    pub fn from_sections(step: &Section, limits: &[&Section], origin: &str) -> ProtocolResult<Self> {
        let field = |s: &Section, key: &str| -> ProtocolResult<String> {
            s.get(key).map(str::to_owned).ok_or_else(|| {
                ProtocolError::format(origin, format!("[{}] is missing {}", s.heading, key))
            })
        };
        let declared = field(step, "m_uLimitNum")?;
        if declared.trim().parse::<usize>().ok() != Some(limits.len()) {
            return Err(ProtocolError::format(
                origin,
                format!(
                    "[{}] declares m_uLimitNum={} but has {} limit blocks",
                    step.heading,
                    declared,
                    limits.len()
                ),
            ));
        }
        let limits = limits
            .iter()
            .map(|s| {
                Ok(ScheduleLimit {
                    left: field(s, "Equation0_szLeft")?,
                    compare_sign: field(s, "Equation0_szCompareSign")?,
                    right: Operand::classify(&field(s, "Equation0_szRight")?),
                    goto: field(s, "m_szGotoStep")?,
                    step_limit: field(s, "m_bStepLimit")? == "1",
                    log_data_limit: field(s, "m_bLogDataLimit")? == "1",
                })
            })
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(ScheduleStep {
            label: field(step, "m_szLabel")?,
            control_type: field(step, "m_szStepCtrlType")?,
            ctrl_value: field(step, "m_szCtrlValue")?,
            ext_ctrl_value1: field(step, "m_szExtCtrlValue1")?,
            ext_ctrl_value2: field(step, "m_szExtCtrlValue2")?,
            current_range: field(step, "m_szCurrentRange")?,
            limits,
        })
    }
}
