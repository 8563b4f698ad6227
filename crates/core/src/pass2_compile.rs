//! Pass 2: Step compilation -- translate one procedure step into its
//! schedule step, using the labels and gotos resolved in pass 1.
//!
//! Compilation is pure: it reads the step and the flow metadata and
//! returns a fresh [`ScheduleStep`].

use crate::convert::ConverterConfig;
use crate::error::{ProtocolError, ProtocolResult};
use crate::pass1_flow::FlowMetadata;
use crate::procedure::{ControlMode, EndKind, Step, StepKind};
use crate::schedule_step::{Operand, ScheduleLimit, ScheduleStep, END_TEST, NEXT_STEP, SET_VARIABLES};
use crate::units::{format_setpoint, negate_setpoint, parse_duration_seconds};

const STEP_TIME: &str = "PV_CHAN_Step_Time";

/// Variable mask bit of the cycle index.
const CYCLE_INDEX_BIT: u32 = 1;
/// Highest test counter a Set Variable(s) step can address.
const MAX_COUNTER: u8 = 4;

fn counter_bit(counter: u8) -> u32 {
    1 << counter
}

pub fn compile_to_schedule(
    step: &Step,
    index: usize,
    meta: &FlowMetadata,
    config: &ConverterConfig,
) -> ProtocolResult<ScheduleStep> {
    if step.index != index {
        return Err(ProtocolError::logic(format!(
            "step {} compiled at index {}",
            step.index, index
        )));
    }
    let label = meta.label(index)?.to_owned();
    let mut out = ScheduleStep {
        label,
        control_type: String::new(),
        ctrl_value: String::new(),
        ext_ctrl_value1: String::new(),
        ext_ctrl_value2: String::new(),
        current_range: config.current_range.clone(),
        limits: Vec::new(),
    };

    match &step.kind {
        StepKind::Charge | StepKind::Discharge => {
            compile_control(step, index, meta.origin(), &mut out)?;
            compile_ends(step, index, meta, &mut out)?;
            compile_reports(step, index, meta.origin(), &mut out)?;
        }
        StepKind::Rest => {
            out.control_type = "Rest".into();
            compile_ends(step, index, meta, &mut out)?;
            compile_reports(step, index, meta.origin(), &mut out)?;
        }
        StepKind::Do { counter } => {
            set_variables(&mut out, counter_bit(checked_counter(step, index, *counter)?), 0);
            out.limits.push(unconditional(NEXT_STEP));
        }
        StepKind::AdvanceCycle => {
            set_variables(&mut out, 0, CYCLE_INDEX_BIT);
            out.limits.push(unconditional(NEXT_STEP));
        }
        StepKind::Loop { counter } => {
            let bit = counter_bit(checked_counter(step, index, *counter)?);
            let lp = meta.loop_closing_at(index).ok_or_else(|| {
                ProtocolError::logic(format!("Loop step {} has no resolved loop", index))
            })?;
            let start = meta.label(lp.start)?;
            let variable = format!("TC_Counter{}", counter);
            let count = Operand::Literal(lp.count.to_string());
            set_variables(&mut out, 0, bit);
            out.limits
                .push(ScheduleLimit::step_limit(&variable, "<", count.clone(), start));
            out.limits
                .push(ScheduleLimit::step_limit(&variable, ">=", count, NEXT_STEP));
        }
        StepKind::End => {
            out.control_type = "Rest".into();
            out.limits.push(unconditional(END_TEST));
        }
        StepKind::Other { name } => {
            return Err(ProtocolError::UnsupportedStepType {
                index,
                step_type: name.clone(),
            })
        }
    }

    Ok(out)
}

fn checked_counter(step: &Step, index: usize, counter: u8) -> ProtocolResult<u8> {
    if counter > MAX_COUNTER {
        return Err(ProtocolError::UnsupportedStepType {
            index,
            step_type: step.step_type.clone(),
        });
    }
    Ok(counter)
}

/// Reset mask in the control value, increment mask in the first extended
/// value, decrement mask in the second.
fn set_variables(out: &mut ScheduleStep, reset: u32, increment: u32) {
    out.control_type = SET_VARIABLES.into();
    out.ctrl_value = reset.to_string();
    out.ext_ctrl_value1 = increment.to_string();
    out.ext_ctrl_value2 = "0".into();
}

fn unconditional(goto: &str) -> ScheduleLimit {
    ScheduleLimit::step_limit(STEP_TIME, ">=", Operand::Literal("0".into()), goto)
}

fn compile_control(step: &Step, index: usize, origin: &str, out: &mut ScheduleStep) -> ProtocolResult<()> {
    let discharge = step.kind == StepKind::Discharge;
    let unsupported = || ProtocolError::UnsupportedStepType {
        index,
        step_type: format!("{} ({:?} mode)", step.step_type, step.mode),
    };
    let (control_type, signed) = match &step.mode {
        ControlMode::Current if step.voltage_clamp().is_some() => ("CCCV", true),
        ControlMode::Current => ("Current(A)", true),
        ControlMode::Voltage => ("Voltage(V)", false),
        ControlMode::Power => ("Power(W)", true),
        ControlMode::Resistance => ("Load(Ohm)", false),
        ControlMode::None | ControlMode::Other(_) => return Err(unsupported()),
    };
    if step.value.is_empty() {
        return Err(ProtocolError::format_at_step(
            origin,
            index,
            format!("{} step has no setpoint", step.step_type),
        ));
    }
    out.control_type = control_type.into();
    out.ctrl_value = if discharge && signed {
        negate_setpoint(&step.value)
    } else {
        step.value.clone()
    };
    if let Some(clamp) = step.voltage_clamp().filter(|_| control_type == "CCCV") {
        out.ext_ctrl_value1 = clamp.to_owned();
    }
    Ok(())
}

fn compile_ends(
    step: &Step,
    index: usize,
    meta: &FlowMetadata,
    out: &mut ScheduleStep,
) -> ProtocolResult<()> {
    let discharge = step.kind == StepKind::Discharge;
    for (k, end) in step.ends.iter().enumerate() {
        let unsupported = || ProtocolError::UnsupportedCondition {
            index,
            kind: "end",
            condition: end.end_type.clone(),
        };
        let (channel, timed) = match &end.kind {
            EndKind::StepTime => (STEP_TIME, true),
            EndKind::TestTime => ("PV_CHAN_Test_Time", true),
            EndKind::Voltage => ("PV_CHAN_Voltage", false),
            EndKind::Current => ("PV_CHAN_Current", false),
            EndKind::CvStageCurrent => ("PV_CHAN_CV_Stage_Current", false),
            EndKind::Capacity if discharge => ("PV_CHAN_Discharge_Capacity", false),
            EndKind::Capacity => ("PV_CHAN_Charge_Capacity", false),
            EndKind::Energy if discharge => ("PV_CHAN_Discharge_Energy", false),
            EndKind::Energy => ("PV_CHAN_Charge_Energy", false),
            EndKind::Power => ("PV_CHAN_Power", false),
            EndKind::LoopCount | EndKind::Other(_) => return Err(unsupported()),
        };
        let right = operand(&end.value, timed, index, channel, meta.origin())?;
        let goto = meta.render_goto(meta.end_goto(index, k)?)?;
        out.limits
            .push(ScheduleLimit::step_limit(channel, &end.operator, right, goto));
    }
    Ok(())
}

fn compile_reports(step: &Step, index: usize, origin: &str, out: &mut ScheduleStep) -> ProtocolResult<()> {
    for report in &step.reports {
        let (channel, timed) = match report.report_type.as_str() {
            "StepTime" => ("DV_Time", true),
            "Voltage" => ("DV_Voltage", false),
            "Current" => ("DV_Current", false),
            other => {
                return Err(ProtocolError::UnsupportedCondition {
                    index,
                    kind: "report",
                    condition: other.to_owned(),
                })
            }
        };
        let right = operand(&report.value, timed, index, channel, origin)?;
        out.limits.push(ScheduleLimit::log_limit(channel, right));
    }
    Ok(())
}

/// Right-hand operand of a limit. Durations become seconds.
fn operand(
    value: &str,
    timed: bool,
    index: usize,
    channel: &str,
    origin: &str,
) -> ProtocolResult<Operand> {
    if value.is_empty() {
        return Err(ProtocolError::format_at_step(
            origin,
            index,
            format!("{} condition has no value", channel),
        ));
    }
    if !timed {
        return Ok(Operand::classify(value));
    }
    let seconds = parse_duration_seconds(value).ok_or_else(|| {
        ProtocolError::format_at_step(
            origin,
            index,
            format!("'{}' is not a duration", value),
        )
    })?;
    Ok(Operand::Literal(format_setpoint(seconds)))
}
