//! Pass 1: Step flow resolution -- assign every step its composite label,
//! resolve end-entry gotos, and pair `Do n` / `Loop n` steps into loop
//! constructs.
//!
//! The result is computed once per procedure and is read-only afterwards;
//! pass 2 only looks labels and targets up in it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ProtocolError, ProtocolResult};
use crate::procedure::{Step, StepKind};
use crate::schedule_step::{END_TEST, NEXT_STEP};

/// Where control goes when an end condition fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "step", rename_all = "snake_case")]
pub enum Goto {
    NextStep,
    /// 0-based index of the target step, never the immediately following one.
    Step(usize),
    EndTest,
}

/// A `Do n` ... `Loop n` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopConstruct {
    pub counter: u8,
    /// Index of the `Do` step.
    pub open: usize,
    /// Index of the first step of the loop body.
    pub start: usize,
    /// Index of the `Loop` step.
    pub close: usize,
    /// Number of passes through the body.
    pub count: u32,
}

/// Per-step role in the procedure's control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl<'a> {
    Sequential,
    OpensLoop(&'a LoopConstruct),
    ClosesLoop(&'a LoopConstruct),
}

/// Pass 1 output: labels, goto targets and loops, addressable by step index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowMetadata {
    #[serde(skip)]
    origin: String,
    labels: Vec<String>,
    end_gotos: Vec<Vec<Goto>>,
    loops: Vec<LoopConstruct>,
}

/// `"<n>-<note>"` with `n` the 1-based step number; an empty note reads `None`.
pub fn composite_label(index: usize, note: &str) -> String {
    let note = note.trim();
    if note.is_empty() {
        format!("{}-None", index + 1)
    } else {
        format!("{}-{}", index + 1, note)
    }
}

pub fn resolve_flow(steps: &[Step], origin: &str) -> ProtocolResult<FlowMetadata> {
    let mut labels = Vec::with_capacity(steps.len());
    let mut end_gotos = Vec::with_capacity(steps.len());
    let mut open: BTreeMap<u8, usize> = BTreeMap::new();
    let mut loops = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        if step.index != i {
            return Err(ProtocolError::logic(format!(
                "step at position {} carries index {}",
                i, step.index
            )));
        }
        labels.push(composite_label(i, &step.note));
        let mut gotos = Vec::with_capacity(step.ends.len());
        for e in &step.ends {
            gotos.push(match e.goto {
                None => Goto::NextStep,
                Some(n) if n == 0 || n > steps.len() => {
                    return Err(ProtocolError::format_at_step(
                        origin,
                        i,
                        format!("goto {} is outside 1..={}", n, steps.len()),
                    ))
                }
                Some(n) if n == i + 2 => Goto::NextStep,
                Some(n) => Goto::Step(n - 1),
            });
        }
        end_gotos.push(gotos);

        match step.kind {
            StepKind::Do { counter } => {
                if let Some(prev) = open.insert(counter, i) {
                    return Err(ProtocolError::format_at_step(
                        origin,
                        i,
                        format!(
                            "Do {} opened again while the one at step {} is still open",
                            counter, prev
                        ),
                    ));
                }
            }
            StepKind::Loop { counter } => {
                let do_index = open.remove(&counter).ok_or_else(|| {
                    ProtocolError::format_at_step(
                        origin,
                        i,
                        format!("Loop {} has no open Do {}", counter, counter),
                    )
                })?;
                let start = do_index + 1;
                if start == i {
                    return Err(ProtocolError::format_at_step(
                        origin,
                        i,
                        format!("Loop {} closes an empty loop body", counter),
                    ));
                }
                let count = step
                    .loop_count()
                    .and_then(|c| c.trim().parse::<u32>().ok())
                    .filter(|c| *c >= 1)
                    .ok_or_else(|| {
                        ProtocolError::format_at_step(
                            origin,
                            i,
                            format!(
                                "Loop {} needs a positive integer loop count, got {:?}",
                                counter,
                                step.loop_count().unwrap_or("")
                            ),
                        )
                    })?;
                loops.push(LoopConstruct {
                    counter,
                    open: do_index,
                    start,
                    close: i,
                    count,
                });
            }
            _ => {}
        }
    }

    if let Some((counter, at)) = open.into_iter().next() {
        return Err(ProtocolError::format_at_step(
            origin,
            at,
            format!("Do {} is never closed by a Loop {}", counter, counter),
        ));
    }

    tracing::debug!(origin, steps = labels.len(), loops = loops.len(), "resolved step flow");
    Ok(FlowMetadata {
        origin: origin.to_owned(),
        labels,
        end_gotos,
        loops,
    })
}

impl FlowMetadata {
    /// Name of the procedure the steps came from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, index: usize) -> ProtocolResult<&str> {
        self.labels
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.out_of_range(index))
    }

    pub fn loops(&self) -> &[LoopConstruct] {
        &self.loops
    }

    pub fn loop_closing_at(&self, index: usize) -> Option<&LoopConstruct> {
        self.loops.iter().find(|l| l.close == index)
    }

    pub fn flow_control(&self, index: usize) -> ProtocolResult<FlowControl<'_>> {
        if index >= self.len() {
            return Err(self.out_of_range(index));
        }
        if let Some(l) = self.loop_closing_at(index) {
            return Ok(FlowControl::ClosesLoop(l));
        }
        Ok(match self.loops.iter().find(|l| l.open == index) {
            Some(l) => FlowControl::OpensLoop(l),
            None => FlowControl::Sequential,
        })
    }

    /// Label of the first body step of the loop closed at `index`.
    pub fn loop_start_label(&self, index: usize) -> Option<&str> {
        self.loop_closing_at(index)
            .and_then(|l| self.labels.get(l.start))
            .map(String::as_str)
    }

    pub fn end_gotos(&self, index: usize) -> ProtocolResult<&[Goto]> {
        self.end_gotos
            .get(index)
            .map(Vec::as_slice)
            .ok_or_else(|| self.out_of_range(index))
    }

    pub fn end_goto(&self, index: usize, entry: usize) -> ProtocolResult<Goto> {
        let gotos = self.end_gotos(index)?;
        gotos.get(entry).copied().ok_or_else(|| {
            ProtocolError::logic(format!(
                "end entry {} outside 0..{} on step {}",
                entry,
                gotos.len(),
                index
            ))
        })
    }

    /// The `m_szGotoStep` text for a goto: a sentinel or a composite label.
    pub fn render_goto(&self, goto: Goto) -> ProtocolResult<&str> {
        match goto {
            Goto::NextStep => Ok(NEXT_STEP),
            Goto::EndTest => Ok(END_TEST),
            Goto::Step(t) => self.label(t),
        }
    }

    /// Label of the step control actually reaches from `from`. A `NextStep`
    /// off the last step ends the test.
    pub fn target_label(&self, from: usize, goto: Goto) -> ProtocolResult<&str> {
        if from >= self.len() {
            return Err(self.out_of_range(from));
        }
        match goto {
            Goto::NextStep => Ok(self
                .labels
                .get(from + 1)
                .map(String::as_str)
                .unwrap_or(END_TEST)),
            Goto::EndTest => Ok(END_TEST),
            Goto::Step(t) => self.label(t),
        }
    }

    fn out_of_range(&self, index: usize) -> ProtocolError {
        ProtocolError::logic(format!("step index {} outside 0..{}", index, self.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{ControlMode, EndEntry, EndKind};

    fn step(index: usize, step_type: &str, note: &str, ends: Vec<EndEntry>) -> Step {
        Step {
            index,
            kind: StepKind::classify(step_type),
            step_type: step_type.to_owned(),
            note: note.to_owned(),
            mode: ControlMode::None,
            value: String::new(),
            limits: vec![],
            ends,
            reports: vec![],
            range: String::new(),
        }
    }

    fn end(goto: Option<usize>) -> EndEntry {
        EndEntry {
            end_type: "StepTime".into(),
            kind: EndKind::StepTime,
            operator: "=".into(),
            goto,
            value: "00:01:00".into(),
        }
    }

    fn loop_count(count: &str, goto: usize) -> EndEntry {
        EndEntry {
            end_type: "Loop Cnt".into(),
            kind: EndKind::LoopCount,
            operator: "=".into(),
            goto: Some(goto),
            value: count.into(),
        }
    }

    #[test]
    fn labels_use_step_number_and_note() {
        assert_eq!(composite_label(4, "reset cycle C/20"), "5-reset cycle C/20");
        assert_eq!(composite_label(10, "  "), "11-None");
    }

    #[test]
    fn gotos_resolve_forward_backward_and_implicit() {
        let steps = vec![
            step(0, "Rest", "", vec![end(None), end(Some(2)), end(Some(3))]),
            step(1, "Rest", "", vec![end(Some(1))]),
            step(2, "Rest", "last", vec![end(None)]),
        ];
        let meta = resolve_flow(&steps, "t").unwrap();
        assert_eq!(
            meta.end_gotos(0).unwrap(),
            &[Goto::NextStep, Goto::NextStep, Goto::Step(2)]
        );
        assert_eq!(meta.end_goto(1, 0).unwrap(), Goto::Step(0));
        assert_eq!(meta.render_goto(Goto::Step(2)).unwrap(), "3-last");
        assert_eq!(meta.target_label(0, Goto::NextStep).unwrap(), "2-None");
        assert_eq!(meta.target_label(2, Goto::NextStep).unwrap(), END_TEST);
        assert!(matches!(meta.end_goto(0, 3), Err(ProtocolError::Logic { .. })));
        assert!(matches!(meta.label(3), Err(ProtocolError::Logic { .. })));
    }

    #[test]
    fn nested_loops_pair_by_counter() {
        let steps = vec![
            step(0, "Do 1", "", vec![]),
            step(1, "Rest", "outer", vec![]),
            step(2, "Do 2", "", vec![]),
            step(3, "Rest", "", vec![]),
            step(4, "Loop 2", "", vec![loop_count("3", 6)]),
            step(5, "Loop 1", "", vec![loop_count("2", 7)]),
            step(6, "End", "", vec![]),
        ];
        let meta = resolve_flow(&steps, "t").unwrap();
        assert_eq!(meta.loops().len(), 2);
        assert_eq!(meta.loop_start_label(4), Some("4-None"));
        assert_eq!(meta.loop_start_label(5), Some("2-outer"));
        let inner = meta.loop_closing_at(4).unwrap();
        assert_eq!((inner.open, inner.start, inner.count), (2, 3, 3));
        assert!(matches!(meta.flow_control(0).unwrap(), FlowControl::OpensLoop(l) if l.close == 5));
        assert_eq!(meta.flow_control(1).unwrap(), FlowControl::Sequential);
    }

    #[test]
    fn unbalanced_loops_are_format_errors() {
        let dangling_loop = vec![step(0, "Loop 1", "", vec![loop_count("2", 1)])];
        let err = resolve_flow(&dangling_loop, "t").unwrap_err();
        assert!(err.to_string().contains("no open Do 1"));

        let unclosed = vec![step(0, "Do 3", "", vec![]), step(1, "Rest", "", vec![])];
        let err = resolve_flow(&unclosed, "t").unwrap_err();
        assert!(matches!(err, ProtocolError::Format { step: Some(0), .. }));

        let empty_body = vec![
            step(0, "Do 1", "", vec![]),
            step(1, "Loop 1", "", vec![loop_count("2", 2)]),
            step(2, "End", "", vec![]),
        ];
        assert!(resolve_flow(&empty_body, "t").is_err());

        let no_count = vec![
            step(0, "Do 1", "", vec![]),
            step(1, "Rest", "", vec![]),
            step(2, "Loop 1", "", vec![]),
        ];
        let err = resolve_flow(&no_count, "t").unwrap_err();
        assert!(err.to_string().contains("loop count"));
    }

    #[test]
    fn misnumbered_steps_are_logic_errors() {
        let steps = vec![step(0, "Rest", "", vec![]), step(5, "Rest", "", vec![])];
        assert!(matches!(
            resolve_flow(&steps, "t"),
            Err(ProtocolError::Logic { .. })
        ));
    }
}
