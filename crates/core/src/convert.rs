//! Procedure-to-schedule conversion orchestrator.
//!
//! Runs the two passes in order:
//! 1. Flow -- composite labels, goto targets and loop constructs
//! 2. Compile -- one schedule step per procedure step
//!
//! then merges the compiled steps into a baseline schedule. Writing the
//! output in [`ProcedureToScheduleConverter::create_schedule_file`] is the
//! only I/O performed here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::pass1_flow::{self, FlowMetadata};
use crate::pass2_compile;
use crate::procedure::{ProcedureDocument, Step};
use crate::schedule::ScheduleDocument;
use crate::schedule_step::ScheduleStep;
use crate::source::TemplateRef;

/// Conversion settings not carried by the procedure itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConverterConfig {
    /// `m_szCurrentRange` written on every step.
    pub current_range: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            current_range: "Range1".to_owned(),
        }
    }
}

pub struct ProcedureToScheduleConverter {
    origin: String,
    steps: Vec<Step>,
    config: ConverterConfig,
}

impl ProcedureToScheduleConverter {
    pub fn new(steps: Vec<Step>, origin: impl Into<String>) -> Self {
        ProcedureToScheduleConverter {
            origin: origin.into(),
            steps,
            config: ConverterConfig::default(),
        }
    }

    pub fn from_procedure(doc: &ProcedureDocument) -> ProtocolResult<Self> {
        Ok(Self::new(doc.steps()?, doc.origin()))
    }

    pub fn with_config(mut self, config: ConverterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Pass 1 over the converter's steps.
    pub fn create_metadata(&self) -> ProtocolResult<FlowMetadata> {
        pass1_flow::resolve_flow(&self.steps, &self.origin)
    }

    /// Pass 2 for the step at `index`.
    pub fn compile_to_schedule(
        &self,
        index: usize,
        meta: &FlowMetadata,
    ) -> ProtocolResult<ScheduleStep> {
        if meta.len() != self.steps.len() {
            return Err(ProtocolError::logic(format!(
                "flow metadata covers {} steps, procedure has {}",
                meta.len(),
                self.steps.len()
            )));
        }
        let step = self.steps.get(index).ok_or_else(|| {
            ProtocolError::logic(format!(
                "step index {} outside 0..{}",
                index,
                self.steps.len()
            ))
        })?;
        pass2_compile::compile_to_schedule(step, index, meta, &self.config)
    }

    pub fn compile_all(&self, meta: &FlowMetadata) -> ProtocolResult<Vec<ScheduleStep>> {
        (0..self.steps.len())
            .map(|i| self.compile_to_schedule(i, meta))
            .collect()
    }

    /// Both passes merged into `baseline`, without writing anything.
    pub fn build_schedule(&self, baseline: TemplateRef<'_>) -> ProtocolResult<ScheduleDocument> {
        let meta = self.create_metadata()?;
        let compiled = self.compile_all(&meta)?;
        tracing::debug!(
            origin = %self.origin,
            steps = compiled.len(),
            limits = compiled.iter().map(|s| s.limits.len()).sum::<usize>(),
            "compiled schedule steps"
        );
        let mut doc = ScheduleDocument::from_bytes(&baseline.read()?, &baseline.origin())?;
        doc.replace_steps(&compiled)?;
        Ok(doc)
    }

    /// Convert into `template`'s layout and write the result to `output`.
    pub fn create_schedule_file(
        &self,
        template: TemplateRef<'_>,
        output: &Path,
    ) -> ProtocolResult<ScheduleDocument> {
        let doc = self.build_schedule(template)?;
        doc.serialize(output)?;
        Ok(doc)
    }
}
