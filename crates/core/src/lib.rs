#![allow(clippy::result_large_err)]
//! cycler-core: battery-cycler protocol bridge.
//!
//! Reads and writes Maccor procedure files (`.000`) and Arbin schedule
//! files (`.sdu`) with byte-exact round trips, and converts a procedure's
//! step sequence into schedule step/limit blocks in two passes.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`ProcedureDocument`] -- procedure model, parser, serializer, templates
//! - [`ScheduleDocument`] -- schedule model, parser, serializer, fast charge
//! - [`ProcedureToScheduleConverter`] -- two-pass conversion driver
//! - [`FlowMetadata`] -- labels and goto targets (Pass 1 output)
//! - [`ProtocolError`] -- error type shared by every operation
//!
//! The pass entry functions are also re-exported for callers that want
//! to run them individually.

pub mod convert;
pub mod error;
pub mod markup;
pub mod pass1_flow;
pub mod pass2_compile;
pub mod procedure;
pub mod schedule;
pub mod schedule_step;
pub mod source;
pub mod units;

// ── Convenience re-exports: key types ────────────────────────────────

pub use convert::{ConverterConfig, ProcedureToScheduleConverter};
pub use error::{ProtocolError, ProtocolResult};
pub use pass1_flow::{FlowControl, FlowMetadata, Goto, LoopConstruct};
pub use procedure::{ControlMode, EndEntry, EndKind, ProcedureDocument, ReportEntry, Step, StepKind};
pub use schedule::{FastChargeFields, ScheduleDocument};
pub use schedule_step::{Operand, ScheduleLimit, ScheduleStep, END_TEST, NEXT_STEP};
pub use source::{FileSystemSource, InMemorySource, TemplateRef, TemplateSource};

// ── Convenience re-exports: pass entry points ────────────────────────

pub use pass1_flow::{composite_label, resolve_flow};
pub use pass2_compile::compile_to_schedule;
