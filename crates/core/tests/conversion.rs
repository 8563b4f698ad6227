//! End-to-end conversion of the diagnostic procedure fixture, plus the
//! template and fast-charge substitutions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use cycler_core::procedure::BUILTIN_TEMPLATE;
use cycler_core::{
    Goto, InMemorySource, Operand, ProcedureDocument, ProcedureToScheduleConverter,
    ProtocolError, ScheduleDocument, ScheduleStep, StepKind, TemplateRef, END_TEST, NEXT_STEP,
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn diagnostic() -> ProcedureToScheduleConverter {
    let doc = ProcedureDocument::parse(&fixture("diagnostic.000")).unwrap();
    ProcedureToScheduleConverter::from_procedure(&doc).unwrap()
}

fn compiled() -> Vec<ScheduleStep> {
    let c = diagnostic();
    let meta = c.create_metadata().unwrap();
    c.compile_all(&meta).unwrap()
}

// ──────────────────────────────────────────────
// Procedure to schedule
// ──────────────────────────────────────────────

#[test]
fn discharge_step_limits_resolve_labels() {
    let c = diagnostic();
    let meta = c.create_metadata().unwrap();
    let step = c.compile_to_schedule(5, &meta).unwrap();
    assert_eq!(step.label, "6-None");
    assert_eq!(step.control_type, "Current(A)");
    assert_eq!(step.ctrl_value, "-0.0043");
    assert_eq!(step.limits[0].left, "PV_CHAN_Voltage");
    assert_eq!(step.limits[0].goto, NEXT_STEP);
    assert_eq!(step.limits[1].right, Operand::Literal("108000".into()));
    assert_eq!(step.limits[2].goto, "70-These are the 2 reset cycles");
    // Report entries follow as logging limits.
    assert_eq!(step.limits.len(), 4);
    assert_eq!(step.limits[3].left, "DV_Voltage");
    assert!(!step.limits[3].step_limit);
}

#[test]
fn clamped_charge_ends_on_cv_stage_current() {
    let c = diagnostic();
    let meta = c.create_metadata().unwrap();
    let step = c.compile_to_schedule(8, &meta).unwrap();
    assert_eq!(step.control_type, "CCCV");
    assert_eq!(step.ext_ctrl_value1, "4.2");
    assert_eq!(step.limits[0].left, "PV_CHAN_CV_Stage_Current");
    assert_eq!(step.limits[0].compare_sign, "<=");
    assert_eq!(step.limits[0].right, Operand::Literal("0.0172".into()));
}

#[test]
fn loop_steps_branch_back_to_loop_start() {
    let c = diagnostic();
    let meta = c.create_metadata().unwrap();
    assert_eq!(meta.loop_start_label(7), Some("5-reset cycle C/20"));
    assert_eq!(meta.loop_start_label(15), Some("11-None"));
    assert_eq!(meta.loop_start_label(68), Some("38-reset cycle"));

    let step = c.compile_to_schedule(15, &meta).unwrap();
    assert_eq!(step.limits[0].left, "TC_Counter2");
    assert_eq!(step.limits[0].right, Operand::Literal("9".into()));
    assert_eq!(step.limits[0].goto, "11-None");
}

#[test]
fn every_loop_becomes_two_set_variable_limits() {
    let c = diagnostic();
    let steps = compiled();
    let mut loops = 0;
    for (i, step) in c.steps().iter().enumerate() {
        if let StepKind::Loop { .. } = step.kind {
            loops += 1;
            assert_eq!(steps[i].control_type, "Set Variable(s)");
            assert_eq!(steps[i].limits.len(), 2, "step {}", i);
            assert_eq!(steps[i].limits[1].goto, NEXT_STEP);
        }
    }
    assert_eq!(loops, 4);
}

#[test]
fn labels_are_unique() {
    let meta = diagnostic().create_metadata().unwrap();
    let unique: HashSet<&String> = meta.labels().iter().collect();
    assert_eq!(unique.len(), meta.len());
    assert_eq!(meta.len(), 73);
}

#[test]
fn every_goto_names_a_label_or_sentinel() {
    let meta = diagnostic().create_metadata().unwrap();
    let labels: HashSet<&str> = meta.labels().iter().map(String::as_str).collect();
    for step in compiled() {
        for limit in &step.limits {
            assert!(
                limit.goto == NEXT_STEP || limit.goto == END_TEST || labels.contains(limit.goto.as_str()),
                "dangling goto {:?} on {}",
                limit.goto,
                step.label
            );
        }
    }
}

#[test]
fn implicit_and_explicit_references_resolve() {
    let meta = diagnostic().create_metadata().unwrap();
    // Goto to the following step is implicit.
    assert_eq!(meta.end_goto(0, 0).unwrap(), Goto::NextStep);
    assert_eq!(meta.target_label(0, Goto::NextStep).unwrap(), "2-None");
    // Forward jump to the final step.
    assert_eq!(meta.end_goto(21, 1).unwrap(), Goto::Step(72));
    assert_eq!(meta.render_goto(Goto::Step(72)).unwrap(), "73-None");
    // Backward jump.
    assert_eq!(meta.end_goto(70, 1).unwrap(), Goto::Step(35));
    assert_eq!(meta.render_goto(Goto::Step(35)).unwrap(), "36-pre reset");
}

#[test]
fn end_step_terminates_the_test() {
    let steps = compiled();
    let last = steps.last().unwrap();
    assert_eq!(last.control_type, "Rest");
    assert_eq!(last.limits.len(), 1);
    assert_eq!(last.limits[0].goto, END_TEST);
}

#[test]
fn conversion_is_deterministic() {
    let baseline = fixture("fast_charge_baseline.sdu");
    let a = diagnostic()
        .build_schedule(TemplateRef::file(&baseline))
        .unwrap()
        .to_bytes()
        .unwrap();
    let b = diagnostic()
        .build_schedule(TemplateRef::file(&baseline))
        .unwrap()
        .to_bytes()
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn create_schedule_file_merges_into_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("diagnostic.sdu");
    let baseline = fixture("fast_charge_baseline.sdu");
    diagnostic()
        .create_schedule_file(TemplateRef::file(&baseline), &out)
        .unwrap();

    let written = ScheduleDocument::parse(&out).unwrap();
    assert_eq!(written.get("Schedule", "m_uStepNum"), Some("73"));
    assert_eq!(written.step_count(), 73);
    assert_eq!(written.steps().unwrap(), compiled());
    assert_eq!(
        written.get("Schedule_UserDefineSafety0", "m_szName"),
        Some("cell temperature")
    );
    assert_eq!(written.get("Schedule", "m_szComments"), Some("R\u{e9}f\u{e9}rence cell"));
    assert_eq!(written.sections.last().unwrap().heading, "Schedule_UserDefineSafety0");
}

#[test]
fn unsupported_step_type_fails_with_index() {
    let src = std::fs::read_to_string(fixture("rest_lf.000"))
        .unwrap()
        .replacen("<StepType>End     </StepType>", "<StepType>FastWave</StepType>", 1);
    let doc = ProcedureDocument::from_bytes(src.as_bytes(), "wave.000").unwrap();
    let c = ProcedureToScheduleConverter::from_procedure(&doc).unwrap();
    let meta = c.create_metadata().unwrap();
    let err = c.compile_all(&meta).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::UnsupportedStepType { index: 1, ref step_type } if step_type == "FastWave"
    ));
}

#[test]
fn note_with_line_break_is_not_written() {
    let src = std::fs::read_to_string(fixture("rest_lf.000"))
        .unwrap()
        .replacen("only &lt;rest&gt;", "line1&#13;&#10;line2=x", 1);
    let doc = ProcedureDocument::from_bytes(src.as_bytes(), "note.000").unwrap();
    let c = ProcedureToScheduleConverter::from_procedure(&doc).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("note.sdu");
    let err = c
        .create_schedule_file(TemplateRef::file(&fixture("fast_charge_baseline.sdu")), &out)
        .unwrap_err();
    assert_eq!(err.kind(), "format");
    assert!(err.to_string().contains("m_szLabel"), "{}", err);
    assert!(!out.exists());
}

// ──────────────────────────────────────────────
// Template substitution
// ──────────────────────────────────────────────

#[test]
fn builtin_template_substitutes_currents() {
    let doc = ProcedureDocument::from_template_parameters(0.086, 2.0, 1.0, None).unwrap();
    let steps = doc.steps().unwrap();
    assert_eq!(steps[1].value, "0.172");
    assert_eq!(steps[1].ends[0].value, "0.086");
    assert_eq!(steps[3].value, "0.086");
    let header = String::from_utf8(doc.to_bytes()).unwrap();
    assert!(header.contains("Single cycle at 2 C charge and 1 C discharge"));
    assert!(!header.contains('$'));

    let c = ProcedureToScheduleConverter::from_procedure(&doc).unwrap();
    let meta = c.create_metadata().unwrap();
    let charge = c.compile_to_schedule(1, &meta).unwrap();
    assert_eq!(charge.control_type, "CCCV");
    assert_eq!(charge.limits[0].left, "PV_CHAN_Charge_Capacity");
}

#[test]
fn template_missing_placeholder_is_missing_parameter() {
    let template = String::from_utf8(BUILTIN_TEMPLATE.to_vec())
        .unwrap()
        .replace("$DISCHARGE_CURRENT", "0.1");
    let mut source = InMemorySource::default();
    source.insert("/t/EXP.000", template);
    let path = Path::new("/t/EXP.000");
    let err = ProcedureDocument::from_template_parameters(
        0.086,
        2.0,
        1.0,
        Some(TemplateRef::new(&source, path)),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::MissingParameter { ref name, .. } if name == "DISCHARGE_CURRENT"
    ));
}

#[test]
fn template_unknown_placeholder_is_missing_parameter() {
    let template = String::from_utf8(BUILTIN_TEMPLATE.to_vec())
        .unwrap()
        .replace("$CAPACITY", "$CAPACITY_MAH");
    let mut source = InMemorySource::default();
    source.insert("/t/EXP.000", template);
    let path = Path::new("/t/EXP.000");
    let err = ProcedureDocument::from_template_parameters(
        0.086,
        2.0,
        1.0,
        Some(TemplateRef::new(&source, path)),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::MissingParameter { ref name, .. } if name == "CAPACITY_MAH"
    ));
}

// ──────────────────────────────────────────────
// Fast charge
// ──────────────────────────────────────────────

#[test]
fn fast_charge_changes_only_the_substituted_fields() {
    let baseline = fixture("fast_charge_baseline.sdu");
    let doc = ScheduleDocument::from_fast_charge_parameters(
        1.1 * 3.6,
        0.086,
        1.1 * 5.0,
        TemplateRef::file(&baseline),
    )
    .unwrap();
    assert_eq!(doc.get("Schedule_Step2", "m_szCtrlValue"), Some("3.96"));
    assert_eq!(doc.get("Schedule_Step2_Limit0", "Equation0_szRight"), Some("0.086"));
    assert_eq!(doc.get("Schedule_Step3", "m_szCtrlValue"), Some("5.5"));

    let bytes = doc.to_bytes().unwrap();
    assert_eq!(bytes, std::fs::read(fixture("fast_charge_expected.sdu")).unwrap());

    let before = std::fs::read(&baseline).unwrap();
    let changed = before
        .split(|b| *b == b'\n')
        .zip(bytes.split(|b| *b == b'\n'))
        .filter(|(a, b)| a != b)
        .count();
    assert_eq!(changed, 3);
}

#[test]
fn fast_charge_baseline_without_step_is_missing_parameter() {
    let text = std::fs::read(fixture("fast_charge_baseline.sdu")).unwrap();
    let truncated = String::from_utf8_lossy(&text)
        .replace("[Schedule_Step3]", "[Schedule_Step9]")
        .into_bytes();
    let mut source = InMemorySource::default();
    source.insert("/base.sdu", truncated);
    let path = Path::new("/base.sdu");
    let err = ScheduleDocument::from_fast_charge_parameters(
        3.96,
        0.086,
        5.5,
        TemplateRef::new(&source, path),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::MissingParameter { ref name, .. } if name == "[Schedule_Step3] m_szCtrlValue"
    ));
}
