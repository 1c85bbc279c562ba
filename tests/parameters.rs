mod common;

use common::Workspace;
use scriptc::compiler::ScriptState;
use scriptc::errors::{DiagnosticKind, IncludeFailure};

const LIB: &str = "%free {\n  n :: num;\n  elem :: type\n}\ntotal :: elem\ntotal = n\n";

fn include_failure(ws: &Workspace, bindings: &str) -> IncludeFailure {
    ws.write("lib.m", LIB);
    let main = ws.write("main.m", &format!("%include \"lib\" {{{}}}\n", bindings));
    let mut session = ws.session();
    assert_eq!(session.load(&main), ScriptState::Error);
    session
        .reporter()
        .diagnostics()
        .iter()
        .find_map(|d| match &d.kind {
            DiagnosticKind::Include { failure } => Some(failure.clone()),
            _ => None,
        })
        .expect("include failure reported")
}

#[test]
fn test_bound_parameters_flow_into_definitions() {
    let ws = Workspace::new();
    ws.write("lib.m", LIB);
    let main = ws.write("main.m", "%include \"lib\" {n = 4; elem == num}\nresult = total\n");

    let mut session = ws.session();
    assert_eq!(session.load(&main), ScriptState::Loaded);
    let result = session.symbols().lookup("result").unwrap();
    assert_eq!(session.render(result), "4");
    assert!(session.describe("total").unwrap().starts_with("total :: elem"));
}

#[test]
fn test_missing_binding() {
    let ws = Workspace::new();
    assert_eq!(
        include_failure(&ws, "n = 4"),
        IncludeFailure::MissingBindings { names: vec!["elem".into()] }
    );
}

#[test]
fn test_binding_for_non_parameter() {
    let ws = Workspace::new();
    assert_eq!(
        include_failure(&ws, "n = 4; elem == num; total = 1"),
        IncludeFailure::NotFree { names: vec!["total".into()] }
    );
}

#[test]
fn test_type_binding_for_value_parameter() {
    let ws = Workspace::new();
    assert_eq!(
        include_failure(&ws, "n == num; elem == num"),
        IncludeFailure::WrongKind { name: "n".into(), expected_type: false }
    );
}

#[test]
fn test_failed_include_recompiles_once_fixed() {
    let ws = Workspace::new();
    include_failure(&ws, "n = 4");
    ws.write("main.m", "%include \"lib\" {n = 4; elem == num}\n");
    ws.touch("main.m", 5);

    let mut session = ws.session();
    assert_eq!(session.load(&ws.path("main.m")), ScriptState::Loaded);
}
