mod common;

use common::Workspace;
use scriptc::compiler::ScriptState;
use scriptc::errors::{DiagnosticKind, TypeClashEntry, TypeOrphanEntry};

#[test]
fn test_diamond_compiles_shared_file_once() {
    let ws = Workspace::new();
    ws.write("d.m", "type tree = Leaf | Node tree tree\nsize :: num\nsize = 1\n");
    ws.write("b.m", "%include \"d\"\nleft = size\n");
    ws.write("c.m", "%include \"d\"\nright = size\n");
    let a = ws.write("a.m", "%include \"b\"\n%include \"c\"\nboth = left\n");

    let mut session = ws.session();
    assert_eq!(session.load(&a), ScriptState::Loaded);
    assert_eq!(ws.parse_count("d.m"), 1);

    let names: Vec<String> = session
        .files()
        .iter()
        .map(|r| r.path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["a.m", "b.m", "d.m", "c.m"]);
    assert!(session.scratch().type_clashes.is_empty());
    assert!(!session.reporter().has_errors());
}

#[test]
fn test_diamond_with_visible_types_needs_no_clash() {
    let ws = Workspace::new();
    ws.write("d.m", "type tree = Leaf\n");
    ws.write("b.m", "%export + \"d\"\n%include \"d\"\nleft = Leaf\n");
    ws.write("c.m", "%export + \"d\"\n%include \"d\"\nright = Leaf\n");
    let a = ws.write("a.m", "%include \"b\"\n%include \"c\"\nboth :: tree\nboth = left\n");

    let mut session = ws.session();
    assert_eq!(session.load(&a), ScriptState::Loaded);
    assert_eq!(session.files().iter().filter(|r| r.path.ends_with("d.m")).count(), 1);
    let tree = session.symbols().lookup("tree").unwrap();
    assert_eq!(session.symbols().resolve(tree), tree);
}

#[test]
fn test_same_file_twice_is_idempotent() {
    let ws = Workspace::new();
    ws.write("d.m", "type tree = Leaf\nsize = 1\n");
    let a = ws.write("a.m", "%include \"d\"\n%include \"d\"\nuse = size\n");

    let mut session = ws.session();
    assert_eq!(session.load(&a), ScriptState::Loaded);
    assert_eq!(session.files().len(), 2);
    assert!(!session.scratch().unified.is_empty());
    for (from, to) in &session.scratch().unified {
        assert_eq!(session.symbols().resolve(*from), *to);
        assert!(!session.symbols().is_visible(*from));
    }
}

#[test]
fn test_renamed_type_is_a_clash() {
    let ws = Workspace::new();
    let d = ws.write("d.m", "type tree = Leaf\n");
    let a = ws.write("a.m", "%include \"d\"\n%include \"d\" {bush/tree}\n");

    let mut session = ws.session();
    assert_eq!(session.load(&a), ScriptState::Error);
    let clash = session
        .reporter()
        .diagnostics()
        .iter()
        .find_map(|d| match &d.kind {
            DiagnosticKind::TypeClash { entries } => Some(entries.clone()),
            _ => None,
        })
        .expect("type clash reported");
    assert_eq!(
        clash,
        vec![TypeClashEntry { file: d, canonical: "tree".into(), duplicates: vec!["bush".into()] }]
    );
    assert_eq!(session.batch().exit_code(), 1);
}

#[test]
fn test_renamed_synonym_is_fine() {
    let ws = Workspace::new();
    ws.write("d.m", "synonym count = num\n");
    let a = ws.write("a.m", "%include \"d\"\n%include \"d\" {total/count}\nx :: total\nx = 1\n");

    let mut session = ws.session();
    assert_eq!(session.load(&a), ScriptState::Loaded);
    assert!(session.scratch().type_clashes.is_empty());
}

#[test]
fn test_hidden_type_is_reported_as_orphan() {
    let ws = Workspace::new();
    let d = ws.write("d.m", "type point = Origin\norigin :: point\norigin = Origin\n");
    let b = ws.write("b.m", "%include \"d\"\n%export origin\n");
    let a = ws.write("a.m", "%include \"b\"\nhere = origin\n");

    let mut session = ws.session();
    assert_eq!(session.load(&a), ScriptState::Error);
    let orphans = session
        .reporter()
        .diagnostics()
        .iter()
        .find_map(|d| match &d.kind {
            DiagnosticKind::TypeOrphan { entries } => Some(entries.clone()),
            _ => None,
        })
        .expect("orphan reported");
    assert_eq!(
        orphans,
        vec![TypeOrphanEntry {
            type_name: "point".into(),
            defined_in: Some(d),
            via: b,
            needed_by: vec!["origin".into()],
        }]
    );
}

#[test]
fn test_type_included_directly_is_not_orphaned() {
    let ws = Workspace::new();
    ws.write("d.m", "type point = Origin\norigin :: point\norigin = Origin\n");
    ws.write("b.m", "%include \"d\"\n%export origin\n");
    let a = ws.write("a.m", "%include \"b\"\n%include \"d\"\nhere = origin\n");

    let mut session = ws.session();
    assert_eq!(session.load(&a), ScriptState::Loaded);
    assert!(session.scratch().type_orphans.is_empty());
}

#[test]
fn test_export_closure_through_file_items() {
    let ws = Workspace::new();
    ws.write("lib.m", "type shape = Dot\nsize = 1\n");
    let main = ws.write("main.m", "%export + \"lib\" -helper\n%include \"lib\"\nhelper = 2\narea = size\n");

    let mut session = ws.session();
    assert_eq!(session.load(&main), ScriptState::Loaded);
    let names: Vec<&str> = session.exported().iter().map(|id| session.symbols().name(*id)).collect();
    assert_eq!(names, vec!["area", "shape", "size", "Dot"]);
}
