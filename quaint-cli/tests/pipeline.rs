// Driver-level checks: a source file on disk through the whole pipeline.

use quaint_diagnostics::DiagnosticEngine;
use quaint_vm::Machine;
use std::fs;

#[test]
fn test_program_file_compiles_and_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("program.qn");
    fs::write(&path, "main() { exit(7 as i32); }").unwrap();

    let source = fs::read_to_string(&path).unwrap();
    let mut engine = DiagnosticEngine::new();
    let program = quaint_compiler::compile(&source, &mut engine).unwrap();

    let mut out = Vec::new();
    let status = {
        let mut machine = Machine::with_output(&program, Box::new(&mut out));
        machine.run().unwrap()
    };
    assert_eq!(status, 7);
}

#[test]
fn test_compile_errors_are_located() {
    let source = "main() {\n    x = missing;\n}\n";
    let mut engine = DiagnosticEngine::new();
    assert!(quaint_compiler::compile(source, &mut engine).is_err());

    let diag = &engine.diagnostics()[0];
    let (line, _) = diag.span.line_col(source);
    assert_eq!(line, 2);
    let rendered = diag.render("program.qn", source);
    assert!(rendered.contains("program.qn:2:"));
}

#[test]
fn test_listing_is_printable() {
    let mut engine = DiagnosticEngine::new();
    let program = quaint_compiler::compile("main() { }", &mut engine).unwrap();
    let text = quaint_compiler::listing(&program);
    assert!(text.lines().count() >= 17);
    assert!(text.contains("bfun"));
}
