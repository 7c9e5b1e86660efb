// Front-end behavior: context rules, scope resolution, operator
// constraints, layouts, and determinism of the emitted stream.

use quaint_compiler::{compile, listing, Instr};
use quaint_diagnostics::DiagnosticEngine;

fn compile_ok(source: &str) -> quaint_compiler::Program {
    let mut engine = DiagnosticEngine::new();
    match compile(source, &mut engine) {
        Ok(program) => program,
        Err(err) => {
            for diag in engine.diagnostics() {
                eprintln!("{}: {}", err, diag.message);
            }
            panic!("expected `{}` to compile", source);
        }
    }
}

fn compile_messages(source: &str) -> Vec<String> {
    let mut engine = DiagnosticEngine::new();
    let result = compile(source, &mut engine);
    assert!(result.is_err(), "expected `{}` to be rejected", source);
    engine
        .diagnostics()
        .iter()
        .map(|d| d.message.clone())
        .collect()
}

fn assert_rejected(source: &str, message: &str) {
    let messages = compile_messages(source);
    assert!(
        messages.iter().any(|m| m.contains(message)),
        "expected a `{}` error for `{}`, got {:?}",
        message,
        source,
        messages
    );
}

// ==================== Context rules ====================

#[test]
fn test_type_decl_only_at_unit() {
    assert_rejected(
        "main() { type T: u32; }",
        "type statement not in unit context",
    );
}

#[test]
fn test_wait_not_at_unit() {
    assert_rejected("wait q;", "wait statement in unit context");
}

#[test]
fn test_return_not_at_unit() {
    assert_rejected("return;", "return statement in unit context");
}

#[test]
fn test_control_flow_not_at_unit() {
    assert_rejected(
        "while 1 { }",
        "control-flow statement in unit context",
    );
}

#[test]
fn test_function_only_at_unit() {
    assert_rejected("main() { f() { } }", "function not in unit context");
}

#[test]
fn test_exposed_only_at_unit() {
    assert_rejected(
        "main() { exposed x: u32; }",
        "qualifier not in unit context",
    );
}

#[test]
fn test_static_not_at_unit() {
    assert_rejected("static x: u32;", "qualifier in unit context");
}

#[test]
fn test_const_function_rejected() {
    assert_rejected("const main() { }", "invalid qualifier for function");
}

// ==================== Declarations and types ====================

#[test]
fn test_duplicate_name_in_declaration() {
    assert_rejected("main() { a, a: u32; }", "duplicate name in declaration");
}

#[test]
fn test_duplicate_member() {
    assert_rejected(
        "type T: struct(a: u32, a: u8); main() { }",
        "duplicate name in type-name list",
    );
}

#[test]
fn test_type_redefinition() {
    assert_rejected(
        "type T: u32; type T: u8; main() { }",
        "redefinition of type",
    );
}

#[test]
fn test_undefined_type() {
    assert_rejected("main() { x: widget; }", "reference to undefined type");
}

#[test]
fn test_bare_ptr_rejected() {
    assert_rejected("main() { x: ptr; }", "pointer must have a subtype");
}

#[test]
fn test_bare_struct_rejected() {
    assert_rejected("main() { x: struct; }", "struct must have members");
}

#[test]
fn test_multi_name_declaration_compiles() {
    compile_ok("main() { a, b, c: u32 = 0 as u32; }");
}

#[test]
fn test_named_type_copied_on_use() {
    compile_ok(
        "type P: struct(x: u8, y: u32);\
         main() { a: P; b: P; a = b; }",
    );
}

// ==================== Scopes ====================

#[test]
fn test_duplicate_declaration() {
    assert_rejected("main() { x: u32; x: u8; }", "duplicate declaration");
}

#[test]
fn test_undefined_symbol() {
    assert_rejected("main() { x = y; }", "undefined symbol");
}

#[test]
fn test_local_forward_reference_rejected() {
    assert_rejected("main() { x: u32; x = y; y: u32; }", "undefined symbol");
}

#[test]
fn test_global_forward_reference_allowed() {
    compile_ok("main() { g = 1 as u32; } g: u32;");
}

#[test]
fn test_function_forward_reference_allowed() {
    compile_ok("main() { helper(); } helper() { }");
}

#[test]
fn test_shadowing_in_inner_block() {
    compile_ok("x: u32; main() { { x: u8; x = 1; } x = 2 as u32; }");
}

// ==================== Operator constraints ====================

#[test]
fn test_assignment_type_mismatch() {
    assert_rejected(
        "main() { x: u32; x = 1; }",
        "incompatible types in assignment",
    );
}

#[test]
fn test_signedness_mismatch() {
    assert_rejected(
        "main() { a: u32; b: i32; a = a + b; }",
        "operands differ in signedness",
    );
}

#[test]
fn test_size_mismatch() {
    assert_rejected("main() { a: u32; b: u8; a = a + b; }", "differing type sizes");
}

#[test]
fn test_shift_requires_unsigned() {
    assert_rejected(
        "main() { a: i32; a = a << (1 as i32); }",
        "signed left operand",
    );
}

#[test]
fn test_void_pointer_arithmetic_rejected() {
    assert_rejected(
        "main() { p: vptr; p = p + (1 as u64); }",
        "arithmetic on void pointer",
    );
}

#[test]
fn test_void_pointer_deref_rejected() {
    assert_rejected("main() { p: vptr; x: u8 = *p; }", "unary star to void pointer");
}

#[test]
fn test_assignment_to_literal_rejected() {
    assert_rejected("main() { 1 = 2; }", "lvalue is required");
}

#[test]
fn test_assignment_to_const_rejected() {
    assert_rejected(
        "main() { const x: u32 = 0 as u32; x = 1 as u32; }",
        "constant is not modifiable",
    );
}

#[test]
fn test_call_arity_checked() {
    assert_rejected("main() { f(1); } f() { }", "excessive argument count");
    assert_rejected(
        "main() { f(); } f(a: u32) { }",
        "wrong argument count",
    );
}

#[test]
fn test_call_argument_type_checked() {
    assert_rejected(
        "main() { f(1); } f(a: u32) { }",
        "arg does not match param type",
    );
}

#[test]
fn test_member_not_found() {
    assert_rejected(
        "type P: struct(x: u8); main() { p: P; p.y = 1; }",
        "member not found",
    );
}

#[test]
fn test_member_access_on_scalar_rejected() {
    assert_rejected("main() { x: u32; x.y = 1; }", "expecting a union or a struct");
}

#[test]
fn test_subscript_of_scalar_rejected() {
    assert_rejected(
        "main() { x: u32; x[0] = 1 as u32; }",
        "subscripted object is not an array",
    );
}

#[test]
fn test_signed_subscript_rejected() {
    assert_rejected(
        "main() { a: u32[4]; a[0 as i32] = 1 as u32; }",
        "signed array offset",
    );
}

#[test]
fn test_wait_needs_quaint() {
    assert_rejected("main() { x: u32; wait x; }", "wait needs quaint type");
}

#[test]
fn test_wait_for_needs_unsigned() {
    assert_rejected(
        "main() { q: quaint(); wait q for (1 as i32); }",
        "wait-for requires an unsigned value",
    );
}

#[test]
fn test_at_needs_quaint() {
    assert_rejected("main() { x: u32; y: u8 = x@end; }", "@ requires an lhs quaint");
}

#[test]
fn test_at_unknown_label() {
    assert_rejected(
        "main() { q: quaint(); y: u8 = q@main::missing; }",
        "no such label in function",
    );
}

#[test]
fn test_wait_until_unknown_function() {
    assert_rejected(
        "main() { q: quaint(); wait q until nowhere::label; }",
        "no such function",
    );
}

#[test]
fn test_return_type_checked() {
    assert_rejected(
        "main(): u32 { return 1; }",
        "return type does not match func type",
    );
    assert_rejected("main() { return 1; }", "returning a value in void func");
    assert_rejected(
        "main(): u32 { return; }",
        "return requires a value in a non-void func",
    );
}

#[test]
fn test_ternary_branch_types_checked() {
    assert_rejected(
        "main() { x: u32 = 1 ? (1 as u32) : (1 as u8); }",
        "differing types in conditional branches",
    );
}

#[test]
fn test_scope_operator_limited() {
    assert_rejected("main() { x: u32; y: u32 = x::z; }", "operator not implemented");
}

#[test]
fn test_enum_value_resolves() {
    compile_ok(
        "type Color: enum(red, green, blue): u32;\
         main() { c: u32 = Color::green as u32; }",
    );
}

#[test]
fn test_enum_unknown_value() {
    assert_rejected(
        "type Color: enum(red): u32; main() { c: u32 = Color::mauve as u32; }",
        "no such enum value",
    );
}

#[test]
fn test_number_too_large() {
    assert_rejected("main() { x: u64 = 99999999999999999999; }", "number literal too large");
}

// ==================== Code generation ====================

#[test]
fn test_bfun_prelude() {
    let program = compile_ok("main() { }");
    assert!(program.insns.len() > 17);
    for insn in &program.insns[..17] {
        assert_eq!(*insn, Instr::Bfun);
    }
    // the entry function starts right after the prelude
    assert!(matches!(program.insns[17], Instr::Incsp { .. }));
}

#[test]
fn test_frame_reserves_locals_only() {
    // one u32 parameter (8-aligned) and one u64 local: the entry incsp
    // reserves just the local region
    let program = compile_ok("main(a: u32) { x: u64; }");
    assert!(matches!(
        program.insns[17],
        Instr::Incsp { addend: 8, .. }
    ));
}

#[test]
fn test_string_segment_no_dedup() {
    let program = compile_ok(r#"main() { ps("ab"); ps("ab"); }"#);
    assert_eq!(program.strings, b"ab\0ab\0".to_vec());
    assert_eq!(program.data_size, 0);
}

#[test]
fn test_globals_layout_in_declaration_order() {
    let program = compile_ok("a: u8; b: u32; c: u8; main() { }");
    // u8 at 0, u32 aligned to 4, u8 at 8
    assert_eq!(program.data_size, 9);
}

#[test]
fn test_noint_brackets() {
    let program = compile_ok("main() { noint { } }");
    let has_noint = program.insns.iter().any(|i| *i == Instr::Noint);
    let has_int = program.insns.iter().any(|i| *i == Instr::Int);
    assert!(has_noint && has_int);
}

#[test]
fn test_short_circuit_emits_branches() {
    let program = compile_ok("main() { a: u8; b: u8; c: u8 = a && b; }");
    let jz = program
        .insns
        .iter()
        .filter(|i| matches!(i, Instr::Jz { .. }))
        .count();
    assert!(jz >= 1);
}

#[test]
fn test_function_addresses_patched() {
    let program = compile_ok("main() { helper(); } helper() { }");
    for insn in &program.insns {
        let mut insn = insn.clone();
        insn.for_each_opd(&mut |opd| {
            assert!(!opd.is_unpatched_func_ref(), "unpatched operand: {:?}", opd);
        });
    }
}

#[test]
fn test_deterministic_output() {
    let source = r#"
        type P: struct(x: u8, y: u32);
        counter: u64;
        main() {
            p: P;
            p.y = 5 as u32;
            i: u32 = 0 as u32;
            while i < (10 as u32) {
                i++;
            }
            exit(i as i32);
        }
    "#;
    let a = compile_ok(source);
    let b = compile_ok(source);
    assert_eq!(listing(&a), listing(&b));
    assert_eq!(a, b);
}

#[test]
fn test_listing_mentions_quaint_ops() {
    let program = compile_ok(
        "main() { q: quaint(u64) = ~f(); v: u64 = *q; } f(): u64 { return 7 as u64; }",
    );
    let text = listing(&program);
    assert!(text.contains("qnt"));
    assert!(text.contains("rtev"));
    assert!(text.contains("getsp"));
}
