// End-to-end execution: whole source programs through the pipeline, with
// captured output and exit statuses.

use quaint_diagnostics::DiagnosticEngine;
use quaint_vm::{ExecError, Machine};
use std::time::Instant;

fn run(source: &str) -> (i32, String) {
    try_run(source).unwrap_or_else(|e| panic!("execution failed: {}", e))
}

fn try_run(source: &str) -> Result<(i32, String), ExecError> {
    let mut engine = DiagnosticEngine::new();
    let program = match quaint_compiler::compile(source, &mut engine) {
        Ok(program) => program,
        Err(err) => {
            for diag in engine.diagnostics() {
                eprintln!("{}", diag.message);
            }
            panic!("compile failed: {}", err);
        }
    };

    let mut out = Vec::new();
    let status = {
        let mut machine = Machine::with_output(&program, Box::new(&mut out));
        machine.run()?
    };
    Ok((status, String::from_utf8_lossy(&out).into_owned()))
}

// ==================== Sequential semantics ====================

#[test]
fn test_arithmetic_exit_status() {
    let (status, _) = run("main() { exit((2 + 3 * 4 - 1) as i32); }");
    assert_eq!(status, 13);
}

#[test]
fn test_entry_return_value_is_exit_status() {
    let (status, _) = run("main(): u8 { return 42; }");
    assert_eq!(status, 42);
}

#[test]
fn test_void_entry_exits_zero() {
    let (status, _) = run("main() { }");
    assert_eq!(status, 0);
}

#[test]
fn test_print_builtins() {
    let (status, out) = run(
        r#"main() {
            ps("value: ");
            pu32(7 as u32);
            pnl();
            pi8((0 - 5) as i8);
            pnl();
        }"#,
    );
    assert_eq!(status, 0);
    assert_eq!(out, "value: 7\n-5\n");
}

#[test]
fn test_while_loop() {
    let (status, _) = run(
        "main() {
            i: u32 = 0 as u32;
            sum: u32 = 0 as u32;
            while i < (5 as u32) {
                sum = sum + i;
                i++;
            }
            exit(sum as i32);
        }",
    );
    assert_eq!(status, 10);
}

#[test]
fn test_do_while_runs_once() {
    let (status, _) = run(
        "main() {
            i: u32 = 9 as u32;
            do { i++; } while i < (5 as u32);
            exit(i as i32);
        }",
    );
    assert_eq!(status, 10);
}

#[test]
fn test_if_elif_else() {
    let source = |x: u32| {
        format!(
            "main() {{
                x: u32 = {} as u32;
                if x == (1 as u32) {{ exit(10 as i32); }}
                elif x == (2 as u32) {{ exit(20 as i32); }}
                else {{ exit(30 as i32); }}
            }}",
            x
        )
    };
    assert_eq!(run(&source(1)).0, 10);
    assert_eq!(run(&source(2)).0, 20);
    assert_eq!(run(&source(7)).0, 30);
}

#[test]
fn test_ternary_and_comparisons() {
    let (status, _) = run(
        "main() {
            a: u32 = 3 as u32;
            b: u32 = 4 as u32;
            exit((a < b ? 1 : 2) as i32);
        }",
    );
    assert_eq!(status, 1);
}

#[test]
fn test_short_circuit_skips_rhs() {
    // the right side would divide by zero; && must skip it
    let (status, _) = run(
        "main() {
            zero: u32 = 0 as u32;
            ok: u8 = zero != (0 as u32) && ((10 as u32) / zero) > (0 as u32);
            exit(ok as i32);
        }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_division_by_zero_reported() {
    let err = try_run(
        "main() { zero: u32 = 0 as u32; x: u32 = (1 as u32) / zero; }",
    )
    .unwrap_err();
    assert!(matches!(err, ExecError::DivisionByZero { .. }));
}

#[test]
fn test_recursion() {
    let (status, _) = run(
        "main() { exit(fact(5 as u32) as i32); }
         fact(n: u32): u32 {
            if n < (2 as u32) { return 1 as u32; }
            return n * fact(n - (1 as u32));
         }",
    );
    assert_eq!(status, 120);
}

#[test]
fn test_function_pointer_call() {
    let (status, _) = run(
        "main() {
            fp: fptr(n: u32): u32 = double;
            exit(fp(21 as u32) as i32);
         }
         double(n: u32): u32 { return n + n; }",
    );
    assert_eq!(status, 42);
}

#[test]
fn test_globals_are_shared_and_zeroed() {
    let (status, _) = run(
        "counter: u32;
         main() { bump(); bump(); bump(); exit(counter as i32); }
         bump() { counter = counter + (1 as u32); }",
    );
    assert_eq!(status, 3);
}

#[test]
fn test_comma_operator() {
    let (status, _) = run("main() { x: u32 = (1 as u32, 2 as u32); exit(x as i32); }");
    assert_eq!(status, 2);
}

#[test]
fn test_sizeof_alignof() {
    let (status, _) = run("main() { exit(sizeof u32[4] as i32); }");
    assert_eq!(status, 16);
    let (status, _) = run("main() { exit(alignof u16 as i32); }");
    assert_eq!(status, 2);
}

#[test]
fn test_enum_values() {
    let (status, _) = run(
        "type Color: enum(red, green, blue): u32;
         main() { exit(Color::blue as u32 as i32); }",
    );
    assert_eq!(status, 2);
}

// ==================== Aggregates and pointers ====================

#[test]
fn test_struct_layout_and_member_access() {
    // P: offsets [0, 4], size 8; write through a pointer, read the value
    let (status, _) = run(
        "type P: struct(x: u8, y: u32);
         main() {
            s: P;
            p: ptr(P) = &s;
            p->y = 77 as u32;
            ok: u8 = s.y == (77 as u32) && sizeof P == (8 as usize);
            exit((ok ? 0 : 1) as i32);
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_struct_assignment_copies() {
    let (status, _) = run(
        "type P: struct(x: u32, y: u32, z: u32);
         main() {
            a: P;
            b: P;
            a.x = 3 as u32;
            a.z = 9 as u32;
            b = a;
            a.x = 0 as u32;
            ok: u8 = b.x == (3 as u32) && b.z == (9 as u32);
            exit((ok ? 0 : 1) as i32);
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_union_shares_storage() {
    let (status, _) = run(
        "type U: union(w: u32, b: u8);
         main() {
            u: U;
            u.w = 258 as u32;
            exit(u.b as i32);
         }",
    );
    // 258 = 0x102, low byte 2
    assert_eq!(status, 2);
}

#[test]
fn test_local_array_subscript() {
    let (status, _) = run(
        "main() {
            a: u32[4];
            i: u32 = 0 as u32;
            while i < (4 as u32) {
                a[i] = i * (10 as u32);
                i++;
            }
            exit(a[3 as u32] as i32);
         }",
    );
    assert_eq!(status, 30);
}

#[test]
fn test_pointer_arithmetic_scales() {
    let (status, _) = run(
        "main() {
            base: ptr(u32) = malloc(16 as usize) as ptr(u32);
            p2: ptr(u32) = base + (2 as u64);
            *p2 = 99 as u32;
            v: u32 = *(base + (2 as u64));
            d: u64 = (p2 as u64) - (base as u64);
            free(base as vptr);
            ok: u8 = v == (99 as u32) && d == (8 as u64);
            exit((ok ? 0 : 1) as i32);
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_calloc_zeroes() {
    let (status, _) = run(
        "main() {
            p: ptr(u64) = calloc(8 as usize) as ptr(u64);
            v: u64 = *p;
            free(p as vptr);
            exit(v as i32);
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_null_deref_reads_zero() {
    let (status, _) = run(
        "main() {
            p: ptr(u32);
            v: u32 = *p;
            exit(v as i32);
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_string_literal_bytes() {
    let (status, out) = run(r#"main() { s: ptr(u8) = "quaint"; ps(s); exit(*s as i32); }"#);
    assert_eq!(out, "quaint");
    assert_eq!(status, b'q' as i32);
}

#[test]
fn test_postfix_and_prefix_increment() {
    let (status, _) = run(
        "main() {
            x: u32 = 5 as u32;
            old: u32 = x++;
            ++x;
            ok: u8 = old == (5 as u32) && x == (7 as u32);
            exit((ok ? 0 : 1) as i32);
         }",
    );
    assert_eq!(status, 0);
}

// ==================== Quaints ====================

#[test]
fn test_quaint_run_to_end() {
    let (status, out) = run(
        "main() {
            q: quaint(u64) = ~f();
            s: u8 = q@start;
            pu64(*q);
            e: u8 = q@end;
            ok: u8 = s == (1 as u8) && e == (0 as u8);
            exit((ok ? 0 : 1) as i32);
         }
         f(): u64 { return 42 as u64; }",
    );
    assert_eq!(out, "42");
    // the handle is zeroed after the move-out, so @end reads null
    assert_eq!(status, 0);
}

#[test]
fn test_quaint_arguments() {
    let (status, _) = run(
        "main() {
            q: quaint(u32) = ~add(30 as u32, 12 as u32);
            exit(*q as i32);
         }
         add(a: u32, b: u32): u32 { return a + b; }",
    );
    assert_eq!(status, 42);
}

#[test]
fn test_value_quaint() {
    let (status, _) = run(
        "main() {
            q: quaint(u32) = ~(41 as u32);
            s: u8 = q@start;
            e: u8 = q@end;
            v: u32 = *q;
            ok: u8 = s == (1 as u8) && e == (1 as u8) && v == (41 as u32);
            exit((ok ? 0 : 1) as i32);
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_void_quaint_observation() {
    let (status, out) = run(
        r#"main() {
            q: quaint() = ~f();
            *q;
            ps("done");
         }
         f() { ps("side "); }"#,
    );
    assert_eq!(out, "side done");
    assert_eq!(status, 0);
}

#[test]
fn test_null_quaint_probes() {
    let (status, _) = run(
        "main() {
            q: quaint(u32);
            a: u8 = q@start;
            b: u8 = q@end;
            v: u32 = *q;
            ok: u8 = a == (0 as u8) && b == (0 as u8) && v == (0 as u32);
            exit((ok ? 0 : 1) as i32);
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_wait_for_timeout() {
    let start = Instant::now();
    let (status, _) = run(
        "main() {
            q: quaint() = ~forever();
            wait q for 10 msec;
            exit((q@end ? 1 : 0) as i32);
         }
         forever() { do { } while true; }",
    );
    let elapsed = start.elapsed();
    assert_eq!(status, 0);
    assert!(elapsed.as_millis() >= 10, "resumed after {:?}", elapsed);
    assert!(elapsed.as_secs() < 5, "took {:?}", elapsed);
}

#[test]
fn test_wait_for_zero_is_no_wait() {
    let (status, _) = run(
        "main() {
            q: quaint() = ~forever();
            wait q for 0;
            exit((q@start ? 0 : 1) as i32);
         }
         forever() { do { } while true; }",
    );
    // zero timeout: the child never even starts
    assert_eq!(status, 0);
}

#[test]
fn test_wait_until_label() {
    let (status, _) = run(
        "main() {
            q: quaint() = ~f();
            wait q until f::checkpoint;
            exit((q@f::checkpoint ? 0 : 1) as i32);
         }
         f() {
            [checkpoint]
            do { } while true;
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_wait_reaches_end() {
    let (status, _) = run(
        "main() {
            q: quaint(u32) = ~f();
            wait q;
            e: u8 = q@end;
            v: u32 = *q;
            ok: u8 = e == (1 as u8) && v == (9 as u32);
            exit((ok ? 0 : 1) as i32);
         }
         f(): u32 { return 9 as u32; }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_wait_noblock_returns_immediately() {
    let start = Instant::now();
    let (status, _) = run(
        "main() {
            q: quaint() = ~forever();
            wait q noblock;
            exit((q@end ? 1 : 0) as i32);
         }
         forever() { do { } while true; }",
    );
    assert_eq!(status, 0);
    assert!(start.elapsed().as_secs() < 2);
}

#[test]
fn test_wait_noblock_until_passed_label() {
    // run the child to the label first, then a noblock wait-until must not
    // suspend again
    let (status, _) = run(
        "main() {
            q: quaint() = ~f();
            wait q until f::mark;
            wait q until f::mark noblock;
            exit((q@f::mark ? 0 : 1) as i32);
         }
         f() {
            [mark]
            do { } while true;
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_label_groups_share_one_id() {
    // both spellings of [mark] form one rendezvous point; the second
    // occurrence satisfies the wait just as well
    let (status, _) = run(
        "main() {
            q: quaint() = ~f();
            wait q until f::mark;
            exit((q@f::mark ? 0 : 1) as i32);
         }
         f() {
            x: u32 = 1 as u32;
            if x == (0 as u32) {
                [mark]
                x = 2 as u32;
            }
            [mark]
            do { } while true;
         }",
    );
    assert_eq!(status, 0);
}

#[test]
fn test_nested_quaints() {
    let (status, _) = run(
        "main() {
            q: quaint(u32) = ~outer();
            exit(*q as i32);
         }
         outer(): u32 {
            inner_q: quaint(u32) = ~inner();
            return *inner_q + (1 as u32);
         }
         inner(): u32 { return 10 as u32; }",
    );
    assert_eq!(status, 11);
}

#[test]
fn test_noint_block_runs() {
    let (status, _) = run("main() { noint { exit(5 as i32); } }");
    assert_eq!(status, 5);
}

#[test]
fn test_monotime_is_monotonic() {
    let (status, _) = run(
        "main() {
            a: u64 = monotime();
            b: u64 = monotime();
            exit((b >= a ? 0 : 1) as i32);
         }",
    );
    assert_eq!(status, 0);
}
