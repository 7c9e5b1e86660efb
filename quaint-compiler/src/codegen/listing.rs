// Human-readable instruction listing, printed by the CLI's --emit-ir flag
// and compared by the determinism tests.

use super::ir::{AluOp, CmpOp, Instr, Opd, Place, Program, QatProbe};
use std::fmt::Write;

fn opd(out: &mut String, o: &Opd) {
    let _ = write!(
        out,
        "{}{}{}[{}:{}] ",
        if o.signed { "s" } else { "" },
        if o.indirect { "*" } else { "" },
        match o.place {
            Place::Imm => "I",
            Place::Temp => "T",
            Place::Auto => "A",
            Place::Glob => "G",
        },
        o.off,
        o.size
    );
}

fn alu_mnemonic(op: AluOp) -> &'static str {
    match op {
        AluOp::Add => "add",
        AluOp::Sub => "sub",
        AluOp::Mul => "mul",
        AluOp::Div => "div",
        AluOp::Mod => "mod",
        AluOp::Lsh => "lsh",
        AluOp::Rsh => "rsh",
        AluOp::And => "and",
        AluOp::Xor => "xor",
        AluOp::Or => "or",
    }
}

fn cmp_mnemonic(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Equ => "equ",
        CmpOp::Neq => "neq",
        CmpOp::Lt => "lt",
        CmpOp::Gt => "gt",
        CmpOp::Lte => "lte",
        CmpOp::Gte => "gte",
    }
}

/// Render the instruction stream the way the VM will see it
pub fn listing(program: &Program) -> String {
    let mut out = String::new();

    for (idx, insn) in program.insns.iter().enumerate() {
        let mut line = String::new();
        let _ = write!(line, "{:04} ", idx);

        match insn {
            Instr::Nop => line.push_str("  nop "),
            Instr::Bfun => line.push_str(" bfun "),
            Instr::Noint => line.push_str("noint "),
            Instr::Int => line.push_str("  int "),

            Instr::Mov { dst, src } => {
                line.push_str("  mov ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Cast { dst, src } => {
                line.push_str(" cast ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Alu {
                op, dst, src1, src2,
            } => {
                let _ = write!(line, "{:>5} ", alu_mnemonic(*op));
                opd(&mut line, dst);
                opd(&mut line, src1);
                opd(&mut line, src2);
            }
            Instr::Cmp {
                op, dst, src1, src2,
            } => {
                let _ = write!(line, "{:>5} ", cmp_mnemonic(*op));
                opd(&mut line, dst);
                opd(&mut line, src1);
                opd(&mut line, src2);
            }
            Instr::Not { dst, src } => {
                line.push_str("  not ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Neg { dst, src } => {
                line.push_str("  neg ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Bneg { dst, src } => {
                line.push_str(" bneg ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Oz { dst, src } => {
                line.push_str("   oz ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Inc { dst } => {
                line.push_str("  inc ");
                opd(&mut line, dst);
            }
            Instr::Dec { dst } => {
                line.push_str("  dec ");
                opd(&mut line, dst);
            }
            Instr::Incp { dst, src } => {
                line.push_str(" incp ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Decp { dst, src } => {
                line.push_str(" decp ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Jz { cond, loc } => {
                line.push_str("   jz ");
                opd(&mut line, cond);
                let _ = write!(line, "{:04}", loc);
            }
            Instr::Jnz { cond, loc } => {
                line.push_str("  jnz ");
                opd(&mut line, cond);
                let _ = write!(line, "{:04}", loc);
            }
            Instr::Jmp { loc } => {
                let _ = write!(line, "  jmp {:04}", loc);
            }
            Instr::Pushr { retip, ssp } => {
                let _ = write!(line, "pushr {:04} ", retip);
                opd(&mut line, ssp);
            }
            Instr::Push { val } => {
                line.push_str(" push ");
                opd(&mut line, val);
            }
            Instr::Call { loc, bp } => {
                line.push_str(" call ");
                opd(&mut line, loc);
                opd(&mut line, bp);
            }
            Instr::Callv { val, loc, bp } => {
                line.push_str("callv ");
                opd(&mut line, val);
                opd(&mut line, loc);
                opd(&mut line, bp);
            }
            Instr::Incsp { addend, tsize } => {
                let _ = write!(line, "incsp {} {}", addend, tsize);
            }
            Instr::Ret { size } => {
                let _ = write!(line, "  ret {}", size);
            }
            Instr::Retv { val, size } => {
                line.push_str(" retv ");
                opd(&mut line, val);
                let _ = write!(line, "{}", size);
            }
            Instr::Ref { dst, src } => {
                line.push_str("  ref ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Drf { dst, src } => {
                line.push_str("  drf ");
                opd(&mut line, dst);
                opd(&mut line, src);
            }
            Instr::Rte { quaint } => {
                line.push_str("  rte ");
                opd(&mut line, quaint);
            }
            Instr::Rtev { dst, quaint } => {
                line.push_str(" rtev ");
                opd(&mut line, dst);
                opd(&mut line, quaint);
            }
            Instr::Qat { dst, quaint, probe } => {
                line.push_str("  qat ");
                opd(&mut line, dst);
                opd(&mut line, quaint);
                match probe {
                    QatProbe::AtStart => line.push_str("start"),
                    QatProbe::AtEnd => line.push_str("end"),
                    QatProbe::Label(l) => {
                        let _ = write!(line, "{}:{}", l.func, l.id);
                    }
                }
            }
            Instr::Wait {
                quaint,
                timeout,
                label,
                noblock,
                units_sec,
            } => {
                line.push_str(" wait ");
                opd(&mut line, quaint);
                if let Some(timeout) = timeout {
                    opd(&mut line, timeout);
                }
                if let Some(label) = label {
                    let _ = write!(line, "{}:{} ", label.func, label.id);
                }
                let _ = write!(line, "{}:{}", *noblock as u8, *units_sec as u8);
            }
            Instr::Wlab(l) => {
                let _ = write!(line, " wlab {}:{}", l.func, l.id);
            }
            Instr::Getsp { dst } => {
                line.push_str("getsp ");
                opd(&mut line, dst);
            }
            Instr::Qnt { dst, loc, ssp } => {
                line.push_str("  qnt ");
                opd(&mut line, dst);
                opd(&mut line, loc);
                opd(&mut line, ssp);
            }
            Instr::Qntv { dst, val } => {
                line.push_str(" qntv ");
                opd(&mut line, dst);
                opd(&mut line, val);
            }
        }

        out.push_str(line.trim_end());
        out.push('\n');
    }

    out
}
