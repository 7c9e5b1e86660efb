// The three-address instruction set. Operands name an inline immediate, a
// slot in the per-activation temp frame, a stack-frame slot, or a data
// segment location; the `indirect` bit makes the operand a pointer to the
// value instead of the value itself.

use quaint_ast::FuncId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Place {
    Imm,
    Temp,
    Auto,
    Glob,
}

/// An instruction operand. For `Imm` the `off` field holds the inline
/// value and `size` its byte width; a width of zero marks an unpatched
/// function reference, rewritten by the address fixup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opd {
    pub place: Place,
    pub off: u64,
    pub size: u64,
    pub signed: bool,
    pub indirect: bool,
}

impl Opd {
    pub fn imm(value: u64, size: u64, signed: bool) -> Self {
        Self {
            place: Place::Imm,
            off: value,
            size,
            signed,
            indirect: false,
        }
    }

    pub fn temp(off: u64, size: u64, signed: bool) -> Self {
        Self {
            place: Place::Temp,
            off,
            size,
            signed,
            indirect: false,
        }
    }

    pub fn auto(off: u64, size: u64, signed: bool) -> Self {
        Self {
            place: Place::Auto,
            off,
            size,
            signed,
            indirect: false,
        }
    }

    pub fn glob(off: u64, size: u64, signed: bool) -> Self {
        Self {
            place: Place::Glob,
            off,
            size,
            signed,
            indirect: false,
        }
    }

    /// Reinterpret an indirect operand as the 8-byte pointer it holds
    pub fn set_direct(&mut self) {
        self.indirect = false;
        self.signed = false;
        self.size = 8;
    }

    pub fn set_indirect(&mut self, signed: bool, size: u64) {
        self.indirect = true;
        self.signed = signed;
        self.size = size;
    }

    /// Unpatched reference to a function's entry location
    pub fn func_ref(func: FuncId) -> Self {
        Self::imm(func as u64, 0, false)
    }

    pub fn is_unpatched_func_ref(&self) -> bool {
        self.place == Place::Imm && self.size == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lsh,
    Rsh,
    And,
    Xor,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Equ,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
}

/// A wait-label reference: the owning function and the label group id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WlabRef {
    pub func: FuncId,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QatProbe {
    AtStart,
    AtEnd,
    Label(WlabRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    Nop,

    Mov { dst: Opd, src: Opd },
    Cast { dst: Opd, src: Opd },

    Alu { op: AluOp, dst: Opd, src1: Opd, src2: Opd },
    Cmp { op: CmpOp, dst: Opd, src1: Opd, src2: Opd },

    Not { dst: Opd, src: Opd },
    Neg { dst: Opd, src: Opd },
    Bneg { dst: Opd, src: Opd },
    /// One-or-zero: 1 into the byte destination when the source is nonzero
    Oz { dst: Opd, src: Opd },
    Inc { dst: Opd },
    Dec { dst: Opd },
    Incp { dst: Opd, src: Opd },
    Decp { dst: Opd, src: Opd },

    Jz { cond: Opd, loc: u64 },
    Jnz { cond: Opd, loc: u64 },
    Jmp { loc: u64 },

    /// Store the return address and caller bp, then publish the new sp
    Pushr { retip: u64, ssp: Opd },
    Push { val: Opd },
    Call { loc: Opd, bp: Opd },
    Callv { val: Opd, loc: Opd, bp: Opd },
    /// Reserve the local region and allocate a temp frame at function entry
    Incsp { addend: u64, tsize: u64 },
    Ret { size: u64 },
    Retv { val: Opd, size: u64 },

    Ref { dst: Opd, src: Opd },
    Drf { dst: Opd, src: Opd },

    /// Observe a quaint without taking a value
    Rte { quaint: Opd },
    /// Observe a quaint and move its result out
    Rtev { dst: Opd, quaint: Opd },
    Qat { dst: Opd, quaint: Opd, probe: QatProbe },
    Wait {
        quaint: Opd,
        timeout: Option<Opd>,
        label: Option<WlabRef>,
        noblock: bool,
        units_sec: bool,
    },
    Wlab(WlabRef),
    Getsp { dst: Opd },
    Qnt { dst: Opd, loc: Opd, ssp: Opd },
    Qntv { dst: Opd, val: Opd },

    Noint,
    Int,
    /// Built-in dispatch; the instruction's own index is the built-in id
    Bfun,
}

impl Instr {
    /// Visit every operand slot, for the function-address fixup pass
    pub fn for_each_opd(&mut self, f: &mut impl FnMut(&mut Opd)) {
        match self {
            Instr::Nop | Instr::Jmp { .. } | Instr::Incsp { .. } | Instr::Ret { .. }
            | Instr::Wlab(_) | Instr::Noint | Instr::Int | Instr::Bfun => {}

            Instr::Mov { dst, src }
            | Instr::Cast { dst, src }
            | Instr::Not { dst, src }
            | Instr::Neg { dst, src }
            | Instr::Bneg { dst, src }
            | Instr::Oz { dst, src }
            | Instr::Incp { dst, src }
            | Instr::Decp { dst, src }
            | Instr::Ref { dst, src }
            | Instr::Drf { dst, src } => {
                f(dst);
                f(src);
            }

            Instr::Alu {
                dst, src1, src2, ..
            }
            | Instr::Cmp {
                dst, src1, src2, ..
            } => {
                f(dst);
                f(src1);
                f(src2);
            }

            Instr::Inc { dst } | Instr::Dec { dst } | Instr::Getsp { dst } => f(dst),

            Instr::Jz { cond, .. } | Instr::Jnz { cond, .. } => f(cond),

            Instr::Pushr { ssp, .. } => f(ssp),
            Instr::Push { val } => f(val),

            Instr::Call { loc, bp } => {
                f(loc);
                f(bp);
            }
            Instr::Callv { val, loc, bp } => {
                f(val);
                f(loc);
                f(bp);
            }

            Instr::Retv { val, .. } => f(val),

            Instr::Rte { quaint } => f(quaint),
            Instr::Rtev { dst, quaint } => {
                f(dst);
                f(quaint);
            }
            Instr::Qat { dst, quaint, .. } => {
                f(dst);
                f(quaint);
            }
            Instr::Wait {
                quaint, timeout, ..
            } => {
                f(quaint);
                if let Some(timeout) = timeout {
                    f(timeout);
                }
            }
            Instr::Qnt { dst, loc, ssp } => {
                f(dst);
                f(loc);
                f(ssp);
            }
            Instr::Qntv { dst, val } => {
                f(dst);
                f(val);
            }
        }
    }
}

/// The compiled unit: instruction stream, global data segment size, and
/// the string segment appended behind the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub insns: Vec<Instr>,
    pub data_size: u64,
    pub strings: Vec<u8>,
}
