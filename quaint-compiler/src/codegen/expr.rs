// Expression lowering. Every generator returns the operand holding the
// expression's value; `need_lvalue` asks for an operand that can be stored
// through (a frame/data slot or an indirect pointer).

use super::{Codegen, LayoutKey};
use crate::codegen::ir::{AluOp, CmpOp, Instr, Opd, QatProbe};
use crate::CompileError;
use quaint_ast::{
    AtProbe, BinOp, BinRhs, NodeId, NodeKind, PostOp, Resolved, Type, TypeKind, UnOp, UnOperand,
};

impl<'a> Codegen<'a> {
    pub(crate) fn gen_expr(
        &mut self,
        id: NodeId,
        need_lvalue: bool,
    ) -> Result<Opd, CompileError> {
        match self.ast.kind(id).clone() {
            NodeKind::Binary { op, lhs, rhs, .. } => match op {
                BinOp::Assign => self.gen_assign(id, lhs, &rhs),
                BinOp::AddAssign | BinOp::SubAssign | BinOp::Add | BinOp::Sub => {
                    self.gen_add_sub(id, op, lhs, &rhs)
                }
                BinOp::MulAssign
                | BinOp::DivAssign
                | BinOp::ModAssign
                | BinOp::ShlAssign
                | BinOp::ShrAssign
                | BinOp::AndAssign
                | BinOp::XorAssign
                | BinOp::OrAssign => self.gen_compound(op, lhs, &rhs),
                BinOp::Colon | BinOp::Cast => self.gen_cast(id, lhs),
                BinOp::Scope => self.gen_enum_value(id),
                BinOp::At => self.gen_at(id, lhs),
                BinOp::Member => self.gen_member(id, lhs, need_lvalue),
                BinOp::Arrow => self.gen_arrow(id, lhs),
                BinOp::Eq
                | BinOp::NotEq
                | BinOp::Lt
                | BinOp::Gt
                | BinOp::LtEq
                | BinOp::GtEq => self.gen_cmp(id, op, lhs, &rhs),
                BinOp::Mul
                | BinOp::Div
                | BinOp::Mod
                | BinOp::Shl
                | BinOp::Shr
                | BinOp::BitAnd
                | BinOp::BitXor
                | BinOp::BitOr => self.gen_alu(id, op, lhs, &rhs),
                BinOp::LogicalAnd => self.gen_conj(id, lhs, &rhs),
                BinOp::LogicalOr => self.gen_disj(id, lhs, &rhs),
                BinOp::Comma => self.gen_comma(lhs, &rhs),
            },

            NodeKind::Unary { op, operand, .. } => match op {
                UnOp::Plus => match operand {
                    UnOperand::Expr(rhs) => self.gen_expr(rhs, false),
                    UnOperand::TypeSpec(_) => {
                        Err(CompileError::Internal("unary plus on a type"))
                    }
                },
                UnOp::Neg | UnOp::Not | UnOp::BitNot => self.gen_un_simple(id, op, &operand),
                UnOp::Quaintify => self.gen_quaintify(id, &operand),
                UnOp::Deref => self.gen_deref(id, &operand, need_lvalue),
                UnOp::AddrOf => self.gen_addr_of(id, &operand),
                UnOp::PreInc | UnOp::PreDec => self.gen_pre_incdec(id, op, &operand),
                UnOp::SizeOf | UnOp::AlignOf => self.gen_sizeof(op, &operand),
            },

            NodeKind::Call { callee, args, .. } => self.gen_call(id, callee, &args),

            NodeKind::Postfix { op, lhs, .. } => self.gen_post_incdec(id, op, lhs),

            NodeKind::Index { base, index, .. } => self.gen_index(id, base, index, need_lvalue),

            NodeKind::Ternary {
                cond, tval, fval, ..
            } => self.gen_ternary(id, cond, tval, fval),

            NodeKind::Name { .. } => self.gen_name(id),

            NodeKind::Number { value, .. } => {
                let ty = self.ty(id)?;
                Ok(Opd::imm(value, ty.size, ty.operand_signed()))
            }

            NodeKind::Str { value, .. } => {
                let str_beg = self.data_size + self.strings.len() as u64;
                self.strings.extend_from_slice(value.as_bytes());
                self.strings.push(0);
                let src = Opd::glob(str_beg, 1, false);
                let dst = self.temp(false, 8);
                self.emit(Instr::Ref { dst, src });
                Ok(dst)
            }

            _ => Err(CompileError::Internal("statement in expression position")),
        }
    }

    fn rhs_expr(&self, rhs: &BinRhs) -> Result<NodeId, CompileError> {
        match rhs {
            BinRhs::Expr(id) => Ok(*id),
            BinRhs::TypeSpec(_) => Err(CompileError::Internal("type where expression expected")),
        }
    }

    fn result_shape(&self, id: NodeId) -> Result<(u64, bool), CompileError> {
        let ty = self.ty(id)?;
        Ok((ty.full_size(), ty.operand_signed()))
    }

    // ==================== Binary forms ====================

    fn gen_assign(&mut self, _id: NodeId, lhs: NodeId, rhs: &BinRhs) -> Result<Opd, CompileError> {
        let rhs = self.rhs_expr(rhs)?;
        let dst = self.gen_expr(lhs, true)?;
        let src = self.gen_expr(rhs, false)?;
        self.emit(Instr::Mov { dst, src });
        Ok(dst)
    }

    fn gen_compound(&mut self, op: BinOp, lhs: NodeId, rhs: &BinRhs) -> Result<Opd, CompileError> {
        let alu = match op {
            BinOp::MulAssign => AluOp::Mul,
            BinOp::DivAssign => AluOp::Div,
            BinOp::ModAssign => AluOp::Mod,
            BinOp::ShlAssign => AluOp::Lsh,
            BinOp::ShrAssign => AluOp::Rsh,
            BinOp::AndAssign => AluOp::And,
            BinOp::XorAssign => AluOp::Xor,
            BinOp::OrAssign => AluOp::Or,
            _ => return Err(CompileError::Internal("bad compound assignment")),
        };

        let rhs = self.rhs_expr(rhs)?;
        let res1 = self.gen_expr(lhs, true)?;
        let res2 = self.gen_expr(rhs, false)?;
        self.emit(Instr::Alu {
            op: alu,
            dst: res1,
            src1: res1,
            src2: res2,
        });
        Ok(res1)
    }

    /// `+`/`-` and their assignment forms scale the integer operand by the
    /// pointee size when the left side is a pointer
    fn gen_add_sub(
        &mut self,
        id: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: &BinRhs,
    ) -> Result<Opd, CompileError> {
        let is_assign = matches!(op, BinOp::AddAssign | BinOp::SubAssign);
        let rhs = self.rhs_expr(rhs)?;

        let res1 = self.gen_expr(lhs, is_assign)?;
        let mut res2 = self.gen_expr(rhs, false)?;

        let multiplier = match &self.ty(lhs)?.kind {
            TypeKind::Ptr(sub) => sub.full_size(),
            _ => 1,
        };

        if multiplier != 1 {
            let dst = self.temp(false, 8);
            self.emit(Instr::Alu {
                op: AluOp::Mul,
                dst,
                src1: res2,
                src2: Opd::imm(multiplier, 8, false),
            });
            res2 = dst;
        }

        let (size, _) = self.result_shape(id)?;
        let dst = self.temp(res1.signed, size);

        let alu = if matches!(op, BinOp::Add | BinOp::AddAssign) {
            AluOp::Add
        } else {
            AluOp::Sub
        };

        if is_assign {
            self.emit(Instr::Alu {
                op: alu,
                dst: res1,
                src1: res1,
                src2: res2,
            });
            Ok(res1)
        } else {
            self.emit(Instr::Alu {
                op: alu,
                dst,
                src1: res1,
                src2: res2,
            });
            Ok(dst)
        }
    }

    fn gen_alu(
        &mut self,
        id: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: &BinRhs,
    ) -> Result<Opd, CompileError> {
        let alu = match op {
            BinOp::Mul => AluOp::Mul,
            BinOp::Div => AluOp::Div,
            BinOp::Mod => AluOp::Mod,
            BinOp::Shl => AluOp::Lsh,
            BinOp::Shr => AluOp::Rsh,
            BinOp::BitAnd => AluOp::And,
            BinOp::BitXor => AluOp::Xor,
            BinOp::BitOr => AluOp::Or,
            _ => return Err(CompileError::Internal("bad arithmetic operator")),
        };

        let rhs = self.rhs_expr(rhs)?;
        let res1 = self.gen_expr(lhs, false)?;
        let res2 = self.gen_expr(rhs, false)?;
        let (size, signed) = self.result_shape(id)?;
        let dst = self.temp(signed, size);
        self.emit(Instr::Alu {
            op: alu,
            dst,
            src1: res1,
            src2: res2,
        });
        Ok(dst)
    }

    fn gen_cmp(
        &mut self,
        id: NodeId,
        op: BinOp,
        lhs: NodeId,
        rhs: &BinRhs,
    ) -> Result<Opd, CompileError> {
        let cmp = match op {
            BinOp::Eq => CmpOp::Equ,
            BinOp::NotEq => CmpOp::Neq,
            BinOp::Lt => CmpOp::Lt,
            BinOp::Gt => CmpOp::Gt,
            BinOp::LtEq => CmpOp::Lte,
            BinOp::GtEq => CmpOp::Gte,
            _ => return Err(CompileError::Internal("bad comparison operator")),
        };

        let rhs = self.rhs_expr(rhs)?;
        let res1 = self.gen_expr(lhs, false)?;
        let res2 = self.gen_expr(rhs, false)?;
        let (size, signed) = self.result_shape(id)?;
        let dst = self.temp(signed, size);
        self.emit(Instr::Cmp {
            op: cmp,
            dst,
            src1: res1,
            src2: res2,
        });
        Ok(dst)
    }

    fn gen_conj(&mut self, id: NodeId, lhs: NodeId, rhs: &BinRhs) -> Result<Opd, CompileError> {
        let rhs = self.rhs_expr(rhs)?;
        let (size, signed) = self.result_shape(id)?;

        let res1 = self.gen_expr(lhs, false)?;
        let dst = self.temp(signed, size);
        self.emit(Instr::Oz { dst, src: res1 });
        let jz_ip = self.emit(Instr::Jz { cond: res1, loc: 0 });

        let res2 = self.gen_expr(rhs, false)?;
        self.emit(Instr::Oz { dst, src: res2 });
        let one = Opd::imm(1, dst.size, dst.signed);
        self.emit(Instr::Alu {
            op: AluOp::And,
            dst,
            src1: one,
            src2: dst,
        });

        let here = self.ip();
        self.set_jmp_loc(jz_ip, here);
        Ok(dst)
    }

    fn gen_disj(&mut self, id: NodeId, lhs: NodeId, rhs: &BinRhs) -> Result<Opd, CompileError> {
        let rhs = self.rhs_expr(rhs)?;
        let (size, signed) = self.result_shape(id)?;

        let res1 = self.gen_expr(lhs, false)?;
        let dst = self.temp(signed, size);
        self.emit(Instr::Oz { dst, src: res1 });
        let jnz_ip = self.emit(Instr::Jnz { cond: res1, loc: 0 });

        let res2 = self.gen_expr(rhs, false)?;
        self.emit(Instr::Oz { dst, src: res2 });
        let zero = Opd::imm(0, dst.size, dst.signed);
        self.emit(Instr::Alu {
            op: AluOp::Or,
            dst,
            src1: zero,
            src2: dst,
        });

        let here = self.ip();
        self.set_jmp_loc(jnz_ip, here);
        Ok(dst)
    }

    fn gen_comma(&mut self, lhs: NodeId, rhs: &BinRhs) -> Result<Opd, CompileError> {
        let rhs = self.rhs_expr(rhs)?;
        let saved_temp_off = self.temp_off;
        self.gen_expr(lhs, false)?;
        self.temp_off = saved_temp_off;
        self.gen_expr(rhs, false)
    }

    fn gen_cast(&mut self, id: NodeId, lhs: NodeId) -> Result<Opd, CompileError> {
        let (size, signed) = self.result_shape(id)?;
        let res = self.gen_expr(lhs, false)?;
        let dst = self.temp(signed, size);
        self.emit(Instr::Cast { dst, src: res });
        Ok(dst)
    }

    fn gen_enum_value(&mut self, id: NodeId) -> Result<Opd, CompileError> {
        let value = match self.ast.kind(id) {
            NodeKind::Binary {
                enum_value: Some(value),
                ..
            } => *value,
            _ => return Err(CompileError::Internal("unresolved enum value")),
        };
        let (size, _) = self.result_shape(id)?;
        Ok(Opd::imm(value, size, false))
    }

    fn gen_at(&mut self, id: NodeId, lhs: NodeId) -> Result<Opd, CompileError> {
        let probe = match self.ast.kind(id) {
            NodeKind::Binary {
                probe: Some(probe), ..
            } => *probe,
            _ => return Err(CompileError::Internal("unresolved quaint probe")),
        };

        let res = self.gen_expr(lhs, false)?;

        let probe = match probe {
            AtProbe::Start => QatProbe::AtStart,
            AtProbe::End => QatProbe::AtEnd,
            AtProbe::Label { func, wlab_idx } => {
                QatProbe::Label(self.wlab_ref(func, wlab_idx)?)
            }
        };

        let (size, signed) = self.result_shape(id)?;
        let dst = self.temp(signed, size);
        self.emit(Instr::Qat {
            dst,
            quaint: res,
            probe,
        });
        Ok(dst)
    }

    fn member_parts(&self, id: NodeId, ty: &Type) -> Result<(u64, u64, bool), CompileError> {
        let member_idx = match self.ast.kind(id) {
            NodeKind::Binary {
                member_idx: Some(idx),
                ..
            } => *idx,
            _ => return Err(CompileError::Internal("unresolved member")),
        };

        let offset = *ty
            .offsets()
            .and_then(|offs| offs.get(member_idx))
            .ok_or(CompileError::Internal("missing member offset"))?;
        let member = ty
            .members()
            .and_then(|ms| ms.get(member_idx))
            .ok_or(CompileError::Internal("missing member type"))?;

        Ok((offset, member.ty.full_size(), member.ty.operand_signed()))
    }

    /// `x.m`: an in-memory operand folds the member offset in place; an
    /// indirect one computes pointer + offset and stays indirect
    fn gen_member(
        &mut self,
        id: NodeId,
        lhs: NodeId,
        need_lvalue: bool,
    ) -> Result<Opd, CompileError> {
        let mut res = self.gen_expr(lhs, need_lvalue)?;
        let lhs_ty = self.ty(lhs)?.clone();
        let (offset, memb_size, memb_signed) = self.member_parts(id, &lhs_ty)?;

        if !res.indirect {
            res.off += offset;
            res.signed = memb_signed;
            res.size = memb_size;
            return Ok(res);
        }

        res.set_direct();
        let dst_drf = self.temp(false, 8);
        self.emit(Instr::Drf { dst: dst_drf, src: res });
        let mut dst = self.temp(false, 8);
        self.emit(Instr::Alu {
            op: AluOp::Add,
            dst,
            src1: dst_drf,
            src2: Opd::imm(offset, 8, false),
        });
        dst.set_indirect(memb_signed, memb_size);
        Ok(dst)
    }

    fn gen_arrow(&mut self, id: NodeId, lhs: NodeId) -> Result<Opd, CompileError> {
        let mut res = self.gen_expr(lhs, false)?;

        if res.indirect {
            res.set_direct();
            let dst = self.temp(false, 8);
            self.emit(Instr::Drf { dst, src: res });
            res = dst;
        }

        let lhs_ty = self.ty(lhs)?.clone();
        let pointee = lhs_ty
            .pointee()
            .ok_or(CompileError::Internal("arrow through non-pointer"))?;
        let (offset, memb_size, memb_signed) = self.member_parts(id, pointee)?;

        let mut dst = self.temp(false, 8);
        self.emit(Instr::Alu {
            op: AluOp::Add,
            dst,
            src1: res,
            src2: Opd::imm(offset, 8, false),
        });
        dst.set_indirect(memb_signed, memb_size);
        Ok(dst)
    }

    // ==================== Unary forms ====================

    fn gen_un_simple(
        &mut self,
        id: NodeId,
        op: UnOp,
        operand: &UnOperand,
    ) -> Result<Opd, CompileError> {
        let UnOperand::Expr(rhs) = operand else {
            return Err(CompileError::Internal("type where expression expected"));
        };

        let res = self.gen_expr(*rhs, false)?;
        let (size, signed) = self.result_shape(id)?;
        let dst = self.temp(signed, size);

        let insn = match op {
            UnOp::Neg => Instr::Neg { dst, src: res },
            UnOp::Not => Instr::Not { dst, src: res },
            UnOp::BitNot => Instr::Bneg { dst, src: res },
            _ => return Err(CompileError::Internal("bad unary operator")),
        };
        self.emit(insn);
        Ok(dst)
    }

    /// `~f(args)` spawns the call as a quaint; `~v` wraps a value in an
    /// already-completed one
    fn gen_quaintify(&mut self, id: NodeId, operand: &UnOperand) -> Result<Opd, CompileError> {
        let UnOperand::Expr(rhs) = operand else {
            return Err(CompileError::Internal("type where expression expected"));
        };
        let rhs = *rhs;

        let (size, _) = self.result_shape(id)?;
        let dst = self.temp(false, size);

        if let NodeKind::Call { callee, args, .. } = self.ast.kind(rhs).clone() {
            let ssp = self.temp(false, 8);
            self.emit(Instr::Getsp { dst: ssp });

            for arg in args {
                let arg_res = self.gen_expr(arg, false)?;
                self.emit(Instr::Push { val: arg_res });
            }

            let loc = self.gen_expr(callee, false)?;
            self.emit(Instr::Qnt { dst, loc, ssp });
        } else {
            let val = self.gen_expr(rhs, false)?;
            self.emit(Instr::Qntv { dst, val });
        }

        Ok(dst)
    }

    fn gen_deref(
        &mut self,
        id: NodeId,
        operand: &UnOperand,
        need_lvalue: bool,
    ) -> Result<Opd, CompileError> {
        let UnOperand::Expr(rhs) = operand else {
            return Err(CompileError::Internal("type where expression expected"));
        };
        let rhs = *rhs;

        let mut res = self.gen_expr(rhs, false)?;
        let is_ptr = matches!(self.ty(rhs)?.kind, TypeKind::Ptr(_));
        let (size, signed) = self.result_shape(id)?;

        if is_ptr && need_lvalue {
            res.set_indirect(signed, size);
            return Ok(res);
        }

        if is_ptr {
            let dst = self.temp(signed, size);
            self.emit(Instr::Drf { dst, src: res });
            Ok(dst)
        } else if size != 0 {
            let dst = self.temp(signed, size);
            self.emit(Instr::Rtev { dst, quaint: res });
            Ok(dst)
        } else {
            self.emit(Instr::Rte { quaint: res });
            Ok(Opd::imm(0, 1, false))
        }
    }

    fn gen_addr_of(&mut self, id: NodeId, operand: &UnOperand) -> Result<Opd, CompileError> {
        let UnOperand::Expr(rhs) = operand else {
            return Err(CompileError::Internal("type where expression expected"));
        };

        let res = self.gen_expr(*rhs, false)?;
        let (size, _) = self.result_shape(id)?;
        let dst = self.temp(false, size);
        self.emit(Instr::Ref { dst, src: res });
        Ok(dst)
    }

    fn pointer_step(&self, rhs: NodeId) -> Result<u64, CompileError> {
        Ok(match &self.ty(rhs)?.kind {
            TypeKind::Ptr(sub) => sub.full_size(),
            _ => 1,
        })
    }

    fn gen_pre_incdec(
        &mut self,
        id: NodeId,
        op: UnOp,
        operand: &UnOperand,
    ) -> Result<Opd, CompileError> {
        let UnOperand::Expr(rhs) = operand else {
            return Err(CompileError::Internal("type where expression expected"));
        };
        let rhs = *rhs;

        let res = self.gen_expr(rhs, true)?;
        let (size, signed) = self.result_shape(id)?;
        let step = self.pointer_step(rhs)?;
        let inc = op == UnOp::PreInc;

        if step == 1 {
            self.emit(if inc {
                Instr::Inc { dst: res }
            } else {
                Instr::Dec { dst: res }
            });
        } else {
            let addend = Opd::imm(step, size, signed);
            self.emit(Instr::Alu {
                op: if inc { AluOp::Add } else { AluOp::Sub },
                dst: res,
                src1: res,
                src2: addend,
            });
        }

        Ok(res)
    }

    fn gen_sizeof(&mut self, op: UnOp, operand: &UnOperand) -> Result<Opd, CompileError> {
        let UnOperand::TypeSpec(spec) = operand else {
            return Err(CompileError::Internal("expression where type expected"));
        };

        let value = if op == UnOp::SizeOf {
            spec.full_size()
        } else {
            spec.alignment
        };
        Ok(Opd::imm(value, 8, false))
    }

    // ==================== Calls, postfix, subscript ====================

    fn gen_call(
        &mut self,
        id: NodeId,
        callee: NodeId,
        args: &[NodeId],
    ) -> Result<Opd, CompileError> {
        let (size, signed) = self.result_shape(id)?;

        let ssp = self.temp(false, 8);
        let pushr_ip = self.emit(Instr::Pushr { retip: 0, ssp });

        for &arg in args {
            let arg_res = self.gen_expr(arg, false)?;
            self.emit(Instr::Push { val: arg_res });
        }

        let loc = self.gen_expr(callee, false)?;

        let here = self.ip();
        if let Some(Instr::Pushr { retip, .. }) = self.insns.get_mut(pushr_ip as usize) {
            *retip = here;
        }

        if size != 0 {
            let val = self.temp(signed, size);
            self.emit(Instr::Callv { val, loc, bp: ssp });
            Ok(val)
        } else {
            self.emit(Instr::Call { loc, bp: ssp });
            Ok(Opd::imm(0, 1, false))
        }
    }

    fn gen_post_incdec(&mut self, id: NodeId, op: PostOp, lhs: NodeId) -> Result<Opd, CompileError> {
        let res = self.gen_expr(lhs, true)?;
        let (size, signed) = self.result_shape(id)?;
        let step = self.pointer_step(lhs)?;
        let inc = op == PostOp::Inc;

        let dst = self.temp(signed, size);

        if step == 1 {
            self.emit(if inc {
                Instr::Incp { dst, src: res }
            } else {
                Instr::Decp { dst, src: res }
            });
        } else {
            let addend = Opd::imm(step, size, signed);
            self.emit(Instr::Mov { dst, src: res });
            self.emit(Instr::Alu {
                op: if inc { AluOp::Add } else { AluOp::Sub },
                dst: res,
                src1: res,
                src2: addend,
            });
        }

        Ok(dst)
    }

    /// Subscript: scale the index (widening it to 8 bytes if narrower),
    /// add to the base address, mark the result indirect
    fn gen_index(
        &mut self,
        id: NodeId,
        base: NodeId,
        index: NodeId,
        need_lvalue: bool,
    ) -> Result<Opd, CompileError> {
        let mut res_base = self.gen_expr(base, need_lvalue)?;
        let res_off = self.gen_expr(index, false)?;

        let (elem_size, elem_signed) = self.result_shape(id)?;
        let off_size = self.ty(index)?.size;

        let mut idx_scaled = self.temp(false, 8);

        if elem_size == 1 {
            if off_size == 8 {
                idx_scaled = res_off;
            } else {
                self.emit(Instr::Cast {
                    dst: idx_scaled,
                    src: res_off,
                });
            }
        } else {
            if off_size != 8 {
                self.emit(Instr::Cast {
                    dst: idx_scaled,
                    src: res_off,
                });
            }
            let mult = Opd::imm(elem_size, 8, false);
            self.emit(Instr::Alu {
                op: AluOp::Mul,
                dst: idx_scaled,
                src1: if off_size != 8 { idx_scaled } else { res_off },
                src2: mult,
            });
        }

        if res_base.indirect {
            res_base.set_direct();
            let mut dst = self.temp(false, 8);
            self.emit(Instr::Alu {
                op: AluOp::Add,
                dst,
                src1: res_base,
                src2: idx_scaled,
            });
            dst.set_indirect(elem_signed, elem_size);
            return Ok(dst);
        }

        let ref_dst = self.temp(false, 8);
        self.emit(Instr::Ref {
            dst: ref_dst,
            src: res_base,
        });
        let mut arr_dst = self.temp(false, 8);
        self.emit(Instr::Alu {
            op: AluOp::Add,
            dst: arr_dst,
            src1: ref_dst,
            src2: idx_scaled,
        });
        arr_dst.set_indirect(elem_signed, elem_size);
        Ok(arr_dst)
    }

    fn gen_ternary(
        &mut self,
        id: NodeId,
        cond: NodeId,
        tval: NodeId,
        fval: NodeId,
    ) -> Result<Opd, CompileError> {
        let (size, signed) = self.result_shape(id)?;

        let cond_res = self.gen_expr(cond, false)?;
        let res = self.temp(signed, size);
        let jz_ip = self.emit(Instr::Jz {
            cond: cond_res,
            loc: 0,
        });

        let saved_temp_off = self.temp_off;
        let tval_res = self.gen_expr(tval, false)?;
        self.emit(Instr::Mov {
            dst: res,
            src: tval_res,
        });
        let jmp_ip = self.emit(Instr::Jmp { loc: 0 });

        let here = self.ip();
        self.set_jmp_loc(jz_ip, here);
        self.temp_off = saved_temp_off;

        let fval_res = self.gen_expr(fval, false)?;
        self.emit(Instr::Mov {
            dst: res,
            src: fval_res,
        });

        let here = self.ip();
        self.set_jmp_loc(jmp_ip, here);
        Ok(res)
    }

    fn gen_name(&mut self, id: NodeId) -> Result<Opd, CompileError> {
        let resolved = match self.ast.kind(id) {
            NodeKind::Name {
                resolved: Some(resolved),
                ..
            } => *resolved,
            _ => return Err(CompileError::Internal("unresolved name")),
        };

        let ty = self.ty(id)?;
        let signed = ty.operand_signed();
        let full_size = ty.full_size();

        match resolved {
            Resolved::Global { decl, name_idx } => {
                let ofs = *self
                    .globals
                    .get(&(decl, name_idx))
                    .ok_or(CompileError::Internal("missing global slot"))?;
                Ok(Opd::glob(ofs.off, ofs.size, signed))
            }

            Resolved::Auto { decl, name_idx } => {
                let ofs = *self
                    .tag()?
                    .layout
                    .get(&LayoutKey::Local(decl, name_idx))
                    .ok_or(CompileError::Internal("missing frame slot"))?;
                Ok(Opd::auto(ofs.off, ofs.size, signed))
            }

            Resolved::Param { index, .. } => {
                let ofs = *self
                    .tag()?
                    .layout
                    .get(&LayoutKey::Param(index))
                    .ok_or(CompileError::Internal("missing parameter slot"))?;
                Ok(Opd::auto(ofs.off, ofs.size, signed))
            }

            Resolved::BuiltinConst(bcon) => Ok(Opd::imm(bcon.value(), full_size, signed)),

            Resolved::BuiltinFunc(bfun) => Ok(Opd::imm(bfun as u64, 8, false)),

            Resolved::Func { index, .. } => Ok(Opd::func_ref(index)),
        }
    }
}
