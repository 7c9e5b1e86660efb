// Code generator: lowers the typed AST to three-address instructions over
// a stack-and-temp machine. Frame layouts put parameters at the low
// addresses; blocks inside one function share the frame linearly. The
// instruction stream opens with one `bfun` per built-in id and function
// address immediates are patched in a final fixup pass.

pub mod ir;
mod expr;
mod listing;

pub use listing::listing;

use crate::CompileError;
use ir::{Instr, Opd, Program, WlabRef};
use quaint_ast::{align_up, Ast, FuncId, NodeId, NodeKind, BFUN_COUNT};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Ofs {
    pub off: u64,
    pub size: u64,
}

/// Frame slots are keyed by declaration identity, not by spelling, so
/// sibling blocks redeclaring a name get distinct storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LayoutKey {
    Param(usize),
    Local(NodeId, usize),
}

#[derive(Debug, Default)]
pub(crate) struct FuncTag {
    pub frame_size: u64,
    pub args_size: u64,
    pub loc: u64,
    pub layout: HashMap<LayoutKey, Ofs>,
}

pub(crate) struct Codegen<'a> {
    pub ast: &'a Ast,
    pub insns: Vec<Instr>,
    pub strings: Vec<u8>,
    pub data_size: u64,
    pub globals: HashMap<(NodeId, usize), Ofs>,
    pub funcs: Vec<FuncTag>,
    pub func_nodes: Vec<NodeId>,
    pub current_func: usize,
    pub temp_off: u64,
    pub temp_peak: u64,
}

pub fn generate(ast: &Ast) -> Result<Program, CompileError> {
    let root = ast.root();
    let stmts = match ast.kind(root) {
        NodeKind::Unit { stmts, .. } => stmts.clone(),
        _ => return Err(CompileError::Internal("missing unit root")),
    };

    let mut cg = Codegen {
        ast,
        insns: Vec::new(),
        strings: Vec::new(),
        data_size: 0,
        globals: HashMap::new(),
        funcs: Vec::new(),
        func_nodes: Vec::new(),
        current_func: 0,
        temp_off: 0,
        temp_peak: 0,
    };

    for _ in 0..BFUN_COUNT {
        cg.insns.push(Instr::Bfun);
    }

    cg.create_layouts(&stmts)?;

    for &stmt in &stmts {
        if let NodeKind::Func(data) = ast.kind(stmt) {
            let index = data.index;
            cg.gen_func(stmt, index)?;
        }
    }

    cg.patch_function_addresses()?;

    log::debug!(
        "generated {} instructions, {} data bytes, {} string bytes",
        cg.insns.len(),
        cg.data_size,
        cg.strings.len()
    );

    Ok(Program {
        insns: cg.insns,
        data_size: cg.data_size,
        strings: cg.strings,
    })
}

impl<'a> Codegen<'a> {
    pub(crate) fn ip(&self) -> u64 {
        self.insns.len() as u64
    }

    pub(crate) fn emit(&mut self, insn: Instr) -> u64 {
        let at = self.ip();
        self.insns.push(insn);
        at
    }

    pub(crate) fn ty(&self, id: NodeId) -> Result<&quaint_ast::Type, CompileError> {
        self.ast
            .try_expr_type(id)
            .ok_or(CompileError::Internal("expression has no type"))
    }

    pub(crate) fn tag(&self) -> Result<&FuncTag, CompileError> {
        self.funcs
            .get(self.current_func)
            .ok_or(CompileError::Internal("no active function"))
    }

    /// Allocate a slot in the current temp frame, bumping the watermark
    pub(crate) fn temp(&mut self, signed: bool, size: u64) -> Opd {
        let alignment = size.min(8);
        self.temp_off = align_up(self.temp_off, alignment);
        let off = self.temp_off;
        self.temp_off += size;
        if self.temp_off > self.temp_peak {
            self.temp_peak = self.temp_off;
        }
        Opd::temp(off, size, signed)
    }

    pub(crate) fn set_jmp_loc(&mut self, at: u64, loc: u64) {
        match self.insns.get_mut(at as usize) {
            Some(Instr::Jz { loc: slot, .. })
            | Some(Instr::Jnz { loc: slot, .. })
            | Some(Instr::Jmp { loc: slot }) => *slot = loc,
            _ => {}
        }
    }

    /// Wait-label id of a resolved (function, label index) pair
    pub(crate) fn wlab_ref(&self, func: FuncId, wlab_idx: usize) -> Result<WlabRef, CompileError> {
        let node = *self
            .func_nodes
            .get(func)
            .ok_or(CompileError::Internal("bad function index"))?;
        let data = self
            .ast
            .func(node)
            .ok_or(CompileError::Internal("function node expected"))?;
        let id = data
            .wlabs
            .get(wlab_idx)
            .ok_or(CompileError::Internal("bad wait-label index"))?
            .1;
        Ok(WlabRef { func, id })
    }

    // ==================== Layouts ====================

    fn create_layouts(&mut self, stmts: &[NodeId]) -> Result<(), CompileError> {
        let mut data_offset = 0u64;

        for &stmt in stmts {
            match self.ast.kind(stmt) {
                NodeKind::Decl { names, ty, .. } => {
                    for name_idx in 0..names.len() {
                        data_offset = align_up(data_offset, ty.alignment);
                        let size = ty.full_size();
                        self.globals
                            .insert((stmt, name_idx), Ofs { off: data_offset, size });
                        data_offset += size;
                    }
                }

                NodeKind::Func(data) => {
                    self.func_nodes.push(stmt);
                    debug_assert_eq!(self.func_nodes.len() - 1, data.index);
                    let tag = self.frame_layout(stmt)?;
                    self.funcs.push(tag);
                }

                _ => {}
            }
        }

        self.data_size = data_offset;
        Ok(())
    }

    fn frame_layout(&self, func: NodeId) -> Result<FuncTag, CompileError> {
        let data = self
            .ast
            .func(func)
            .ok_or(CompileError::Internal("function node expected"))?;

        let mut tag = FuncTag::default();

        for (index, param) in data.params.iter().enumerate() {
            let size = param.ty.full_size();
            tag.layout.insert(
                LayoutKey::Param(index),
                Ofs {
                    off: tag.frame_size,
                    size,
                },
            );
            tag.frame_size += size;
            tag.frame_size = align_up(tag.frame_size, 8);
        }

        tag.args_size = tag.frame_size;
        self.layout_stmts(&data.stmts, &mut tag)?;
        tag.frame_size = align_up(tag.frame_size, 8);
        Ok(tag)
    }

    fn layout_stmts(&self, stmts: &[NodeId], tag: &mut FuncTag) -> Result<(), CompileError> {
        for &stmt in stmts {
            match self.ast.kind(stmt) {
                NodeKind::Decl { names, ty, .. } => {
                    for name_idx in 0..names.len() {
                        tag.frame_size = align_up(tag.frame_size, ty.alignment);
                        let size = ty.full_size();
                        tag.layout.insert(
                            LayoutKey::Local(stmt, name_idx),
                            Ofs {
                                off: tag.frame_size,
                                size,
                            },
                        );
                        tag.frame_size += size;
                    }
                }

                NodeKind::Block { stmts, .. }
                | NodeKind::While { stmts, .. }
                | NodeKind::DoWhile { stmts, .. } => {
                    self.layout_stmts(stmts, tag)?;
                }

                NodeKind::Cond {
                    if_block,
                    elifs,
                    else_block,
                    ..
                } => {
                    self.layout_block(*if_block, tag)?;
                    for (_, block) in elifs {
                        self.layout_block(*block, tag)?;
                    }
                    if let Some(block) = else_block {
                        self.layout_block(*block, tag)?;
                    }
                }

                _ => {}
            }
        }
        Ok(())
    }

    fn layout_block(&self, block: NodeId, tag: &mut FuncTag) -> Result<(), CompileError> {
        match self.ast.kind(block) {
            NodeKind::Block { stmts, .. } => self.layout_stmts(stmts, tag),
            _ => Ok(()),
        }
    }

    // ==================== Functions and statements ====================

    fn gen_func(&mut self, func: NodeId, index: FuncId) -> Result<(), CompileError> {
        self.current_func = index;

        let (frame_size, args_size) = {
            let tag = self
                .funcs
                .get_mut(index)
                .ok_or(CompileError::Internal("bad function index"))?;
            tag.loc = self.insns.len() as u64;
            (tag.frame_size, tag.args_size)
        };

        let incsp_ip = self.emit(Instr::Incsp {
            addend: frame_size - args_size,
            tsize: 0,
        });

        self.temp_peak = 0;

        let stmts = match self.ast.kind(func) {
            NodeKind::Func(data) => data.stmts.clone(),
            _ => return Err(CompileError::Internal("function node expected")),
        };

        for stmt in stmts {
            self.gen_stmt(stmt)?;
        }

        let peak = self.temp_peak;
        if let Some(Instr::Incsp { tsize, .. }) = self.insns.get_mut(incsp_ip as usize) {
            *tsize = peak;
        }

        self.emit(Instr::Ret {
            size: frame_size + 16,
        });
        Ok(())
    }

    pub(crate) fn gen_stmt(&mut self, stmt: NodeId) -> Result<(), CompileError> {
        match self.ast.kind(stmt).clone() {
            NodeKind::Decl { .. } => self.gen_decl_auto(stmt)?,

            NodeKind::Block { .. } => self.gen_block(stmt)?,

            NodeKind::Cond { .. } => self.gen_cond(stmt)?,

            NodeKind::While { expr, stmts, .. } => {
                let jmp_ip = self.ip();
                let cond = self.gen_expr(expr, false)?;
                let jz_ip = self.emit(Instr::Jz { cond, loc: 0 });
                self.temp_off = 0;
                for stmt in stmts {
                    self.gen_stmt(stmt)?;
                }
                self.emit(Instr::Jmp { loc: jmp_ip });
                let here = self.ip();
                self.set_jmp_loc(jz_ip, here);
            }

            NodeKind::DoWhile { expr, stmts, .. } => {
                let start = self.ip();
                for stmt in stmts {
                    self.gen_stmt(stmt)?;
                }
                let cond = self.gen_expr(expr, false)?;
                self.emit(Instr::Jnz { cond, loc: start });
            }

            NodeKind::Return { expr } => {
                let size = self.tag()?.frame_size + 16;
                match expr {
                    Some(expr) => {
                        let val = self.gen_expr(expr, false)?;
                        self.emit(Instr::Retv { val, size });
                    }
                    None => {
                        self.emit(Instr::Ret { size });
                    }
                }
            }

            NodeKind::Wait {
                quaint,
                timeout,
                noblock,
                units_sec,
                target,
                ..
            } => {
                let quaint = self.gen_expr(quaint, false)?;
                let timeout = match timeout {
                    Some(expr) => Some(self.gen_expr(expr, false)?),
                    None => None,
                };
                let label = match target {
                    Some((func, wlab_idx)) => Some(self.wlab_ref(func, wlab_idx)?),
                    None => None,
                };
                self.emit(Instr::Wait {
                    quaint,
                    timeout,
                    label,
                    noblock,
                    units_sec,
                });
            }

            NodeKind::WaitLabel { func, id, .. } => {
                let func = func.ok_or(CompileError::Internal("unresolved wait label"))?;
                self.emit(Instr::Wlab(WlabRef { func, id }));
            }

            NodeKind::Binary { .. }
            | NodeKind::Unary { .. }
            | NodeKind::Call { .. }
            | NodeKind::Postfix { .. }
            | NodeKind::Index { .. }
            | NodeKind::Ternary { .. }
            | NodeKind::Name { .. }
            | NodeKind::Number { .. }
            | NodeKind::Str { .. } => {
                self.gen_expr(stmt, false)?;
                self.emit(Instr::Nop);
            }

            _ => {}
        }

        self.temp_off = 0;
        Ok(())
    }

    fn gen_decl_auto(&mut self, stmt: NodeId) -> Result<(), CompileError> {
        let (names_len, ty, init) = match self.ast.kind(stmt) {
            NodeKind::Decl {
                names, ty, init, ..
            } => (names.len(), ty.clone(), *init),
            _ => return Ok(()),
        };

        let Some(init) = init else { return Ok(()) };

        let init_res = self.gen_expr(init, false)?;
        let signed = ty.operand_signed();

        for name_idx in 0..names_len {
            let ofs = *self
                .tag()?
                .layout
                .get(&LayoutKey::Local(stmt, name_idx))
                .ok_or(CompileError::Internal("missing frame slot"))?;
            let dst = Opd::auto(ofs.off, ofs.size, signed);
            self.emit(Instr::Mov { dst, src: init_res });
        }

        Ok(())
    }

    fn gen_block(&mut self, block: NodeId) -> Result<(), CompileError> {
        let (noint, stmts) = match self.ast.kind(block) {
            NodeKind::Block { noint, stmts, .. } => (*noint, stmts.clone()),
            _ => return Ok(()),
        };

        if noint {
            self.emit(Instr::Noint);
        }

        for stmt in stmts {
            self.gen_stmt(stmt)?;
        }

        if noint {
            self.emit(Instr::Int);
        }

        Ok(())
    }

    fn gen_cond(&mut self, stmt: NodeId) -> Result<(), CompileError> {
        let (if_expr, if_block, elifs, else_block) = match self.ast.kind(stmt) {
            NodeKind::Cond {
                if_expr,
                if_block,
                elifs,
                else_block,
            } => (*if_expr, *if_block, elifs.clone(), *else_block),
            _ => return Ok(()),
        };

        let if_cond = self.gen_expr(if_expr, false)?;
        let mut prev_jmp = self.emit(Instr::Jz {
            cond: if_cond,
            loc: 0,
        });
        self.temp_off = 0;
        self.gen_block(if_block)?;

        let mut end_jmps = vec![self.emit(Instr::Jmp { loc: 0 })];

        for (elif_expr, elif_block) in elifs {
            let here = self.ip();
            self.set_jmp_loc(prev_jmp, here);
            let cond = self.gen_expr(elif_expr, false)?;
            prev_jmp = self.emit(Instr::Jz { cond, loc: 0 });
            self.temp_off = 0;
            self.gen_block(elif_block)?;
            end_jmps.push(self.emit(Instr::Jmp { loc: 0 }));
        }

        let here = self.ip();
        self.set_jmp_loc(prev_jmp, here);

        if let Some(else_block) = else_block {
            self.gen_block(else_block)?;
        }

        let here = self.ip();
        for jmp in end_jmps {
            self.set_jmp_loc(jmp, here);
        }

        Ok(())
    }

    fn patch_function_addresses(&mut self) -> Result<(), CompileError> {
        let locs: Vec<u64> = self.funcs.iter().map(|t| t.loc).collect();
        let mut bad = false;

        for insn in &mut self.insns {
            insn.for_each_opd(&mut |opd| {
                if opd.is_unpatched_func_ref() {
                    match locs.get(opd.off as usize) {
                        Some(&loc) => {
                            opd.off = loc;
                            opd.size = 8;
                        }
                        None => bad = true,
                    }
                }
            });
        }

        if bad {
            return Err(CompileError::Internal("dangling function reference"));
        }
        Ok(())
    }
}
