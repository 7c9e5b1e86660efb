// The bytecode interpreter. One VM record per quaint; exactly one holds
// the execution cursor at any moment. Suspension points are `wait`,
// `rte`/`rtev` against a running quaint, and the periodic clock poll that
// hops control back up the parent chain.

use crate::mem::Mem;
use crate::ExecError;
use quaint_ast::{BfunId, BFUN_COUNT};
use quaint_compiler::{AluOp, CmpOp, Instr, Opd, Place, Program, QatProbe, WlabRef};
use std::collections::HashMap;
use std::io::Write;
use std::time::Instant;

pub const STACK_SIZE: u64 = 16 * 1024;

/// How often the dispatch loop refreshes the monotonic clock
const POLL_CYCLES: u64 = 200;

#[derive(Debug)]
struct QuaintVm {
    parent: Option<u64>,
    ip: u64,
    sp: u64,
    bp: u64,
    at_start: bool,
    at_end: bool,
    noint: bool,
    waiting: bool,
    waiting_for: bool,
    waiting_until: bool,
    waiting_noblock: bool,
    wait_start: u64,
    wait_interval: u64,
    wait_until: Option<WlabRef>,
    last_passed: Option<WlabRef>,
    /// per-activation temp frames, innermost last
    temps: Vec<u64>,
    stack_base: u64,
}

impl QuaintVm {
    fn new(stack_base: u64) -> Self {
        Self {
            parent: None,
            ip: 0,
            sp: 0,
            bp: 0,
            at_start: false,
            at_end: false,
            noint: false,
            waiting: false,
            waiting_for: false,
            waiting_until: false,
            waiting_noblock: false,
            wait_start: 0,
            wait_interval: 0,
            wait_until: None,
            last_passed: None,
            temps: Vec::new(),
            stack_base,
        }
    }

    fn clear_waiting(&mut self) {
        self.waiting = false;
        self.waiting_for = false;
        self.waiting_until = false;
        self.waiting_noblock = false;
    }
}

pub struct Machine<'a> {
    program: &'a Program,
    mem: Mem,
    vms: HashMap<u64, QuaintVm>,
    next_vm: u64,
    active: u64,
    data_base: u64,
    bss_size: u64,
    now: u64,
    cycles: u64,
    epoch: Instant,
    out: Box<dyn Write + 'a>,
}

impl<'a> Machine<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self::with_output(program, Box::new(std::io::stdout()))
    }

    pub fn with_output(program: &'a Program, out: Box<dyn Write + 'a>) -> Self {
        Self {
            program,
            mem: Mem::new(),
            vms: HashMap::new(),
            next_vm: 1,
            active: 0,
            data_base: 0,
            bss_size: 0,
            now: 0,
            cycles: 0,
            epoch: Instant::now(),
            out,
        }
    }

    /// Execute the program; the result is its exit status
    pub fn run(&mut self) -> Result<i32, ExecError> {
        let insn_count = self.program.insns.len() as u64;

        self.bss_size = self.program.data_size + self.program.strings.len() as u64;
        self.data_base = self.mem.alloc_zeroed(self.bss_size);
        if !self.program.strings.is_empty() {
            self.mem.write(
                self.data_base + self.program.data_size,
                &self.program.strings,
            );
        }

        let stack_base = self.mem.alloc_zeroed(STACK_SIZE);
        let mut root = QuaintVm::new(stack_base);
        root.ip = BFUN_COUNT as u64;
        root.sp = 16;
        root.bp = 16;
        // sentinel return address: one past the last instruction
        self.mem.write_u64(stack_base, insn_count);

        let root_id = self.spawn(root);
        self.active = root_id;
        self.now = self.now_ns();

        loop {
            let ip = self.avm()?.ip;
            let insn = self
                .program
                .insns
                .get(ip as usize)
                .ok_or_else(|| self.illegal(ip, "instruction pointer out of range"))?
                .clone();

            if let Some(status) = self.exec_insn(ip, &insn)? {
                return Ok(status);
            }

            self.poll_scheduler();
        }
    }

    // ==================== Bookkeeping ====================

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn spawn(&mut self, vm: QuaintVm) -> u64 {
        let id = self.next_vm;
        self.next_vm += 1;
        self.vms.insert(id, vm);
        id
    }

    fn free_vm(&mut self, id: u64) {
        if let Some(vm) = self.vms.remove(&id) {
            self.mem.free(vm.stack_base);
            for frame in vm.temps {
                self.mem.free(frame);
            }
        }
    }

    fn avm(&self) -> Result<&QuaintVm, ExecError> {
        self.vms
            .get(&self.active)
            .ok_or(ExecError::IllegalInstruction {
                ip: 0,
                detail: "active vm missing".to_string(),
            })
    }

    fn avm_mut(&mut self) -> Result<&mut QuaintVm, ExecError> {
        self.vms
            .get_mut(&self.active)
            .ok_or(ExecError::IllegalInstruction {
                ip: 0,
                detail: "active vm missing".to_string(),
            })
    }

    fn illegal(&self, ip: u64, detail: impl Into<String>) -> ExecError {
        ExecError::IllegalInstruction {
            ip,
            detail: detail.into(),
        }
    }

    /// Wake a suspended ancestor whose wait became satisfiable. Walks the
    /// parent chain from the active VM; a `noint` anywhere below an
    /// ancestor blocks the hop through it.
    fn poll_scheduler(&mut self) {
        self.cycles = self.cycles.wrapping_add(1);
        if self.cycles % POLL_CYCLES == 0 {
            self.now = self.now_ns();
        }

        let Some(active) = self.vms.get(&self.active) else {
            return;
        };

        let mut noint = active.noint;
        let mut prev = self.active;
        let mut cursor = active.parent;

        while let Some(current) = cursor {
            if noint {
                return;
            }

            let (waiting, waiting_for, waiting_until, wait_start, wait_interval, wait_until) = {
                let Some(cvm) = self.vms.get(&current) else {
                    return;
                };
                noint = cvm.noint;
                cursor = cvm.parent;
                (
                    cvm.waiting,
                    cvm.waiting_for,
                    cvm.waiting_until,
                    cvm.wait_start,
                    cvm.wait_interval,
                    cvm.wait_until,
                )
            };

            let mut split = false;

            if waiting {
                if waiting_for {
                    split = self.now.saturating_sub(wait_start) >= wait_interval;
                } else if waiting_until {
                    let passed = self.vms.get(&prev).and_then(|p| p.last_passed);
                    split = passed.is_some() && passed == wait_until;
                }
            }

            if split {
                self.active = current;
                if let Some(vm) = self.vms.get_mut(&current) {
                    vm.clear_waiting();
                    vm.ip += 1;
                }
                return;
            }

            prev = current;
        }
    }

    // ==================== Operand access ====================

    /// Resolve an operand to an address in the flat memory, applying the
    /// indirect bit. None means a null pointer was dereferenced (already
    /// warned about).
    fn opd_addr(&self, ip: u64, opd: &Opd) -> Result<Option<u64>, ExecError> {
        let vm = self.avm()?;

        let base = match opd.place {
            Place::Imm => return Err(self.illegal(ip, "immediate operand has no address")),

            Place::Temp => {
                let frame = vm
                    .temps
                    .last()
                    .ok_or_else(|| self.illegal(ip, "no temp frame"))?;
                frame + opd.off
            }

            Place::Auto => {
                if vm.bp + opd.off >= STACK_SIZE {
                    return Err(self.illegal(ip, "frame offset out of range"));
                }
                vm.stack_base + vm.bp + opd.off
            }

            Place::Glob => {
                let need = if opd.indirect { 8 } else { opd.size };
                if opd.off + need > self.bss_size {
                    return Err(self.illegal(ip, "data offset out of range"));
                }
                self.data_base + opd.off
            }
        };

        if opd.indirect {
            let ptr = self
                .mem
                .read_u64(base)
                .ok_or_else(|| self.illegal(ip, "bad pointer slot"))?;
            if ptr == 0 {
                eprintln!("warn: null pointer dereference");
                return Ok(None);
            }
            Ok(Some(ptr))
        } else {
            Ok(Some(base))
        }
    }

    /// Read an operand's value. A null indirect operand reads as zeros.
    fn read_val(&self, ip: u64, opd: &Opd) -> Result<Vec<u8>, ExecError> {
        if opd.place == Place::Imm {
            if opd.size == 0 || opd.size > 8 {
                return Err(self.illegal(ip, "bad immediate width"));
            }
            return Ok(opd.off.to_le_bytes()[..opd.size as usize].to_vec());
        }

        match self.opd_addr(ip, opd)? {
            Some(addr) => self
                .mem
                .read(addr, opd.size)
                .ok_or_else(|| self.illegal(ip, "operand address out of range")),
            None => Ok(vec![0; opd.size as usize]),
        }
    }

    /// Zero-extended scalar value of an operand up to 8 bytes wide
    fn read_scalar(&self, ip: u64, opd: &Opd) -> Result<u64, ExecError> {
        let bytes = self.read_val(ip, opd)?;
        if bytes.len() > 8 {
            return Err(self.illegal(ip, "scalar operand wider than 8 bytes"));
        }
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Write through an operand. Writes through a null pointer are dropped.
    fn write_val(&mut self, ip: u64, opd: &Opd, data: &[u8]) -> Result<(), ExecError> {
        if opd.place == Place::Imm {
            return Err(self.illegal(ip, "store to an immediate"));
        }

        match self.opd_addr(ip, opd)? {
            Some(addr) => {
                if !self.mem.write(addr, data) {
                    return Err(self.illegal(ip, "operand address out of range"));
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn write_scalar(&mut self, ip: u64, opd: &Opd, value: u64) -> Result<(), ExecError> {
        let size = opd.size.min(8) as usize;
        let bytes = value.to_le_bytes();
        self.write_val(ip, opd, &bytes[..size])
    }

    fn require(&self, ip: u64, cond: bool, detail: &str) -> Result<(), ExecError> {
        if cond {
            Ok(())
        } else {
            Err(self.illegal(ip, detail))
        }
    }

    // ==================== Dispatch ====================

    /// Execute one instruction. Some(status) means the program finished.
    fn exec_insn(&mut self, ip: u64, insn: &Instr) -> Result<Option<i32>, ExecError> {
        let mut advance = true;

        let finished = match insn {
            Instr::Nop => None,

            Instr::Mov { dst, src } => {
                self.require(ip, dst.size == src.size, "mov size mismatch")?;
                let data = self.read_val(ip, src)?;
                self.write_val(ip, dst, &data)?;
                None
            }

            Instr::Cast { dst, src } => {
                let data = self.read_val(ip, src)?;
                let mut out = vec![0u8; dst.size as usize];
                let n = data.len().min(out.len());
                out[..n].copy_from_slice(&data[..n]);
                self.write_val(ip, dst, &out)?;
                None
            }

            Instr::Alu {
                op,
                dst,
                src1,
                src2,
            } => {
                self.exec_alu(ip, *op, dst, src1, src2)?;
                None
            }

            Instr::Cmp {
                op,
                dst,
                src1,
                src2,
            } => {
                self.exec_cmp(ip, *op, dst, src1, src2)?;
                None
            }

            Instr::Not { dst, src } => {
                self.unary_checks(ip, dst, src)?;
                let value = self.read_scalar(ip, src)?;
                let result = if sized(value, src.size) == 0 { 1 } else { 0 };
                self.write_scalar(ip, dst, result)?;
                None
            }

            Instr::Neg { dst, src } => {
                self.require(ip, dst.signed, "neg needs a signed destination")?;
                self.unary_sizes(ip, dst, src)?;
                let value = self.read_scalar(ip, src)?;
                let extended = if src.signed {
                    sext(value, src.size)
                } else {
                    sized(value, src.size) as i64
                };
                self.write_scalar(ip, dst, extended.wrapping_neg() as u64)?;
                None
            }

            Instr::Bneg { dst, src } => {
                self.require(ip, !dst.signed && !src.signed, "bneg needs unsigned operands")?;
                self.unary_sizes(ip, dst, src)?;
                let value = self.read_scalar(ip, src)?;
                self.write_scalar(ip, dst, !value)?;
                None
            }

            Instr::Oz { dst, src } => {
                self.require(ip, !dst.signed && dst.size == 1, "oz destination must be u8")?;
                self.require(
                    ip,
                    src.size.is_power_of_two() && src.size <= 8,
                    "bad oz source size",
                )?;
                let value = self.read_scalar(ip, src)?;
                let result = if sized(value, src.size) != 0 { 1 } else { 0 };
                self.write_scalar(ip, dst, result)?;
                None
            }

            Instr::Inc { dst } => {
                self.pow2_size(ip, dst)?;
                let value = self.read_scalar(ip, dst)?;
                self.write_scalar(ip, dst, value.wrapping_add(1))?;
                None
            }

            Instr::Dec { dst } => {
                self.pow2_size(ip, dst)?;
                let value = self.read_scalar(ip, dst)?;
                self.write_scalar(ip, dst, value.wrapping_sub(1))?;
                None
            }

            Instr::Incp { dst, src } => {
                self.unary_checks(ip, dst, src)?;
                let value = self.read_scalar(ip, src)?;
                self.write_scalar(ip, dst, value)?;
                self.write_scalar(ip, src, value.wrapping_add(1))?;
                None
            }

            Instr::Decp { dst, src } => {
                self.unary_checks(ip, dst, src)?;
                let value = self.read_scalar(ip, src)?;
                self.write_scalar(ip, dst, value)?;
                self.write_scalar(ip, src, value.wrapping_sub(1))?;
                None
            }

            Instr::Jz { cond, loc } => {
                advance = false;
                let data = self.read_val(ip, cond)?;
                let zero = data.iter().all(|&b| b == 0);
                let vm = self.avm_mut()?;
                vm.ip = if zero { *loc } else { ip + 1 };
                None
            }

            Instr::Jnz { cond, loc } => {
                advance = false;
                let data = self.read_val(ip, cond)?;
                let zero = data.iter().all(|&b| b == 0);
                let vm = self.avm_mut()?;
                vm.ip = if zero { ip + 1 } else { *loc };
                None
            }

            Instr::Jmp { loc } => {
                advance = false;
                self.avm_mut()?.ip = *loc;
                None
            }

            Instr::Pushr { retip, ssp } => {
                self.require(ip, ssp.place == Place::Temp && ssp.size == 8, "bad ssp operand")?;
                let (sp, bp, stack_base) = {
                    let vm = self.avm()?;
                    (vm.sp, vm.bp, vm.stack_base)
                };
                self.require(ip, sp % 8 == 0, "misaligned stack pointer")?;
                self.require(ip, sp + 16 <= STACK_SIZE, "stack overflow")?;

                self.mem.write_u64(stack_base + sp, *retip);
                self.mem.write_u64(stack_base + sp + 8, bp);
                self.avm_mut()?.sp = sp + 16;
                self.write_scalar(ip, ssp, sp + 16)?;
                None
            }

            Instr::Push { val } => {
                self.require(ip, val.size > 0, "empty push")?;
                let data = self.read_val(ip, val)?;
                let (sp, stack_base) = {
                    let vm = self.avm()?;
                    (vm.sp, vm.stack_base)
                };
                self.require(ip, sp % 8 == 0, "misaligned stack pointer")?;
                self.require(ip, sp + val.size <= STACK_SIZE, "stack overflow")?;

                self.mem.write(stack_base + sp, &data);
                let mut new_sp = sp + val.size;
                new_sp = (new_sp + 7) & !7;
                self.require(ip, new_sp <= STACK_SIZE, "stack overflow")?;
                self.avm_mut()?.sp = new_sp;
                None
            }

            Instr::Call { loc, bp } | Instr::Callv { loc, bp, .. } => {
                advance = false;
                self.require(ip, loc.size == 8, "bad call target")?;
                self.require(ip, bp.place == Place::Temp && bp.size == 8, "bad call bp")?;
                let target = self.read_scalar(ip, loc)?;
                let new_bp = self.read_scalar(ip, bp)?;
                let vm = self.avm_mut()?;
                vm.ip = target;
                vm.bp = new_bp;
                None
            }

            Instr::Incsp { addend, tsize } => {
                self.require(ip, addend % 8 == 0, "misaligned frame size")?;
                let frame = self.mem.alloc(*tsize);
                let vm = self.avm_mut()?;
                vm.at_start = false;
                vm.sp += addend;
                vm.temps.push(frame);
                let sp = vm.sp;
                self.require(ip, sp <= STACK_SIZE, "stack overflow")?;
                None
            }

            Instr::Ret { size } => {
                advance = false;
                self.ret_common(ip, *size, None)?
            }

            Instr::Retv { val, size } => {
                advance = false;
                let data = self.read_val(ip, val)?;
                self.ret_common(ip, *size, Some((data, val.signed)))?
            }

            Instr::Ref { dst, src } => {
                self.require(ip, !dst.signed && !dst.indirect && dst.size == 8, "bad ref destination")?;
                let addr = self.opd_addr(ip, src)?.unwrap_or(0);
                self.write_scalar(ip, dst, addr)?;
                None
            }

            Instr::Drf { dst, src } => {
                self.require(ip, !dst.indirect && dst.size > 0, "bad drf destination")?;
                self.require(ip, src.size == 8, "bad drf source")?;
                let ptr = self.read_scalar(ip, src)?;
                if ptr == 0 {
                    eprintln!("warn: null pointer dereference");
                    let zeros = vec![0u8; dst.size as usize];
                    self.write_val(ip, dst, &zeros)?;
                } else {
                    let data = self
                        .mem
                        .read(ptr, dst.size)
                        .ok_or_else(|| self.illegal(ip, "pointer out of range"))?;
                    self.write_val(ip, dst, &data)?;
                }
                None
            }

            Instr::Rte { quaint } => {
                advance = false;
                self.exec_rte(ip, None, quaint)?;
                None
            }

            Instr::Rtev { dst, quaint } => {
                advance = false;
                self.require(ip, !dst.indirect && dst.size > 0, "bad rtev destination")?;
                self.exec_rte(ip, Some(*dst), quaint)?;
                None
            }

            Instr::Qat { dst, quaint, probe } => {
                self.require(ip, !dst.signed && !dst.indirect && dst.size == 1, "bad qat destination")?;
                self.require(ip, quaint.size == 8, "bad quaint operand")?;
                let id = self.read_scalar(ip, quaint)?;
                let result = match self.vms.get(&id) {
                    None => 0,
                    Some(child) => match probe {
                        QatProbe::AtStart => child.at_start as u64,
                        QatProbe::AtEnd => child.at_end as u64,
                        QatProbe::Label(label) => {
                            (child.last_passed == Some(*label)) as u64
                        }
                    },
                };
                self.write_scalar(ip, dst, result)?;
                None
            }

            Instr::Wait {
                quaint,
                timeout,
                label,
                noblock,
                units_sec,
            } => {
                advance = false;
                self.exec_wait(ip, quaint, timeout.as_ref(), *label, *noblock, *units_sec)?;
                None
            }

            Instr::Wlab(label) => {
                self.avm_mut()?.last_passed = Some(*label);
                None
            }

            Instr::Getsp { dst } => {
                self.require(ip, dst.place == Place::Temp && dst.size == 8, "bad getsp destination")?;
                let sp = self.avm()?.sp;
                self.write_scalar(ip, dst, sp)?;
                None
            }

            Instr::Qnt { dst, loc, ssp } => {
                self.require(ip, !dst.indirect && dst.size == 8, "bad qnt destination")?;
                self.require(ip, loc.size == 8, "bad qnt target")?;
                self.require(ip, ssp.place == Place::Temp && ssp.size == 8, "bad qnt ssp")?;

                let target = self.read_scalar(ip, loc)?;
                let saved_sp = self.read_scalar(ip, ssp)?;
                let (sp, stack_base) = {
                    let vm = self.avm()?;
                    (vm.sp, vm.stack_base)
                };
                self.require(ip, saved_sp <= sp, "bad saved stack pointer")?;
                let args_size = sp - saved_sp;
                self.require(ip, 16 + args_size <= STACK_SIZE, "quaint arguments overflow")?;

                let child_stack = self.mem.alloc_zeroed(STACK_SIZE);
                let mut child = QuaintVm::new(child_stack);
                child.ip = target;
                child.bp = 16;
                child.sp = 16 + args_size;
                child.at_start = true;
                self.mem
                    .copy(child_stack + 16, stack_base + saved_sp, args_size);

                let id = self.spawn(child);
                self.write_scalar(ip, dst, id)?;
                self.avm_mut()?.sp = saved_sp;
                None
            }

            Instr::Qntv { dst, val } => {
                self.require(ip, !dst.indirect && dst.size == 8, "bad qntv destination")?;
                self.require(ip, val.size > 0, "bad qntv value")?;

                let data = self.read_val(ip, val)?;
                let child_stack = self.mem.alloc_zeroed(STACK_SIZE);
                let mut child = QuaintVm::new(child_stack);
                child.at_start = true;
                child.at_end = true;
                self.mem.write(child_stack, &data);

                let id = self.spawn(child);
                self.write_scalar(ip, dst, id)?;
                None
            }

            Instr::Noint => {
                self.avm_mut()?.noint = true;
                None
            }

            Instr::Int => {
                self.avm_mut()?.noint = false;
                None
            }

            Instr::Bfun => {
                advance = false;
                self.exec_bfun(ip)?
            }
        };

        if advance && finished.is_none() {
            self.avm_mut()?.ip += 1;
        }

        Ok(finished)
    }

    // ==================== Arithmetic ====================

    fn unary_sizes(&self, ip: u64, dst: &Opd, src: &Opd) -> Result<(), ExecError> {
        self.require(
            ip,
            dst.size == src.size && dst.size.is_power_of_two() && dst.size <= 8,
            "bad unary operand sizes",
        )
    }

    fn unary_checks(&self, ip: u64, dst: &Opd, src: &Opd) -> Result<(), ExecError> {
        self.require(ip, dst.signed == src.signed, "differing signedness")?;
        self.unary_sizes(ip, dst, src)
    }

    fn pow2_size(&self, ip: u64, opd: &Opd) -> Result<(), ExecError> {
        self.require(
            ip,
            opd.size.is_power_of_two() && opd.size <= 8,
            "bad operand size",
        )
    }

    fn exec_alu(
        &mut self,
        ip: u64,
        op: AluOp,
        dst: &Opd,
        src1: &Opd,
        src2: &Opd,
    ) -> Result<(), ExecError> {
        self.require(
            ip,
            dst.signed == src1.signed && src1.signed == src2.signed,
            "differing signedness",
        )?;
        self.require(
            ip,
            dst.size == src1.size && src1.size == src2.size,
            "differing sizes",
        )?;
        self.pow2_size(ip, dst)?;

        let a = self.read_scalar(ip, src1)?;
        let b = self.read_scalar(ip, src2)?;
        let size = dst.size;

        let result = if dst.signed {
            let sa = sext(a, size);
            let sb = sext(b, size);
            match op {
                AluOp::Add => sa.wrapping_add(sb) as u64,
                AluOp::Sub => sa.wrapping_sub(sb) as u64,
                AluOp::Mul => sa.wrapping_mul(sb) as u64,
                AluOp::Div => {
                    if sb == 0 {
                        return Err(ExecError::DivisionByZero { ip });
                    }
                    sa.wrapping_div(sb) as u64
                }
                AluOp::Mod => {
                    if sb == 0 {
                        return Err(ExecError::DivisionByZero { ip });
                    }
                    sa.wrapping_rem(sb) as u64
                }
                AluOp::Lsh => sa.wrapping_shl(sb as u32) as u64,
                AluOp::Rsh => sa.wrapping_shr(sb as u32) as u64,
                AluOp::And => (sa & sb) as u64,
                AluOp::Xor => (sa ^ sb) as u64,
                AluOp::Or => (sa | sb) as u64,
            }
        } else {
            let ua = sized(a, size);
            let ub = sized(b, size);
            match op {
                AluOp::Add => ua.wrapping_add(ub),
                AluOp::Sub => ua.wrapping_sub(ub),
                AluOp::Mul => ua.wrapping_mul(ub),
                AluOp::Div => {
                    if ub == 0 {
                        return Err(ExecError::DivisionByZero { ip });
                    }
                    ua / ub
                }
                AluOp::Mod => {
                    if ub == 0 {
                        return Err(ExecError::DivisionByZero { ip });
                    }
                    ua % ub
                }
                AluOp::Lsh => ua.wrapping_shl(ub as u32),
                AluOp::Rsh => ua.wrapping_shr(ub as u32),
                AluOp::And => ua & ub,
                AluOp::Xor => ua ^ ub,
                AluOp::Or => ua | ub,
            }
        };

        self.write_scalar(ip, dst, result)
    }

    fn exec_cmp(
        &mut self,
        ip: u64,
        op: CmpOp,
        dst: &Opd,
        src1: &Opd,
        src2: &Opd,
    ) -> Result<(), ExecError> {
        self.require(ip, !dst.signed && dst.size == 1, "comparison destination must be u8")?;

        let result = match op {
            CmpOp::Equ | CmpOp::Neq => {
                self.require(ip, src1.size == src2.size, "differing sizes")?;
                let a = self.read_val(ip, src1)?;
                let b = self.read_val(ip, src2)?;
                let equal = a == b;
                match op {
                    CmpOp::Equ => equal,
                    _ => !equal,
                }
            }

            CmpOp::Lt | CmpOp::Gt | CmpOp::Lte | CmpOp::Gte => {
                self.require(ip, src1.signed == src2.signed, "differing signedness")?;
                self.require(ip, src1.size == src2.size, "differing sizes")?;
                self.require(
                    ip,
                    src1.size.is_power_of_two() && src1.size <= 8,
                    "bad comparison size",
                )?;

                let a = self.read_scalar(ip, src1)?;
                let b = self.read_scalar(ip, src2)?;

                if src1.signed {
                    let sa = sext(a, src1.size);
                    let sb = sext(b, src2.size);
                    match op {
                        CmpOp::Lt => sa < sb,
                        CmpOp::Gt => sa > sb,
                        CmpOp::Lte => sa <= sb,
                        _ => sa >= sb,
                    }
                } else {
                    let ua = sized(a, src1.size);
                    let ub = sized(b, src2.size);
                    match op {
                        CmpOp::Lt => ua < ub,
                        CmpOp::Gt => ua > ub,
                        CmpOp::Lte => ua <= ub,
                        _ => ua >= ub,
                    }
                }
            }
        };

        self.write_scalar(ip, dst, result as u64)
    }

    // ==================== Calls and returns ====================

    fn ret_common(
        &mut self,
        ip: u64,
        size: u64,
        retval: Option<(Vec<u8>, bool)>,
    ) -> Result<Option<i32>, ExecError> {
        let (sp, bp) = {
            let vm = self.avm()?;
            (vm.sp, vm.bp)
        };
        self.require(ip, sp % 8 == 0 && bp % 8 == 0, "misaligned stack")?;
        self.require(ip, sp >= size, "stack underflow")?;
        self.require(ip, !self.avm()?.temps.is_empty(), "no temp frame")?;

        self.avm_mut()?.sp = sp - size;
        self.handle_return(ip, retval)
    }

    /// Common return path for `ret`/`retv` and built-ins. A quaint whose
    /// stack drains to zero hands control back to its observer.
    fn handle_return(
        &mut self,
        ip: u64,
        retval: Option<(Vec<u8>, bool)>,
    ) -> Result<Option<i32>, ExecError> {
        let (sp, parent) = {
            let vm = self.avm()?;
            (vm.sp, vm.parent)
        };

        if sp == 0 {
            if let Some(parent_id) = parent {
                return self.return_to_observer(ip, parent_id, retval).map(|_| None);
            }

            // the root activation finished: its return value is the
            // process exit status
            let status = match &retval {
                Some((data, signed)) => exit_status(data, *signed),
                None => 0,
            };
            return Ok(Some(status));
        }

        // normal return into the caller
        let frame = self
            .avm_mut()?
            .temps
            .pop()
            .ok_or_else(|| self.illegal(ip, "no temp frame"))?;
        self.mem.free(frame);

        let (stack_base, sp) = {
            let vm = self.avm()?;
            (vm.stack_base, vm.sp)
        };
        let saved_ip = self
            .mem
            .read_u64(stack_base + sp)
            .ok_or_else(|| self.illegal(ip, "bad return slot"))?;
        let saved_bp = self
            .mem
            .read_u64(stack_base + sp + 8)
            .ok_or_else(|| self.illegal(ip, "bad return slot"))?;

        self.require(ip, saved_ip < self.program.insns.len() as u64, "bad return address")?;
        self.require(ip, saved_bp <= STACK_SIZE, "bad saved base pointer")?;

        {
            let vm = self.avm_mut()?;
            vm.ip = saved_ip;
            vm.bp = saved_bp;
        }

        if let Some((data, _)) = retval {
            let callv = self
                .program
                .insns
                .get(saved_ip as usize)
                .cloned()
                .ok_or_else(|| self.illegal(ip, "bad return address"))?;
            let Instr::Callv { val, .. } = callv else {
                return Err(self.illegal(ip, "value return into a void call"));
            };
            self.require(ip, val.size as usize == data.len(), "return value size mismatch")?;
            self.write_val(saved_ip, &val, &data)?;
        }

        self.avm_mut()?.ip += 1;
        Ok(None)
    }

    /// The finishing quaint's observer is parked on `rte`, `rtev`, or
    /// `wait`; resume it accordingly.
    fn return_to_observer(
        &mut self,
        ip: u64,
        parent_id: u64,
        retval: Option<(Vec<u8>, bool)>,
    ) -> Result<(), ExecError> {
        let parent_ip = self
            .vms
            .get(&parent_id)
            .ok_or_else(|| self.illegal(ip, "missing observer"))?
            .ip;

        let parent_insn = self
            .program
            .insns
            .get(parent_ip as usize)
            .cloned()
            .ok_or_else(|| self.illegal(ip, "observer instruction out of range"))?;

        let child_id = self.active;

        match (&parent_insn, &retval) {
            (Instr::Rtev { dst, quaint }, Some((data, _))) => {
                self.active = parent_id;
                self.require(
                    parent_ip,
                    dst.size as usize == data.len(),
                    "quaint result size mismatch",
                )?;
                let data = data.clone();
                self.write_val(parent_ip, dst, &data)?;
                self.free_vm(child_id);
                let quaint = *quaint;
                self.write_scalar(parent_ip, &quaint, 0)?;
            }

            (Instr::Rte { quaint }, None) => {
                self.active = parent_id;
                self.free_vm(child_id);
                let quaint = *quaint;
                self.write_scalar(parent_ip, &quaint, 0)?;
            }

            (Instr::Wait { .. }, _) => {
                let child_stack = {
                    let child = self.avm_mut()?;
                    child.at_end = true;
                    child.last_passed = None;
                    child.stack_base
                };
                if let Some((data, _)) = &retval {
                    self.mem.write(child_stack, data);
                }
                // drop the child's temp frames; the stack stays so a later
                // rtev can read the value
                let frames = {
                    let child = self.avm_mut()?;
                    std::mem::take(&mut child.temps)
                };
                for frame in frames {
                    self.mem.free(frame);
                }

                self.active = parent_id;
                self.avm_mut()?.clear_waiting();
            }

            _ => {
                return Err(self.illegal(
                    parent_ip,
                    "observer is not parked on rte/rtev/wait",
                ))
            }
        }

        self.avm_mut()?.ip += 1;
        Ok(())
    }

    // ==================== Quaint observation ====================

    fn exec_rte(&mut self, ip: u64, dst: Option<Opd>, quaint: &Opd) -> Result<(), ExecError> {
        self.require(ip, quaint.size == 8, "bad quaint operand")?;
        let id = self.read_scalar(ip, quaint)?;

        let state = self.vms.get(&id).map(|c| (c.at_end, c.stack_base));

        match state {
            None => {
                // null or stale handle
                if let Some(dst) = dst {
                    let zeros = vec![0u8; dst.size as usize];
                    self.write_val(ip, &dst, &zeros)?;
                }
                self.avm_mut()?.ip += 1;
                Ok(())
            }

            Some((true, stack_base)) => {
                if let Some(dst) = dst {
                    let data = self
                        .mem
                        .read(stack_base, dst.size)
                        .ok_or_else(|| self.illegal(ip, "quaint result out of range"))?;
                    self.write_val(ip, &dst, &data)?;
                }
                self.free_vm(id);
                self.write_scalar(ip, quaint, 0)?;
                self.avm_mut()?.ip += 1;
                Ok(())
            }

            Some((false, _)) => {
                // run the quaint; control returns when it finishes
                if let Some(child) = self.vms.get_mut(&id) {
                    child.parent = Some(self.active);
                }
                self.active = id;
                Ok(())
            }
        }
    }

    fn exec_wait(
        &mut self,
        ip: u64,
        quaint: &Opd,
        timeout: Option<&Opd>,
        label: Option<WlabRef>,
        noblock: bool,
        units_sec: bool,
    ) -> Result<(), ExecError> {
        self.require(ip, quaint.size == 8, "bad quaint operand")?;
        let id = self.read_scalar(ip, quaint)?;

        let child_state = self.vms.get(&id).map(|c| (c.at_end, c.last_passed));

        let Some((at_end, child_last_passed)) = child_state else {
            self.avm_mut()?.ip += 1;
            return Ok(());
        };

        if at_end {
            self.avm_mut()?.ip += 1;
            return Ok(());
        }

        let mut interval = None;
        if let Some(timeout) = timeout {
            self.require(
                ip,
                timeout.size.is_power_of_two() && timeout.size <= 8,
                "bad timeout operand",
            )?;
            let value = self.read_scalar(ip, timeout)?;
            if value == 0 {
                // a zero timeout means "do not wait"
                self.avm_mut()?.ip += 1;
                return Ok(());
            }
            let unit = if units_sec { 1_000_000_000 } else { 1_000_000 };
            interval = Some(value.saturating_mul(unit));
        }

        if noblock {
            match label {
                Some(target) if interval.is_none() => {
                    // suspend only if the label has not yet been passed
                    if child_last_passed == Some(target) {
                        self.avm_mut()?.ip += 1;
                        return Ok(());
                    }
                }
                _ => {
                    // the condition cannot be satisfied synchronously
                    self.avm_mut()?.ip += 1;
                    return Ok(());
                }
            }
        }

        {
            let vm = self.avm_mut()?;
            vm.waiting = true;
            vm.waiting_for = false;
            vm.waiting_until = false;
            vm.waiting_noblock = noblock;
        }

        if let Some(interval) = interval {
            self.now = self.now_ns();
            let now = self.now;
            let vm = self.avm_mut()?;
            vm.waiting_for = true;
            vm.wait_start = now;
            vm.wait_interval = interval;
        } else if let Some(target) = label {
            let vm = self.avm_mut()?;
            vm.waiting_until = true;
            vm.wait_until = Some(target);
        }

        if let Some(child) = self.vms.get_mut(&id) {
            child.parent = Some(self.active);
        }
        self.active = id;
        Ok(())
    }

    // ==================== Built-ins ====================

    /// Built-in dispatch: the instruction pointer itself is the built-in
    /// id. Arguments are read straight off the caller's stack; the return
    /// goes through the ordinary return path.
    fn exec_bfun(&mut self, ip: u64) -> Result<Option<i32>, ExecError> {
        let (sp, bp, stack_base) = {
            let vm = self.avm()?;
            (vm.sp, vm.bp, vm.stack_base)
        };
        self.require(ip, sp % 8 == 0 && bp % 8 == 0, "misaligned stack")?;
        self.require(ip, sp >= 16, "stack underflow")?;

        let bfun = BfunId::from_u64(ip)
            .ok_or_else(|| self.illegal(ip, "unknown built-in"))?;

        macro_rules! arg {
            ($offset:expr, $size:expr) => {
                self.mem
                    .read_scalar(stack_base + bp + $offset, $size)
                    .ok_or_else(|| self.illegal(ip, "built-in argument out of range"))?
            };
        }

        let mut retval: Option<(Vec<u8>, bool)> = None;
        let mut args_size = 0u64;

        match bfun {
            BfunId::Reserved => {
                return Err(self.illegal(ip, "null function call"));
            }

            BfunId::Monotime => {
                self.now = self.now_ns();
                retval = Some((self.now.to_le_bytes().to_vec(), false));
            }

            BfunId::Malloc | BfunId::Calloc => {
                let size = arg!(0, 8);
                let ptr = if bfun == BfunId::Malloc {
                    self.mem.alloc(size)
                } else {
                    self.mem.alloc_zeroed(size)
                };
                retval = Some((ptr.to_le_bytes().to_vec(), false));
                args_size = 8;
            }

            BfunId::Realloc => {
                let old_ptr = arg!(0, 8);
                let new_size = arg!(8, 8);
                let new_ptr = self.mem.alloc(new_size);
                if old_ptr != 0 {
                    if let Some(old_size) = self.mem.block_size(old_ptr) {
                        self.mem.copy(new_ptr, old_ptr, old_size.min(new_size));
                        self.mem.free(old_ptr);
                    }
                }
                retval = Some((new_ptr.to_le_bytes().to_vec(), false));
                args_size = 16;
            }

            BfunId::Free => {
                let ptr = arg!(0, 8);
                if ptr != 0 {
                    self.mem.free(ptr);
                }
                args_size = 8;
            }

            BfunId::Ps => {
                let ptr = arg!(0, 8);
                if ptr == 0 {
                    eprintln!("warn: null pointer dereference");
                } else if let Some(bytes) = self.mem.read_cstr(ptr) {
                    self.out.write_all(&bytes)?;
                    self.out.flush()?;
                }
                args_size = 8;
            }

            BfunId::Pu8 => {
                let v = arg!(0, 1) as u8;
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }
            BfunId::Pi8 => {
                let v = arg!(0, 1) as u8 as i8;
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }
            BfunId::Pu16 => {
                let v = arg!(0, 2) as u16;
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }
            BfunId::Pi16 => {
                let v = arg!(0, 2) as u16 as i16;
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }
            BfunId::Pu32 => {
                let v = arg!(0, 4) as u32;
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }
            BfunId::Pi32 => {
                let v = arg!(0, 4) as u32 as i32;
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }
            BfunId::Pu64 => {
                let v = arg!(0, 8);
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }
            BfunId::Pi64 => {
                let v = arg!(0, 8) as i64;
                write!(self.out, "{}", v)?;
                self.out.flush()?;
                args_size = 8;
            }

            BfunId::Pnl => {
                writeln!(self.out)?;
                self.out.flush()?;
            }

            BfunId::Exit => {
                let status = arg!(0, 4) as u32 as i32;
                return Ok(Some(status));
            }
        }

        {
            let vm = self.avm_mut()?;
            vm.sp -= args_size;
            vm.sp -= 16;
        }

        // balance the frame pop in the return path
        let frame = self.mem.alloc(0);
        self.avm_mut()?.temps.push(frame);

        self.handle_return(ip, retval)
    }
}

/// Truncate a zero-extended scalar to its operand width
fn sized(value: u64, size: u64) -> u64 {
    if size >= 8 {
        value
    } else {
        value & ((1u64 << (size * 8)) - 1)
    }
}

/// Sign-extend a scalar of the given byte width
fn sext(value: u64, size: u64) -> i64 {
    match size {
        1 => value as u8 as i8 as i64,
        2 => value as u16 as i16 as i64,
        4 => value as u32 as i32 as i64,
        _ => value as i64,
    }
}

fn exit_status(data: &[u8], signed: bool) -> i32 {
    let mut buf = [0u8; 8];
    let n = data.len().min(8);
    buf[..n].copy_from_slice(&data[..n]);
    let value = u64::from_le_bytes(buf);

    if signed {
        sext(value, n as u64) as i32
    } else {
        sized(value, n as u64) as i32
    }
}
