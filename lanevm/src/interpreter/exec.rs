//! The bytecode dispatch loop (spec §4).

use lanevm_asm::{Arg, FaultReason, Instruction, Opcode, SlotId};
use lanevm_types::{LaneMask, Ref, Word, LANES};
use lanevm_vmm::Vmm;

use super::program::BytecodeProgram;
use super::registers::{select_backend, LaneOps, Lanes, SlotValue, Slots};
use crate::dfa;
use crate::error::RuntimeError;
use crate::hash::{fingerprint, hash_extend};
use crate::radix::RadixTree;
use crate::symtab::SymbolTable;
use crate::tlv;
use crate::value::TypeTag;

fn as_i64(w: Word) -> i64 {
    w as i64
}
fn from_i64(v: i64) -> Word {
    v as u64
}
fn as_f64(w: Word) -> f64 {
    f64::from_bits(w)
}
fn from_f64(v: f64) -> Word {
    v.to_bits()
}

fn out_slot(instr: &Instruction) -> SlotId {
    instr.output_slot().expect("instruction has no output slot")
}

/// Everything a running program needs besides its own slot table: the
/// memory it reads/writes value references against, the symbol table for
/// `FindSymbol`, and the radix trees `AggBucket`/`HashLookup`/`HashMember`
/// address by index (one tree per group-by clause compiled into the
/// program).
pub struct ExecContext<'a> {
    pub vmm: &'a Vmm,
    pub symtab: &'a SymbolTable,
    pub trees: &'a mut [RadixTree],
}

/// Interprets one [`BytecodeProgram`] against a lane mask, halting on the
/// first fault.
pub struct Interpreter {
    slots: Slots,
    backend: super::registers::PortableLanes,
    /// Scratch page boxing opcodes append TLV bytes into. Allocated
    /// lazily on first use and kept for the interpreter's lifetime — one
    /// 1 MiB page vastly exceeds what a 16-lane batch ever boxes, so
    /// there's nothing to grow (see `DESIGN.md`'s scratch-discipline
    /// note). The cursor resets every `run()`.
    scratch_page: Option<Ref>,
    scratch_cursor: u32,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            slots: Slots::with_capacity(0),
            backend: select_backend(),
            scratch_page: None,
            scratch_cursor: 0,
        }
    }

    /// The slot table as it stood after the last `run`, for callers (e.g.
    /// `project`) that need a value-producing slot rather than the
    /// returned predicate mask.
    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    /// Run `program` to completion, honoring `valid_lanes` as the mask
    /// seed and `rows` as the `init-mem` seed (spec's "init-mem/valid-lanes
    /// seed values") — `rows` is padded with `Ref::NULL` out to `LANES`
    /// lanes if the batch is a segment tail. Returns the final mask
    /// register written by `Ret`, or propagates the first fault.
    #[tracing::instrument(skip_all, fields(instructions = program.instructions.len(), rows = rows.len()))]
    pub fn run(
        &mut self,
        program: &BytecodeProgram,
        valid_lanes: LaneMask,
        rows: &[Ref],
        ctx: &mut ExecContext<'_>,
    ) -> Result<LaneMask, RuntimeError> {
        self.slots = Slots::with_capacity(program.stack_slot_count);
        self.scratch_cursor = 0;
        self.slots.set(program.valid_lanes_slot, SlotValue::Mask(valid_lanes));
        let mut row_lanes = [Ref::NULL; LANES];
        for (i, &r) in rows.iter().take(LANES).enumerate() {
            row_lanes[i] = r;
        }
        self.slots.set(program.init_mem_slot, SlotValue::Value(::std::boxed::Box::new(row_lanes)));

        let mut result = valid_lanes;
        for instr in &program.instructions {
            match self.step(instr, ctx) {
                Ok(Some(mask)) => {
                    result = mask;
                    break;
                }
                Ok(None) => {}
                Err(reason) => return Err(RuntimeError::from_fault(reason)),
            }
        }
        Ok(result)
    }

    /// Execute one instruction. Returns `Some(mask)` on `Ret`, `None`
    /// otherwise, or a fault.
    fn step(
        &mut self,
        instr: &Instruction,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Option<LaneMask>, FaultReason> {
        tracing::trace!(op = ?instr.op, "dispatch");
        use Opcode::*;
        match instr.op {
            Ret => {
                let mask = self.read_mask(instr.inputs[0]);
                return Ok(Some(mask));
            }
            SkipIfMaskEmpty => {
                let mask = self.read_mask(instr.inputs[0]);
                if mask.is_empty() {
                    return Ok(Some(LaneMask::NONE));
                }
            }
            LoadScalarImm => {
                let imm = self.read_imm(instr.inputs[0]);
                self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new([from_i64(imm); LANES])));
            }
            MoveScalar => {
                let v = *self.read_scalar(instr.inputs[0]);
                self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(v)));
            }
            MoveValue => {
                let v = *self.read_value(instr.inputs[0]);
                self.slots.set(out_slot(instr), SlotValue::Value(::std::boxed::Box::new(v)));
            }
            MoveMask => {
                let v = self.read_mask(instr.inputs[0]);
                self.slots.set(out_slot(instr), SlotValue::Mask(v));
            }
            ZeroScalar => {
                self.slots.set(out_slot(instr), SlotValue::zeroed_scalar());
            }
            SelectScalar => {
                let mask = self.read_mask(instr.inputs[0]);
                let a = *self.read_scalar(instr.inputs[1]);
                let b = *self.read_scalar(instr.inputs[2]);
                let mut out = b;
                for i in 0..LANES {
                    if mask.test(i) {
                        out[i] = a[i];
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
            }
            SelectValue => {
                let mask = self.read_mask(instr.inputs[0]);
                let a = *self.read_value(instr.inputs[1]);
                let b = *self.read_value(instr.inputs[2]);
                let mut out = b;
                for i in 0..LANES {
                    if mask.test(i) {
                        out[i] = a[i];
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Value(::std::boxed::Box::new(out)));
            }
            op if int_binop(op).is_some() => self.exec_int_binop(op, instr)?,
            NegInt => self.exec_int_unop(instr, |a| a.wrapping_neg()),
            NotInt => self.exec_int_unop(instr, |a| !a),
            op if float_binop(op).is_some() => self.exec_float_binop(op, instr),
            NegFloat => self.exec_float_unop(instr, |a| -a),
            op if transcendental(op).is_some() => self.exec_float_unop_or_binop(op, instr),
            MaskToFloat => self.exec_mask_to_float(instr),
            MaskToInt => self.exec_mask_to_int(instr),
            IntToFloat => self.exec_float_from_int(instr, |a| a as f64),
            FloatToInt => self.exec_int_from_float(instr, |a| a as i64),
            RoundFloat => self.exec_float_unop(instr, f64::round),
            TruncFloat => self.exec_float_unop(instr, f64::trunc),
            CeilFloat => self.exec_float_unop(instr, f64::ceil),
            FloorFloat => self.exec_float_unop(instr, f64::floor),
            IntToString => {
                let mask = self.read_mask(instr.inputs[0]);
                let a = self.scalar_operand(instr.inputs[1]);
                let mut out = [Ref::NULL; LANES];
                for i in 0..LANES {
                    if !mask.test(i) {
                        continue;
                    }
                    let rendered = as_i64(a[i]).to_string();
                    out[i] = self.box_bytes(ctx.vmm, &tlv::encode_string(&rendered))?;
                }
                self.slots.set(out_slot(instr), SlotValue::Value(::std::boxed::Box::new(out)));
            }
            op if int_cmp(op).is_some() => self.exec_int_cmp(op, instr),
            op if float_cmp(op).is_some() => self.exec_float_cmp(op, instr),
            CmpEqValue => self.exec_value_cmp(instr, ctx, true)?,
            CmpNeValue => self.exec_value_cmp(instr, ctx, false)?,
            IsNull => {
                let v = *self.read_value(instr.inputs[0]);
                let mut mask = LaneMask::NONE;
                for i in 0..LANES {
                    if v[i].is_empty() {
                        mask.set(i);
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Mask(mask));
            }
            IsTrue | IsFalse => {
                let s = *self.read_scalar(instr.inputs[0]);
                let want_true = matches!(instr.op, IsTrue);
                let mut mask = LaneMask::NONE;
                for i in 0..LANES {
                    if (s[i] != 0) == want_true {
                        mask.set(i);
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Mask(mask));
            }
            TagTest => {
                let tag_bits = self.read_imm(instr.inputs[1]) as u16;
                let s = *self.read_scalar(instr.inputs[0]);
                let mut mask = LaneMask::NONE;
                for i in 0..LANES {
                    if (1u16 << (s[i] as u16 & 0xf)) & tag_bits != 0 {
                        mask.set(i);
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Mask(mask));
            }
            HashValue => {
                let v = *self.read_value(instr.inputs[0]);
                let mut out = [0u128; LANES];
                for i in 0..LANES {
                    let bytes = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
                    out[i] = fingerprint(&bytes);
                }
                self.slots.set(out_slot(instr), SlotValue::Hash(::std::boxed::Box::new(out)));
            }
            HashExtend => {
                let prev = *self.read_hash(instr.inputs[0]);
                let v = *self.read_value(instr.inputs[1]);
                let mut out = [0u128; LANES];
                for i in 0..LANES {
                    let bytes = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
                    out[i] = hash_extend(prev[i], &bytes);
                }
                self.slots.set(out_slot(instr), SlotValue::Hash(::std::boxed::Box::new(out)));
            }
            HashMember => {
                let tree_idx = self.read_imm(instr.inputs[1]) as usize;
                let h = *self.read_hash(instr.inputs[0]);
                let tree = ctx.trees.get(tree_idx).ok_or(FaultReason::NeedRadix)?;
                let mut mask = LaneMask::NONE;
                for i in 0..LANES {
                    if tree.find(h[i]).is_some() {
                        mask.set(i);
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Mask(mask));
            }
            HashLookup | AggBucket => {
                let tree_idx = self.read_imm(instr.inputs[1]) as usize;
                let h = *self.read_hash(instr.inputs[0]);
                let tree = ctx.trees.get_mut(tree_idx).ok_or(FaultReason::NeedRadix)?;
                let mut out = [0u32; LANES];
                for i in 0..LANES {
                    // Materializing the group (if new) here is what makes
                    // this opcode retryable under `NeedRadix`: the actual
                    // accumulate step reads the bucket id back out of this
                    // register and indexes the tree again by hash, not by
                    // this id, so a truncated low-bits handle is enough to
                    // prove "this group exists" downstream.
                    let entry = tree.entry(h[i]);
                    let _ = entry.is_new;
                    out[i] = h[i] as u32;
                }
                self.slots.set(out_slot(instr), SlotValue::Bucket(::std::boxed::Box::new(out)));
            }
            Box => {
                let mask = self.read_mask(instr.inputs[0]);
                let scalar = self.scalar_operand(instr.inputs[1]);
                let tag = TypeTag::from_code(self.read_imm(instr.inputs[2]) as u8).ok_or(FaultReason::TypeMismatch)?;
                let mut out = [Ref::NULL; LANES];
                for i in 0..LANES {
                    if !mask.test(i) {
                        continue;
                    }
                    let encoded = match tag {
                        TypeTag::Int => tlv::encode_int(as_i64(scalar[i])),
                        TypeTag::Float => tlv::encode_float(as_f64(scalar[i])),
                        TypeTag::Bool => tlv::encode_bool(scalar[i] != 0),
                        _ => return Err(FaultReason::TypeMismatch),
                    };
                    out[i] = self.box_bytes(ctx.vmm, &encoded)?;
                }
                self.slots.set(out_slot(instr), SlotValue::Value(::std::boxed::Box::new(out)));
            }
            FindSymbol => {
                let name_ref = *self.read_value(instr.inputs[0]);
                let mut out = [0u64; LANES];
                for i in 0..LANES {
                    let bytes = ctx.vmm.read_ref(name_ref[i]).map_err(|_| FaultReason::Corrupt)?;
                    let name = std::str::from_utf8(&bytes).map_err(|_| FaultReason::Corrupt)?;
                    out[i] = ctx.symtab.id(name).map(|id| u64::from(id.as_u32())).unwrap_or(u64::MAX);
                }
                self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
            }
            op if is_string_op(op) => self.exec_string_op(op, instr, ctx)?,
            op if is_dfa_op(op) => self.exec_dfa_op(op, instr, ctx)?,
            op if is_scalar_agg(op) => { /* handled by the aggregate engines directly, not via exec */ }
            other => return Err(unhandled(other)),
        }
        Ok(None)
    }

    fn read_mask(&self, arg: Arg) -> LaneMask {
        self.slots.get(arg.as_slot().expect("mask operand must be a slot")).as_mask()
    }

    fn read_scalar(&self, arg: Arg) -> &Lanes<Word> {
        self.slots.get(arg.as_slot().expect("scalar operand must be a slot")).as_scalar()
    }

    fn read_value(&self, arg: Arg) -> &Lanes<Ref> {
        self.slots.get(arg.as_slot().expect("value operand must be a slot")).as_value()
    }

    fn read_hash(&self, arg: Arg) -> &Lanes<u128> {
        self.slots.get(arg.as_slot().expect("hash operand must be a slot")).as_hash()
    }

    fn read_imm(&self, arg: Arg) -> i64 {
        match arg {
            Arg::Imm(v) => v,
            Arg::Slot(_) => as_i64(self.read_scalar(arg)[0]),
        }
    }

    fn scalar_operand(&self, arg: Arg) -> Lanes<Word> {
        match arg {
            Arg::Imm(v) => [from_i64(v); LANES],
            Arg::Slot(_) => *self.read_scalar(arg),
        }
    }

    /// Append `bytes` to this program run's scratch page and return a
    /// `ref` over them (spec §4.3's boxing opcodes). Allocates the page on
    /// first use; raises `MoreScratch` if the single page is exhausted.
    fn box_bytes(&mut self, vmm: &Vmm, bytes: &[u8]) -> Result<Ref, FaultReason> {
        if self.scratch_page.is_none() {
            self.scratch_page = Some(vmm.alloc().map_err(|_| FaultReason::PageAllocationFailed)?);
        }
        let page = self.scratch_page.expect("just ensured");
        let remaining = page.length() - self.scratch_cursor;
        if bytes.len() as u32 > remaining {
            return Err(FaultReason::MoreScratch);
        }
        let addr = page.offset() + self.scratch_cursor;
        let r = vmm.write_ref(addr, bytes).map_err(|_| FaultReason::Corrupt)?;
        self.scratch_cursor += bytes.len() as u32;
        Ok(r)
    }

    fn exec_int_binop(&mut self, op: Opcode, instr: &Instruction) -> Result<(), FaultReason> {
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let b = self.scalar_operand(instr.inputs[2]);

        if matches!(op, Opcode::AddInt | Opcode::AddIntImm) {
            let mut out = [0u64; LANES];
            self.backend.add_int(mask, &a, &b, &mut out);
            self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
            return Ok(());
        }

        let f = int_binop(op).unwrap();
        let mut out = [0u64; LANES];
        for i in 0..LANES {
            if !mask.test(i) {
                continue;
            }
            if matches!(op, Opcode::DivInt | Opcode::DivIntImm | Opcode::ModInt | Opcode::ModIntImm)
                && as_i64(b[i]) == 0
            {
                return Err(FaultReason::DivideByZero);
            }
            out[i] = from_i64(f(as_i64(a[i]), as_i64(b[i])));
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
        Ok(())
    }

    fn exec_int_unop(&mut self, instr: &Instruction, f: impl Fn(i64) -> i64) {
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let mut out = a;
        for i in 0..LANES {
            if mask.test(i) {
                out[i] = from_i64(f(as_i64(a[i])));
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_float_binop(&mut self, op: Opcode, instr: &Instruction) {
        let f = float_binop(op).unwrap();
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let b = self.scalar_operand(instr.inputs[2]);
        let mut out = [0u64; LANES];
        for i in 0..LANES {
            if mask.test(i) {
                out[i] = from_f64(f(as_f64(a[i]), as_f64(b[i])));
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_float_unop_or_binop(&mut self, op: Opcode, instr: &Instruction) {
        let (is_binary, f) = transcendental(op).unwrap();
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let b = if is_binary { self.scalar_operand(instr.inputs[2]) } else { [0; LANES] };
        let mut out = [0u64; LANES];
        for i in 0..LANES {
            if mask.test(i) {
                out[i] = from_f64(f(as_f64(a[i]), as_f64(b[i])));
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_float_unop(&mut self, instr: &Instruction, f: impl Fn(f64) -> f64) {
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let mut out = a;
        for i in 0..LANES {
            if mask.test(i) {
                out[i] = from_f64(f(as_f64(a[i])));
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_float_from_int(&mut self, instr: &Instruction, f: impl Fn(i64) -> f64) {
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let mut out = [0u64; LANES];
        for i in 0..LANES {
            if mask.test(i) {
                out[i] = from_f64(f(as_i64(a[i])));
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_int_from_float(&mut self, instr: &Instruction, f: impl Fn(f64) -> i64) {
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let mut out = [0u64; LANES];
        for i in 0..LANES {
            if mask.test(i) {
                out[i] = from_i64(f(as_f64(a[i])));
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_mask_to_float(&mut self, instr: &Instruction) {
        let src = self.read_mask(instr.inputs[0]);
        let mut out = [0u64; LANES];
        for i in 0..LANES {
            out[i] = from_f64(if src.test(i) { 1.0 } else { 0.0 });
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_mask_to_int(&mut self, instr: &Instruction) {
        let src = self.read_mask(instr.inputs[0]);
        let mut out = [0u64; LANES];
        for i in 0..LANES {
            out[i] = from_i64(i64::from(src.test(i)));
        }
        self.slots.set(out_slot(instr), SlotValue::Scalar(::std::boxed::Box::new(out)));
    }

    fn exec_int_cmp(&mut self, op: Opcode, instr: &Instruction) {
        let f = int_cmp(op).unwrap();
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let b = self.scalar_operand(instr.inputs[2]);
        let mut out = LaneMask::NONE;
        for i in 0..LANES {
            if mask.test(i) && f(as_i64(a[i]), as_i64(b[i])) {
                out.set(i);
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Mask(out));
    }

    fn exec_float_cmp(&mut self, op: Opcode, instr: &Instruction) {
        let f = float_cmp(op).unwrap();
        let mask = self.read_mask(instr.inputs[0]);
        let a = self.scalar_operand(instr.inputs[1]);
        let b = self.scalar_operand(instr.inputs[2]);
        let mut out = LaneMask::NONE;
        for i in 0..LANES {
            if mask.test(i) && f(as_f64(a[i]), as_f64(b[i])) {
                out.set(i);
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Mask(out));
    }

    fn exec_value_cmp(&mut self, instr: &Instruction, ctx: &mut ExecContext<'_>, want_eq: bool) -> Result<(), FaultReason> {
        let mask = self.read_mask(instr.inputs[0]);
        let a = *self.read_value(instr.inputs[1]);
        let b = *self.read_value(instr.inputs[2]);
        let mut out = LaneMask::NONE;
        for i in 0..LANES {
            if !mask.test(i) {
                continue;
            }
            let bytes_a = ctx.vmm.read_ref(a[i]).map_err(|_| FaultReason::Corrupt)?;
            let bytes_b = ctx.vmm.read_ref(b[i]).map_err(|_| FaultReason::Corrupt)?;
            if (bytes_a == bytes_b) == want_eq {
                out.set(i);
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Mask(out));
        Ok(())
    }

    fn exec_string_op(&mut self, op: Opcode, instr: &Instruction, ctx: &mut ExecContext<'_>) -> Result<(), FaultReason> {
        use Opcode::*;
        let mask = self.read_mask(instr.inputs[0]);
        let v = *self.read_value(instr.inputs[1]);
        match op {
            StrStartsWith | StrEndsWith | StrContains => {
                let needle_ref = *self.read_value(instr.inputs[2]);
                let mut out = LaneMask::NONE;
                for i in 0..LANES {
                    if !mask.test(i) {
                        continue;
                    }
                    let hay = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
                    let needle = ctx.vmm.read_ref(needle_ref[i]).map_err(|_| FaultReason::Corrupt)?;
                    let matched = match op {
                        StrStartsWith => hay.starts_with(needle.as_slice()),
                        StrEndsWith => hay.ends_with(needle.as_slice()),
                        StrContains => windows_contains(&hay, &needle),
                        _ => unreachable!(),
                    };
                    if matched {
                        out.set(i);
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Mask(out));
            }
            StrDictMatch => {
                let dict_ref = *self.read_value(instr.inputs[2]);
                let mut out = LaneMask::NONE;
                for i in 0..LANES {
                    if !mask.test(i) {
                        continue;
                    }
                    let hay_bytes = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
                    let hay = decoded_string(&hay_bytes)?;
                    let dict_bytes = ctx.vmm.read_ref(dict_ref[i]).map_err(|_| FaultReason::Corrupt)?;
                    if dict_contains(hay, &dict_bytes)? {
                        out.set(i);
                    }
                }
                self.slots.set(out_slot(instr), SlotValue::Mask(out));
            }
            StrLower | StrUpper | StrTrim => {
                let mut out = [Ref::NULL; LANES];
                for i in 0..LANES {
                    if !mask.test(i) {
                        continue;
                    }
                    let raw = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
                    let s = decoded_string(&raw)?;
                    let transformed = match op {
                        StrLower => s.to_lowercase(),
                        StrUpper => s.to_uppercase(),
                        StrTrim => s.trim().to_string(),
                        _ => unreachable!(),
                    };
                    out[i] = self.box_bytes(ctx.vmm, &tlv::encode_string(&transformed))?;
                }
                self.slots.set(out_slot(instr), SlotValue::Value(::std::boxed::Box::new(out)));
            }
            StrSubstring => {
                let start = self.read_imm(instr.inputs[2]).max(0) as usize;
                let len = self.read_imm(instr.inputs[3]).max(0) as usize;
                let mut out = [Ref::NULL; LANES];
                for i in 0..LANES {
                    if !mask.test(i) {
                        continue;
                    }
                    let raw = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
                    let s = decoded_string(&raw)?;
                    let sub: String = s.chars().skip(start).take(len).collect();
                    out[i] = self.box_bytes(ctx.vmm, &tlv::encode_string(&sub))?;
                }
                self.slots.set(out_slot(instr), SlotValue::Value(::std::boxed::Box::new(out)));
            }
            StrSplit => {
                let delim_ref = *self.read_value(instr.inputs[2]);
                let mut out = [Ref::NULL; LANES];
                for i in 0..LANES {
                    if !mask.test(i) {
                        continue;
                    }
                    let raw = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
                    let s = decoded_string(&raw)?.to_string();
                    let delim_bytes = ctx.vmm.read_ref(delim_ref[i]).map_err(|_| FaultReason::Corrupt)?;
                    let delim = decoded_string(&delim_bytes)?;
                    let parts: Vec<Vec<u8>> = if delim.is_empty() {
                        vec![tlv::encode_string(&s)]
                    } else {
                        s.split(delim).map(tlv::encode_string).collect()
                    };
                    out[i] = self.box_bytes(ctx.vmm, &tlv::encode_list(&parts))?;
                }
                self.slots.set(out_slot(instr), SlotValue::Value(::std::boxed::Box::new(out)));
            }
            _ => unreachable!("exec_string_op dispatched on a non-string opcode"),
        }
        Ok(())
    }

    fn exec_dfa_op(&mut self, op: Opcode, instr: &Instruction, ctx: &mut ExecContext<'_>) -> Result<(), FaultReason> {
        let width = dfa::Width::from_opcode(op).expect("exec_dfa_op dispatched on a non-dfa opcode");
        let mask = self.read_mask(instr.inputs[0]);
        let v = *self.read_value(instr.inputs[1]);
        let table_ref = *self.read_value(instr.inputs[2]);
        let mut out = LaneMask::NONE;
        for i in 0..LANES {
            if !mask.test(i) {
                continue;
            }
            let hay_bytes = ctx.vmm.read_ref(v[i]).map_err(|_| FaultReason::Corrupt)?;
            let hay = decoded_string(&hay_bytes)?;
            let table_bytes = ctx.vmm.read_ref(table_ref[i]).map_err(|_| FaultReason::Corrupt)?;
            let table = dfa::Table::decode(width, &table_bytes).map_err(|_| FaultReason::Corrupt)?;
            if table.matches(hay.as_bytes()) {
                out.set(i);
            }
        }
        self.slots.set(out_slot(instr), SlotValue::Mask(out));
        Ok(())
    }
}

fn windows_contains(hay: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    hay.windows(needle.len()).any(|w| w == needle)
}

/// Decode a TLV-framed string value's body. Used by the string opcodes,
/// whose operands are boxed `String` values (unlike `StrStartsWith`'s
/// family, which compares raw value bytes directly).
fn decoded_string(bytes: &[u8]) -> Result<&str, FaultReason> {
    let header = tlv::decode_header(bytes).map_err(|_| FaultReason::Corrupt)?;
    tlv::decode_string(bytes, &header).map_err(|_| FaultReason::Corrupt)
}

fn dict_contains(hay: &str, dict_bytes: &[u8]) -> Result<bool, FaultReason> {
    let header = tlv::decode_header(dict_bytes).map_err(|_| FaultReason::Corrupt)?;
    if header.tag != TypeTag::List {
        return Err(FaultReason::TypeMismatch);
    }
    let body = &dict_bytes[header.body_start..header.total_len()];
    let mut cursor = 0usize;
    while cursor < body.len() {
        let elem_header = tlv::decode_header(&body[cursor..]).map_err(|_| FaultReason::Corrupt)?;
        let elem = tlv::decode_string(&body[cursor..], &elem_header).map_err(|_| FaultReason::Corrupt)?;
        if elem == hay {
            return Ok(true);
        }
        cursor += elem_header.total_len();
    }
    Ok(false)
}

pub(crate) fn int_binop(op: Opcode) -> Option<fn(i64, i64) -> i64> {
    use Opcode::*;
    Some(match op {
        AddInt | AddIntImm => |a, b| a.wrapping_add(b),
        SubInt | SubIntImm => |a, b| a.wrapping_sub(b),
        MulInt | MulIntImm => |a, b| a.wrapping_mul(b),
        DivInt | DivIntImm => |a, b| a.wrapping_div(b),
        ModInt | ModIntImm => |a, b| a.wrapping_rem(b),
        AndInt | AndIntImm => |a, b| a & b,
        OrInt | OrIntImm => |a, b| a | b,
        XorInt | XorIntImm => |a, b| a ^ b,
        ShlInt | ShlIntImm => |a, b| a.wrapping_shl(b as u32),
        ShrInt | ShrIntImm => |a, b| a.wrapping_shr(b as u32),
        _ => return None,
    })
}

pub(crate) fn float_binop(op: Opcode) -> Option<fn(f64, f64) -> f64> {
    use Opcode::*;
    Some(match op {
        AddFloat | AddFloatImm => |a, b| a + b,
        SubFloat | SubFloatImm => |a, b| a - b,
        MulFloat | MulFloatImm => |a, b| a * b,
        DivFloat | DivFloatImm => |a, b| a / b,
        _ => return None,
    })
}

fn transcendental(op: Opcode) -> Option<(bool, fn(f64, f64) -> f64)> {
    use Opcode::*;
    Some(match op {
        ExpFloat => (false, |a, _| a.exp()),
        LogFloat => (false, |a, _| a.ln()),
        SinFloat => (false, |a, _| a.sin()),
        CosFloat => (false, |a, _| a.cos()),
        PowFloat => (true, f64::powf),
        HypotFloat => (true, f64::hypot),
        Atan2Float => (true, f64::atan2),
        _ => return None,
    })
}

pub(crate) fn int_cmp(op: Opcode) -> Option<fn(i64, i64) -> bool> {
    use Opcode::*;
    Some(match op {
        CmpEqInt => |a, b| a == b,
        CmpNeInt => |a, b| a != b,
        CmpLtInt => |a, b| a < b,
        CmpLeInt => |a, b| a <= b,
        CmpGtInt => |a, b| a > b,
        CmpGeInt => |a, b| a >= b,
        _ => return None,
    })
}

pub(crate) fn float_cmp(op: Opcode) -> Option<fn(f64, f64) -> bool> {
    use Opcode::*;
    Some(match op {
        CmpEqFloat => |a, b| a == b,
        CmpNeFloat => |a, b| a != b,
        CmpLtFloat => |a, b| a < b,
        CmpLeFloat => |a, b| a <= b,
        CmpGtFloat => |a, b| a > b,
        CmpGeFloat => |a, b| a >= b,
        _ => return None,
    })
}

fn is_string_op(op: Opcode) -> bool {
    use Opcode::*;
    matches!(
        op,
        StrLower | StrUpper | StrTrim | StrSubstring | StrSplit | StrStartsWith | StrEndsWith | StrContains | StrDictMatch
    )
}

fn is_dfa_op(op: Opcode) -> bool {
    use Opcode::*;
    matches!(op, DfaMatch6 | DfaMatch7 | DfaMatch8 | DfaMatchUnbounded)
}

fn is_scalar_agg(op: Opcode) -> bool {
    use Opcode::*;
    matches!(
        op,
        AggSum | AggMin | AggMax | AggAndInt | AggOrInt | AggXorInt | AggAndBool | AggOrBool
            | AggCount | AggSumSlot | AggMinSlot | AggMaxSlot | AggAndIntSlot | AggOrIntSlot
            | AggXorIntSlot | AggAndBoolSlot | AggOrBoolSlot | AggCountSlot
    )
}

fn unhandled(op: Opcode) -> FaultReason {
    tracing::warn!(?op, "interpreter: opcode has no bytecode-level effect");
    FaultReason::BytecodeBounds
}
