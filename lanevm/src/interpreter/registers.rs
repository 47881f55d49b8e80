//! The typed, 16-lane register file (spec §4).

use lanevm_types::{LaneMask, Ref, Word, LANES};

/// A fixed-size, lane-indexed array — the shape every register kind
/// shares.
pub type Lanes<T> = [T; LANES];

/// One register's contents, tagged by kind. `SlotId`s are untyped at the
/// bytecode level (spec §4.3); the interpreter relies on the SSA lowering
/// pass having allocated each slot consistently with how it's read.
#[derive(Debug, Clone)]
pub enum SlotValue {
    /// A predicate mask, the `k` register kind.
    Mask(LaneMask),
    /// Raw 64-bit words reinterpreted per opcode (`s` register kind).
    Scalar(Box<Lanes<Word>>),
    /// VMM byte references (`v` register kind, boxed/string/list values).
    Value(Box<Lanes<Ref>>),
    /// 128-bit fingerprints (`h` register kind).
    Hash(Box<Lanes<u128>>),
    /// Radix tree bucket indices (`l` register kind).
    Bucket(Box<Lanes<u32>>),
}

impl SlotValue {
    pub fn zeroed_scalar() -> Self {
        Self::Scalar(Box::new([0; LANES]))
    }

    pub fn zeroed_value() -> Self {
        Self::Value(Box::new([Ref::NULL; LANES]))
    }

    pub fn as_mask(&self) -> LaneMask {
        match self {
            Self::Mask(m) => *m,
            other => panic!("expected a mask register, found {other:?}"),
        }
    }

    pub fn as_scalar(&self) -> &Lanes<Word> {
        match self {
            Self::Scalar(s) => s,
            other => panic!("expected a scalar register, found {other:?}"),
        }
    }

    pub fn as_scalar_mut(&mut self) -> &mut Lanes<Word> {
        match self {
            Self::Scalar(s) => s,
            other => panic!("expected a scalar register, found {other:?}"),
        }
    }

    pub fn as_value(&self) -> &Lanes<Ref> {
        match self {
            Self::Value(v) => v,
            other => panic!("expected a value register, found {other:?}"),
        }
    }

    pub fn as_value_mut(&mut self) -> &mut Lanes<Ref> {
        match self {
            Self::Value(v) => v,
            other => panic!("expected a value register, found {other:?}"),
        }
    }

    pub fn as_hash(&self) -> &Lanes<u128> {
        match self {
            Self::Hash(h) => h,
            other => panic!("expected a hash register, found {other:?}"),
        }
    }

    pub fn as_hash_mut(&mut self) -> &mut Lanes<u128> {
        match self {
            Self::Hash(h) => h,
            other => panic!("expected a hash register, found {other:?}"),
        }
    }

    pub fn as_bucket(&self) -> &Lanes<u32> {
        match self {
            Self::Bucket(b) => b,
            other => panic!("expected a bucket register, found {other:?}"),
        }
    }

    pub fn as_bucket_mut(&mut self) -> &mut Lanes<u32> {
        match self {
            Self::Bucket(b) => b,
            other => panic!("expected a bucket register, found {other:?}"),
        }
    }
}

/// The full slot table for one program's execution, indexed densely by
/// `SlotId` (spec §4.3's "stack-like slot allocation").
#[derive(Debug, Default)]
pub struct Slots(Vec<Option<SlotValue>>);

impl Slots {
    pub fn with_capacity(count: u16) -> Self {
        Self(std::iter::repeat_with(|| None).take(count as usize).collect())
    }

    pub fn get(&self, id: lanevm_asm::SlotId) -> &SlotValue {
        self.0[id.index() as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("slot %{} read before write", id.index()))
    }

    pub fn get_mut(&mut self, id: lanevm_asm::SlotId) -> &mut SlotValue {
        self.0[id.index() as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("slot %{} read before write", id.index()))
    }

    pub fn set(&mut self, id: lanevm_asm::SlotId, value: SlotValue) {
        let idx = id.index() as usize;
        if idx >= self.0.len() {
            self.0.resize_with(idx + 1, || None);
        }
        self.0[idx] = Some(value);
    }
}

/// A seam for swapping the per-lane primitive kernels for a SIMD backend;
/// only the portable one is implemented here, but compare/arithmetic
/// dispatch goes through this trait so a future intrinsics-backed
/// implementation drops in without touching `exec.rs`'s opcode dispatch.
pub trait LaneOps {
    fn add_int(&self, mask: LaneMask, a: &Lanes<Word>, b: &Lanes<Word>, out: &mut Lanes<Word>);
    fn cmp_eq_int(&self, mask: LaneMask, a: &Lanes<Word>, b: &Lanes<Word>) -> LaneMask;
}

/// The only backend this build ships: plain per-lane loops, compiled with
/// whatever auto-vectorization the target affords.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableLanes;

impl LaneOps for PortableLanes {
    fn add_int(&self, mask: LaneMask, a: &Lanes<Word>, b: &Lanes<Word>, out: &mut Lanes<Word>) {
        for i in 0..LANES {
            if mask.test(i) {
                out[i] = ((a[i] as i64).wrapping_add(b[i] as i64)) as u64;
            }
        }
    }

    fn cmp_eq_int(&self, mask: LaneMask, a: &Lanes<Word>, b: &Lanes<Word>) -> LaneMask {
        let mut result = LaneMask::NONE;
        for i in 0..LANES {
            if mask.test(i) && a[i] == b[i] {
                result.set(i);
            }
        }
        result
    }
}

/// Select the lane-kernel backend for this build. Always portable today;
/// kept as a function (rather than a constant) so a future
/// capability-detected backend has an obvious place to plug in.
pub fn select_backend() -> PortableLanes {
    PortableLanes
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanevm_asm::SlotId;

    #[test]
    fn slots_grow_on_demand() {
        let mut slots = Slots::with_capacity(1);
        slots.set(SlotId::new(5), SlotValue::zeroed_scalar());
        assert!(matches!(slots.get(SlotId::new(5)), SlotValue::Scalar(_)));
    }

    #[test]
    #[should_panic(expected = "read before write")]
    fn reading_unset_slot_panics() {
        let slots = Slots::with_capacity(4);
        slots.get(SlotId::new(0));
    }

    #[test]
    fn portable_backend_respects_mask() {
        let backend = select_backend();
        let mut mask = LaneMask::NONE;
        mask.set(0);
        mask.set(2);
        let a = [1u64; LANES];
        let b = [1u64; LANES];
        let mut out = [0u64; LANES];
        backend.add_int(mask, &a, &b, &mut out);
        assert_eq!(out[0], 2);
        assert_eq!(out[1], 0);
        assert_eq!(out[2], 2);
    }
}
