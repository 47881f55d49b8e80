//! Fixed-width per-group accumulator buffers (spec §6) and the
//! scalar (non-grouped) aggregation engine built directly on them.

pub mod hashagg;
pub mod tdigest;

use core::f64;

/// Which accumulation a slot performs. Each kind has a fixed buffer
/// width and its own init sentinel, accumulate step, and merge step
/// (spec §6's sizing table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    SumInt,
    SumFloat,
    MinInt,
    MaxInt,
    MinFloat,
    MaxFloat,
    Count,
    AndInt,
    OrInt,
    XorInt,
    AndBool,
    OrBool,
    ApproxCountDistinct,
    ApproxQuantile,
}

impl AggKind {
    /// Buffer width in bytes this kind needs inside a group's row.
    pub fn slot_size(self, hll_precision: u8, tdigest_centroids: usize) -> usize {
        match self {
            Self::SumInt | Self::MinInt | Self::MaxInt | Self::Count | Self::AndInt
            | Self::OrInt | Self::XorInt => 8,
            // Neumaier compensated sum keeps a running value and a
            // compensation term.
            Self::SumFloat => 16,
            Self::MinFloat | Self::MaxFloat => 8,
            Self::AndBool | Self::OrBool => 1,
            Self::ApproxCountDistinct => (1usize << hll_precision) * 1, // 1 byte/register
            // each centroid: 8-byte mean + 8-byte weight, plus a 16-byte
            // header (count, running sum).
            Self::ApproxQuantile => 16 + 16 * tdigest_centroids,
        }
    }

    /// Initialize a freshly zeroed buffer's sentinel where zero isn't the
    /// right starting point (min/max, and HLL's "register unset" byte is
    /// legitimately zero so it's skipped here).
    pub fn init(self, buf: &mut [u8]) {
        match self {
            Self::MinInt => buf.copy_from_slice(&i64::MAX.to_le_bytes()),
            Self::MaxInt => buf.copy_from_slice(&i64::MIN.to_le_bytes()),
            Self::MinFloat => buf.copy_from_slice(&f64::INFINITY.to_le_bytes()),
            Self::MaxFloat => buf.copy_from_slice(&f64::NEG_INFINITY.to_le_bytes()),
            _ => {}
        }
    }
}

fn read_i64(buf: &[u8]) -> i64 {
    i64::from_le_bytes(buf[0..8].try_into().unwrap())
}
fn write_i64(buf: &mut [u8], v: i64) {
    buf[0..8].copy_from_slice(&v.to_le_bytes());
}
fn read_f64(buf: &[u8]) -> f64 {
    f64::from_le_bytes(buf[0..8].try_into().unwrap())
}
fn write_f64(buf: &mut [u8], v: f64) {
    buf[0..8].copy_from_slice(&v.to_le_bytes());
}

/// Accumulate one integer input into a slot of the given kind.
pub fn accumulate_int(kind: AggKind, buf: &mut [u8], input: i64) {
    match kind {
        AggKind::SumInt => write_i64(buf, read_i64(buf).wrapping_add(input)),
        AggKind::MinInt => write_i64(buf, read_i64(buf).min(input)),
        AggKind::MaxInt => write_i64(buf, read_i64(buf).max(input)),
        AggKind::Count => write_i64(buf, read_i64(buf) + 1),
        AggKind::AndInt => write_i64(buf, read_i64(buf) & input),
        AggKind::OrInt => write_i64(buf, read_i64(buf) | input),
        AggKind::XorInt => write_i64(buf, read_i64(buf) ^ input),
        AggKind::AndBool => buf[0] &= u8::from(input != 0),
        AggKind::OrBool => buf[0] |= u8::from(input != 0),
        other => panic!("accumulate_int called with non-integer kind {other:?}"),
    }
}

/// Accumulate one float input using Neumaier's compensated summation for
/// `SumFloat`, plain comparisons for min/max (spec §6).
pub fn accumulate_float(kind: AggKind, buf: &mut [u8], input: f64) {
    match kind {
        AggKind::SumFloat => {
            let sum = read_f64(&buf[0..8]);
            let comp = read_f64(&buf[8..16]);
            let t = sum + input;
            let c = if sum.abs() >= input.abs() {
                (sum - t) + input
            } else {
                (input - t) + sum
            };
            write_f64(&mut buf[0..8], t);
            write_f64(&mut buf[8..16], comp + c);
        }
        AggKind::MinFloat => write_f64(buf, read_f64(buf).min(input)),
        AggKind::MaxFloat => write_f64(buf, read_f64(buf).max(input)),
        AggKind::ApproxQuantile => tdigest::add(buf, input),
        other => panic!("accumulate_float called with non-float kind {other:?}"),
    }
}

/// Hash one boxed value's bytes into the running HyperLogLog register set
/// for `APPROX_COUNT_DISTINCT`.
pub fn accumulate_distinct(buf: &mut [u8], precision: u8, bytes: &[u8]) {
    let hashed = crate::hash::fingerprint(bytes) as u64;
    hll_update(buf, precision, hashed);
}

/// The Neumaier-compensated running total, as `sum + compensation`.
pub fn read_compensated_sum(buf: &[u8]) -> f64 {
    read_f64(&buf[0..8]) + read_f64(&buf[8..16])
}

/// Merge `src`'s buffer into `dst`'s for the given kind, used when
/// combining per-worker partials (spec §6).
pub fn merge(kind: AggKind, dst: &mut [u8], src: &[u8]) {
    match kind {
        AggKind::SumInt | AggKind::Count => write_i64(dst, read_i64(dst).wrapping_add(read_i64(src))),
        AggKind::MinInt => write_i64(dst, read_i64(dst).min(read_i64(src))),
        AggKind::MaxInt => write_i64(dst, read_i64(dst).max(read_i64(src))),
        AggKind::AndInt => write_i64(dst, read_i64(dst) & read_i64(src)),
        AggKind::OrInt => write_i64(dst, read_i64(dst) | read_i64(src)),
        AggKind::XorInt => write_i64(dst, read_i64(dst) ^ read_i64(src)),
        AggKind::AndBool => dst[0] &= src[0],
        AggKind::OrBool => dst[0] |= src[0],
        AggKind::SumFloat => {
            let a = read_compensated_sum(dst);
            let b = read_compensated_sum(src);
            write_f64(&mut dst[0..8], a + b);
            write_f64(&mut dst[8..16], 0.0);
        }
        AggKind::MinFloat => write_f64(dst, read_f64(dst).min(read_f64(src))),
        AggKind::MaxFloat => write_f64(dst, read_f64(dst).max(read_f64(src))),
        AggKind::ApproxCountDistinct => hll_merge(dst, src),
        AggKind::ApproxQuantile => tdigest::merge(dst, src),
    }
}

// --- HyperLogLog -----------------------------------------------------------

/// Update an HLL register array with one hashed value.
pub fn hll_update(registers: &mut [u8], precision: u8, hashed: u64) {
    let m = 1u64 << precision;
    let idx = (hashed & (m - 1)) as usize;
    let rest = hashed >> precision;
    let rho = if rest == 0 {
        64 - precision + 1
    } else {
        (rest.trailing_zeros() + 1) as u8
    };
    if rho > registers[idx] {
        registers[idx] = rho;
    }
}

fn hll_merge(dst: &mut [u8], src: &[u8]) {
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        if s > *d {
            *d = s;
        }
    }
}

/// Estimate cardinality from an HLL register array using the standard
/// harmonic-mean estimator with small- and large-range corrections.
pub fn hll_estimate(registers: &[u8], precision: u8) -> f64 {
    let m = registers.len() as f64;
    let alpha = match registers.len() {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m),
    };
    let mut sum = 0.0;
    let mut zeros = 0u32;
    for &r in registers {
        sum += 2f64.powi(-(i32::from(r)));
        if r == 0 {
            zeros += 1;
        }
    }
    let raw = alpha * m * m / sum;
    if raw <= 2.5 * m && zeros > 0 {
        m * (m / f64::from(zeros)).ln()
    } else {
        let _ = precision;
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_int_accumulates() {
        let mut buf = [0u8; 8];
        accumulate_int(AggKind::SumInt, &mut buf, 3);
        accumulate_int(AggKind::SumInt, &mut buf, 4);
        assert_eq!(read_i64(&buf), 7);
    }

    #[test]
    fn min_max_int_start_at_sentinels() {
        let mut buf = [0u8; 8];
        AggKind::MinInt.init(&mut buf);
        accumulate_int(AggKind::MinInt, &mut buf, 5);
        assert_eq!(read_i64(&buf), 5);
    }

    #[test]
    fn compensated_sum_tracks_lost_precision() {
        let mut buf = [0u8; 16];
        for _ in 0..1000 {
            accumulate_float(AggKind::SumFloat, &mut buf, 0.1);
        }
        assert!((read_compensated_sum(&buf) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn hll_estimate_is_in_the_right_ballpark() {
        let precision = 10u8;
        let mut registers = vec![0u8; 1 << precision];
        for i in 0..5000u64 {
            let hashed = crate::hash::fingerprint(&i.to_le_bytes()) as u64;
            hll_update(&mut registers, precision, hashed);
        }
        let estimate = hll_estimate(&registers, precision);
        assert!((estimate - 5000.0).abs() / 5000.0 < 0.1);
    }
}
