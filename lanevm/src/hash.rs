//! 128-bit keyed fingerprinting (spec §6's radix-tree key derivation).
//!
//! A fixed, process-wide key avoids the cross-query key-negotiation that a
//! randomized hasher would need, at the cost of predictable collisions for
//! an adversary who can choose input bytes — acceptable here because the
//! fingerprint never crosses a trust boundary on its own (spec §7 treats
//! hash collisions as a lazy-split correctness concern, not a security
//! one).
use siphasher::sip128::{Hash128, Hasher128, SipHasher13};

const HASH_KEY: [u8; 16] = *b"lanevm-radix-key";

fn keyed_hasher() -> SipHasher13 {
    let k0 = u64::from_le_bytes(HASH_KEY[0..8].try_into().unwrap());
    let k1 = u64::from_le_bytes(HASH_KEY[8..16].try_into().unwrap());
    SipHasher13::new_with_keys(k0, k1)
}

/// Fingerprint a single byte string into a 128-bit key.
pub fn fingerprint(bytes: &[u8]) -> u128 {
    let mut hasher = keyed_hasher();
    std::hash::Hasher::write(&mut hasher, bytes);
    let Hash128 { h1, h2 } = hasher.finish128();
    (u128::from(h1) << 64) | u128::from(h2)
}

/// Extend an existing fingerprint with another field's bytes, for
/// composite (multi-column) group keys. Chaining through the previous
/// fingerprint's bytes keeps the result order-sensitive, so `(a, b)` and
/// `(b, a)` never collide by construction.
pub fn hash_extend(previous: u128, bytes: &[u8]) -> u128 {
    let mut hasher = keyed_hasher();
    std::hash::Hasher::write(&mut hasher, &previous.to_le_bytes());
    std::hash::Hasher::write(&mut hasher, bytes);
    let Hash128 { h1, h2 } = hasher.finish128();
    (u128::from(h1) << 64) | u128::from(h2)
}

/// The high 64 bits of a fingerprint, used to index the radix tree (spec
/// §6: 16-way trie over the upper half, 4 bits per level).
pub fn radix_key(fingerprint: u128) -> u64 {
    (fingerprint >> 64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_fingerprint_identically() {
        assert_eq!(fingerprint(b"hello"), fingerprint(b"hello"));
    }

    #[test]
    fn different_bytes_usually_differ() {
        assert_ne!(fingerprint(b"hello"), fingerprint(b"world"));
    }

    #[test]
    fn extend_is_order_sensitive() {
        let ab = hash_extend(fingerprint(b"a"), b"b");
        let a_then_b_direct = hash_extend(fingerprint(b"a"), b"b");
        assert_eq!(ab, a_then_b_direct);
        let ba = hash_extend(fingerprint(b"b"), b"a");
        assert_ne!(ab, ba);
    }
}
