//! Precompiled DFA tables for `DfaMatch6`/`7`/`8`/`Unbounded` (spec §4.3):
//! deterministic finite automata over UTF-8 bytes, built once at compile
//! time from a literal pattern and carried at runtime as an opaque
//! VMM-backed blob the interpreter only has to walk.
//!
//! Two distinct automaton shapes are built, both on top of the classic
//! Knuth-Morris-Pratt transition-function construction (CLRS 32.4):
//!
//! - [`compile_contains`] builds the standard substring-search automaton,
//!   then overrides the accept state's row to self-loop unconditionally —
//!   turning "ever reached the accept state" into "final state is accept",
//!   which is all [`Table::matches`] checks.
//! - [`compile_exact`] builds a linear chain with one trap state: any byte
//!   that doesn't continue the pattern, including any byte consumed after
//!   the pattern is already complete, falls into the trap and stays there.
//!   This gives the "remaining-length-zero" (whole-string) semantics spec
//!   §4.3 asks for.

use lanevm_asm::Opcode;

use crate::tlv::{decode_varuint, encode_varuint};

/// Transition-table entry width, one per `DfaMatch*` opcode. Selects how
/// many bytes each of a table's `num_states * 256` entries occupies on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Six,
    Seven,
    Eight,
    Unbounded,
}

impl Width {
    pub fn code(self) -> u8 {
        match self {
            Width::Six => 0,
            Width::Seven => 1,
            Width::Eight => 2,
            Width::Unbounded => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Width::Six,
            1 => Width::Seven,
            2 => Width::Eight,
            3 => Width::Unbounded,
            _ => return None,
        })
    }

    /// The opcode variant this width is selected by.
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        use Opcode::*;
        Some(match op {
            DfaMatch6 => Width::Six,
            DfaMatch7 => Width::Seven,
            DfaMatch8 => Width::Eight,
            DfaMatchUnbounded => Width::Unbounded,
            _ => return None,
        })
    }

    /// The largest number of states a table of this width can address, or
    /// `None` for the unbounded variant.
    pub fn state_ceiling(self) -> Option<usize> {
        match self {
            Width::Six => Some(64),
            Width::Seven => Some(128),
            Width::Eight => Some(256),
            Width::Unbounded => None,
        }
    }
}

/// A pattern compiled to more states than its chosen width's entries can
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dfa: pattern needs {have} states, {width:?} holds at most {max}")]
pub struct TooManyStates {
    pub width: Width,
    pub have: usize,
    pub max: usize,
}

/// A decoded (or freshly compiled) DFA transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    width: Width,
    num_states: usize,
    accept: u32,
    /// Flattened `num_states * 256` transition function.
    trans: Vec<u32>,
}

impl Table {
    /// Walk `hay` from the start state, returning whether the final state
    /// reached is the accept state.
    pub fn matches(&self, hay: &[u8]) -> bool {
        let mut state = 0u32;
        for &b in hay {
            state = self.trans[state as usize * 256 + b as usize];
        }
        state == self.accept
    }

    /// Serialize this table to bytes suitable for boxing into a VMM value
    /// and dereferencing by `DfaMatch*` at runtime.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.width.code()];
        encode_varuint(self.num_states as u64, &mut out);
        encode_varuint(u64::from(self.accept), &mut out);
        match self.width {
            Width::Unbounded => {
                for &entry in &self.trans {
                    out.extend_from_slice(&entry.to_le_bytes());
                }
            }
            _ => {
                for &entry in &self.trans {
                    out.push(entry as u8);
                }
            }
        }
        out
    }

    /// Decode a table previously produced by [`Table::encode`], checking
    /// that the wire-embedded width matches the width the caller's opcode
    /// variant expects.
    pub fn decode(width: Width, bytes: &[u8]) -> Result<Self, DecodeTableError> {
        let stored = *bytes.first().ok_or(DecodeTableError::Truncated)?;
        let stored_width = Width::from_code(stored).ok_or(DecodeTableError::Truncated)?;
        if stored_width != width {
            return Err(DecodeTableError::WidthMismatch);
        }
        let (num_states, used) = decode_varuint(&bytes[1..]).map_err(|_| DecodeTableError::Truncated)?;
        let mut pos = 1 + used;
        let (accept, used) = decode_varuint(&bytes[pos..]).map_err(|_| DecodeTableError::Truncated)?;
        pos += used;
        let num_states = num_states as usize;
        let entries = num_states * 256;
        let trans = match width {
            Width::Unbounded => {
                if bytes.len() < pos + entries * 4 {
                    return Err(DecodeTableError::Truncated);
                }
                (0..entries)
                    .map(|i| {
                        let o = pos + i * 4;
                        u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap())
                    })
                    .collect()
            }
            _ => {
                if bytes.len() < pos + entries {
                    return Err(DecodeTableError::Truncated);
                }
                bytes[pos..pos + entries].iter().map(|&b| u32::from(b)).collect()
            }
        };
        Ok(Self { width, num_states, accept: accept as u32, trans })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeTableError {
    #[error("dfa table bytes are truncated")]
    Truncated,
    #[error("dfa table was built for a different state width than requested")]
    WidthMismatch,
}

/// Longest `k` such that `pattern[..k]` is a suffix of `candidate` (CLRS's
/// `σ(pattern, candidate)`), used directly rather than via a failure
/// function since patterns here are short literals, not document-scale text.
fn longest_prefix_suffix(pattern: &[u8], candidate: &[u8]) -> usize {
    let max_k = candidate.len().min(pattern.len());
    for k in (0..=max_k).rev() {
        if pattern[..k] == candidate[candidate.len() - k..] {
            return k;
        }
    }
    0
}

fn check_ceiling(width: Width, num_states: usize) -> Result<(), TooManyStates> {
    if let Some(max) = width.state_ceiling() {
        if num_states > max {
            return Err(TooManyStates { width, have: num_states, max });
        }
    }
    Ok(())
}

/// Build the unanchored "contains pattern" automaton: `num_states =
/// pattern.len() + 1`, with the accept row forced to self-loop so reaching
/// it once is permanent regardless of what follows.
pub fn compile_contains(pattern: &[u8], width: Width) -> Result<Table, TooManyStates> {
    let m = pattern.len();
    let num_states = m + 1;
    check_ceiling(width, num_states)?;

    let mut trans = vec![0u32; num_states * 256];
    for state in 0..m {
        for byte in 0u16..256 {
            let b = byte as u8;
            let mut candidate = pattern[..state].to_vec();
            candidate.push(b);
            trans[state * 256 + byte as usize] = longest_prefix_suffix(pattern, &candidate) as u32;
        }
    }
    for byte in 0..256 {
        trans[m * 256 + byte] = m as u32;
    }

    Ok(Table { width, num_states, accept: m as u32, trans })
}

/// Build the anchored "equals pattern exactly" automaton: a linear chain of
/// `pattern.len() + 1` states plus one absorbing trap state. Any byte that
/// doesn't continue the pattern — including any byte consumed once the
/// pattern is already complete — falls into the trap.
pub fn compile_exact(pattern: &[u8], width: Width) -> Result<Table, TooManyStates> {
    let m = pattern.len();
    let num_states = m + 2;
    check_ceiling(width, num_states)?;

    let trap = (m + 1) as u32;
    let mut trans = vec![trap; num_states * 256];
    for state in 0..m {
        trans[state * 256 + pattern[state] as usize] = (state + 1) as u32;
    }
    // Row `m` (full match already) and row `trap` both stay all-trap,
    // which the `vec![trap; ...]` initializer already covers.

    Ok(Table { width, num_states, accept: m as u32, trans })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matches_substring_anywhere() {
        let table = compile_contains(b"abc", Width::Eight).unwrap();
        assert!(table.matches(b"abc"));
        assert!(table.matches(b"xxabcyy"));
        assert!(table.matches(b"ababc"));
        assert!(!table.matches(b"abd"));
        assert!(!table.matches(b"ab"));
    }

    #[test]
    fn contains_handles_self_overlapping_patterns() {
        let table = compile_contains(b"aaa", Width::Eight).unwrap();
        assert!(table.matches(b"aaaa"));
        assert!(table.matches(b"baaab"));
        assert!(!table.matches(b"aa"));
    }

    #[test]
    fn exact_requires_whole_string_equality() {
        let table = compile_exact(b"abc", Width::Eight).unwrap();
        assert!(table.matches(b"abc"));
        assert!(!table.matches(b"abcd"));
        assert!(!table.matches(b"xabc"));
        assert!(!table.matches(b"ab"));
    }

    #[test]
    fn exact_empty_pattern_matches_only_empty_string() {
        let table = compile_exact(b"", Width::Eight).unwrap();
        assert!(table.matches(b""));
        assert!(!table.matches(b"a"));
    }

    #[test]
    fn contains_empty_pattern_matches_everything() {
        let table = compile_contains(b"", Width::Eight).unwrap();
        assert!(table.matches(b""));
        assert!(table.matches(b"anything"));
    }

    #[test]
    fn state_ceiling_is_enforced() {
        let pattern = vec![b'a'; 64];
        assert!(compile_contains(&pattern, Width::Six).is_err());
        assert!(compile_contains(&pattern, Width::Eight).is_ok());
    }

    #[test]
    fn table_round_trips_through_encode_decode() {
        let table = compile_contains(b"needle", Width::Eight).unwrap();
        let bytes = table.encode();
        let decoded = Table::decode(Width::Eight, &bytes).unwrap();
        assert_eq!(decoded, table);
        assert!(decoded.matches(b"find the needle here"));
    }

    #[test]
    fn decode_rejects_width_mismatch() {
        let table = compile_contains(b"ab", Width::Eight).unwrap();
        let bytes = table.encode();
        assert_eq!(Table::decode(Width::Six, &bytes), Err(DecodeTableError::WidthMismatch));
    }

    #[test]
    fn unbounded_width_round_trips() {
        let table = compile_exact(b"a long literal pattern", Width::Unbounded).unwrap();
        let bytes = table.encode();
        let decoded = Table::decode(Width::Unbounded, &bytes).unwrap();
        assert!(decoded.matches(b"a long literal pattern"));
    }
}
