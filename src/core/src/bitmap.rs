//! Bitmap primitives: popcount, byte counts, hit-count classification.
//!
//! These mirror `count_bits`/`count_bytes`/`count_non_255_bytes`/
//! `classify_counts`/`simplify_trace` in upstream AFL++'s
//! `afl-fuzz-bitmap.c`. The hot paths there are written as word-at-a-time
//! scans optimized for the common case of an all-`0xff` (untouched) word;
//! we get the same behavior here by reading 8-byte chunks as `u64` and
//! special-casing `u64::MAX`, without any unsafe pointer arithmetic.

use once_cell::sync::Lazy;

/// Default shared-memory bitmap size, matching AFL++'s `MAP_SIZE`.
pub const MAP_SIZE: usize = 1 << 16;

/// `0 -> 1`, anything else `-> 128`. Used by [`simplify_trace`] to collapse
/// hit counts into "hit" / "not hit" on hang/timeout paths.
pub const SIMPLIFY_LOOKUP: [u8; 256] = {
    let mut table = [128u8; 256];
    table[0] = 1;
    table
};

/// Buckets a raw hit count into one of eight log-scale buckets.
pub const COUNT_CLASS_LOOKUP8: [u8; 256] = build_count_class_lookup8();

const fn build_count_class_lookup8() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = match i {
            0 => 0,
            1 => 1,
            2 => 2,
            3 => 4,
            4..=7 => 8,
            8..=15 => 16,
            16..=31 => 32,
            32..=127 => 64,
            _ => 128,
        };
        i += 1;
    }
    table
}

/// The 16-bit classification table, derived as the Cartesian product of
/// [`COUNT_CLASS_LOOKUP8`] with itself -- built lazily on first use rather
/// than through an explicit `init_count_class16()` call.
pub static COUNT_CLASS_LOOKUP16: Lazy<Box<[u16; 65536]>> = Lazy::new(|| {
    let mut table = vec![0u16; 65536].into_boxed_slice();
    for b1 in 0..256usize {
        for b2 in 0..256usize {
            table[(b1 << 8) + b2] =
                ((COUNT_CLASS_LOOKUP8[b1] as u16) << 8) | COUNT_CLASS_LOOKUP8[b2] as u16;
        }
    }
    table.try_into().expect("65536 element vec into boxed array")
});

/// Population count over the whole map, optimized for the common case of
/// scanning an inverse (virgin) bitmap where most words are `0xffff_ffff`.
pub fn count_bits(mem: &[u8]) -> u32 {
    let mut ret = 0u32;
    let mut chunks = mem.chunks_exact(4);
    for chunk in &mut chunks {
        let v = u32::from_ne_bytes(chunk.try_into().unwrap());
        if v == 0xffff_ffff {
            ret += 32;
            continue;
        }
        ret += v.count_ones();
    }
    for &b in chunks.remainder() {
        ret += (b as u32).count_ones();
    }
    ret
}

/// Count of non-zero bytes in the map.
pub fn count_bytes(mem: &[u8]) -> u32 {
    mem.iter().filter(|&&b| b != 0).count() as u32
}

/// Count of bytes not equal to `0xff`. Meant to be called on virgin maps.
pub fn count_non_255_bytes(mem: &[u8]) -> u32 {
    mem.iter().filter(|&&b| b != 0xff).count() as u32
}

/// Destructively classify execution counts in a trace in place, using the
/// 16-bit lookup table applied to each little-endian pair of bytes. Called
/// on every exec, so must be cheap; idempotent after the first application
/// since every classified byte is a fixed point of the 8-bit table.
pub fn classify_counts(trace: &mut [u8]) {
    let mut chunks = trace.chunks_exact_mut(2);
    for chunk in &mut chunks {
        let word = u16::from_ne_bytes([chunk[0], chunk[1]]);
        let classified = COUNT_CLASS_LOOKUP16[word as usize];
        let bytes = classified.to_ne_bytes();
        chunk[0] = bytes[0];
        chunk[1] = bytes[1];
    }
    if let [last] = chunks.into_remainder() {
        *last = COUNT_CLASS_LOOKUP8[*last as usize];
    }
}

/// Destructively simplify a trace by eliminating hit-count information:
/// each byte becomes `1` (hit) or `128` (not hit). Used on hang/timeout
/// paths before consulting the hang-unique virgin map.
pub fn simplify_trace(trace: &mut [u8]) {
    for b in trace.iter_mut() {
        *b = SIMPLIFY_LOOKUP[*b as usize];
    }
}

/// Compact a byte-per-edge trace into a bit-per-edge bitmap: bit `i` is set
/// iff `src[i] != 0`. Purely stateless, called sporadically for some new
/// paths to keep a compact "which edges fired at all" footprint.
pub fn minimize_bits(dst: &mut [u8], src: &[u8]) {
    for (i, &byte) in src.iter().enumerate() {
        if byte != 0 {
            dst[i >> 3] |= 1 << (i & 7);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_bits_is_popcount() {
        let mem = [0xffu8, 0x00, 0x01, 0x80];
        assert_eq!(count_bits(&mem), 8 + 0 + 1 + 1);
    }

    #[test]
    fn count_bits_handles_non_word_aligned_tail() {
        let mem = [0xffu8, 0xff, 0xff, 0xff, 0x03];
        assert_eq!(count_bits(&mem), 32 + 2);
    }

    #[test]
    fn count_bytes_counts_nonzero() {
        let mem = [0u8, 1, 0, 2, 0, 0, 3, 0];
        assert_eq!(count_bytes(&mem), 3);
    }

    #[test]
    fn count_non_255_bytes_counts_touched_virgin_bytes() {
        let virgin = [0xffu8, 0xfe, 0xff, 0x00];
        assert_eq!(count_non_255_bytes(&virgin), 2);
    }

    #[test]
    fn simplify_lookup_matches_spec() {
        assert_eq!(SIMPLIFY_LOOKUP[0], 1);
        for v in 1..256 {
            assert_eq!(SIMPLIFY_LOOKUP[v], 128);
        }
    }

    #[test]
    fn classify_counts_is_idempotent() {
        let mut trace = vec![0u8, 1, 2, 3, 7, 15, 31, 127, 255, 9];
        classify_counts(&mut trace);
        let once = trace.clone();
        classify_counts(&mut trace);
        assert_eq!(trace, once);
    }

    #[test]
    fn classify_counts_buckets_match_lookup8() {
        let mut trace = vec![5u8, 200];
        classify_counts(&mut trace);
        assert_eq!(trace[0], COUNT_CLASS_LOOKUP8[5]);
        assert_eq!(trace[1], COUNT_CLASS_LOOKUP8[200]);
    }

    #[test]
    fn minimize_bits_preserves_nonzero_positions() {
        let src = [0u8, 5, 0, 0, 9, 0, 0, 0, 1];
        let mut dst = [0u8; 2];
        minimize_bits(&mut dst, &src);
        for (i, &b) in src.iter().enumerate() {
            let bit_set = (dst[i >> 3] >> (i & 7)) & 1 == 1;
            assert_eq!(bit_set, b != 0, "mismatch at position {}", i);
        }
    }
}
