//! Peano-Hilbert key encoding (spec §4.1).
//!
//! Maps a normalized `(x, y, z) ∈ [0, 1)³` coordinate to a locality
//! preserving integer key such that lexicographic order on the key
//! equals Hilbert-curve order. Triplets are stored reversed: the
//! least-significant three bits hold the triplet at the deepest
//! resolution level, so `key >> (3*l)` exposes everything from level `l`
//! down to the root.
//!
//! Algorithm: Skilling, "Programming the Hilbert Curve" (AIP Conf. Proc.
//! 707, 381, 2004) — transpose, inverse-undo, gray-decode, interleave.
//! Grounded on `examples/original_source/src/peano.c`'s `Peano_Key`; we
//! drop that implementation's same-mask micro-optimization (pre-shifting
//! two of the three lanes before the interleave loop so a single bit
//! mask can read all three) in favor of testing each lane's own top bit
//! directly, which is the same bit positions after accounting for the
//! lanes shifting in lock-step and is clearer to read.

/// Number of triplets (tree/PH levels) in the 126-bit "long" key.
pub const LONG_TRIPLETS: u32 = 42;
/// Number of bits in the long key (`LONG_TRIPLETS * 3`).
pub const LONG_BITS: u32 = LONG_TRIPLETS * 3;

/// Number of triplets in the 63-bit "short" key (used for domain bunches).
pub const SHORT_TRIPLETS: u32 = 21;
/// Number of bits in the short key (`SHORT_TRIPLETS * 3`).
pub const SHORT_BITS: u32 = SHORT_TRIPLETS * 3;

/// The full-resolution particle-ordering key (§3: `peano_key`).
pub type LongKey = u128;
/// The coarser bunch/domain key (§4.3: bunch `key`).
pub type ShortKey = u64;

/// Core transpose/inverse-undo/gray-decode/interleave step, producing a
/// `3*triplets`-bit reversed-triplet key. Shared by the long- and
/// short-key encoders below; `triplets` must be small enough that
/// `3*triplets <= 128`.
fn hilbert_index(x: f64, y: f64, z: f64, triplets: u32) -> u128 {
    debug_assert!(
        (0.0..1.0).contains(&x) && (0.0..1.0).contains(&y) && (0.0..1.0).contains(&z),
        "Peano_Key inputs must lie in [0, 1): ({x}, {y}, {z})"
    );
    debug_assert!(triplets > 0 && 3 * triplets <= 128);

    let bits = triplets;
    let scale = (1u128 << bits) as f64;
    let top_bit = 1u128 << (bits - 1);

    // (i) reinterpret coordinates as `bits`-bit integers, three-wide
    // transpose array. Lane order (y, z, x) matches the source.
    let mut lane = [
        ((y * scale) as u128).min(top_bit | (top_bit - 1)),
        ((z * scale) as u128).min(top_bit | (top_bit - 1)),
        ((x * scale) as u128).min(top_bit | (top_bit - 1)),
    ];

    // (ii) inverse undo: walk the mask from the MSB down to bit 1,
    // conditionally inverting or swapping with lane 0.
    let mut q = top_bit;
    while q > 1 {
        let p = q - 1;

        if lane[0] & q != 0 {
            lane[0] ^= p;
        }

        for i in 1..3 {
            if lane[i] & q != 0 {
                lane[0] ^= p;
            } else {
                let t = (lane[0] ^ lane[i]) & p;
                lane[0] ^= t;
                lane[i] ^= t;
            }
        }

        q >>= 1;
    }

    // (iii) gray-decode (inverse of gray-encode).
    for i in 1..3 {
        lane[i] ^= lane[i - 1];
    }

    let mut t = lane[2];
    let mut i = 1u32;
    while i < bits {
        lane[2] ^= lane[2] >> i;
        i <<= 1;
    }
    t ^= lane[2];

    lane[1] ^= t;
    lane[0] ^= t;

    // (iv) branch-free bit interleave, MSB-first into a reversed-triplet
    // key (the deepest level ends up in the lowest 3 bits).
    let mut key: u128 = 0;

    for _ in 0..bits {
        let col = (((lane[0] & top_bit) != 0) as u128) << 2
            | (((lane[1] & top_bit) != 0) as u128) << 1
            | ((lane[2] & top_bit) != 0) as u128;

        key = (key << 3) | col;

        lane[0] <<= 1;
        lane[1] <<= 1;
        lane[2] <<= 1;
    }

    key
}

/// Encode a normalized coordinate into the full 126-bit, 42-triplet key.
pub fn encode_long(x: f64, y: f64, z: f64) -> LongKey {
    hilbert_index(x, y, z, LONG_TRIPLETS)
}

/// Encode a normalized coordinate into the coarser 63-bit, 21-triplet
/// bunch key used by the domain decomposer.
pub fn encode_short(x: f64, y: f64, z: f64) -> ShortKey {
    hilbert_index(x, y, z, SHORT_TRIPLETS) as ShortKey
}

/// Derive the short (bunch-resolution) key from an already-computed long
/// key by dropping its deepest `LONG_TRIPLETS - SHORT_TRIPLETS` triplets.
pub fn short_from_long(long: LongKey) -> ShortKey {
    (long >> (LONG_BITS - SHORT_BITS)) as ShortKey
}

/// Extract the PH triplet (0..=7) at `level` (1 = coarsest, `max_level` =
/// deepest) from a `bits`-wide reversed-triplet key.
pub fn triplet_at_level(key: u128, level: u32, bits: u32) -> u8 {
    debug_assert!(level >= 1 && 3 * level <= bits);
    let shift = bits - 3 * level;
    ((key >> shift) & 0x7) as u8
}

/// Compare two keys the way `compare_peanoKeys` does in the source: by
/// value only (this is just `Ord` on the underlying integer, exposed as
/// a free function so call sites read the same as the spec's
/// "lexicographic order on the key").
pub fn compare(a: u128, b: u128) -> std::cmp::Ordering {
    a.cmp(&b)
}
