//! In-memory curve cycle over two toy prime fields.
//!
//! Scalars live mod `P = 2^61 - 1`, chunk hashes mod `Q = 2^31 - 1`, with
//! blake3-derived per-slot generators. The grow/trim pair honours the
//! [`TreeCurve`] contract exactly, and a point's value reads directly as a
//! scalar on the paired curve, so the cycle conversions are genuine. Not
//! remotely cryptographic; meant for tests and benches only.

use crate::{
    Result, TreeError,
    curve::{C1Point, C1Scalar, C2Point, C2Scalar, CurveCycle, LeafTuple, OutputPair, TreeCurve},
};

/// Scalar field modulus, the Mersenne prime `2^61 - 1`.
pub const SCALAR_MODULUS: u64 = (1 << 61) - 1;
/// Point field modulus, the Mersenne prime `2^31 - 1`.
pub const POINT_MODULUS: u64 = (1 << 31) - 1;

fn mul_mod(a: u64, b: u64, modulus: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) % u128::from(modulus)) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut acc = 1u64;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, modulus);
        }
        base = mul_mod(base, base, modulus);
        exp >>= 1;
    }
    acc
}

fn inverse_mod_p(value: u64) -> u64 {
    pow_mod(value, SCALAR_MODULUS - 2, SCALAR_MODULUS)
}

/// First 8 bytes of a domain-tagged blake3 hash, as a little-endian u64.
fn tagged_u64(tag: &str, data: &[u8]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(tag.as_bytes());
    hasher.update(data);
    let digest = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(word)
}

/// Per-slot generator, nonzero mod Q.
fn generator(curve_tag: &str, index: u64) -> u64 {
    tagged_u64(curve_tag, &index.to_le_bytes()) % (POINT_MODULUS - 1) + 1
}

fn contribution(curve_tag: &str, index: u64, scalar: u64) -> u64 {
    mul_mod(scalar % POINT_MODULUS, generator(curve_tag, index), POINT_MODULUS)
}

fn grow(curve_tag: &str, existing: u64, offset: u64, prior: u64, new_children: &[u64]) -> u64 {
    let mut acc = existing % POINT_MODULUS;
    if let Some((first, rest)) = new_children.split_first() {
        let replaced = contribution(curve_tag, offset, prior);
        acc = (acc + POINT_MODULUS - replaced) % POINT_MODULUS;
        acc = (acc + contribution(curve_tag, offset, *first)) % POINT_MODULUS;
        for (i, child) in rest.iter().enumerate() {
            acc = (acc + contribution(curve_tag, offset + 1 + i as u64, *child)) % POINT_MODULUS;
        }
    }
    acc
}

fn trim(curve_tag: &str, existing: u64, offset: u64, removed: &[u64], restore: u64) -> u64 {
    let mut acc = existing % POINT_MODULUS;
    for (i, child) in removed.iter().enumerate() {
        let gone = contribution(curve_tag, offset + i as u64, *child);
        acc = (acc + POINT_MODULUS - gone) % POINT_MODULUS;
    }
    (acc + contribution(curve_tag, offset, restore)) % POINT_MODULUS
}

fn value_to_bytes(value: u64) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&value.to_le_bytes());
    bytes
}

fn value_from_bytes(bytes: &[u8], modulus: u64, what: &str) -> Result<u64> {
    if bytes.len() != 32 {
        return Err(TreeError::InvalidData(format!(
            "{} encoding must be 32 bytes, got {}",
            what,
            bytes.len()
        )));
    }
    if bytes[8..].iter().any(|b| *b != 0) {
        return Err(TreeError::InvalidData(format!(
            "non-canonical {} encoding",
            what
        )));
    }
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    let value = u64::from_le_bytes(word);
    if value >= modulus {
        return Err(TreeError::InvalidData(format!("{} out of range", what)));
    }
    Ok(value)
}

macro_rules! test_curve {
    ($name:ident, $display:literal, $gen_tag:literal, $init_tag:literal) => {
        /// One curve of the toy cycle.
        #[derive(Clone, Copy, Debug)]
        pub struct $name;

        impl TreeCurve for $name {
            type Scalar = u64;
            type Point = u64;

            const NAME: &'static str = $display;

            fn zero_scalar() -> u64 {
                0
            }

            fn hash_init_point() -> u64 {
                tagged_u64($init_tag, &[]) % POINT_MODULUS
            }

            fn hash_grow(
                existing_hash: &u64,
                offset: u64,
                prior_child_at_offset: &u64,
                new_children: &[u64],
            ) -> Option<u64> {
                Some(grow(
                    $gen_tag,
                    *existing_hash,
                    offset,
                    *prior_child_at_offset,
                    new_children,
                ))
            }

            fn hash_trim(
                existing_hash: &u64,
                offset: u64,
                children_removed: &[u64],
                child_to_restore: &u64,
            ) -> Option<u64> {
                Some(trim(
                    $gen_tag,
                    *existing_hash,
                    offset,
                    children_removed,
                    *child_to_restore,
                ))
            }

            fn scalar_to_bytes(scalar: &u64) -> [u8; 32] {
                value_to_bytes(*scalar)
            }

            fn scalar_from_bytes(bytes: &[u8]) -> Result<u64> {
                value_from_bytes(bytes, SCALAR_MODULUS, "scalar")
            }

            fn point_to_bytes(point: &u64) -> [u8; 32] {
                value_to_bytes(*point)
            }

            fn point_from_bytes(bytes: &[u8]) -> Result<u64> {
                value_from_bytes(bytes, POINT_MODULUS, "point")
            }
        }
    };
}

test_curve!(
    TestCurveA,
    "test-a",
    "curvetrees.test.curve-a.generator",
    "curvetrees.test.curve-a.init"
);
test_curve!(
    TestCurveB,
    "test-b",
    "curvetrees.test.curve-b.generator",
    "curvetrees.test.curve-b.init"
);

/// Intermediate leaf representation: three numerators plus the shared
/// denominator awaiting batch inversion.
pub struct TestPreLeaf {
    o_num: u64,
    i_num: u64,
    c_num: u64,
    denom: u64,
}

/// The toy cycle binding [`TestCurveA`] and [`TestCurveB`].
#[derive(Clone, Copy, Debug)]
pub struct TestCycle;

impl CurveCycle for TestCycle {
    type C1 = TestCurveA;
    type C2 = TestCurveB;
    type PreLeaf = TestPreLeaf;

    fn output_to_pre_leaf(pair: &OutputPair) -> Option<TestPreLeaf> {
        // An all-zero pubkey stands in for a non-decompressable point.
        if pair.output_pubkey == [0u8; 32] {
            return None;
        }
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&pair.output_pubkey);
        data[32..].copy_from_slice(&pair.commitment);
        Some(TestPreLeaf {
            o_num: tagged_u64("curvetrees.test.leaf.o", &data) % SCALAR_MODULUS,
            i_num: tagged_u64("curvetrees.test.leaf.i", &data) % SCALAR_MODULUS,
            c_num: tagged_u64("curvetrees.test.leaf.c", &data) % SCALAR_MODULUS,
            denom: tagged_u64("curvetrees.test.leaf.denom", &data) % (SCALAR_MODULUS - 1) + 1,
        })
    }

    fn pre_leaf_denominator(pre: &TestPreLeaf) -> u64 {
        pre.denom
    }

    fn batch_invert(denominators: &[u64]) -> Option<Vec<u64>> {
        // Montgomery trick: one Fermat inversion for the whole batch.
        if denominators.is_empty() {
            return Some(Vec::new());
        }
        if denominators.iter().any(|d| *d == 0) {
            return None;
        }
        let mut prefixes = Vec::with_capacity(denominators.len());
        let mut acc = 1u64;
        for denom in denominators {
            acc = mul_mod(acc, *denom, SCALAR_MODULUS);
            prefixes.push(acc);
        }
        let mut inv_acc = inverse_mod_p(acc);
        let mut inverses = vec![0u64; denominators.len()];
        for i in (1..denominators.len()).rev() {
            inverses[i] = mul_mod(inv_acc, prefixes[i - 1], SCALAR_MODULUS);
            inv_acc = mul_mod(inv_acc, denominators[i], SCALAR_MODULUS);
        }
        inverses[0] = inv_acc;
        Some(inverses)
    }

    fn finish_leaf(pre: &TestPreLeaf, inverse: &u64) -> LeafTuple<TestCurveA> {
        LeafTuple {
            o_x: mul_mod(pre.o_num, *inverse, SCALAR_MODULUS),
            i_x: mul_mod(pre.i_num, *inverse, SCALAR_MODULUS),
            c_x: mul_mod(pre.c_num, *inverse, SCALAR_MODULUS),
        }
    }

    fn c1_point_to_c2_scalar(point: &C1Point<Self>) -> C2Scalar<Self> {
        // Point values fit the scalar field (Q < P).
        *point
    }

    fn c2_point_to_c1_scalar(point: &C2Point<Self>) -> C1Scalar<Self> {
        *point
    }
}

/// Deterministic output pair for tests, keyed by `seed`.
pub fn test_output_pair(seed: u64) -> OutputPair {
    let mut output_pubkey = [0u8; 32];
    let mut commitment = [0u8; 32];
    output_pubkey[..32].copy_from_slice(
        blake3::hash(&[b"pubkey".as_slice(), &seed.to_le_bytes()].concat()).as_bytes(),
    );
    commitment[..32].copy_from_slice(
        blake3::hash(&[b"commitment".as_slice(), &seed.to_le_bytes()].concat()).as_bytes(),
    );
    OutputPair {
        output_pubkey,
        commitment,
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec, proptest};

    use super::*;

    #[test]
    fn test_trim_inverts_grow() {
        let init = TestCurveA::hash_init_point();
        let grown = TestCurveA::hash_grow(&init, 0, &0, &[11, 22, 33]).unwrap();
        let trimmed = TestCurveA::hash_trim(&grown, 1, &[22, 33], &0).unwrap();
        let expected = TestCurveA::hash_grow(&init, 0, &0, &[11]).unwrap();
        assert_eq!(trimmed, expected);
    }

    #[test]
    fn test_grow_replaces_prior() {
        let init = TestCurveB::hash_init_point();
        let grown = TestCurveB::hash_grow(&init, 0, &0, &[5, 6]).unwrap();
        let replaced = TestCurveB::hash_grow(&grown, 1, &6, &[7, 8]).unwrap();
        let direct = TestCurveB::hash_grow(&init, 0, &0, &[5, 7, 8]).unwrap();
        assert_eq!(replaced, direct);
    }

    #[test]
    fn test_curves_are_distinct() {
        let children = [1u64, 2, 3];
        let a = TestCurveA::hash_grow(&TestCurveA::hash_init_point(), 0, &0, &children).unwrap();
        let b = TestCurveB::hash_grow(&TestCurveB::hash_init_point(), 0, &0, &children).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_output_excluded() {
        let invalid = OutputPair {
            output_pubkey: [0u8; 32],
            commitment: [1u8; 32],
        };
        assert!(TestCycle::output_to_pre_leaf(&invalid).is_none());
        assert!(TestCycle::output_to_pre_leaf(&test_output_pair(0)).is_some());
    }

    #[test]
    fn test_encoding_round_trip() {
        let scalar = SCALAR_MODULUS - 1;
        let bytes = TestCurveA::scalar_to_bytes(&scalar);
        assert_eq!(TestCurveA::scalar_from_bytes(&bytes).unwrap(), scalar);
        assert!(TestCurveA::scalar_from_bytes(&[1u8; 32]).is_err());
        assert!(TestCurveA::point_from_bytes(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn test_batch_inversion_matches_fermat(denoms in vec(1u64..SCALAR_MODULUS, 1..40)) {
            let inverses = TestCycle::batch_invert(&denoms).unwrap();
            for (denom, inverse) in denoms.iter().zip(&inverses) {
                assert_eq!(*inverse, inverse_mod_p(*denom));
                assert_eq!(mul_mod(*denom, *inverse, SCALAR_MODULUS), 1);
            }
        }
    }
}
