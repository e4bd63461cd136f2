//! Chunked parallel hashing of one layer's new children.

use rayon::prelude::*;

use crate::{Result, TreeError, curve::TreeCurve};

/// Hash an ordered run of new children into parent chunk hashes.
///
/// The first chunk continues the existing boundary chunk when `existing_hash`
/// is supplied: it grows from that hash at `start_offset`, replacing whatever
/// `prior_child` occupies the slot (the zero scalar when the slot is empty).
/// Every later chunk is an independent fresh grow from the curve's init
/// point. Chunks fan out on `pool`; the caller blocks until all complete.
///
/// Any chunk failing aborts the whole batch with
/// [`TreeError::HashFailed`] — no partial results.
pub fn hash_layer_chunks<C: TreeCurve>(
    pool: &rayon::ThreadPool,
    existing_hash: Option<&C::Point>,
    prior_child: Option<&C::Scalar>,
    start_offset: u64,
    chunk_width: u64,
    new_children: &[C::Scalar],
) -> Result<Vec<C::Point>> {
    if chunk_width < 2 {
        return Err(TreeError::InvalidInput(
            "chunk width must be at least 2".into(),
        ));
    }
    if new_children.is_empty() {
        return Err(TreeError::InvalidInput("no children to hash".into()));
    }
    if start_offset >= chunk_width {
        return Err(TreeError::InvalidInput(format!(
            "start offset {} out of range for width {}",
            start_offset, chunk_width
        )));
    }
    if existing_hash.is_none() && start_offset != 0 {
        return Err(TreeError::InvalidInput(
            "non-zero offset requires an existing chunk hash".into(),
        ));
    }

    let first_chunk_len =
        usize::try_from(chunk_width - start_offset).unwrap_or(usize::MAX).min(new_children.len());
    let (first_chunk, rest) = new_children.split_at(first_chunk_len);

    pool.install(|| {
        let first_base = match existing_hash {
            Some(hash) => hash.clone(),
            None => C::hash_init_point(),
        };
        let first_prior = match prior_child {
            Some(child) => child.clone(),
            None => C::zero_scalar(),
        };
        let first_hash = C::hash_grow(&first_base, start_offset, &first_prior, first_chunk)
            .ok_or(TreeError::HashFailed { curve: C::NAME })?;

        let mut hashes = rest
            .par_chunks(chunk_width as usize)
            .map(|chunk| {
                C::hash_grow(&C::hash_init_point(), 0, &C::zero_scalar(), chunk)
                    .ok_or(TreeError::HashFailed { curve: C::NAME })
            })
            .collect::<Result<Vec<_>>>()?;
        hashes.insert(0, first_hash);
        Ok(hashes)
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::test_cycle::TestCurveA;

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap()
    }

    fn scalars(values: &[u64]) -> Vec<u64> {
        values.to_vec()
    }

    #[test]
    fn test_fresh_chunks() {
        let pool = pool();
        let children = scalars(&[1, 2, 3, 4, 5]);
        let hashes =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 2, &children).unwrap();
        assert_eq!(hashes.len(), 3);

        // Chunking is position-stable: each parent only depends on its own
        // chunk.
        let expected_mid =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 2, &scalars(&[3, 4])).unwrap();
        assert_eq!(hashes[1], expected_mid[0]);
    }

    #[test]
    fn test_continues_partial_chunk() {
        let pool = pool();
        // Whole chunk at once vs. grown in two steps.
        let whole =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 4, &scalars(&[7, 8, 9])).unwrap();
        let partial =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 4, &scalars(&[7])).unwrap();
        let grown = hash_layer_chunks::<TestCurveA>(
            &pool,
            Some(&partial[0]),
            None,
            1,
            4,
            &scalars(&[8, 9]),
        )
        .unwrap();
        assert_eq!(whole[0], grown[0]);
    }

    #[test]
    fn test_replaces_prior_child() {
        let pool = pool();
        let original =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 4, &scalars(&[7, 8])).unwrap();
        // Replace slot 1 (prior child 8) with 9 and append 10.
        let replaced = hash_layer_chunks::<TestCurveA>(
            &pool,
            Some(&original[0]),
            Some(&8),
            1,
            4,
            &scalars(&[9, 10]),
        )
        .unwrap();
        let expected =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 4, &scalars(&[7, 9, 10]))
                .unwrap();
        assert_eq!(replaced[0], expected[0]);
    }

    #[test]
    fn test_spillover_into_fresh_chunks() {
        let pool = pool();
        let first =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 2, &scalars(&[1])).unwrap();
        let hashes = hash_layer_chunks::<TestCurveA>(
            &pool,
            Some(&first[0]),
            None,
            1,
            2,
            &scalars(&[2, 3, 4, 5]),
        )
        .unwrap();
        assert_eq!(hashes.len(), 3);
        let all =
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 2, &scalars(&[1, 2, 3, 4, 5]))
                .unwrap();
        assert_eq!(hashes, all);
    }

    #[test]
    fn test_rejects_bad_input() {
        let pool = pool();
        let children = scalars(&[1]);
        assert_matches!(
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 1, &children),
            Err(TreeError::InvalidInput(_))
        );
        assert_matches!(
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 0, 4, &[]),
            Err(TreeError::InvalidInput(_))
        );
        assert_matches!(
            hash_layer_chunks::<TestCurveA>(&pool, None, None, 2, 4, &children),
            Err(TreeError::InvalidInput(_))
        );
    }

    #[test]
    fn test_backend_failure_aborts_batch() {
        struct FailCurve;

        impl TreeCurve for FailCurve {
            type Scalar = u64;
            type Point = u64;
            const NAME: &'static str = "fail";

            fn zero_scalar() -> u64 {
                0
            }
            fn hash_init_point() -> u64 {
                0
            }
            fn hash_grow(_: &u64, _: u64, _: &u64, _: &[u64]) -> Option<u64> {
                None
            }
            fn hash_trim(_: &u64, _: u64, _: &[u64], _: &u64) -> Option<u64> {
                None
            }
            fn scalar_to_bytes(_: &u64) -> [u8; 32] {
                [0; 32]
            }
            fn scalar_from_bytes(_: &[u8]) -> crate::Result<u64> {
                Ok(0)
            }
            fn point_to_bytes(_: &u64) -> [u8; 32] {
                [0; 32]
            }
            fn point_from_bytes(_: &[u8]) -> crate::Result<u64> {
                Ok(0)
            }
        }

        let pool = pool();
        assert_matches!(
            hash_layer_chunks::<FailCurve>(&pool, None, None, 0, 2, &[1, 2, 3]),
            Err(TreeError::HashFailed { curve: "fail" })
        );
    }
}
