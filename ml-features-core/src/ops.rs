//! Tensor operations used to transform and combine feature columns
//!
//! All ops are eager: they compute their result immediately. Dense math ops
//! work on 2-D `f32` tensors laid out as `[batch, width]`; id ops work on
//! `Int64` values.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::tensor::{DenseTensor, SparseTensor, TensorData};

/// Policy for aggregating several ids of one example into a single vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combiner {
    /// Sum of the looked-up rows
    #[default]
    Sum,
    /// Average of the looked-up rows
    Mean,
    /// Sum scaled by the inverse square root of the id count
    Sqrtn,
}

impl Combiner {
    #[allow(clippy::cast_precision_loss)]
    fn scale(self, count: usize) -> f32 {
        match self {
            Combiner::Sum => 1.0,
            Combiner::Mean => 1.0 / count as f32,
            Combiner::Sqrtn => 1.0 / (count as f32).sqrt(),
        }
    }
}

fn require_rank2(tensor: &DenseTensor, op: &str) -> Result<(usize, usize)> {
    match tensor.shape() {
        &[rows, cols] => Ok((rows, cols)),
        other => Err(Error::ShapeMismatch(format!(
            "{op} expects a rank-2 tensor, got shape {other:?}"
        ))),
    }
}

/// Concatenate `[batch, w_i]` tensors along the feature axis
pub fn concat(tensors: &[DenseTensor]) -> Result<DenseTensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::InvalidArgument("concat requires at least one tensor".into()))?;
    let (batch, _) = require_rank2(first, "concat")?;

    let mut widths = Vec::with_capacity(tensors.len());
    for t in tensors {
        let (rows, cols) = require_rank2(t, "concat")?;
        if rows != batch {
            return Err(Error::ShapeMismatch(format!(
                "concat batch size mismatch: {rows} vs {batch}"
            )));
        }
        widths.push(cols);
    }

    let total: usize = widths.iter().sum();
    let mut out = Vec::with_capacity(batch * total);
    for row in 0..batch {
        for (t, &w) in tensors.iter().zip(&widths) {
            let values = t.as_f32_slice()?;
            out.extend_from_slice(&values[row * w..(row + 1) * w]);
        }
    }

    DenseTensor::from_vec(out, vec![batch, total])
}

/// Elementwise sum of equally shaped `f32` tensors
pub fn add_n(tensors: &[DenseTensor]) -> Result<DenseTensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::InvalidArgument("add_n requires at least one tensor".into()))?;

    let mut acc = first.as_f32_slice()?.to_vec();
    for t in &tensors[1..] {
        if t.shape() != first.shape() {
            return Err(Error::ShapeMismatch(format!(
                "add_n shape mismatch: {:?} vs {:?}",
                t.shape(),
                first.shape()
            )));
        }
        for (a, b) in acc.iter_mut().zip(t.as_f32_slice()?) {
            *a += b;
        }
    }

    DenseTensor::from_vec(acc, first.shape().to_vec())
}

/// Add a bias vector to every row of a `[batch, n]` tensor
pub fn bias_add(input: &DenseTensor, bias: &DenseTensor) -> Result<DenseTensor> {
    let (batch, n) = require_rank2(input, "bias_add")?;
    if bias.shape() != [n] {
        return Err(Error::ShapeMismatch(format!(
            "bias of shape {:?} does not match width {n}",
            bias.shape()
        )));
    }

    let b = bias.as_f32_slice()?;
    let out = input
        .as_f32_slice()?
        .iter()
        .enumerate()
        .map(|(i, v)| v + b[i % n])
        .collect::<Vec<_>>();

    DenseTensor::from_vec(out, vec![batch, n])
}

/// Matrix product of `[m, k]` and `[k, n]` tensors
pub fn matmul(a: &DenseTensor, b: &DenseTensor) -> Result<DenseTensor> {
    let (m, k) = require_rank2(a, "matmul")?;
    let (k2, n) = require_rank2(b, "matmul")?;
    if k != k2 {
        return Err(Error::ShapeMismatch(format!(
            "matmul inner dimensions differ: {k} vs {k2}"
        )));
    }

    let lhs = a.as_f32_slice()?;
    let rhs = b.as_f32_slice()?;
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            let x = lhs[i * k + p];
            if x == 0.0 {
                continue;
            }
            for j in 0..n {
                out[i * n + j] += x * rhs[p * n + j];
            }
        }
    }

    DenseTensor::from_vec(out, vec![m, n])
}

/// Map each value to the index of its bucket
///
/// With sorted `boundaries = [b0, b1, ...]`, values below `b0` land in
/// bucket 0 and values in `[b(i-1), b(i))` land in bucket `i`.
pub fn bucketize(input: &DenseTensor, boundaries: &[f32]) -> Result<DenseTensor> {
    let values = input.data().to_f32()?;
    let buckets = values
        .iter()
        .map(|&v| boundaries.partition_point(|&b| b <= v) as i64)
        .collect::<Vec<_>>();

    DenseTensor::from_vec(buckets, input.shape().to_vec())
}

/// One-hot encode `[batch, d]` ids into `[batch, d * depth]`
pub fn one_hot(ids: &DenseTensor, depth: usize) -> Result<DenseTensor> {
    let ids = ids.flatten_rows()?;
    let (batch, d) = (ids.shape()[0], ids.shape()[1]);
    let mut out = vec![0.0f32; batch * d * depth];
    for (i, &id) in ids.data().to_i64()?.iter().enumerate() {
        let id = usize::try_from(id)
            .ok()
            .filter(|&id| id < depth)
            .ok_or(Error::IndexOutOfBounds {
                index: usize::try_from(id).unwrap_or(usize::MAX),
                bound: depth,
            })?;
        out[i * depth + id] = 1.0;
    }

    DenseTensor::from_vec(out, vec![batch, d * depth])
}

/// Stable 64-bit fingerprint of a byte string
///
/// XXH64 with seed 0. The output is fixed by the algorithm, so ids derived
/// from it stay valid across machines and releases.
pub fn fingerprint64(bytes: &[u8]) -> u64 {
    xxh64(bytes, 0)
}

fn bucket_of(hash: u64, num_buckets: u64) -> i64 {
    // num_buckets is validated to fit an i64 by callers
    i64::try_from(hash % num_buckets).unwrap_or(i64::MAX)
}

/// Hash every value into `[0, num_buckets)`
pub fn string_to_hash_bucket<S: AsRef<str>>(values: &[S], num_buckets: u64) -> Result<Vec<i64>> {
    if num_buckets == 0 || i64::try_from(num_buckets).is_err() {
        return Err(Error::InvalidArgument(format!(
            "num_buckets must be in [1, i64::MAX], got {num_buckets}"
        )));
    }

    Ok(values
        .iter()
        .map(|v| bucket_of(fingerprint64(v.as_ref().as_bytes()), num_buckets))
        .collect())
}

/// Look up and combine rows of `params` for every example in `ids`
///
/// `params` is `[vocab, dim]`, `ids` is a `[batch, _]` sparse `Int64` tensor.
/// Examples without ids produce a zero row.
pub fn embedding_lookup_sparse(
    params: &DenseTensor,
    ids: &SparseTensor,
    combiner: Combiner,
) -> Result<DenseTensor> {
    let (vocab, dim) = require_rank2(params, "embedding_lookup_sparse")?;
    let table = params.as_f32_slice()?;
    let id_values = ids.values().as_i64().ok_or(Error::TypeMismatch {
        expected: DataType::Int64,
        actual: ids.dtype(),
    })?;

    let batch = ids.batch_size();
    let mut out = vec![0.0f32; batch * dim];
    for (row, entries) in ids.row_entries().into_iter().enumerate() {
        if entries.is_empty() {
            continue;
        }
        let acc = &mut out[row * dim..(row + 1) * dim];
        for &e in &entries {
            let id = usize::try_from(id_values[e])
                .ok()
                .filter(|&id| id < vocab)
                .ok_or(Error::IndexOutOfBounds {
                    index: usize::try_from(id_values[e]).unwrap_or(usize::MAX),
                    bound: vocab,
                })?;
            for (a, w) in acc.iter_mut().zip(&table[id * dim..(id + 1) * dim]) {
                *a += w;
            }
        }
        let scale = combiner.scale(entries.len());
        acc.iter_mut().for_each(|a| *a *= scale);
    }

    DenseTensor::from_vec(out, vec![batch, dim])
}

/// Hash the per-example cartesian product of several sparse id tensors
///
/// Each output id is a fingerprint of one id from every input, taken in
/// input order, reduced modulo `num_buckets`.
pub fn sparse_feature_cross(inputs: &[&SparseTensor], num_buckets: u64) -> Result<SparseTensor> {
    if inputs.len() < 2 {
        return Err(Error::InvalidArgument(
            "sparse_feature_cross requires at least two inputs".into(),
        ));
    }
    if num_buckets == 0 || i64::try_from(num_buckets).is_err() {
        return Err(Error::InvalidArgument(format!(
            "num_buckets must be in [1, i64::MAX], got {num_buckets}"
        )));
    }

    let batch = inputs[0].batch_size();
    let mut per_input = Vec::with_capacity(inputs.len());
    for input in inputs {
        if input.batch_size() != batch {
            return Err(Error::ShapeMismatch(format!(
                "sparse_feature_cross batch size mismatch: {} vs {batch}",
                input.batch_size()
            )));
        }
        let values = input.values().to_i64()?;
        let rows = input
            .row_entries()
            .into_iter()
            .map(|entries| entries.into_iter().map(|e| values[e]).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        per_input.push(rows);
    }

    let mut rows = Vec::with_capacity(batch);
    for row in 0..batch {
        let mut partial: Vec<Vec<u8>> = vec![Vec::new()];
        for input in &per_input {
            let ids = &input[row];
            partial = partial
                .iter()
                .flat_map(|prefix| {
                    ids.iter().map(move |id| {
                        let mut key = prefix.clone();
                        key.extend_from_slice(&id.to_le_bytes());
                        key.push(0x1f);
                        key
                    })
                })
                .collect();
        }
        rows.push(
            partial
                .iter()
                .map(|key| bucket_of(fingerprint64(key), num_buckets))
                .collect::<Vec<_>>(),
        );
    }

    SparseTensor::from_rows(rows)
}

/// Build an `Int64` sparse tensor with the same coordinates as `like`
pub fn sparse_ids_like(like: &SparseTensor, ids: Vec<i64>) -> Result<SparseTensor> {
    like.with_values(TensorData::Int64(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn dense(values: Vec<f32>, shape: Vec<usize>) -> DenseTensor {
        DenseTensor::from_vec(values, shape).unwrap()
    }

    #[test]
    fn test_concat_widths() {
        let a = dense(vec![1.0, 2.0], vec![2, 1]);
        let b = dense(vec![3.0, 4.0, 5.0, 6.0], vec![2, 2]);
        let c = concat(&[a, b]).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.as_f32_slice().unwrap(), &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_concat_batch_mismatch() {
        let a = dense(vec![1.0, 2.0], vec![2, 1]);
        let b = dense(vec![3.0], vec![1, 1]);
        assert!(matches!(concat(&[a, b]), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_matmul_and_bias() {
        let x = dense(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let w = dense(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
        let y = matmul(&x, &w).unwrap();
        assert_eq!(y.as_f32_slice().unwrap(), x.as_f32_slice().unwrap());

        let b = dense(vec![0.5, -1.0], vec![2]);
        let z = bias_add(&y, &b).unwrap();
        assert_eq!(z.as_f32_slice().unwrap(), &[1.5, 1.0, 3.5, 3.0]);
    }

    #[test_case(10.0, 0 ; "below first boundary")]
    #[test_case(18.0, 1 ; "on first boundary")]
    #[test_case(20.0, 1 ; "between")]
    #[test_case(30.0, 3 ; "on last boundary")]
    #[test_case(99.0, 3 ; "above last boundary")]
    fn test_bucketize(value: f32, expected: i64) {
        let input = dense(vec![value], vec![1, 1]);
        let out = bucketize(&input, &[18.0, 21.0, 30.0]).unwrap();
        assert_eq!(out.as_i64_slice().unwrap(), &[expected]);
    }

    #[test]
    fn test_one_hot() {
        let ids = DenseTensor::from_vec(vec![0i64, 2], vec![2, 1]).unwrap();
        let out = one_hot(&ids, 3).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.as_f32_slice().unwrap(), &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);

        let bad = DenseTensor::from_vec(vec![3i64], vec![1, 1]).unwrap();
        assert!(one_hot(&bad, 3).is_err());
    }

    #[test_case(Combiner::Sum, 4.0 ; "sum")]
    #[test_case(Combiner::Mean, 2.0 ; "mean")]
    #[test_case(Combiner::Sqrtn, 4.0 / 2f32.sqrt() ; "sqrtn")]
    fn test_embedding_lookup_combiners(combiner: Combiner, expected: f32) {
        let params = dense(vec![1.0, 3.0, 5.0], vec![3, 1]);
        let ids = SparseTensor::from_rows(vec![vec![0i64, 1], vec![]]).unwrap();
        let out = embedding_lookup_sparse(&params, &ids, combiner).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        let values = out.as_f32_slice().unwrap();
        assert!((values[0] - expected).abs() < 1e-6);
        assert_eq!(values[1], 0.0);
    }

    #[test]
    fn test_embedding_lookup_out_of_range() {
        let params = dense(vec![1.0, 3.0], vec![2, 1]);
        let ids = SparseTensor::from_rows(vec![vec![2i64]]).unwrap();
        assert!(matches!(
            embedding_lookup_sparse(&params, &ids, Combiner::Sum),
            Err(Error::IndexOutOfBounds { index: 2, bound: 2 })
        ));
    }

    #[test]
    fn test_fingerprint_known_values() {
        assert_eq!(fingerprint64(b""), 0xef46_db37_51d8_e999);
        assert_eq!(fingerprint64(b"abc"), 0x44bc_2cf5_ad77_0999);
        assert_eq!(fingerprint64(b"rust"), 0x5f52_f61d_27f6_a40c);
    }

    #[test]
    fn test_hash_bucket_known_values() {
        let ids = string_to_hash_bucket(&["rust", "graph", ""], 1000).unwrap();
        assert_eq!(ids, vec![468, 594, 921]);
    }

    #[test]
    fn test_cross_cardinality() {
        let a = SparseTensor::from_rows(vec![vec![1i64, 2], vec![3]]).unwrap();
        let b = SparseTensor::from_rows(vec![vec![7i64, 8, 9], vec![]]).unwrap();
        let crossed = sparse_feature_cross(&[&a, &b], 100).unwrap();
        assert_eq!(crossed.shape(), &[2, 6]);
        assert_eq!(crossed.nnz(), 6);
        assert!(crossed.values().as_i64().unwrap().iter().all(|&v| (0..100).contains(&v)));
    }

    #[test]
    fn test_cross_is_order_sensitive_but_deterministic() {
        let a = SparseTensor::from_rows(vec![vec![1i64]]).unwrap();
        let b = SparseTensor::from_rows(vec![vec![2i64]]).unwrap();
        let ab1 = sparse_feature_cross(&[&a, &b], 1 << 40).unwrap();
        let ab2 = sparse_feature_cross(&[&a, &b], 1 << 40).unwrap();
        assert_eq!(ab1, ab2);
    }

    proptest! {
        #[test]
        fn prop_hash_bucket_in_range(values in proptest::collection::vec(".*", 0..20), buckets in 1u64..10_000) {
            let ids = string_to_hash_bucket(&values, buckets).unwrap();
            prop_assert_eq!(ids.len(), values.len());
            for id in ids {
                prop_assert!(id >= 0 && (id as u64) < buckets);
            }
        }

        #[test]
        fn prop_add_n_is_elementwise(a in proptest::collection::vec(-100f32..100.0, 6), b in proptest::collection::vec(-100f32..100.0, 6)) {
            let sum = add_n(&[dense(a.clone(), vec![2, 3]), dense(b.clone(), vec![2, 3])]).unwrap();
            for ((s, x), y) in sum.as_f32_slice().unwrap().iter().zip(&a).zip(&b) {
                prop_assert!((s - (x + y)).abs() < 1e-4);
            }
        }
    }
}
