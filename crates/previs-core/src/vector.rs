//! Dense vector math for retrieval.
//!
//! Vectors are L2-normalized once at write time, so query-time similarity
//! is a plain dot product. All storage is row-major `f32` with a fixed
//! per-matrix dimension; any row of another length is rejected with
//! [`CoreError::DimensionMismatch`] before it can reach the matrix.
//!
//! Scans over large matrices run in chunks of [`SCAN_CHUNK_ROWS`] rows and
//! check cancellation between chunks, so a search deadline or shutdown
//! never waits on a full pass.

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Modality, Result};

/// Rows scored between cancellation checks.
pub const SCAN_CHUNK_ROWS: usize = 10_000;

/// Row count above which a scan fans out across the rayon pool.
const PARALLEL_SCAN_THRESHOLD: usize = 65_536;

// ============================================================================
// Primitive Operations
// ============================================================================

/// L2-normalize a vector in place.
///
/// Returns `false` (leaving the vector untouched) when the norm is zero;
/// zero vectors stay zero so they score 0 against everything.
pub fn l2_normalize(v: &mut [f32]) -> bool {
	let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
	if norm == 0.0 {
		return false;
	}
	for x in v.iter_mut() {
		*x /= norm;
	}
	true
}

/// Dot product of two equal-length vectors.
///
/// Returns 0 for mismatched lengths; length agreement is enforced at write
/// time, so a mismatch here means the caller bypassed the store.
#[inline]
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() {
		return 0.0;
	}
	a.iter()
		.zip(b.iter())
		.fold(0.0f32, |acc, (&x, &y)| x.mul_add(y, acc))
}

/// Cosine similarity between two vectors of any norm.
///
/// Used where inputs are not known to be pre-normalized (tests, external
/// vectors). Returns 0 for mismatched lengths or zero-norm inputs.
#[inline]
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() {
		return 0.0;
	}

	let (dot_product, norm_a, norm_b) = a
		.iter()
		.zip(b.iter())
		.fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (&x, &y)| {
			(x.mul_add(y, d), x.mul_add(x, na), y.mul_add(y, nb))
		});

	let magnitude = norm_a.sqrt() * norm_b.sqrt();
	if magnitude == 0.0 {
		0.0
	} else {
		dot_product / magnitude
	}
}

/// Clamp a dot product of normalized vectors into [0, 1].
///
/// Normalized embeddings can produce slightly negative similarities;
/// fusion weights expect sub-scores in [0, 1].
#[inline]
#[must_use]
pub fn unit_score(similarity: f32) -> f32 {
	similarity.clamp(0.0, 1.0)
}

// ============================================================================
// Vector Matrix
// ============================================================================

/// A dense row-major matrix of L2-normalized vectors with a fixed dimension.
///
/// Rows are addressed by dense internal row ids; the store maps those to
/// stable external ids. Deletion swaps the last row into the hole, so the
/// caller must remap the moved row's id.
#[derive(Debug, Clone, Default)]
pub struct VectorMatrix {
	dim: usize,
	modality: Option<Modality>,
	data: Vec<f32>,
}

impl VectorMatrix {
	/// Create an empty matrix for the given modality and dimension.
	#[must_use]
	pub const fn new(modality: Modality, dim: usize) -> Self {
		Self {
			dim,
			modality: Some(modality),
			data: Vec::new(),
		}
	}

	/// Declared dimension.
	#[must_use]
	pub const fn dim(&self) -> usize {
		self.dim
	}

	/// Number of rows.
	#[must_use]
	pub fn rows(&self) -> usize {
		if self.dim == 0 {
			0
		} else {
			self.data.len() / self.dim
		}
	}

	/// Whether the matrix has no rows.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	/// Raw row-major data, `rows() * dim()` floats.
	#[must_use]
	pub fn as_slice(&self) -> &[f32] {
		&self.data
	}

	/// Validate a vector's length against the declared dimension.
	///
	/// # Errors
	///
	/// Returns [`CoreError::DimensionMismatch`] when lengths disagree.
	pub fn check_dim(&self, v: &[f32]) -> Result<()> {
		if v.len() == self.dim {
			Ok(())
		} else {
			Err(CoreError::DimensionMismatch {
				modality: self.modality.unwrap_or(Modality::Text),
				expected: self.dim,
				got: v.len(),
			})
		}
	}

	/// Append a vector, normalizing it in place. Returns the new row id.
	///
	/// # Errors
	///
	/// Returns [`CoreError::DimensionMismatch`] when the vector's length
	/// disagrees with the declared dimension. The matrix is unchanged.
	pub fn push(&mut self, v: &[f32]) -> Result<u32> {
		self.check_dim(v)?;
		let row = self.rows() as u32;
		let start = self.data.len();
		self.data.extend_from_slice(v);
		let _ = l2_normalize(&mut self.data[start..]);
		Ok(row)
	}

	/// Borrow a row by id, or `None` past the end.
	#[must_use]
	pub fn row(&self, row: u32) -> Option<&[f32]> {
		let start = row as usize * self.dim;
		self.data.get(start..start + self.dim)
	}

	/// Remove a row by swapping the last row into its place.
	///
	/// Returns the row id that was moved into the hole (the previous last
	/// row), or `None` when the removed row was the last one.
	pub fn swap_remove(&mut self, row: u32) -> Option<u32> {
		let rows = self.rows();
		let row = row as usize;
		debug_assert!(row < rows);
		let last = rows - 1;
		if row != last {
			let (head, tail) = self.data.split_at_mut(last * self.dim);
			head[row * self.dim..(row + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
		}
		self.data.truncate(last * self.dim);
		if row == last {
			None
		} else {
			Some(last as u32)
		}
	}
}

// ============================================================================
// Scored Scans
// ============================================================================

/// One scored row out of a scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowScore {
	/// Dense row id within the scanned matrix
	pub row: u32,
	/// Dot-product similarity, clamped to [0, 1]
	pub score: f32,
}

/// Score `query` against every row in `rows` (or all rows when `None`),
/// returning the top `k` above `min_score`, best first.
///
/// Ties break by ascending row id for determinism. The scan yields every
/// [`SCAN_CHUNK_ROWS`] rows to check `cancel`; large unrestricted scans go
/// through the rayon pool.
///
/// # Errors
///
/// Returns [`CoreError::Cancelled`] when `cancel` fires mid-scan.
pub fn scan_top_k(
	matrix: &VectorMatrix,
	query: &[f32],
	rows: Option<&[u32]>,
	k: usize,
	min_score: f32,
	cancel: &CancellationToken,
) -> Result<Vec<RowScore>> {
	if matrix.is_empty() || k == 0 || query.len() != matrix.dim() {
		return Ok(Vec::new());
	}

	let mut scored: Vec<RowScore> = match rows {
		Some(subset) => scan_subset(matrix, query, subset, min_score, cancel)?,
		None if matrix.rows() >= PARALLEL_SCAN_THRESHOLD => {
			scan_all_parallel(matrix, query, min_score, cancel)?
		}
		None => {
			let all: Vec<u32> = (0..matrix.rows() as u32).collect();
			scan_subset(matrix, query, &all, min_score, cancel)?
		}
	};

	scored.sort_by(|a, b| {
		b.score
			.partial_cmp(&a.score)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then(a.row.cmp(&b.row))
	});
	scored.truncate(k);
	Ok(scored)
}

fn scan_subset(
	matrix: &VectorMatrix,
	query: &[f32],
	subset: &[u32],
	min_score: f32,
	cancel: &CancellationToken,
) -> Result<Vec<RowScore>> {
	let mut out = Vec::new();
	for chunk in subset.chunks(SCAN_CHUNK_ROWS) {
		if cancel.is_cancelled() {
			return Err(CoreError::Cancelled);
		}
		for &row in chunk {
			if let Some(v) = matrix.row(row) {
				let score = unit_score(dot(query, v));
				if score >= min_score {
					out.push(RowScore { row, score });
				}
			}
		}
	}
	Ok(out)
}

fn scan_all_parallel(
	matrix: &VectorMatrix,
	query: &[f32],
	min_score: f32,
	cancel: &CancellationToken,
) -> Result<Vec<RowScore>> {
	let dim = matrix.dim();
	let data = matrix.as_slice();

	let chunks: Vec<Vec<RowScore>> = data
		.par_chunks(SCAN_CHUNK_ROWS * dim)
		.enumerate()
		.map(|(chunk_idx, chunk)| {
			if cancel.is_cancelled() {
				return Vec::new();
			}
			let base = (chunk_idx * SCAN_CHUNK_ROWS) as u32;
			chunk
				.chunks_exact(dim)
				.enumerate()
				.filter_map(|(i, v)| {
					let score = unit_score(dot(query, v));
					(score >= min_score).then_some(RowScore {
						row: base + i as u32,
						score,
					})
				})
				.collect()
		})
		.collect();

	if cancel.is_cancelled() {
		return Err(CoreError::Cancelled);
	}
	Ok(chunks.into_iter().flatten().collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
	use super::*;

	fn matrix_from(rows: &[&[f32]]) -> VectorMatrix {
		let mut m = VectorMatrix::new(Modality::Text, rows[0].len());
		for r in rows {
			let _ = m.push(r).unwrap();
		}
		m
	}

	#[test]
	fn test_normalize_unit_norm() {
		let mut v = vec![3.0, 4.0];
		assert!(l2_normalize(&mut v));
		let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
		assert!((norm - 1.0).abs() < 1e-6);
	}

	#[test]
	fn test_normalize_zero_vector_untouched() {
		let mut v = vec![0.0, 0.0, 0.0];
		assert!(!l2_normalize(&mut v));
		assert_eq!(v, vec![0.0, 0.0, 0.0]);
	}

	#[test]
	fn test_dot_mismatched_lengths() {
		assert_eq!(dot(&[1.0, 0.0], &[1.0]), 0.0);
	}

	#[test]
	fn test_cosine_orthogonal() {
		assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
	}

	#[test]
	fn test_push_rejects_wrong_dim() {
		let mut m = VectorMatrix::new(Modality::Visual, 4);
		let err = m.push(&[1.0, 2.0]).unwrap_err();
		assert_eq!(err.kind(), "dimension_mismatch");
		assert_eq!(m.rows(), 0);
	}

	#[test]
	fn test_push_normalizes() {
		let mut m = VectorMatrix::new(Modality::Text, 2);
		let row = m.push(&[3.0, 4.0]).unwrap();
		let v = m.row(row).unwrap();
		assert!((v[0] - 0.6).abs() < 1e-6);
		assert!((v[1] - 0.8).abs() < 1e-6);
	}

	#[test]
	fn test_swap_remove_moves_last() {
		let mut m = matrix_from(&[&[1.0, 0.0], &[0.0, 1.0], &[1.0, 1.0]]);
		let moved = m.swap_remove(0);
		assert_eq!(moved, Some(2));
		assert_eq!(m.rows(), 2);
		// Row 0 now holds what was row 2 (normalized [1,1]).
		let v = m.row(0).unwrap();
		assert!((v[0] - v[1]).abs() < 1e-6);
	}

	#[test]
	fn test_swap_remove_last_row() {
		let mut m = matrix_from(&[&[1.0, 0.0], &[0.0, 1.0]]);
		assert_eq!(m.swap_remove(1), None);
		assert_eq!(m.rows(), 1);
	}

	#[test]
	fn test_scan_orders_and_truncates() {
		let m = matrix_from(&[&[0.0, 1.0], &[1.0, 0.0], &[1.0, 1.0]]);
		let cancel = CancellationToken::new();
		let top = scan_top_k(&m, &[1.0, 0.0], None, 2, 0.0, &cancel).unwrap();
		assert_eq!(top.len(), 2);
		assert_eq!(top[0].row, 1);
		assert_eq!(top[1].row, 2);
		assert!(top[0].score > top[1].score);
	}

	#[test]
	fn test_scan_tie_breaks_by_row() {
		let m = matrix_from(&[&[1.0, 0.0], &[1.0, 0.0], &[1.0, 0.0]]);
		let cancel = CancellationToken::new();
		let top = scan_top_k(&m, &[1.0, 0.0], None, 3, 0.0, &cancel).unwrap();
		let rows: Vec<u32> = top.iter().map(|s| s.row).collect();
		assert_eq!(rows, vec![0, 1, 2]);
	}

	#[test]
	fn test_scan_subset_only() {
		let m = matrix_from(&[&[1.0, 0.0], &[1.0, 0.0], &[0.0, 1.0]]);
		let cancel = CancellationToken::new();
		let top = scan_top_k(&m, &[1.0, 0.0], Some(&[2]), 10, 0.0, &cancel).unwrap();
		assert_eq!(top.len(), 1);
		assert_eq!(top[0].row, 2);
	}

	#[test]
	fn test_scan_min_score_filters() {
		let m = matrix_from(&[&[1.0, 0.0], &[0.0, 1.0]]);
		let cancel = CancellationToken::new();
		let top = scan_top_k(&m, &[1.0, 0.0], None, 10, 0.5, &cancel).unwrap();
		assert_eq!(top.len(), 1);
		assert_eq!(top[0].row, 0);
	}

	#[test]
	fn test_scan_cancelled() {
		let m = matrix_from(&[&[1.0, 0.0]]);
		let cancel = CancellationToken::new();
		cancel.cancel();
		let err = scan_top_k(&m, &[1.0, 0.0], None, 1, 0.0, &cancel).unwrap_err();
		assert_eq!(err.kind(), "cancelled");
	}
}
