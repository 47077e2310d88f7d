//! Spherical k-means over normalized vectors.
//!
//! Deterministic: initial centroids are evenly spaced input vectors,
//! assignment ties go to the lower partition, and a partition that loses
//! all its members keeps its previous centroid.

use std::cmp::Ordering;

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale `v` to unit length. Returns `false` (and leaves `v` untouched)
/// when its norm is zero or not finite.
pub fn normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Train `min(partitions, n)` centroids on the row-major `vectors` slab.
pub fn train_centroids(
    vectors: &[f32],
    dimension: usize,
    partitions: usize,
    iterations: usize,
) -> Vec<f32> {
    let count = vectors.len() / dimension;
    let k = partitions.min(count);
    if k == 0 {
        return Vec::new();
    }

    let mut centroids = Vec::with_capacity(k * dimension);
    for c in 0..k {
        let position = c * count / k;
        centroids.extend_from_slice(&vectors[position * dimension..(position + 1) * dimension]);
    }

    for iteration in 0..iterations {
        let mut sums = vec![0.0f32; k * dimension];
        let mut members = vec![0usize; k];

        for row in vectors.chunks_exact(dimension) {
            let c = nearest_centroid(&centroids, dimension, row);
            members[c] += 1;
            for (sum, x) in sums[c * dimension..(c + 1) * dimension].iter_mut().zip(row) {
                *sum += x;
            }
        }

        let mut moved = false;
        for c in 0..k {
            if members[c] == 0 {
                continue;
            }
            let sum = &mut sums[c * dimension..(c + 1) * dimension];
            if !normalize(sum) {
                continue;
            }
            let centroid = &mut centroids[c * dimension..(c + 1) * dimension];
            if centroid[..] != sum[..] {
                centroid.copy_from_slice(sum);
                moved = true;
            }
        }

        if !moved {
            tracing::trace!("k-means converged after {} iterations", iteration + 1);
            break;
        }
    }

    centroids
}

/// Index of the centroid with the largest inner product; ties go low.
pub fn nearest_centroid(centroids: &[f32], dimension: usize, vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (c, centroid) in centroids.chunks_exact(dimension).enumerate() {
        let score = dot(centroid, vector);
        if score > best_score {
            best = c;
            best_score = score;
        }
    }
    best
}

/// Partition membership for every row of `vectors`.
pub fn assign_lists(vectors: &[f32], dimension: usize, centroids: &[f32]) -> Vec<Vec<u32>> {
    let mut lists = vec![Vec::new(); centroids.len() / dimension];
    for (position, row) in vectors.chunks_exact(dimension).enumerate() {
        let c = nearest_centroid(centroids, dimension, row);
        lists[c].push(position as u32);
    }
    lists
}

/// The `nprobe` partitions closest to `query`, best first.
pub fn select_probes(centroids: &[f32], dimension: usize, query: &[f32], nprobe: usize) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = centroids
        .chunks_exact(dimension)
        .enumerate()
        .map(|(c, centroid)| (c, dot(centroid, query)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored.into_iter().take(nprobe).map(|(c, _)| c).collect()
}

/// Order hits by score descending, then position ascending.
pub fn rank(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}
