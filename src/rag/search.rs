use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One hit from a collection: the stored chunk text and its similarity to the query.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub position: usize,
    pub text: String,
    pub score: f32,
}

/// L2 normalize a vector in-place. Zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Dot product similarity. On pre-normalized vectors, this equals cosine similarity.
pub fn dot_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Min-heap entry for top-K selection.
#[derive(Debug)]
struct HeapEntry {
    score: f32,
    position: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the weakest entry sits on top of the max-heap.
        // Equal scores: the later position is weaker, so earlier insertions win ties.
        match other.score.partial_cmp(&self.score) {
            Some(Ordering::Equal) | None => self.position.cmp(&other.position),
            Some(ord) => ord,
        }
    }
}

/// Exhaustive inner-product search over `count` row-major vectors of width `dims`.
///
/// Returns `(score, position)` pairs, best first. Ties are broken by lower
/// position so identical inputs always produce the same order. Non-finite
/// scores are dropped.
pub fn top_k(query: &[f32], data: &[f32], dims: usize, k: usize) -> Vec<(f32, usize)> {
    if k == 0 || dims == 0 {
        return Vec::new();
    }
    let count = data.len() / dims;
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k.min(count) + 1);

    for (position, row) in data.chunks_exact(dims).enumerate() {
        let score = dot_similarity(query, row);
        if !score.is_finite() {
            continue;
        }
        heap.push(HeapEntry { score, position });
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut results: Vec<(f32, usize)> = heap.into_iter().map(|e| (e.score, e.position)).collect();
    results.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    results
}
