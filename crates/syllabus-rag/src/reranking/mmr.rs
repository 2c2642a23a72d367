//! Maximal Marginal Relevance re-ranking.
//!
//! Picks items one at a time, scoring each remaining candidate as
//! `lambda * relevance - (1 - lambda) * max_similarity_to_already_picked`.
//! With `lambda = 1.0` this is plain similarity order; lower values trade
//! relevance for spread across distinct passages.

use crate::storage::ScoredPassage;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Returns indices into `candidates` in selection order, at most `k` of them.
///
/// Relevance is the candidate's similarity score from the index; redundancy is
/// cosine similarity between stored vectors. Candidates without a stored
/// vector are never considered redundant. Ties go to the earlier candidate.
pub fn maximal_marginal_relevance(candidates: &[ScoredPassage], lambda: f32, k: usize) -> Vec<usize> {
    let lambda = lambda.clamp(0.0, 1.0);
    let target = k.min(candidates.len());
    let mut selected: Vec<usize> = Vec::with_capacity(target);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < target {
        let mut best: Option<(usize, f32)> = None;

        for (pos, &idx) in remaining.iter().enumerate() {
            let candidate = &candidates[idx];
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidate.vector, &candidates[s].vector))
                .fold(0.0f32, f32::max);
            let score = lambda * candidate.score - (1.0 - lambda) * redundancy;

            if best.map_or(true, |(_, b)| score > b) {
                best = Some((pos, score));
            }
        }

        match best {
            Some((pos, _)) => selected.push(remaining.remove(pos)),
            None => break,
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RetrievedPassage;

    fn candidate(subtopic: &str, score: f32, vector: Vec<f32>) -> ScoredPassage {
        ScoredPassage {
            passage: RetrievedPassage {
                content: format!("{} passage", subtopic),
                subtopic: subtopic.to_string(),
                unit_number: 1,
                source_file: "unit.pdf".to_string(),
                page_start: 1,
                page_end: 1,
                content_type: "text".to_string(),
                image_url: None,
                latex: None,
            },
            score,
            vector,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_lambda_one_keeps_similarity_order() {
        let candidates = vec![
            candidate("a", 0.9, vec![1.0, 0.0]),
            candidate("b", 0.8, vec![1.0, 0.0]),
            candidate("c", 0.5, vec![0.0, 1.0]),
        ];
        assert_eq!(maximal_marginal_relevance(&candidates, 1.0, 3), vec![0, 1, 2]);
    }

    #[test]
    fn test_low_lambda_prefers_distinct_passages() {
        // Two near-duplicates about light reactions, one distinct passage on the Calvin cycle.
        let candidates = vec![
            candidate("light", 0.95, vec![1.0, 0.0, 0.0]),
            candidate("light-dup", 0.94, vec![0.99, 0.01, 0.0]),
            candidate("calvin", 0.80, vec![0.0, 1.0, 0.0]),
        ];
        let picked = maximal_marginal_relevance(&candidates, 0.5, 2);
        assert_eq!(picked, vec![0, 2]);

        let pure = maximal_marginal_relevance(&candidates, 1.0, 2);
        assert_eq!(pure, vec![0, 1]);
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let candidates = vec![
            candidate("low", 0.2, vec![0.0, 1.0]),
            candidate("high", 0.9, vec![1.0, 0.0]),
        ];
        assert_eq!(maximal_marginal_relevance(&candidates, 0.7, 1), vec![1]);
    }

    #[test]
    fn test_k_larger_than_pool() {
        let candidates = vec![candidate("only", 0.5, vec![])];
        assert_eq!(maximal_marginal_relevance(&candidates, 0.7, 10), vec![0]);
        assert!(maximal_marginal_relevance(&[], 0.7, 10).is_empty());
    }
}
