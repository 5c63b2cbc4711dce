//! Hybrid similarity/importance/recency ranking.

use crate::clock::days_between;
use crate::error::MemoryError;
use crate::model::{Message, RetrievalResult};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::cmp::Ordering;

/// Weights for the combined retrieval score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub similarity: f32,
    pub importance: f32,
    pub decay: f32,
    /// Decay is `exp(-age_days / half_life_days)`.
    pub half_life_days: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            importance: 0.3,
            decay: 0.1,
            half_life_days: 7.0,
        }
    }
}

/// Cosine similarity in [-1, 1]. Zero-magnitude vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, MemoryError> {
    if a.len() != b.len() {
        return Err(MemoryError::VectorDimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 || !dot.is_finite() {
        return Ok(0.0);
    }
    Ok((dot / (mag_a * mag_b)).clamp(-1.0, 1.0))
}

/// Stateless ranker over a candidate snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrievalRanker {
    weights: RankingWeights,
}

impl RetrievalRanker {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    /// Recency decay in (0, 1]; future timestamps count as age zero.
    pub fn decay(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        let age_days = days_between(created_at, now).max(0.0);
        let half_life = self.weights.half_life_days.max(f64::MIN_POSITIVE);
        ((-age_days / half_life).exp() as f32).max(f32::MIN_POSITIVE)
    }

    /// Score a single candidate against the query.
    pub fn score(
        &self,
        query: &[f32],
        message: &Message,
        now: DateTime<Utc>,
    ) -> Result<RetrievalResult, MemoryError> {
        let embedding = message.embedding.as_deref().unwrap_or_default();
        let similarity = cosine_similarity(query, embedding)?;
        let decay = self.decay(message.created_at, now);
        let importance = message.importance_score;
        let score = self.weights.similarity * similarity
            + self.weights.importance * importance
            + self.weights.decay * decay;
        Ok(RetrievalResult {
            message_id: message.id,
            score,
            similarity,
            decay,
            importance,
            tenant_id: message.tenant_id.clone(),
            conversation_id: message.conversation_id.clone(),
            role: message.role,
            content: message.content.clone(),
            metadata: message.metadata.clone(),
            created_at: message.created_at,
        })
    }

    /// Rank candidates and keep the best `top_k`.
    ///
    /// Candidates that are archived or lack a completed embedding are ignored;
    /// dimension mismatches are logged and skipped.
    pub fn rank(
        &self,
        query: &[f32],
        candidates: &[Message],
        top_k: usize,
        importance_min: Option<f32>,
        now: DateTime<Utc>,
    ) -> Vec<RetrievalResult> {
        if top_k == 0 || candidates.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(candidates.len());
        let mut skipped = 0usize;
        for message in candidates {
            if !message.is_searchable() {
                continue;
            }
            if importance_min.is_some_and(|min| message.importance_score < min) {
                continue;
            }
            match self.score(query, message, now) {
                Ok(result) => results.push(result),
                Err(err) => {
                    skipped += 1;
                    warn!(
                        "skipping ranking candidate (message_id={}, tenant_id={}, error={})",
                        message.id, message.tenant_id, err
                    );
                }
            }
        }

        results.sort_by(compare_results);
        results.truncate(top_k);
        debug!(
            "ranked candidates (candidates={}, returned={}, skipped={})",
            candidates.len(),
            results.len(),
            skipped
        );
        results
    }
}

/// Combined score desc, then created_at desc, then id asc.
fn compare_results(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.message_id.cmp(&b.message_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmbeddingStatus, Role};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn candidate(embedding: Vec<f32>, importance: f32, age: Duration) -> Message {
        let created_at = now() - age;
        Message {
            id: Uuid::new_v4(),
            tenant_id: "acme".to_string(),
            conversation_id: "c1".to_string(),
            role: Role::User,
            content: "hello".to_string(),
            metadata: serde_json::Value::Null,
            importance_score: importance,
            embedding: Some(embedding),
            embedding_status: EmbeddingStatus::Completed,
            created_at,
            updated_at: created_at,
            archived: false,
            archived_at: None,
        }
    }

    fn unit(similarity: f32) -> Vec<f32> {
        vec![similarity, (1.0 - similarity * similarity).sqrt()]
    }

    #[test]
    fn cosine_handles_zero_and_mismatch() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).expect("zero"), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]).expect("neg") + 1.0).abs() < 1e-6);
        let err = cosine_similarity(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::VectorDimensionMismatch { expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn decay_clamps_future_timestamps() {
        let ranker = RetrievalRanker::default();
        assert_eq!(ranker.decay(now() + Duration::days(2), now()), 1.0);
        let week = ranker.decay(now() - Duration::days(7), now());
        assert!((week - (-1.0f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn combined_score_follows_fixed_weights() {
        let ranker = RetrievalRanker::default();
        let query = [1.0, 0.0];
        let a = candidate(unit(0.9), 0.2, Duration::days(1));
        let b = candidate(unit(0.5), 0.9, Duration::zero());

        let results = ranker.rank(&query, &[b.clone(), a.clone()], 2, None, now());
        let expected_a = 0.6 * 0.9 + 0.3 * 0.2 + 0.1 * (-1.0f32 / 7.0).exp();
        let expected_b = 0.6 * 0.5 + 0.3 * 0.9 + 0.1;
        let score_of = |id| {
            results
                .iter()
                .find(|r| r.message_id == id)
                .map(|r| r.score)
                .expect("ranked")
        };
        assert!((score_of(a.id) - expected_a).abs() < 1e-4);
        assert!((score_of(b.id) - expected_b).abs() < 1e-4);
        // 0.687 vs 0.670: the similarity edge wins under the default weights.
        assert_eq!(results[0].message_id, a.id);
    }

    #[test]
    fn importance_dominance_outranks_similarity_when_similar_candidate_is_stale() {
        let ranker = RetrievalRanker::default();
        let query = [1.0, 0.0];
        let a = candidate(unit(0.9), 0.05, Duration::days(21));
        let b = candidate(unit(0.5), 0.9, Duration::zero());
        let results = ranker.rank(&query, &[a.clone(), b.clone()], 2, None, now());
        let order: Vec<Uuid> = results.iter().map(|r| r.message_id).collect();
        assert_eq!(order, vec![b.id, a.id]);
    }

    #[test]
    fn ranking_is_deterministic_and_input_order_independent() {
        let ranker = RetrievalRanker::default();
        let query = [0.3, 0.7, 0.1];
        let mut candidates: Vec<Message> = (0..20)
            .map(|i| {
                let x = i as f32 / 20.0;
                candidate(vec![x, 1.0 - x, 0.5], (i % 5) as f32 / 5.0, Duration::hours(i))
            })
            .collect();
        let first = ranker.rank(&query, &candidates, 10, None, now());
        let second = ranker.rank(&query, &candidates, 10, None, now());
        assert_eq!(first, second);
        candidates.reverse();
        let reversed = ranker.rank(&query, &candidates, 10, None, now());
        assert_eq!(first, reversed);
    }

    #[test]
    fn ties_break_on_recency_then_id() {
        let ranker = RetrievalRanker::new(RankingWeights {
            similarity: 1.0,
            importance: 0.0,
            decay: 0.0,
            half_life_days: 7.0,
        });
        let older = candidate(vec![1.0, 0.0], 0.5, Duration::days(2));
        let newer = candidate(vec![1.0, 0.0], 0.5, Duration::days(1));
        let mut twin = newer.clone();
        twin.id = Uuid::new_v4();
        let results = ranker.rank(
            &[1.0, 0.0],
            &[older.clone(), twin.clone(), newer.clone()],
            3,
            None,
            now(),
        );
        let (low, high) = if newer.id < twin.id {
            (newer.id, twin.id)
        } else {
            (twin.id, newer.id)
        };
        let order: Vec<Uuid> = results.iter().map(|r| r.message_id).collect();
        assert_eq!(order, vec![low, high, older.id]);
    }

    #[test]
    fn importance_min_filters_before_scoring() {
        let ranker = RetrievalRanker::default();
        let candidates: Vec<Message> = (0..10)
            .map(|i| candidate(vec![1.0, i as f32], i as f32 / 10.0, Duration::zero()))
            .collect();
        let results = ranker.rank(&[1.0, 1.0], &candidates, 50, Some(0.55), now());
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.importance >= 0.55));
    }

    #[test]
    fn top_k_bounds_results() {
        let ranker = RetrievalRanker::default();
        let candidates: Vec<Message> = (0..8)
            .map(|i| candidate(vec![1.0, i as f32], 0.5, Duration::hours(i)))
            .collect();
        assert!(ranker.rank(&[1.0, 0.0], &candidates, 0, None, now()).is_empty());
        assert_eq!(ranker.rank(&[1.0, 0.0], &candidates, 3, None, now()).len(), 3);
        assert_eq!(ranker.rank(&[1.0, 0.0], &candidates, 100, None, now()).len(), 8);
        assert!(ranker.rank(&[1.0, 0.0], &[], 5, None, now()).is_empty());
    }

    #[test]
    fn skips_mismatched_and_unembedded_candidates() {
        let ranker = RetrievalRanker::default();
        let good = candidate(vec![1.0, 0.0], 0.5, Duration::zero());
        let wrong_dim = candidate(vec![1.0, 0.0, 0.0], 0.9, Duration::zero());
        let mut pending = candidate(vec![1.0, 0.0], 0.9, Duration::zero());
        pending.embedding_status = EmbeddingStatus::Pending;
        let mut archived = candidate(vec![1.0, 0.0], 0.9, Duration::zero());
        archived.archived = true;

        let results = ranker.rank(
            &[1.0, 0.0],
            &[good.clone(), wrong_dim, pending, archived],
            10,
            None,
            now(),
        );
        let ids: Vec<Uuid> = results.iter().map(|r| r.message_id).collect();
        assert_eq!(ids, vec![good.id]);
    }
}
