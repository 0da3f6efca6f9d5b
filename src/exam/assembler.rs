//! Blueprint-driven paper assembly
//!
//! Draws a fixed-size, duplicate-free question set from a pool:
//! per-difficulty quotas first, then per-tag quotas, then a uniform
//! fill from whatever is left. Quotas are `floor(count * weight)`;
//! sampling is without replacement throughout. The pool is sorted by
//! item id before any drawing so a fixed rng seed yields a fixed paper.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::blueprints::BlueprintPolicy;
use crate::error::EngineError;
use crate::exam::pool::PoolItem;

/// Assemble a paper: exactly `policy.question_count` distinct item ids,
/// or `InsufficientPool` when the pool cannot cover the count.
pub fn assemble<R: Rng + ?Sized>(
    policy: &BlueprintPolicy,
    pool: &[PoolItem],
    rng: &mut R,
) -> Result<Vec<String>, EngineError> {
    let count = policy.question_count;
    if pool.len() < count {
        return Err(EngineError::InsufficientPool {
            required: count,
            available: pool.len(),
        });
    }

    let mut ordered: Vec<&PoolItem> = pool.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    let mut selected: Vec<&PoolItem> = Vec::with_capacity(count);
    let mut taken: HashSet<&str> = HashSet::new();

    // Difficulty quotas, ascending difficulty for determinism
    let mut difficulty_weights: Vec<(i64, f64)> = policy
        .difficulty_weights
        .iter()
        .map(|(d, w)| (*d, *w))
        .collect();
    difficulty_weights.sort_by_key(|(d, _)| *d);

    for (difficulty, weight) in difficulty_weights {
        let quota = quota_for(count, weight).min(count - selected.len());
        if quota == 0 {
            continue;
        }
        let bucket: Vec<&PoolItem> = ordered
            .iter()
            .filter(|item| item.difficulty == difficulty && !taken.contains(item.id.as_str()))
            .copied()
            .collect();
        draw(&bucket, quota, rng, &mut selected, &mut taken);
    }

    // Tag quotas, ascending tag name. Items already selected that carry
    // the tag count toward its quota.
    let mut tag_weights: Vec<(&String, f64)> =
        policy.tag_weights.iter().map(|(t, w)| (t, *w)).collect();
    tag_weights.sort_by_key(|(t, _)| t.as_str());

    for (tag, weight) in tag_weights {
        let quota = quota_for(count, weight);
        let already = selected
            .iter()
            .filter(|item| item.tags.iter().any(|t| t == tag))
            .count();
        let need = quota
            .saturating_sub(already)
            .min(count - selected.len());
        if need == 0 {
            continue;
        }
        let bucket: Vec<&PoolItem> = ordered
            .iter()
            .filter(|item| {
                item.tags.iter().any(|t| t == tag) && !taken.contains(item.id.as_str())
            })
            .copied()
            .collect();
        draw(&bucket, need, rng, &mut selected, &mut taken);
    }

    // Uniform fill from the leftover pool
    let remaining = count - selected.len();
    if remaining > 0 {
        let leftover: Vec<&PoolItem> = ordered
            .iter()
            .filter(|item| !taken.contains(item.id.as_str()))
            .copied()
            .collect();
        draw(&leftover, remaining, rng, &mut selected, &mut taken);
    }

    debug_assert_eq!(selected.len(), count);
    Ok(selected.into_iter().map(|item| item.id.clone()).collect())
}

fn quota_for(count: usize, weight: f64) -> usize {
    if !(weight.is_finite() && weight > 0.0) {
        return 0;
    }
    ((count as f64) * weight).floor() as usize
}

fn draw<'a, R: Rng + ?Sized>(
    bucket: &[&'a PoolItem],
    amount: usize,
    rng: &mut R,
    selected: &mut Vec<&'a PoolItem>,
    taken: &mut HashSet<&'a str>,
) {
    for item in bucket.choose_multiple(rng, amount).copied() {
        selected.push(item);
        taken.insert(item.id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn item(id: &str, difficulty: i64, tags: &[&str]) -> PoolItem {
        PoolItem {
            id: id.to_string(),
            module_tag: "m".to_string(),
            difficulty,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn uniform_policy(count: usize) -> BlueprintPolicy {
        BlueprintPolicy {
            question_count: count,
            difficulty_weights: HashMap::new(),
            tag_weights: HashMap::new(),
        }
    }

    #[test]
    fn test_draws_exact_count_of_distinct_ids() {
        // Pool of 25, blueprint count 20
        let pool: Vec<PoolItem> = (0..25).map(|i| item(&format!("i{:02}", i), 3, &[])).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let paper = assemble(&uniform_policy(20), &pool, &mut rng).unwrap();
        assert_eq!(paper.len(), 20);
        let distinct: HashSet<_> = paper.iter().collect();
        assert_eq!(distinct.len(), 20);
        for id in &paper {
            assert!(pool.iter().any(|p| &p.id == id));
        }
    }

    #[test]
    fn test_insufficient_pool() {
        let pool: Vec<PoolItem> = (0..5).map(|i| item(&format!("i{}", i), 3, &[])).collect();
        let mut rng = StdRng::seed_from_u64(7);

        let err = assemble(&uniform_policy(10), &pool, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientPool { required: 10, available: 5 }
        ));
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let pool: Vec<PoolItem> = (0..30).map(|i| item(&format!("i{:02}", i), 1 + (i % 5), &[])).collect();
        let policy = BlueprintPolicy {
            question_count: 12,
            difficulty_weights: HashMap::from([(1, 0.25), (5, 0.25)]),
            tag_weights: HashMap::new(),
        };

        let a = assemble(&policy, &pool, &mut StdRng::seed_from_u64(42)).unwrap();
        let b = assemble(&policy, &pool, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);

        let c = assemble(&policy, &pool, &mut StdRng::seed_from_u64(43)).unwrap();
        assert_eq!(c.len(), 12);
    }

    #[test]
    fn test_difficulty_quotas_honored() {
        // 10 easy + 10 hard; half the paper must come from each bucket
        let mut pool: Vec<PoolItem> = (0..10).map(|i| item(&format!("e{}", i), 1, &[])).collect();
        pool.extend((0..10).map(|i| item(&format!("h{}", i), 5, &[])));

        let policy = BlueprintPolicy {
            question_count: 10,
            difficulty_weights: HashMap::from([(1, 0.5), (5, 0.5)]),
            tag_weights: HashMap::new(),
        };
        let mut rng = StdRng::seed_from_u64(3);

        let paper = assemble(&policy, &pool, &mut rng).unwrap();
        let easy = paper.iter().filter(|id| id.starts_with('e')).count();
        let hard = paper.iter().filter(|id| id.starts_with('h')).count();
        assert_eq!(easy, 5);
        assert_eq!(hard, 5);
    }

    #[test]
    fn test_tag_quota_met() {
        // Tag weight 0.5 of a 6-question paper: at least 3 tagged items
        let mut pool: Vec<PoolItem> = (0..4).map(|i| item(&format!("t{}", i), 3, &["safety"])).collect();
        pool.extend((0..8).map(|i| item(&format!("u{}", i), 3, &[])));

        let policy = BlueprintPolicy {
            question_count: 6,
            difficulty_weights: HashMap::new(),
            tag_weights: HashMap::from([("safety".to_string(), 0.5)]),
        };
        let mut rng = StdRng::seed_from_u64(11);

        let paper = assemble(&policy, &pool, &mut rng).unwrap();
        let tagged = paper.iter().filter(|id| id.starts_with('t')).count();
        assert!(tagged >= 3);
        assert_eq!(paper.len(), 6);
    }

    #[test]
    fn test_short_bucket_backfills_uniformly() {
        // Quota asks for 4 difficulty-5 items but only 2 exist; the
        // remainder comes from the rest of the pool.
        let mut pool: Vec<PoolItem> = (0..2).map(|i| item(&format!("h{}", i), 5, &[])).collect();
        pool.extend((0..10).map(|i| item(&format!("e{}", i), 2, &[])));

        let policy = BlueprintPolicy {
            question_count: 8,
            difficulty_weights: HashMap::from([(5, 0.5)]),
            tag_weights: HashMap::new(),
        };
        let mut rng = StdRng::seed_from_u64(5);

        let paper = assemble(&policy, &pool, &mut rng).unwrap();
        assert_eq!(paper.len(), 8);
        assert_eq!(paper.iter().filter(|id| id.starts_with('h')).count(), 2);
    }

    #[test]
    fn test_same_pool_assembles_independent_papers() {
        let pool: Vec<PoolItem> = (0..15).map(|i| item(&format!("i{:02}", i), 3, &[])).collect();
        let mut rng = StdRng::seed_from_u64(9);

        let first = assemble(&uniform_policy(10), &pool, &mut rng).unwrap();
        let second = assemble(&uniform_policy(10), &pool, &mut rng).unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(second.len(), 10);
    }
}
