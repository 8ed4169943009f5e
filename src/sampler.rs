//! Deterministic per-match question selection.
//!
//! Every match sees a stable subset of each category's question pool. The order is
//! derived from a 32-bit rolling string hash of `"{match}_{category}_{role}_{question}"`,
//! so the selection is reproducible across processes, platforms and implementations,
//! while different matches get unrelated orderings.

use crate::model::common::role::Role;

/// Number of questions drawn from each category.
pub const QUESTIONS_PER_CATEGORY: usize = 3;

/// Anything that can be drawn by the sampler.
pub trait Sampled {
    /// The numeric ID that takes part in the sort key.
    fn sample_id(&self) -> u32;
}

impl Sampled for u32 {
    fn sample_id(&self) -> u32 {
        *self
    }
}

/// The 32-bit rolling hash used to order questions.
///
/// For each UTF-16 code unit `c`: `hash = (hash << 5) - hash + c`, wrapping at 32 bits,
/// starting from zero. The result is the absolute value of the final signed hash.
pub fn rolling_hash(key: &str) -> u32 {
    key.encode_utf16()
        .fold(0_i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit))
        })
        .unsigned_abs()
}

/// The sort key of a single question for a given match, category and role.
pub fn sort_key(match_id: &str, category_id: u32, role: Role, question_id: u32) -> u32 {
    rolling_hash(&format!("{match_id}_{category_id}_{role}_{question_id}"))
}

/// Select up to [`QUESTIONS_PER_CATEGORY`] questions from `pool`.
///
/// The result depends only on the pool's contents and the three seed values: the input
/// order of `pool` is irrelevant, ties are broken by question ID, and duplicate IDs are
/// drawn at most once. Pools smaller than the quota are returned whole (in hash order).
pub fn sample<Q: Sampled>(pool: Vec<Q>, match_id: &str, category_id: u32, role: Role) -> Vec<Q> {
    let mut keyed: Vec<(u32, Q)> = pool
        .into_iter()
        .map(|q| (sort_key(match_id, category_id, role, q.sample_id()), q))
        .collect();
    keyed.sort_by_key(|(key, q)| (*key, q.sample_id()));
    keyed.dedup_by_key(|(_, q)| q.sample_id());
    keyed
        .into_iter()
        .take(QUESTIONS_PER_CATEGORY)
        .map(|(_, q)| q)
        .collect()
}
