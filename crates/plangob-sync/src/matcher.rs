//! Pairing of remote catalog names with pending local entities.

use plangob_core::{Entity, MatchResult};
use strsim::jaro_winkler;

use crate::config::MatchStrategy;

/// Picks at most one pending entity for an already-normalized remote name.
pub trait NameMatcher: Send + Sync {
    fn find_match<'a>(&self, remote_normalized: &str, pending: &[&'a Entity]) -> MatchResult<'a>;
}

/// First pending entity whose normalized name contains, or is contained in, the remote name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl NameMatcher for SubstringMatcher {
    fn find_match<'a>(&self, remote_normalized: &str, pending: &[&'a Entity]) -> MatchResult<'a> {
        if remote_normalized.is_empty() {
            return MatchResult::NoMatch;
        }
        for &entity in pending {
            let local = entity.normalized_name();
            if local.is_empty() {
                continue;
            }
            if local.contains(remote_normalized) || remote_normalized.contains(local.as_str()) {
                return MatchResult::Matched(entity);
            }
        }
        MatchResult::NoMatch
    }
}

/// Highest Jaro-Winkler score at or above `threshold`; ties keep the earlier entity.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    threshold: f64,
}

impl SimilarityMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl NameMatcher for SimilarityMatcher {
    fn find_match<'a>(&self, remote_normalized: &str, pending: &[&'a Entity]) -> MatchResult<'a> {
        if remote_normalized.is_empty() {
            return MatchResult::NoMatch;
        }
        let mut best: Option<(&'a Entity, f64)> = None;
        for &entity in pending {
            let local = entity.normalized_name();
            if local.is_empty() {
                continue;
            }
            let score = jaro_winkler(remote_normalized, &local);
            if score < self.threshold {
                continue;
            }
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((entity, score));
            }
        }
        match best {
            Some((entity, _)) => MatchResult::Matched(entity),
            None => MatchResult::NoMatch,
        }
    }
}

pub fn matcher_for(strategy: MatchStrategy, similarity_threshold: f64) -> Box<dyn NameMatcher> {
    match strategy {
        MatchStrategy::Substring => Box::new(SubstringMatcher),
        MatchStrategy::Similarity => Box::new(SimilarityMatcher::new(similarity_threshold)),
    }
}
