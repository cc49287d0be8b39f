use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::expansion::ExpansionTable;

/// Popular photo-search terms; seed the vocabulary and back the suggestion fallback.
pub const COMMON_TERMS: &[&str] = &[
    "sunset", "sunrise", "ocean", "beach", "mountain", "landscape", "car", "vehicle", "bike",
    "motorcycle", "people", "person", "group", "friends", "family", "building", "palace", "fort",
    "temple", "monument", "nature", "tree", "forest", "sky", "water", "city", "street", "road",
    "bridge", "architecture", "food", "animal", "dog", "cat", "bird", "flower", "garden", "park",
    "river", "lake",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellingThresholds {
    /// Maximum edit distance that is corrected automatically.
    pub strict: usize,
    /// Maximum edit distance that is offered as a suggestion only.
    pub loose: usize,
    /// Words shorter than this are never touched.
    pub min_word_len: usize,
}

impl Default for SpellingThresholds {
    fn default() -> Self {
        Self {
            strict: 1,
            loose: 2,
            min_word_len: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellCorrection {
    pub original: String,
    pub corrected: String,
    pub was_corrected: bool,
    /// "Did you mean" text for near misses that were not corrected automatically.
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SpellCorrector {
    vocabulary: Vec<String>,
    known: HashSet<String>,
    thresholds: SpellingThresholds,
}

impl SpellCorrector {
    pub fn new(vocabulary: impl IntoIterator<Item = String>, thresholds: SpellingThresholds) -> Self {
        let mut known = HashSet::new();
        let vocabulary: Vec<String> = vocabulary
            .into_iter()
            .map(|word| word.to_lowercase())
            .filter(|word| !word.is_empty() && known.insert(word.clone()))
            .collect();
        Self {
            vocabulary,
            known,
            thresholds,
        }
    }

    /// Common terms first, then every word of the expansion table.
    pub fn from_table(table: &ExpansionTable, thresholds: SpellingThresholds) -> Self {
        let vocabulary = COMMON_TERMS
            .iter()
            .map(|term| (*term).to_owned())
            .chain(table.vocabulary());
        Self::new(vocabulary, thresholds)
    }

    pub fn correct(&self, query: &str) -> SpellCorrection {
        let original = query.trim().to_owned();
        let mut corrected_words = Vec::new();
        let mut suggested_words = Vec::new();
        let mut was_corrected = false;
        let mut has_suggestion = false;

        for word in original.split_whitespace() {
            let lower = word.to_lowercase();
            match self.closest(&lower) {
                Some((candidate, distance)) if distance <= self.thresholds.strict => {
                    debug!(word = %lower, correction = %candidate, distance, "Auto-correcting query word");
                    corrected_words.push(candidate.clone());
                    suggested_words.push(candidate);
                    was_corrected = true;
                }
                Some((candidate, _)) => {
                    corrected_words.push(lower);
                    suggested_words.push(candidate);
                    has_suggestion = true;
                }
                None => {
                    corrected_words.push(lower.clone());
                    suggested_words.push(lower);
                }
            }
        }

        let corrected = if was_corrected {
            corrected_words.join(" ")
        } else {
            original.clone()
        };

        SpellCorrection {
            original,
            corrected,
            was_corrected,
            suggestion: has_suggestion.then(|| suggested_words.join(" ")),
        }
    }

    /// Best vocabulary entry within the loose threshold; `None` for known or short words.
    fn closest(&self, word: &str) -> Option<(String, usize)> {
        if word.chars().count() < self.thresholds.min_word_len || self.known.contains(word) {
            return None;
        }

        let word_len = word.chars().count();
        let mut best: Option<(&String, usize)> = None;
        for candidate in &self.vocabulary {
            if candidate.chars().count().abs_diff(word_len) > self.thresholds.loose {
                continue;
            }
            let distance = levenshtein_distance(word, candidate);
            if distance > self.thresholds.loose {
                continue;
            }
            if best.is_none_or(|(_, best_distance)| distance < best_distance) {
                best = Some((candidate, distance));
            }
        }

        best.map(|(candidate, distance)| (candidate.clone(), distance))
    }
}

/// Related search terms for a query: common terms containing a query word, then table
/// expansions. Falls back to the most common terms when nothing relates.
pub fn suggestions(query: &str, table: &ExpansionTable, max: usize) -> Vec<String> {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    let mut seen: HashSet<String> = words.iter().map(|word| (*word).to_owned()).collect();
    let mut out = Vec::new();

    let related_common = COMMON_TERMS
        .iter()
        .filter(|term| words.iter().any(|word| term.contains(word)))
        .map(|term| (*term).to_owned());
    let related_table = words
        .iter()
        .flat_map(|word| table.related(word).iter().cloned());

    for term in related_common.chain(related_table) {
        if out.len() >= max {
            break;
        }
        if seen.insert(term.clone()) {
            out.push(term);
        }
    }

    if out.is_empty() {
        out = COMMON_TERMS
            .iter()
            .take(max)
            .map(|term| (*term).to_owned())
            .collect();
    }
    out
}

pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev_row: Vec<usize> = (0..=b.len()).collect();
    let mut curr_row = vec![0; b.len().saturating_add(1)];

    for (i, ca) in a.iter().enumerate() {
        if let Some(first) = curr_row.first_mut() {
            *first = i.saturating_add(1);
        }
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            let deletion = prev_row.get(j + 1).copied().unwrap_or(usize::MAX).saturating_add(1);
            let insertion = curr_row.get(j).copied().unwrap_or(usize::MAX).saturating_add(1);
            let substitution = prev_row.get(j).copied().unwrap_or(usize::MAX).saturating_add(cost);
            if let Some(slot) = curr_row.get_mut(j + 1) {
                *slot = deletion.min(insertion).min(substitution);
            }
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row.last().copied().unwrap_or(0)
}
