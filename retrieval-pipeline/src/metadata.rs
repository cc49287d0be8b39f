use common::{error::AppError, storage::types::image_record::ImageMetadata};
use serde::{Deserialize, Serialize};

use crate::expansion::TermGroup;

/// Ignored when scoring overlap; they would match almost any caption.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "in", "on", "at", "of", "with", "and", "or", "to", "for", "by", "from",
    "is", "are",
];

/// Time-of-day values that describe the same lighting.
const TIME_GROUPS: &[&[&str]] = &[
    &["night", "nighttime", "evening", "dark", "midnight"],
    &["day", "daytime", "afternoon", "midday", "noon", "bright"],
    &["sunset", "dusk", "twilight", "golden hour"],
    &["dawn", "sunrise", "early morning", "daybreak", "morning"],
];

const ACTION_GROUPS: &[&[&str]] = &[
    &["walking", "walk", "strolling", "ambling", "hiking"],
    &["running", "run", "jogging", "sprinting", "dashing"],
    &["sitting", "sit", "seated", "resting"],
    &["standing", "stand", "upright", "waiting"],
    &["eating", "eat", "dining"],
    &["talking", "talk", "speaking", "chatting", "conversing"],
];

/// Credit for a time or action value in the same category as the query word.
const CATEGORY_MATCH: f32 = 0.8;

/// Relative weight of each metadata field; a term found in a heavier field counts more.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldWeights {
    pub caption: f32,
    pub tags: f32,
    pub action: f32,
    pub time: f32,
    pub scene: f32,
    pub weather: f32,
    pub emotion: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            caption: 1.0,
            tags: 0.8,
            action: 0.9,
            time: 0.8,
            scene: 0.7,
            weather: 0.5,
            emotion: 0.5,
        }
    }
}

impl FieldWeights {
    pub fn validate(&self) -> Result<(), AppError> {
        let all = [
            self.caption,
            self.tags,
            self.action,
            self.time,
            self.scene,
            self.weather,
            self.emotion,
        ];
        if all.iter().all(|w| w.is_finite() && (0.0..=1.0).contains(w)) {
            Ok(())
        } else {
            Err(AppError::Validation(
                "metadata field weights must lie in [0, 1]".to_string(),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetadataMatchOptions {
    pub field_weights: FieldWeights,
    /// Multiplier applied when a group is only satisfied through an expansion term.
    pub expansion_discount: f32,
    pub allow_expansions: bool,
}

impl Default for MetadataMatchOptions {
    fn default() -> Self {
        Self {
            field_weights: FieldWeights::default(),
            expansion_discount: 0.85,
            allow_expansions: true,
        }
    }
}

impl MetadataMatchOptions {
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.allow_expansions = false;
        self
    }
}

/// Fraction of query words found in the metadata, each weighted by the best field it hit.
///
/// Returns 0 for missing metadata or a query made only of stop words. Always in [0, 1].
pub fn match_score(
    groups: &[TermGroup],
    metadata: Option<&ImageMetadata>,
    options: &MetadataMatchOptions,
) -> f32 {
    let Some(metadata) = metadata else {
        return 0.0;
    };

    let fields = PreparedFields::new(metadata);
    let mut total = 0.0f32;
    let mut counted = 0u16;

    for group in groups.iter().filter(|group| !is_stop_word(&group.word)) {
        counted = counted.saturating_add(1);
        let mut best = fields.best_weight(&group.word, &options.field_weights);
        if options.allow_expansions {
            for variant in &group.variants {
                let weight =
                    fields.best_weight(variant, &options.field_weights) * options.expansion_discount;
                best = best.max(weight);
            }
        }
        total += best;
    }

    if counted == 0 {
        return 0.0;
    }
    (total / f32::from(counted)).clamp(0.0, 1.0)
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercased, tokenized copies of every metadata field.
struct PreparedFields {
    caption: Option<FieldText>,
    tags: Vec<FieldText>,
    action: Option<String>,
    time: Option<String>,
    scene: Option<FieldText>,
    weather: Option<FieldText>,
    emotion: Option<FieldText>,
}

struct FieldText {
    text: String,
    tokens: Vec<String>,
}

impl FieldText {
    fn new(raw: &str) -> Self {
        let text = raw.to_lowercase();
        let tokens = text
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect();
        Self { text, tokens }
    }

    fn contains(&self, term: &str) -> bool {
        if term.contains(' ') {
            return self.text.contains(term);
        }
        self.tokens
            .iter()
            .any(|token| token == term || token.strip_suffix('s') == Some(term))
    }
}

impl PreparedFields {
    fn new(metadata: &ImageMetadata) -> Self {
        let lower = |value: &Option<String>| value.as_deref().map(|v| v.trim().to_lowercase());
        Self {
            caption: metadata.caption.as_deref().map(FieldText::new),
            tags: metadata.tags.iter().map(|tag| FieldText::new(tag)).collect(),
            action: lower(&metadata.action),
            time: lower(&metadata.time),
            scene: metadata.scene.as_deref().map(FieldText::new),
            weather: metadata.weather.as_deref().map(FieldText::new),
            emotion: metadata.emotion.as_deref().map(FieldText::new),
        }
    }

    fn best_weight(&self, term: &str, weights: &FieldWeights) -> f32 {
        let text_hit = |field: &Option<FieldText>, weight: f32| {
            if field.as_ref().is_some_and(|field| field.contains(term)) {
                weight
            } else {
                0.0
            }
        };

        let tags = if self.tags.iter().any(|tag| tag.contains(term)) {
            weights.tags
        } else {
            0.0
        };
        let action = self
            .action
            .as_deref()
            .map_or(0.0, |value| category_similarity(term, value, ACTION_GROUPS) * weights.action);
        let time = self
            .time
            .as_deref()
            .map_or(0.0, |value| category_similarity(term, value, TIME_GROUPS) * weights.time);

        [
            text_hit(&self.caption, weights.caption),
            tags,
            action,
            time,
            text_hit(&self.scene, weights.scene),
            text_hit(&self.weather, weights.weather),
            text_hit(&self.emotion, weights.emotion),
        ]
        .into_iter()
        .fold(0.0, f32::max)
    }
}

/// 1.0 when the value names the term, 0.8 when both fall in one category, else 0.
fn category_similarity(term: &str, value: &str, groups: &[&[&str]]) -> f32 {
    if FieldText::new(value).contains(term) {
        return 1.0;
    }
    let same_group = groups
        .iter()
        .any(|group| group.contains(&term) && group.contains(&value));
    if same_group {
        CATEGORY_MATCH
    } else {
        0.0
    }
}
