use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use serde::{Deserialize, Serialize};

pub const DEFAULT_EXPANSION_CAP: usize = 10;

/// Related-term lists keyed by a lowercase query word. Each list starts with the key.
const BUILTIN_EXPANSIONS: &[(&str, &[&str])] = &[
    // Animals
    ("dog", &["dog", "puppy", "canine", "pet", "animal", "pup"]),
    ("cat", &["cat", "kitten", "feline", "pet", "animal"]),
    ("bird", &["bird", "birds", "avian", "feather"]),
    ("horse", &["horse", "pony", "equine", "foal"]),
    (
        "person",
        &["person", "people", "human", "face", "portrait", "guy", "girl", "man", "woman"],
    ),
    ("child", &["child", "kid", "children", "infant", "baby", "toddler"]),
    ("baby", &["baby", "infant", "newborn", "toddler"]),
    // Locations
    ("outdoor", &["outdoor", "nature", "outside", "exterior", "landscape", "scenery"]),
    ("indoor", &["indoor", "inside", "interior", "building", "room"]),
    ("mountain", &["mountain", "mountains", "peak", "alpine", "summit"]),
    ("beach", &["beach", "sand", "shore", "coast", "ocean"]),
    ("forest", &["forest", "woods", "woodland", "trees", "nature"]),
    ("city", &["city", "urban", "downtown", "street", "building"]),
    ("park", &["park", "garden", "outdoor", "nature"]),
    // Nature and weather
    ("sunset", &["sunset", "dusk", "evening", "sunrise", "dawn", "golden hour"]),
    ("sunrise", &["sunrise", "dawn", "morning", "golden hour"]),
    ("rain", &["rain", "rainy", "wet", "weather", "storm"]),
    ("snow", &["snow", "snowy", "winter", "cold", "frost"]),
    ("cloud", &["cloud", "cloudy", "clouds", "sky", "overcast"]),
    ("sky", &["sky", "blue sky", "clouds", "weather", "atmosphere"]),
    ("water", &["water", "ocean", "sea", "lake", "river", "splash"]),
    ("tree", &["tree", "trees", "forest", "nature", "wood"]),
    ("flower", &["flower", "flowers", "bloom", "blossom", "floral"]),
    // Objects and food
    ("food", &["food", "eating", "meal", "cuisine", "dish", "eat"]),
    ("drink", &["drink", "beverage", "coffee", "tea", "water"]),
    ("car", &["car", "vehicle", "automobile", "truck", "sedan"]),
    ("bike", &["bike", "bicycle", "motorcycle", "cycle"]),
    ("phone", &["phone", "mobile", "smartphone", "device"]),
    ("book", &["book", "reading", "literature", "novel", "text"]),
    // Activities
    ("running", &["running", "jogging", "sprint", "active"]),
    ("walking", &["walking", "walk", "stroll", "hiking"]),
    ("jumping", &["jumping", "jump", "leap", "bounce"]),
    ("playing", &["playing", "play", "game", "sport", "recreation"]),
    ("swimming", &["swimming", "swim", "water", "pool", "beach"]),
    ("dancing", &["dancing", "dance", "movement", "performance"]),
    ("sleeping", &["sleeping", "sleep", "rest", "bed"]),
    // Colors
    ("blue", &["blue", "azure", "navy", "cyan", "turquoise"]),
    ("red", &["red", "crimson", "scarlet", "ruby", "pink"]),
    ("green", &["green", "lime", "forest", "emerald", "olive"]),
    ("yellow", &["yellow", "golden", "gold", "amber", "orange"]),
    ("black", &["black", "dark", "shadow", "noir"]),
    ("white", &["white", "light", "bright", "pale", "snow"]),
    // Moods
    ("happy", &["happy", "joyful", "smile", "joy", "cheerful"]),
    ("sad", &["sad", "unhappy", "melancholy", "tears", "sorrow"]),
    ("calm", &["calm", "peaceful", "serene", "quiet", "tranquil"]),
    ("busy", &["busy", "crowded", "hectic", "active", "chaos"]),
    ("dark", &["dark", "night", "shadow", "dim", "nighttime"]),
    ("bright", &["bright", "light", "sunny", "illuminated", "clear"]),
    ("cold", &["cold", "winter", "frost", "snow", "chill"]),
    ("hot", &["hot", "warm", "summer", "heat", "sunny"]),
    // Quality
    ("beautiful", &["beautiful", "pretty", "gorgeous", "stunning", "lovely"]),
    ("ugly", &["ugly", "unattractive", "unsightly", "poor"]),
    ("old", &["old", "ancient", "vintage", "historic", "aged"]),
    ("new", &["new", "modern", "fresh", "contemporary", "recent"]),
    ("clean", &["clean", "neat", "tidy", "organized", "spotless"]),
    ("dirty", &["dirty", "messy", "dusty", "grimy", "unclean"]),
    // Composition
    ("portrait", &["portrait", "headshot", "face", "person", "selfie"]),
    ("landscape", &["landscape", "wide", "scenery", "nature", "vista"]),
    ("close-up", &["close-up", "macro", "detail", "zoom", "magnified"]),
    ("wide", &["wide", "landscape", "broad", "expansive", "panoramic"]),
    ("black and white", &["black and white", "monochrome", "bw", "grayscale"]),
];

static BUILTIN: LazyLock<ExpansionTable> =
    LazyLock::new(|| ExpansionTable::from_entries(BUILTIN_EXPANSIONS.iter().copied()));

/// A query word together with the related terms the table offers for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermGroup {
    pub word: String,
    pub variants: Vec<String>,
}

/// Read-only, case-insensitive related-term lookup, built once and shared.
#[derive(Debug, Clone, Default)]
pub struct ExpansionTable {
    entries: HashMap<String, Vec<String>>,
}

impl ExpansionTable {
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    pub fn from_entries<'a, I, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: AsRef<[&'a str]>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, related)| {
                let key = normalize(key);
                let mut seen = HashSet::new();
                let related = related
                    .as_ref()
                    .iter()
                    .map(|term| normalize(term))
                    .filter(|term| !term.is_empty() && *term != key && seen.insert(term.clone()))
                    .collect();
                (key, related)
            })
            .collect();
        Self { entries }
    }

    /// Related terms for one word, excluding the word itself, in table order.
    pub fn related(&self, word: &str) -> &[String] {
        self.entries
            .get(&normalize(word))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Expands `query` into at most `cap` lowercase search terms.
    ///
    /// The normalized query always comes first. Multi-word queries then list each word
    /// followed by each word's related terms; duplicates keep their first position.
    pub fn expand(&self, query: &str, cap: usize) -> Vec<String> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |term: &str| {
            if seen.insert(term.to_owned()) {
                ordered.push(term.to_owned());
            }
        };

        push(&normalized);
        if let Some(related) = self.entries.get(&normalized) {
            related.iter().for_each(|term| push(term));
        } else {
            let words: Vec<&str> = normalized.split_whitespace().collect();
            words.iter().for_each(|word| push(word));
            for word in &words {
                self.related(word).iter().for_each(|term| push(term));
            }
        }

        ordered.truncate(cap.max(1));
        ordered
    }

    /// Per-word expansion used for metadata matching; unlike `expand` this is uncapped.
    pub fn groups(&self, query: &str) -> Vec<TermGroup> {
        let normalized = normalize(query);
        if let Some(related) = self.entries.get(&normalized) {
            if normalized.contains(' ') {
                return vec![TermGroup {
                    word: normalized,
                    variants: related.clone(),
                }];
            }
        }

        let mut seen = HashSet::new();
        normalized
            .split_whitespace()
            .filter(|word| seen.insert(*word))
            .map(|word| TermGroup {
                word: word.to_owned(),
                variants: self.related(word).to_vec(),
            })
            .collect()
    }

    /// Every single-word term in the table, keys before related terms.
    pub fn vocabulary(&self) -> Vec<String> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();

        let mut seen = HashSet::new();
        let mut words = Vec::new();
        for key in keys {
            let related = self.entries.get(key).map_or(&[][..], Vec::as_slice);
            for term in std::iter::once(key).chain(related) {
                for word in term.split_whitespace() {
                    if seen.insert(word.to_owned()) {
                        words.push(word.to_owned());
                    }
                }
            }
        }
        words
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
