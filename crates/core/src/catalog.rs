//! Video catalog and label-to-content matching.
//!
//! A classifier label such as `"person, basketball, court"` is tokenised
//! into a word set and compared to every entry's keyword set with the
//! Jaccard index. The best entry wins if it clears
//! [`SIMILARITY_THRESHOLD`]; otherwise the catalog's default entry is used.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Minimum Jaccard score for a classifier label to select an entry.
pub const SIMILARITY_THRESHOLD: f64 = 0.1;

/// One catalog row. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCatalogEntry {
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    /// Category tag; also names the clip pair (see [`ClipPair::for_tag`]).
    pub category: String,
}

/// The two clips played in sequence for one engagement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipPair {
    pub stage1: String,
    pub stage2: String,
}

impl ClipPair {
    /// Clips for a category or marker tag `T` are `T_1` then `T_2`.
    pub fn for_tag(tag: &str) -> Self {
        Self {
            stage1: format!("{tag}_1"),
            stage2: format!("{tag}_2"),
        }
    }
}

/// Outcome of [`VideoCatalog::best_match`].
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMatch<'a> {
    pub entry: &'a VideoCatalogEntry,
    /// Score of the winning entry (0.0 when falling back).
    pub score: f64,
    /// `true` when no entry cleared the threshold and the default was used.
    pub fallback: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Catalog must contain at least one entry")]
    Empty,

    #[error("Default entry '{0}' is not in the catalog")]
    UnknownDefault(String),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    default: Option<String>,
    entries: Vec<VideoCatalogEntry>,
}

/// Static reference data for matching classifier guesses to clips.
#[derive(Debug, Clone)]
pub struct VideoCatalog {
    entries: Vec<VideoCatalogEntry>,
    keyword_sets: Vec<HashSet<String>>,
    default_index: usize,
}

impl VideoCatalog {
    /// Build a catalog. The first entry is the default.
    pub fn new(entries: Vec<VideoCatalogEntry>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        let keyword_sets = entries
            .iter()
            .map(|e| e.keywords.iter().map(|k| k.to_lowercase()).collect())
            .collect();
        Ok(Self {
            entries,
            keyword_sets,
            default_index: 0,
        })
    }

    /// Select the default entry by name.
    pub fn with_default(mut self, name: &str) -> Result<Self, CatalogError> {
        self.default_index = self
            .entries
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| CatalogError::UnknownDefault(name.to_string()))?;
        Ok(self)
    }

    /// Parse a catalog from JSON of the form
    /// `{"default": "name", "entries": [{name, description, keywords, category}]}`.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let catalog = Self::new(file.entries)?;
        match file.default {
            Some(name) => catalog.with_default(&name),
            None => Ok(catalog),
        }
    }

    /// Load a catalog JSON file from disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The built-in reference catalog.
    pub fn reference() -> Self {
        const PLAYER: &[&str] = &[
            "basketball",
            "sports",
            "lebron",
            "james",
            "nba",
            "lakers",
            "player",
            "athlete",
            "game",
            "court",
            "jersey",
            "ball",
        ];
        const FASHION: &[&str] = &[
            "fashion",
            "chanel",
            "perfume",
            "luxury",
            "style",
            "design",
            "brand",
            "clothing",
            "model",
            "beauty",
            "accessory",
            "bag",
            "purse",
            "makeup",
            "cosmetics",
            "bottle",
            "woman",
            "female",
        ];
        // "sports equipment" never equals a single token. It still counts
        // toward the keyword set size, which keeps the reference scores.
        const PEOPLE: &[&str] = &["person", "man", "people", "sports equipment"];

        let words = |parts: &[&[&str]]| -> Vec<String> {
            parts
                .iter()
                .flat_map(|p| p.iter())
                .map(|s| s.to_string())
                .collect()
        };

        let entries = vec![
            VideoCatalogEntry {
                name: "lebron_1".into(),
                description: "LeBron James playing basketball".into(),
                keywords: words(&[PLAYER, PEOPLE]),
                category: "lebron".into(),
            },
            VideoCatalogEntry {
                name: "lebron_2".into(),
                description: "LeBron James highlights".into(),
                keywords: words(&[PLAYER, &["dunk", "score"][..], PEOPLE]),
                category: "lebron".into(),
            },
            VideoCatalogEntry {
                name: "chanel_1".into(),
                description: "Chanel fashion and products".into(),
                keywords: words(&[FASHION]),
                category: "chanel".into(),
            },
            VideoCatalogEntry {
                name: "chanel_2".into(),
                description: "Chanel product showcase".into(),
                keywords: words(&[FASHION]),
                category: "chanel".into(),
            },
        ];

        // The reference list is non-empty, so construction cannot fail.
        Self {
            keyword_sets: entries
                .iter()
                .map(|e| e.keywords.iter().cloned().collect())
                .collect(),
            entries,
            default_index: 0,
        }
    }

    pub fn entries(&self) -> &[VideoCatalogEntry] {
        &self.entries
    }

    pub fn default_entry(&self) -> &VideoCatalogEntry {
        &self.entries[self.default_index]
    }

    /// Find the entry that best matches a classifier label.
    ///
    /// Ties keep the earliest entry in catalog order.
    pub fn best_match(&self, label: &str) -> CatalogMatch<'_> {
        let words = tokenize(label);

        let mut best: Option<(usize, f64)> = None;
        for (index, keywords) in self.keyword_sets.iter().enumerate() {
            let score = jaccard(keywords, &words);
            tracing::trace!(entry = %self.entries[index].name, score, "Catalog match score");
            if score > best.map_or(0.0, |(_, s)| s) {
                best = Some((index, score));
            }
        }

        match best {
            Some((index, score)) if score >= SIMILARITY_THRESHOLD => {
                tracing::debug!(entry = %self.entries[index].name, score, "Catalog match");
                CatalogMatch {
                    entry: &self.entries[index],
                    score,
                    fallback: false,
                }
            }
            _ => {
                tracing::debug!(
                    label,
                    default = %self.default_entry().name,
                    "No catalog entry cleared the threshold, using default",
                );
                CatalogMatch {
                    entry: self.default_entry(),
                    score: 0.0,
                    fallback: true,
                }
            }
        }
    }
}

/// Lowercase `text` and split it on every non-alphanumeric character.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Intersection-over-union of two sets. Two empty sets score 0.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
