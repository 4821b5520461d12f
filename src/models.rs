//! Core data models used throughout the corpus console.
//!
//! These types represent the vocabulary entries, sentence pairs and
//! part-of-speech tags stored in SQLite, plus the lightweight hit types
//! that flow through retrieval.

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp format for `created_at`. Lexical order equals chronological
/// order, and second-precision legacy values sort before any fractional
/// value within the same second.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub fn now_timestamp() -> String {
    chrono::Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Older databases and exports name the sentence columns this way
/// (legacy name, current name).
pub const LEGACY_SENTENCE_COLUMNS: &[(&str, &str)] = &[
    ("output_sentencepattern_amis", "amis"),
    ("output_sentencepattern_chinese", "chinese"),
    ("output_sentencepattern_english", "english"),
];

/// Translation direction. Selects which column a token is matched
/// against and which column is returned as its translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    AmisToChinese,
    ChineseToAmis,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::AmisToChinese => "amis_to_chinese",
            Direction::ChineseToAmis => "chinese_to_amis",
        }
    }

    /// Column holding the text the user typed.
    pub fn source_column(&self) -> &'static str {
        match self {
            Direction::AmisToChinese => "amis",
            Direction::ChineseToAmis => "chinese",
        }
    }

    /// Column returned as the translation.
    pub fn target_column(&self) -> &'static str {
        match self {
            Direction::AmisToChinese => "chinese",
            Direction::ChineseToAmis => "amis",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a2c" | "amis-to-chinese" | "amis_to_chinese" | "atoz" => Ok(Direction::AmisToChinese),
            "c2a" | "chinese-to-amis" | "chinese_to_amis" | "ztoa" => Ok(Direction::ChineseToAmis),
            other => bail!(
                "Unknown direction: '{}'. Use a2c (Amis → Chinese) or c2a (Chinese → Amis).",
                other
            ),
        }
    }
}

/// Which corpus table an import, export or renumbering applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Vocabulary,
    Sentences,
}

impl Table {
    pub fn table_name(&self) -> &'static str {
        match self {
            Table::Vocabulary => "vocabulary",
            Table::Sentences => "sentence_pairs",
        }
    }
}

impl FromStr for Table {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vocabulary" | "vocab" | "words" => Ok(Table::Vocabulary),
            "sentences" | "sentence" | "sentence_pairs" => Ok(Table::Sentences),
            other => bail!(
                "Unknown table: '{}'. Use vocabulary or sentences.",
                other
            ),
        }
    }
}

/// A vocabulary row. `amis` is the headword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub id: i64,
    pub amis: String,
    pub chinese: Option<String>,
    pub english: Option<String>,
    pub part_of_speech: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}

/// A sentence pair row. `(amis, chinese)` is its natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentencePair {
    pub id: i64,
    pub amis: String,
    pub chinese: String,
    pub english: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartOfSpeechTag {
    pub tag_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sort_order: i64,
}

/// Form input for a new vocabulary entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewVocabulary {
    pub amis: String,
    #[serde(default)]
    pub chinese: Option<String>,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Form input for a new sentence pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSentence {
    pub amis: String,
    pub chinese: String,
    #[serde(default)]
    pub english: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A vocabulary match surfaced by lexicon lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VocabularyHit {
    pub amis: String,
    pub chinese: Option<String>,
    pub part_of_speech: Option<String>,
}

/// A sentence match surfaced by lexicon lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SentenceHit {
    pub amis: String,
    pub chinese: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parses_legacy_and_short_names() {
        assert_eq!("AtoZ".parse::<Direction>().unwrap(), Direction::AmisToChinese);
        assert_eq!("c2a".parse::<Direction>().unwrap(), Direction::ChineseToAmis);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn direction_columns_are_mirrored() {
        let d = Direction::ChineseToAmis;
        assert_eq!(d.source_column(), "chinese");
        assert_eq!(d.target_column(), "amis");
    }

    #[test]
    fn timestamps_sort_chronologically() {
        let legacy = "2024-05-01 10:00:00";
        let precise = "2024-05-01 10:00:00.000001";
        let later = now_timestamp();
        assert!(legacy < precise);
        assert!(precise < later.as_str());
    }
}
