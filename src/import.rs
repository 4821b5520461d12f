//! Bulk import that replaces a whole table.
//!
//! Accepts CSV (header row) or JSONL (one object per line). The input is
//! parsed and checked in full before the database is touched: if any
//! required column is missing, or any row is unusable, the table stays as
//! it was. The replace itself (delete, insert, renumber) is one
//! transaction.
//!
//! | Table | Required columns |
//! |-------|------------------|
//! | vocabulary | `amis`, `chinese`, `part_of_speech` |
//! | sentences | `amis`, `chinese` |
//!
//! Sentence files exported by older versions of the console name their
//! columns `output_sentencepattern_amis` / `_chinese` / `_english`; those
//! names are accepted as aliases.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;

use sqlx::SqlitePool;
use thiserror::Error;

use crate::corpus::{SentenceDraft, VocabularyDraft};
use crate::models::{now_timestamp, Table, LEGACY_SENTENCE_COLUMNS};
use crate::renumber::renumber_in;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("record {record}: {message}")]
    Parse { record: usize, message: String },
    #[error("cannot read import file: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error during import: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Jsonl,
}

impl FileFormat {
    /// Guess from the file extension; anything but `.jsonl`/`.ndjson` is CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("ndjson") => {
                FileFormat::Jsonl
            }
            _ => FileFormat::Csv,
        }
    }
}

impl FromStr for FileFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileFormat::Csv),
            "jsonl" | "ndjson" => Ok(FileFormat::Jsonl),
            other => anyhow::bail!("Unknown format: '{}'. Use csv or jsonl.", other),
        }
    }
}

/// Parsed rows, ready to replace a table.
#[derive(Debug, Clone)]
pub enum ImportRows {
    Vocabulary(Vec<VocabularyDraft>),
    Sentences(Vec<SentenceDraft>),
}

impl ImportRows {
    pub fn len(&self) -> usize {
        match self {
            ImportRows::Vocabulary(rows) => rows.len(),
            ImportRows::Sentences(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn table(&self) -> Table {
        match self {
            ImportRows::Vocabulary(_) => Table::Vocabulary,
            ImportRows::Sentences(_) => Table::Sentences,
        }
    }
}


fn required_columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::Vocabulary => &["amis", "chinese", "part_of_speech"],
        Table::Sentences => &["amis", "chinese"],
    }
}

type Record = HashMap<String, Option<String>>;

/// Read, parse and validate `path`, then replace `table` with its rows.
/// Returns the number of rows imported.
pub async fn import_file(
    pool: &SqlitePool,
    table: Table,
    path: &Path,
    format: Option<FileFormat>,
) -> Result<usize, ImportError> {
    let input = std::fs::read_to_string(path)?;
    let format = format.unwrap_or_else(|| FileFormat::from_path(path));
    let rows = parse_import(table, format, &input)?;
    let n = replace_table(pool, &rows).await?;
    tracing::info!(table = table.table_name(), rows = n, file = %path.display(), "table replaced from import");
    Ok(n)
}

/// Parse `input` into rows for `table`. Fails without side effects when a
/// required column is absent or a row cannot be used.
pub fn parse_import(table: Table, format: FileFormat, input: &str) -> Result<ImportRows, ImportError> {
    let (columns, records) = match format {
        FileFormat::Csv => read_csv(input)?,
        FileFormat::Jsonl => read_jsonl(input)?,
    };

    let (columns, records) = if table == Table::Sentences {
        apply_aliases(columns, records)
    } else {
        (columns, records)
    };

    let missing: Vec<String> = required_columns(table)
        .iter()
        .filter(|c| !columns.contains(**c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::MissingColumns(missing));
    }

    let now = now_timestamp();
    match table {
        Table::Vocabulary => records
            .iter()
            .enumerate()
            .map(|(i, r)| vocabulary_row(i + 1, r, &now))
            .collect::<Result<Vec<_>, _>>()
            .map(ImportRows::Vocabulary),
        Table::Sentences => records
            .iter()
            .enumerate()
            .map(|(i, r)| sentence_row(i + 1, r, &now))
            .collect::<Result<Vec<_>, _>>()
            .map(ImportRows::Sentences),
    }
}

/// Delete every row of the target table, insert `rows` in order and
/// renumber, all in one transaction.
pub async fn replace_table(pool: &SqlitePool, rows: &ImportRows) -> Result<usize, ImportError> {
    let table = rows.table();
    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DELETE FROM {}", table.table_name()))
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?")
        .bind(table.table_name())
        .execute(&mut *tx)
        .await?;

    match rows {
        ImportRows::Vocabulary(rows) => {
            for row in rows {
                sqlx::query(
                    "INSERT INTO vocabulary (amis, chinese, english, part_of_speech, note, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&row.amis)
                .bind(&row.chinese)
                .bind(&row.english)
                .bind(&row.part_of_speech)
                .bind(&row.note)
                .bind(&row.created_at)
                .execute(&mut *tx)
                .await?;
            }
        }
        ImportRows::Sentences(rows) => {
            for row in rows {
                sqlx::query(
                    "INSERT INTO sentence_pairs (amis, chinese, english, note, created_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&row.amis)
                .bind(&row.chinese)
                .bind(&row.english)
                .bind(&row.note)
                .bind(&row.created_at)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    let n = renumber_in(&mut tx, table).await?;
    tx.commit().await?;
    Ok(n)
}

fn read_csv(input: &str) -> Result<(BTreeSet<String>, Vec<Record>), ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input.trim_start_matches('\u{feff}').as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_error(0, e))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| parse_error(i + 1, e))?;
        let row: Record = headers
            .iter()
            .cloned()
            .zip(record.iter().map(|v| Some(v.to_string())))
            .collect();
        records.push(row);
    }

    Ok((headers.into_iter().collect(), records))
}

/// A column counts as present only if every record carries it.
fn read_jsonl(input: &str) -> Result<(BTreeSet<String>, Vec<Record>), ImportError> {
    let mut records = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| parse_error(i + 1, e))?;
        let serde_json::Value::Object(map) = value else {
            return Err(parse_error(i + 1, "expected a JSON object"));
        };
        let row: Record = map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                };
                (k.trim().to_lowercase(), v)
            })
            .collect();
        records.push(row);
    }

    let mut columns: BTreeSet<String> = records
        .first()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default();
    for r in records.iter().skip(1) {
        columns.retain(|c| r.contains_key(c));
    }

    Ok((columns, records))
}

fn apply_aliases(
    mut columns: BTreeSet<String>,
    mut records: Vec<Record>,
) -> (BTreeSet<String>, Vec<Record>) {
    for (legacy, canonical) in LEGACY_SENTENCE_COLUMNS {
        if columns.contains(*canonical) || !columns.contains(*legacy) {
            continue;
        }
        columns.remove(*legacy);
        columns.insert(canonical.to_string());
        for r in records.iter_mut() {
            if let Some(v) = r.remove(*legacy) {
                r.insert(canonical.to_string(), v);
            }
        }
    }
    (columns, records)
}

fn parse_error(record: usize, e: impl std::fmt::Display) -> ImportError {
    ImportError::Parse {
        record,
        message: e.to_string(),
    }
}

fn value(record: &Record, column: &str) -> Option<String> {
    record.get(column).cloned().flatten()
}

fn non_empty(record: &Record, column: &str) -> Option<String> {
    value(record, column)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn vocabulary_row(n: usize, r: &Record, now: &str) -> Result<VocabularyDraft, ImportError> {
    let amis = non_empty(r, "amis").ok_or_else(|| parse_error(n, "empty amis"))?;
    Ok(VocabularyDraft {
        id: None,
        amis,
        chinese: value(r, "chinese"),
        english: non_empty(r, "english"),
        part_of_speech: non_empty(r, "part_of_speech"),
        note: Some(value(r, "note").unwrap_or_default()),
        created_at: Some(non_empty(r, "created_at").unwrap_or_else(|| now.to_string())),
    })
}

fn sentence_row(n: usize, r: &Record, now: &str) -> Result<SentenceDraft, ImportError> {
    let amis = non_empty(r, "amis").ok_or_else(|| parse_error(n, "empty amis"))?;
    let chinese = non_empty(r, "chinese").ok_or_else(|| parse_error(n, "empty chinese"))?;
    Ok(SentenceDraft {
        id: None,
        amis,
        chinese,
        english: non_empty(r, "english"),
        note: Some(value(r, "note").unwrap_or_default()),
        created_at: Some(non_empty(r, "created_at").unwrap_or_else(|| now.to_string())),
    })
}
