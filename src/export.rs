//! Export a corpus table as JSONL or CSV.
//!
//! Every column is written, ids included, so an export can be re-imported
//! with `amis import` (ids are reassigned on import anyway).

use anyhow::Result;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::config::Config;
use crate::import::FileFormat;
use crate::models::Table;
use crate::store::{LexiconStore, SqliteStore};

/// Write all rows of `table` to `out`. Returns the row count.
pub async fn export_table(
    store: &dyn LexiconStore,
    table: Table,
    format: FileFormat,
    out: impl Write,
) -> Result<usize> {
    match table {
        Table::Vocabulary => write_rows(&store.all_vocabulary().await?, format, out),
        Table::Sentences => write_rows(&store.all_sentences().await?, format, out),
    }
}

fn write_rows<T: Serialize>(rows: &[T], format: FileFormat, mut out: impl Write) -> Result<usize> {
    match format {
        FileFormat::Jsonl => {
            for row in rows {
                serde_json::to_writer(&mut out, row)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        FileFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
    }
    Ok(rows.len())
}

/// Export `table`.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(
    config: &Config,
    table: Table,
    format: FileFormat,
    output: Option<&Path>,
) -> Result<()> {
    let store = SqliteStore::open(config).await?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            let n = export_table(&store, table, format, file).await?;
            eprintln!(
                "Exported {} rows from {} to {}",
                n,
                table.table_name(),
                path.display()
            );
        }
        None => {
            let stdout = std::io::stdout();
            export_table(&store, table, format, stdout.lock()).await?;
        }
    }

    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{parse_import, replace_table};
    use crate::store::testing::{add_sentence, add_word, temp_store};

    #[tokio::test]
    async fn jsonl_export_reimports_same_tuples() {
        let (_tmp, store) = temp_store().await;
        add_word(&store, "kaka", "哥哥", "n").await;
        add_word(&store, "wawa", "孩子, \"小孩\"", "n").await;
        add_word(&store, "ho", "", "").await;

        let mut buf = Vec::new();
        let n = export_table(&store, Table::Vocabulary, FileFormat::Jsonl, &mut buf)
            .await
            .unwrap();
        assert_eq!(n, 3);

        let before: Vec<_> = store
            .all_vocabulary()
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.amis, v.chinese, v.part_of_speech))
            .collect();

        let rows = parse_import(
            Table::Vocabulary,
            FileFormat::Jsonl,
            std::str::from_utf8(&buf).unwrap(),
        )
        .unwrap();
        replace_table(store.pool(), &rows).await.unwrap();

        let after: Vec<_> = store
            .all_vocabulary()
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.amis, v.chinese, v.part_of_speech))
            .collect();
        // empty tags come back as NULL
        let normalize = |rows: Vec<(String, Option<String>, Option<String>)>| -> Vec<_> {
            rows.into_iter()
                .map(|(a, c, p)| (a, c, p.filter(|p| !p.is_empty())))
                .collect::<Vec<_>>()
        };
        assert_eq!(normalize(before), normalize(after));
    }

    #[tokio::test]
    async fn csv_export_has_header_and_all_columns() {
        let (_tmp, store) = temp_store().await;
        add_sentence(&store, "Nga'ay ho", "你好").await;

        let mut buf = Vec::new();
        export_table(&store, Table::Sentences, FileFormat::Csv, &mut buf)
            .await
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("id,amis,chinese,english,note,created_at"));
        assert!(lines.next().unwrap().starts_with("1,Nga'ay ho,你好,,,"));
    }
}
