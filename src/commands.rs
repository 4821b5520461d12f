//! CLI command implementations.
//!
//! Each `run_*` function opens the database, performs one operation and
//! prints the result to stdout. Mutating commands finish with a backup
//! when `[backup].enabled` is set.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::backup::{backup_database, backup_if_enabled, BackupOutcome};
use crate::config::Config;
use crate::context::{
    build_expert_context, build_full_corpus_context, sentence_line, vocabulary_line,
};
use crate::corpus;
use crate::generate::{
    analysis_prompt, generate_with_retry, GeminiClient, GenerateError, Generator, RetryPolicy,
};
use crate::import::{import_file, FileFormat};
use crate::lookup::lookup_token;
use crate::models::{Direction, NewSentence, NewVocabulary, Table};
use crate::relevance::SubstringRelevance;
use crate::renumber::renumber;
use crate::session::SessionContext;
use crate::store::SqliteStore;
use crate::tags;

async fn after_change(store: &SqliteStore, config: &Config) {
    match backup_if_enabled(store.pool(), config).await {
        Some(BackupOutcome::Created) => println!("Backup: created {}", config.backup.path),
        Some(BackupOutcome::Updated) => println!("Backup: updated {}", config.backup.path),
        None => {}
    }
}

/// Read one JSON object per non-empty line.
fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            serde_json::from_str(l).with_context(|| format!("{}:{}: invalid row", path.display(), i + 1))
        })
        .collect()
}

// ============ Vocabulary ============

pub async fn run_vocab_add(config: &Config, entry: NewVocabulary) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let id = corpus::add_vocabulary(store.pool(), &entry).await?;
    println!("Added vocabulary #{}: {}", id, entry.amis.trim());
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

pub async fn run_vocab_list(config: &Config, limit: Option<i64>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let entries = corpus::list_vocabulary(store.pool(), limit).await?;
    if entries.is_empty() {
        println!("No vocabulary entries.");
    }
    for v in &entries {
        println!(
            "{:>5}  {:<24} {:<24} {:<8} {}",
            v.id,
            v.amis,
            v.chinese.as_deref().unwrap_or(""),
            v.part_of_speech.as_deref().unwrap_or(""),
            v.note.as_deref().unwrap_or("")
        );
    }
    store.close().await;
    Ok(())
}

pub async fn run_vocab_delete(config: &Config, id: i64) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    if !corpus::delete_vocabulary(store.pool(), id).await? {
        bail!("no such vocabulary entry: {}", id);
    }
    println!("Deleted vocabulary #{}; ids renumbered.", id);
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

/// Save an edited table: `file` holds the full table as JSONL, in the
/// shape `amis export vocabulary` writes.
pub async fn run_vocab_save(config: &Config, file: &Path) -> Result<()> {
    let rows = read_jsonl(file)?;
    let store = SqliteStore::open(config).await?;
    let s = corpus::save_vocabulary_grid(store.pool(), rows).await?;
    println!(
        "Saved vocabulary: {} inserted, {} updated, {} deleted ({} rows).",
        s.inserted, s.updated, s.deleted, s.rows
    );
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

// ============ Sentences ============

pub async fn run_sentence_add(config: &Config, sentence: NewSentence) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let added = corpus::add_sentence(&store, &sentence).await?;
    println!("Added sentence #{}.", added.id);
    if added.new_stubs > 0 {
        println!(
            "Created {} new vocabulary stub{}.",
            added.new_stubs,
            if added.new_stubs == 1 { "" } else { "s" }
        );
    }
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

pub async fn run_sentence_list(config: &Config, limit: Option<i64>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let pairs = corpus::list_sentences(store.pool(), limit).await?;
    if pairs.is_empty() {
        println!("No sentence pairs.");
    }
    for s in &pairs {
        println!("{:>5}  {}", s.id, s.amis);
        println!("       {}", s.chinese);
    }
    store.close().await;
    Ok(())
}

pub async fn run_sentence_delete(config: &Config, id: i64) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    if !corpus::delete_sentence(store.pool(), id).await? {
        bail!("no such sentence pair: {}", id);
    }
    println!("Deleted sentence #{}; ids renumbered.", id);
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

pub async fn run_sentence_save(config: &Config, file: &Path) -> Result<()> {
    let rows = read_jsonl(file)?;
    let store = SqliteStore::open(config).await?;
    let s = corpus::save_sentence_grid(store.pool(), rows).await?;
    println!(
        "Saved sentences: {} inserted, {} updated, {} deleted ({} rows).",
        s.inserted, s.updated, s.deleted, s.rows
    );
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

// ============ Tags ============

pub async fn run_tag_add(config: &Config, name: &str, description: &str, sort_order: i64) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    if tags::add_tag(store.pool(), name, description, sort_order).await? {
        println!("Added tag: {}", name.trim());
        after_change(&store, config).await;
    } else {
        println!("Tag already exists: {}", name.trim());
    }
    store.close().await;
    Ok(())
}

pub async fn run_tag_list(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let all = tags::list_tags(store.pool()).await?;
    if all.is_empty() {
        println!("No tags.");
    }
    for t in &all {
        println!("{:>4}  {:<16} {}", t.sort_order, t.tag_name, t.description);
    }
    store.close().await;
    Ok(())
}

pub async fn run_tag_describe(
    config: &Config,
    name: &str,
    description: &str,
    sort_order: Option<i64>,
) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    tags::describe_tag(store.pool(), name, description, sort_order).await?;
    println!("Updated tag: {}", name);
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

pub async fn run_tag_rename(config: &Config, old: &str, new: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let n = tags::rename_tag(store.pool(), old, new).await?;
    println!("Renamed tag {} → {} ({} entries updated).", old, new.trim(), n);
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

pub async fn run_tag_delete(config: &Config, name: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    if !tags::delete_tag(store.pool(), name).await? {
        bail!("no such tag: {}", name);
    }
    println!("Deleted tag: {}", name);
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

// ============ Bulk ============

pub async fn run_import(
    config: &Config,
    table: Table,
    file: &Path,
    format: Option<FileFormat>,
) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let n = import_file(store.pool(), table, file, format).await?;
    println!("Imported {} rows into {}.", n, table.table_name());
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

pub async fn run_reorder(config: &Config, tables: &[Table]) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    for table in tables {
        let n = renumber(store.pool(), *table).await?;
        println!("Renumbered {}: ids 1..{}", table.table_name(), n);
    }
    after_change(&store, config).await;
    store.close().await;
    Ok(())
}

pub async fn run_backup(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let outcome = backup_database(store.pool(), config).await?;
    match outcome {
        BackupOutcome::Created => println!("Backup created: {}", config.backup.path),
        BackupOutcome::Updated => println!("Backup updated: {}", config.backup.path),
    }
    store.close().await;
    Ok(())
}

// ============ Retrieval ============

pub async fn run_lookup(config: &Config, token: &str, direction: Direction) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let filter = SubstringRelevance::from_config(&config.retrieval);
    let matches = lookup_token(&store, &filter, &config.retrieval, token, direction).await;

    if matches.is_empty() {
        println!("No matches for \"{}\".", token);
    }
    if !matches.vocabulary.is_empty() {
        println!("Vocabulary ({}):", matches.vocabulary.len());
        for w in &matches.vocabulary {
            println!("  {}", vocabulary_line(w));
        }
    }
    if !matches.sentences.is_empty() {
        println!("Sentences ({}):", matches.sentences.len());
        for s in &matches.sentences {
            println!("  {}", sentence_line(s));
        }
    }

    store.close().await;
    Ok(())
}

pub async fn run_context(config: &Config, query: &str, direction: Direction) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let filter = SubstringRelevance::from_config(&config.retrieval);
    let ctx = build_expert_context(&store, &filter, &config.retrieval, query, direction).await;

    if let Some(t) = &ctx.exact_translation {
        println!("Exact translation: {}", t);
        println!();
    }
    let text = ctx.prompt_text();
    if text.is_empty() {
        println!("No corpus context for \"{}\".", query);
    } else {
        println!("{}", text);
    }

    store.close().await;
    Ok(())
}

/// Write the full corpus context to `output`, or stdout.
pub async fn run_dump(config: &Config, output: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let dump = build_full_corpus_context(&store).await?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &dump)?;
            eprintln!("Wrote {} bytes to {}", dump.len(), path.display());
        }
        None => print!("{}", dump),
    }
    store.close().await;
    Ok(())
}

pub async fn run_models(config: &Config) -> Result<()> {
    let client = GeminiClient::new(&config.generative)?;
    let api_key = config.generative.api_key_from_env().unwrap_or_default();
    for m in client.list_models(&api_key).await {
        println!("{}", m);
    }
    Ok(())
}

/// Retrieve context for `query`, then ask the model for an analysis.
pub async fn run_ask(
    config: &Config,
    query: &str,
    direction: Direction,
    model: Option<String>,
) -> Result<()> {
    let mut session = SessionContext::new(config.generative.api_key_from_env());
    let api_key = session
        .api_key()
        .map(str::to_string)
        .ok_or(GenerateError::MissingApiKey)
        .with_context(|| format!("set ${} to use the model", config.generative.api_key_env))?;

    let store = SqliteStore::open(config).await?;
    let filter = SubstringRelevance::from_config(&config.retrieval);
    let ctx = build_expert_context(&store, &filter, &config.retrieval, query, direction).await;
    store.close().await;

    if let Some(t) = &ctx.exact_translation {
        println!("Exact translation: {}", t);
    }
    println!(
        "Corpus context: {} words, {} sentences{}",
        ctx.vocabulary.len(),
        ctx.sentences.len(),
        if ctx.truncated { " (truncated)" } else { "" }
    );
    let prompt = analysis_prompt(&ctx.prompt_text(), query);
    session.record_query(query, direction, ctx);

    let model = model.unwrap_or_else(|| config.generative.model.clone());
    let client = GeminiClient::new(&config.generative)?;
    let analysis = generate_with_retry(
        &client,
        RetryPolicy::from_config(&config.generative),
        &api_key,
        &model,
        &prompt,
    )
    .await?;

    println!();
    println!("Analysis ({}):", model);
    println!("{}", analysis);
    Ok(())
}
