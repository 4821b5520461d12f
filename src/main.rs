//! # Amis corpus console (`amis`)
//!
//! The `amis` binary manages a bilingual Amis/Chinese corpus and assembles
//! retrieval context for generative-model analysis.
//!
//! ## Usage
//!
//! ```bash
//! amis --config ./config/amis.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `amis init` | Create the SQLite database and tables |
//! | `amis stats` | Table counts, stubs, tag usage |
//! | `amis vocab add/list/delete/save` | Edit vocabulary |
//! | `amis sentence add/list/delete/save` | Edit sentence pairs |
//! | `amis tag add/list/describe/rename/delete` | Manage part-of-speech tags |
//! | `amis import <table> <file>` | Replace a table from CSV or JSONL |
//! | `amis export <table>` | Write a table as JSONL or CSV |
//! | `amis lookup <token>` | Look up one word |
//! | `amis context "<query>"` | Assemble retrieval context for a query |
//! | `amis dump` | Full corpus context |
//! | `amis models` | List generative models |
//! | `amis ask "<query>"` | Context plus model analysis |
//! | `amis reorder` | Renumber ids densely |
//! | `amis backup` | Upload the database to GitHub |
//! | `amis serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! amis init
//! amis tag add n --description noun
//! amis vocab add kaka --chinese 哥哥 --pos n
//! amis sentence add "O kaka ako." "他是我哥哥"
//! amis context "o kaka ako" --direction a2c
//! amis export vocabulary --format csv --output vocab.csv
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use amis_corpus::import::FileFormat;
use amis_corpus::models::{Direction, NewSentence, NewVocabulary, Table};
use amis_corpus::{commands, config, export, migrate, server, stats};

/// Amis corpus console: a bilingual Amis/Chinese corpus with
/// retrieval-augmented prompting.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/amis.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "amis",
    about = "Amis corpus console: bilingual corpus management and retrieval context for generative models",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/amis.toml")]
    config: PathBuf,

    /// Log level when `RUST_LOG` is not set. Logs go to stderr.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the vocabulary, sentence_pairs
    /// and pos_tags tables. Safe to run repeatedly.
    Init,

    /// Show corpus statistics.
    Stats,

    /// Edit vocabulary entries.
    Vocab {
        #[command(subcommand)]
        action: VocabAction,
    },

    /// Edit sentence pairs.
    Sentence {
        #[command(subcommand)]
        action: SentenceAction,
    },

    /// Manage part-of-speech tags.
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Replace a whole table from a CSV or JSONL file.
    ///
    /// The file is checked before anything is written: a missing required
    /// column leaves the table untouched.
    Import {
        table: Table,
        file: PathBuf,
        /// File format; guessed from the extension when omitted.
        #[arg(long)]
        format: Option<FileFormat>,
    },

    /// Export a table.
    Export {
        table: Table,
        #[arg(long, default_value = "jsonl")]
        format: FileFormat,
        /// Output file. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Look up one token in the lexicon.
    Lookup {
        token: String,
        /// `a2c` (Amis → Chinese) or `c2a` (Chinese → Amis).
        #[arg(long, default_value = "a2c")]
        direction: Direction,
    },

    /// Assemble the retrieval context for a query.
    Context {
        query: String,
        #[arg(long, default_value = "a2c")]
        direction: Direction,
    },

    /// Print every entry and sentence in compact form.
    Dump {
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List models usable with the configured API key.
    Models,

    /// Retrieve context for a query and ask the model to analyse it.
    Ask {
        query: String,
        #[arg(long, default_value = "a2c")]
        direction: Direction,
        /// Model name; defaults to `[generative].model`.
        #[arg(long)]
        model: Option<String>,
    },

    /// Renumber ids to 1..N in creation order.
    Reorder {
        #[arg(value_enum, default_value = "all")]
        target: ReorderTarget,
    },

    /// Upload the database file to the configured GitHub repository.
    Backup,

    /// Start the HTTP API server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum VocabAction {
    /// Add one entry.
    Add {
        amis: String,
        #[arg(long)]
        chinese: Option<String>,
        #[arg(long)]
        english: Option<String>,
        /// Part-of-speech tag; must already exist.
        #[arg(long = "pos")]
        part_of_speech: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// List entries, newest first.
    List {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Delete an entry by id.
    Delete { id: i64 },
    /// Save an edited table from a JSONL file (as written by `export`).
    Save { file: PathBuf },
}

#[derive(Subcommand)]
enum SentenceAction {
    /// Add one pair. Unknown Amis words become vocabulary stubs.
    Add {
        amis: String,
        chinese: String,
        #[arg(long)]
        english: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    List {
        #[arg(long)]
        limit: Option<i64>,
    },
    Delete { id: i64 },
    Save { file: PathBuf },
}

#[derive(Subcommand)]
enum TagAction {
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 0)]
        sort_order: i64,
    },
    List,
    /// Change a tag's description and sort order.
    Describe {
        name: String,
        description: String,
        #[arg(long)]
        sort_order: Option<i64>,
    },
    /// Rename a tag and every vocabulary entry that uses it.
    Rename { old: String, new: String },
    Delete { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReorderTarget {
    Vocabulary,
    Sentences,
    All,
}

impl ReorderTarget {
    fn tables(self) -> Vec<Table> {
        match self {
            ReorderTarget::Vocabulary => vec![Table::Vocabulary],
            ReorderTarget::Sentences => vec![Table::Sentences],
            ReorderTarget::All => vec![Table::Vocabulary, Table::Sentences],
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let cfg = config::load_config(&cli.config)?;
    tracing::debug!(config = %cli.config.display(), db = %cfg.db.path.display(), "config loaded");

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Vocab { action } => match action {
            VocabAction::Add {
                amis,
                chinese,
                english,
                part_of_speech,
                note,
            } => {
                let entry = NewVocabulary {
                    amis,
                    chinese,
                    english,
                    part_of_speech,
                    note,
                };
                commands::run_vocab_add(&cfg, entry).await?;
            }
            VocabAction::List { limit } => commands::run_vocab_list(&cfg, limit).await?,
            VocabAction::Delete { id } => commands::run_vocab_delete(&cfg, id).await?,
            VocabAction::Save { file } => commands::run_vocab_save(&cfg, &file).await?,
        },
        Commands::Sentence { action } => match action {
            SentenceAction::Add {
                amis,
                chinese,
                english,
                note,
            } => {
                let sentence = NewSentence {
                    amis,
                    chinese,
                    english,
                    note,
                };
                commands::run_sentence_add(&cfg, sentence).await?;
            }
            SentenceAction::List { limit } => commands::run_sentence_list(&cfg, limit).await?,
            SentenceAction::Delete { id } => commands::run_sentence_delete(&cfg, id).await?,
            SentenceAction::Save { file } => commands::run_sentence_save(&cfg, &file).await?,
        },
        Commands::Tag { action } => match action {
            TagAction::Add {
                name,
                description,
                sort_order,
            } => commands::run_tag_add(&cfg, &name, &description, sort_order).await?,
            TagAction::List => commands::run_tag_list(&cfg).await?,
            TagAction::Describe {
                name,
                description,
                sort_order,
            } => commands::run_tag_describe(&cfg, &name, &description, sort_order).await?,
            TagAction::Rename { old, new } => commands::run_tag_rename(&cfg, &old, &new).await?,
            TagAction::Delete { name } => commands::run_tag_delete(&cfg, &name).await?,
        },
        Commands::Import {
            table,
            file,
            format,
        } => {
            commands::run_import(&cfg, table, &file, format).await?;
        }
        Commands::Export {
            table,
            format,
            output,
        } => {
            export::run_export(&cfg, table, format, output.as_deref()).await?;
        }
        Commands::Lookup { token, direction } => {
            commands::run_lookup(&cfg, &token, direction).await?;
        }
        Commands::Context { query, direction } => {
            commands::run_context(&cfg, &query, direction).await?;
        }
        Commands::Dump { output } => {
            commands::run_dump(&cfg, output.as_deref()).await?;
        }
        Commands::Models => {
            commands::run_models(&cfg).await?;
        }
        Commands::Ask {
            query,
            direction,
            model,
        } => {
            commands::run_ask(&cfg, &query, direction, model).await?;
        }
        Commands::Reorder { target } => {
            commands::run_reorder(&cfg, &target.tables()).await?;
        }
        Commands::Backup => {
            commands::run_backup(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
