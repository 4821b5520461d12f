//! # Amis Corpus
//!
//! A bilingual Amis/Chinese corpus console with retrieval-augmented
//! prompting for generative models.
//!
//! The corpus is a vocabulary table (Amis headword, Chinese and English
//! glosses, part of speech) and a table of aligned sentence pairs, kept
//! in SQLite. For a query sentence the console retrieves relevant words
//! and example sentences, folds them into a bounded context block and
//! hands that, with the query, to a hosted model for analysis.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ CLI / HTTP   │──▶│ Lookup +     │──▶│  Generative  │
//! │ edits, query │   │ Context      │   │  model       │
//! └──────┬───────┘   └──────┬───────┘   └──────────────┘
//!        │                  │
//!        ▼                  ▼
//!   ┌─────────────────────────┐        ┌──────────────┐
//!   │ SQLite: vocabulary,     │──────▶ │ GitHub       │
//!   │ sentence_pairs, pos_tags│ backup │ contents API │
//!   └─────────────────────────┘        └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`text`] | Tokenization and normalization |
//! | [`relevance`] | Substring relevance filter |
//! | [`store`] | Retrieval storage trait and SQLite backend |
//! | [`lookup`] | Per-token lexicon lookup |
//! | [`context`] | Targeted and full-corpus context assembly |
//! | [`autosync`] | Vocabulary stubs from new sentences |
//! | [`renumber`] | Dense id renumbering |
//! | [`corpus`] | Vocabulary and sentence editing, grid saves |
//! | [`tags`] | Part-of-speech tag management |
//! | [`import`] / [`export`] | Bulk CSV / JSONL |
//! | [`generate`] | Generative model client |
//! | [`backup`] | GitHub backup |
//! | [`session`] | Per-user session state |
//! | [`server`] | HTTP API |
//! | [`stats`] | Corpus statistics |
//! | [`commands`] | CLI command implementations |

pub mod autosync;
pub mod backup;
pub mod commands;
pub mod config;
pub mod context;
pub mod corpus;
pub mod db;
pub mod export;
pub mod generate;
pub mod import;
pub mod lookup;
pub mod migrate;
pub mod models;
pub mod relevance;
pub mod renumber;
pub mod server;
pub mod session;
pub mod stats;
pub mod store;
pub mod tags;
pub mod text;
