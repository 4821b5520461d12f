use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generative: GenerativeConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_busy_timeout() -> u64 {
    30
}

/// Thresholds and caps for lexicon lookup and context assembly.
///
/// The defaults reproduce the behaviour the corpus console has shipped
/// with; all of them are tuning knobs rather than fixed rules.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// A keyword found in the middle of a headword only counts when it
    /// is longer than this many characters.
    #[serde(default = "default_min_substring_len")]
    pub min_substring_len: usize,
    #[serde(default = "default_vocab_candidate_limit")]
    pub vocab_candidate_limit: i64,
    #[serde(default = "default_vocab_match_limit")]
    pub vocab_match_limit: usize,
    #[serde(default = "default_sentence_candidate_limit")]
    pub sentence_candidate_limit: i64,
    #[serde(default = "default_semantic_definition_limit")]
    pub semantic_definition_limit: usize,
    #[serde(default = "default_semantic_candidate_limit")]
    pub semantic_candidate_limit: i64,
    #[serde(default = "default_sentence_match_limit")]
    pub sentence_match_limit: usize,
    #[serde(default = "default_max_context_lines")]
    pub max_context_lines: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_substring_len: default_min_substring_len(),
            vocab_candidate_limit: default_vocab_candidate_limit(),
            vocab_match_limit: default_vocab_match_limit(),
            sentence_candidate_limit: default_sentence_candidate_limit(),
            semantic_definition_limit: default_semantic_definition_limit(),
            semantic_candidate_limit: default_semantic_candidate_limit(),
            sentence_match_limit: default_sentence_match_limit(),
            max_context_lines: default_max_context_lines(),
        }
    }
}

fn default_min_substring_len() -> usize {
    2
}
fn default_vocab_candidate_limit() -> i64 {
    100
}
fn default_vocab_match_limit() -> usize {
    50
}
fn default_sentence_candidate_limit() -> i64 {
    30
}
fn default_semantic_definition_limit() -> usize {
    3
}
fn default_semantic_candidate_limit() -> i64 {
    20
}
fn default_sentence_match_limit() -> usize {
    20
}
fn default_max_context_lines() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerativeConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_generative_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
}

impl Default for GenerativeConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_generative_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            rate_limit_backoff_secs: default_backoff_secs(),
            rate_limit_retries: default_rate_limit_retries(),
        }
    }
}

impl GenerativeConfig {
    /// API key from the configured environment variable, if set and non-empty.
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

fn default_model() -> String {
    "models/gemini-1.5-flash-latest".to_string()
}
fn default_generative_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_backoff_secs() -> u64 {
    10
}
fn default_rate_limit_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Upload the database after every mutating command.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_backup_path")]
    pub path: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_github_api")]
    pub api_url: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            owner: None,
            repo: None,
            path: default_backup_path(),
            branch: default_branch(),
            token_env: default_token_env(),
            api_url: default_github_api(),
        }
    }
}

fn default_backup_path() -> String {
    "amis_data.db".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Sessions untouched for this long are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Creating a session beyond this evicts the least recently used one.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}
fn default_session_idle_secs() -> u64 {
    3600
}
fn default_max_sessions() -> usize {
    1000
}

impl Config {
    /// A config pointing at `db_path` with every other section defaulted.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                busy_timeout_secs: default_busy_timeout(),
            },
            retrieval: RetrievalConfig::default(),
            generative: GenerativeConfig::default(),
            backup: BackupConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.vocab_candidate_limit < 1
        || r.sentence_candidate_limit < 1
        || r.semantic_candidate_limit < 1
    {
        anyhow::bail!("retrieval candidate limits must be >= 1");
    }
    if r.vocab_match_limit == 0 || r.sentence_match_limit == 0 {
        anyhow::bail!("retrieval match limits must be >= 1");
    }
    if r.max_context_lines < 2 {
        anyhow::bail!("retrieval.max_context_lines must be >= 2");
    }

    let g = &config.generative;
    if !(1..=120).contains(&g.rate_limit_backoff_secs) {
        anyhow::bail!("generative.rate_limit_backoff_secs must be in [1, 120]");
    }
    if g.model.trim().is_empty() {
        anyhow::bail!("generative.model must not be empty");
    }

    let b = &config.backup;
    if b.enabled && (b.owner.is_none() || b.repo.is_none()) {
        anyhow::bail!("backup.owner and backup.repo are required when backup.enabled = true");
    }

    let s = &config.server;
    if s.session_idle_secs < 1 || s.max_sessions < 1 {
        anyhow::bail!("server.session_idle_secs and server.max_sessions must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: Config = toml::from_str("[db]\npath = \"./data/amis.sqlite\"\n").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.db.busy_timeout_secs, 30);
        assert_eq!(config.retrieval.min_substring_len, 2);
        assert_eq!(config.retrieval.max_context_lines, 80);
        assert_eq!(config.generative.rate_limit_retries, 1);
        assert!(!config.backup.enabled);
        assert_eq!(config.server.bind, "127.0.0.1:7340");
        assert_eq!(config.server.session_idle_secs, 3600);
        assert_eq!(config.server.max_sessions, 1000);
    }

    #[test]
    fn substring_threshold_is_tunable() {
        let config: Config = toml::from_str(
            "[db]\npath = \"x.sqlite\"\n[retrieval]\nmin_substring_len = 3\n",
        )
        .unwrap();
        assert_eq!(config.retrieval.min_substring_len, 3);
        assert_eq!(config.retrieval.vocab_match_limit, 50);
    }

    #[test]
    fn rejects_tiny_context_cap() {
        let config: Config = toml::from_str(
            "[db]\npath = \"x.sqlite\"\n[retrieval]\nmax_context_lines = 1\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn enabled_backup_requires_repo() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[backup]\nenabled = true\n").unwrap();
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("backup.owner"));
    }

    #[test]
    fn zero_session_cap_rejected() {
        let config: Config =
            toml::from_str("[db]\npath = \"x.sqlite\"\n[server]\nmax_sessions = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn backoff_out_of_range_rejected() {
        let config: Config = toml::from_str(
            "[db]\npath = \"x.sqlite\"\n[generative]\nrate_limit_backoff_secs = 0\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
