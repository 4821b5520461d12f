//! Database backup to a GitHub repository.
//!
//! Uploads the SQLite file through the GitHub contents API: look up the
//! current blob sha of the target path (404 means the file does not
//! exist yet), then `PUT` the base64 content with that sha. After a
//! mutating command, [`backup_if_enabled`] runs the same upload but only
//! logs failures; the mutation itself has already been committed.

use base64::Engine;
use reqwest::StatusCode;
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;

use crate::config::{BackupConfig, Config};
use crate::models::now_timestamp;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("GitHub token not set (expected in ${0})")]
    MissingToken(String),
    #[error("backup.owner and backup.repo must be set")]
    NotConfigured,
    #[error("GitHub API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("cannot read database file: {0}")]
    Io(#[from] std::io::Error),
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cannot checkpoint database: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupOutcome {
    Created,
    Updated,
}

pub struct GitHubBackup {
    client: reqwest::Client,
    contents_url: String,
    branch: String,
    token: String,
}

impl GitHubBackup {
    /// Build from config, reading the token from `backup.token_env`.
    pub fn from_config(config: &BackupConfig) -> Result<Self, BackupError> {
        let (Some(owner), Some(repo)) = (config.owner.as_deref(), config.repo.as_deref()) else {
            return Err(BackupError::NotConfigured);
        };
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BackupError::MissingToken(config.token_env.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("amis-corpus/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            contents_url: contents_url(&config.api_url, owner, repo, &config.path),
            branch: config.branch.clone(),
            token,
        })
    }

    async fn current_sha(&self) -> Result<Option<String>, BackupError> {
        let response = self
            .client
            .get(&self.contents_url)
            .query(&[("ref", self.branch.as_str())])
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let json: serde_json::Value = response.json().await?;
                Ok(json.get("sha").and_then(|s| s.as_str()).map(str::to_string))
            }
            status => Err(api_error(status, response.text().await.unwrap_or_default())),
        }
    }

    /// Create or replace the file with `content`.
    pub async fn upload(&self, content: &[u8]) -> Result<BackupOutcome, BackupError> {
        let sha = self.current_sha().await?;
        let message = match sha {
            Some(_) => format!("Corpus update: {}", now_timestamp()),
            None => format!("Initial corpus database: {}", now_timestamp()),
        };
        let body = upload_body(content, &message, &self.branch, sha.as_deref());

        let response = self
            .client
            .put(&self.contents_url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, response.text().await.unwrap_or_default()));
        }
        Ok(if sha.is_some() {
            BackupOutcome::Updated
        } else {
            BackupOutcome::Created
        })
    }
}

fn contents_url(api_url: &str, owner: &str, repo: &str, path: &str) -> String {
    format!(
        "{}/repos/{}/{}/contents/{}",
        api_url.trim_end_matches('/'),
        owner,
        repo,
        path.trim_start_matches('/')
    )
}

fn upload_body(content: &[u8], message: &str, branch: &str, sha: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "message": message,
        "content": base64::engine::general_purpose::STANDARD.encode(content),
        "branch": branch,
    });
    if let Some(sha) = sha {
        body["sha"] = serde_json::Value::String(sha.to_string());
    }
    body
}

fn api_error(status: StatusCode, body: String) -> BackupError {
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|j| j.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    BackupError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Flush the WAL into the main file and upload it.
pub async fn backup_database(pool: &SqlitePool, config: &Config) -> Result<BackupOutcome, BackupError> {
    let uploader = GitHubBackup::from_config(&config.backup)?;
    sqlx::query("PRAGMA wal_checkpoint(FULL)").execute(pool).await?;
    let content = tokio::fs::read(&config.db.path).await?;
    let outcome = uploader.upload(&content).await?;
    tracing::info!(?outcome, bytes = content.len(), path = %config.backup.path, "database backed up");
    Ok(outcome)
}

/// Back up after a mutation when `backup.enabled`. Failures are logged,
/// not returned.
pub async fn backup_if_enabled(pool: &SqlitePool, config: &Config) -> Option<BackupOutcome> {
    if !config.backup.enabled {
        return None;
    }
    match backup_database(pool, config).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::warn!(error = %e, "backup after change failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contents_url_joins_cleanly() {
        assert_eq!(
            contents_url("https://api.github.com/", "me", "corpus", "/amis_data.db"),
            "https://api.github.com/repos/me/corpus/contents/amis_data.db"
        );
    }

    #[test]
    fn body_carries_sha_only_for_updates() {
        let create = upload_body(b"abc", "init", "main", None);
        assert_eq!(create["content"], "YWJj");
        assert_eq!(create["branch"], "main");
        assert!(create.get("sha").is_none());

        let update = upload_body(b"abc", "update", "main", Some("deadbeef"));
        assert_eq!(update["sha"], "deadbeef");
    }

    #[test]
    fn missing_repo_is_not_configured() {
        let config = BackupConfig::default();
        assert!(matches!(
            GitHubBackup::from_config(&config),
            Err(BackupError::NotConfigured)
        ));
    }

    #[test]
    fn missing_token_names_the_variable() {
        let config = BackupConfig {
            owner: Some("me".into()),
            repo: Some("corpus".into()),
            token_env: "AMIS_CORPUS_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
            ..BackupConfig::default()
        };
        match GitHubBackup::from_config(&config) {
            Err(BackupError::MissingToken(var)) => {
                assert_eq!(var, "AMIS_CORPUS_TEST_TOKEN_THAT_IS_NEVER_SET")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn api_error_prefers_json_message() {
        match api_error(StatusCode::UNAUTHORIZED, r#"{"message":"Bad credentials"}"#.into()) {
            BackupError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn disabled_backup_is_skipped() {
        let (_tmp, store) = crate::store::testing::temp_store().await;
        let config = Config::with_db_path("unused.sqlite");
        assert!(backup_if_enabled(store.pool(), &config).await.is_none());
    }
}
