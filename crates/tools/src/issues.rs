//! Issue-tracker intake for the coding pipeline.

use std::time::Duration;

use serde_json::Value;

use ens_domain::error::{Error, Result};

/// A resolved issue, ready to become a pipeline task.
#[derive(Debug, Clone)]
pub struct IssueSummary {
    pub title: String,
    pub description: String,
}

/// Resolve issue references into task text. Failures resolve to `None`
/// so the caller can fall back to free-form task text.
#[async_trait::async_trait]
pub trait IssueResolver: Send + Sync {
    /// `owner/repo#123` style reference.
    async fn github(&self, reference: &str) -> Option<IssueSummary>;
    /// Jira issue key, e.g. `PROJ-42`.
    async fn jira(&self, reference: &str) -> Option<IssueSummary>;
}

/// Parse `owner/repo#123` into its parts.
pub fn parse_github_ref(reference: &str) -> Option<(&str, &str, u64)> {
    let (repo_part, number) = reference.split_once('#')?;
    let (owner, repo) = repo_part.split_once('/')?;
    let number = number.parse().ok()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo, number))
}

/// REST-backed resolver. Jira resolution requires `base_url` plus
/// credentials; GitHub works anonymously for public repos.
pub struct HttpIssueResolver {
    client: reqwest::Client,
    github_token: Option<String>,
    jira_base_url: Option<String>,
    jira_auth: Option<(String, String)>,
}

impl HttpIssueResolver {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("ensemble/0.1")
            .build()
            .map_err(|e| Error::Internal(format!("building issue client: {e}")))?;
        Ok(Self {
            client,
            github_token: std::env::var("ENSEMBLE_GITHUB_TOKEN").ok(),
            jira_base_url: std::env::var("ENSEMBLE_JIRA_BASE_URL").ok(),
            jira_auth: match (
                std::env::var("ENSEMBLE_JIRA_USER").ok(),
                std::env::var("ENSEMBLE_JIRA_TOKEN").ok(),
            ) {
                (Some(user), Some(token)) => Some((user, token)),
                _ => None,
            },
        })
    }
}

#[async_trait::async_trait]
impl IssueResolver for HttpIssueResolver {
    async fn github(&self, reference: &str) -> Option<IssueSummary> {
        let (owner, repo, number) = parse_github_ref(reference)?;
        let url = format!("https://api.github.com/repos/{owner}/{repo}/issues/{number}");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.github_token {
            request = request.bearer_auth(token);
        }

        let body: Value = match request.send().await {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok()?,
            Ok(resp) => {
                tracing::warn!(reference, status = %resp.status(), "github issue lookup failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(reference, error = %e, "github issue lookup failed");
                return None;
            }
        };

        Some(IssueSummary {
            title: body.get("title")?.as_str()?.to_owned(),
            description: body
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }

    async fn jira(&self, reference: &str) -> Option<IssueSummary> {
        let base = self.jira_base_url.as_ref()?;
        let (user, token) = self.jira_auth.as_ref()?;
        let url = format!("{}/rest/api/2/issue/{reference}", base.trim_end_matches('/'));

        let body: Value = match self
            .client
            .get(&url)
            .basic_auth(user, Some(token))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok()?,
            Ok(resp) => {
                tracing::warn!(reference, status = %resp.status(), "jira issue lookup failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(reference, error = %e, "jira issue lookup failed");
                return None;
            }
        };

        let fields = body.get("fields")?;
        Some(IssueSummary {
            title: fields.get("summary")?.as_str()?.to_owned(),
            description: fields
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_refs_parse() {
        assert_eq!(
            parse_github_ref("acme/widgets#17"),
            Some(("acme", "widgets", 17))
        );
        assert_eq!(parse_github_ref("no-hash"), None);
        assert_eq!(parse_github_ref("missing#notnum"), None);
        assert_eq!(parse_github_ref("/repo#1"), None);
    }
}
