//! GitHub REST v3 implementation of [`ForgeApi`].

use async_trait::async_trait;
use serde::Deserialize;
use sprint_protocol::PrStats;
use sprint_protocol::labels::is_status_label;

use crate::{
    ForgeApi, ForgeError, ForgeIssue, IssueFilter, MergeOptions, MergeOutcome, NewIssue,
    SprintMilestone, parse_sprint_title,
};

const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    state: String,
}

impl From<ApiIssue> for ForgeIssue {
    fn from(issue: ApiIssue) -> Self {
        Self {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            state: issue.state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiMilestone {
    number: u64,
    title: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    number: u64,
    #[serde(default)]
    additions: Option<u64>,
    #[serde(default)]
    deletions: Option<u64>,
    #[serde(default)]
    changed_files: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiMergeResponse {
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    message: Option<String>,
}

/// GitHub-backed forge adapter for one repository.
pub struct GithubForge {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    token: String,
}

impl GithubForge {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_api_base(DEFAULT_API_BASE, owner, repo, token)
    }

    /// Override the API base URL (tests point this at a mock server).
    pub fn with_api_base(
        api_base: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "sprint-runner")
    }

    /// Send and decode, mapping non-2xx statuses to [`ForgeError::Api`].
    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ForgeError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ForgeError::Api {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_expect_success(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<(), ForgeError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ForgeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// The open pull request whose head is `branch`, if any.
    async fn open_pull_for_branch(&self, branch: &str) -> Result<Option<ApiPull>, ForgeError> {
        let url = self.repo_url("pulls");
        let pulls: Vec<ApiPull> = self
            .send_json(
                self.request(reqwest::Method::GET, &url)
                    .query(&[("head", format!("{}:{branch}", self.owner)), ("state", "open".into())]),
            )
            .await?;
        Ok(pulls.into_iter().next())
    }
}

#[async_trait]
impl ForgeApi for GithubForge {
    async fn get_issue(&self, number: u64) -> Result<ForgeIssue, ForgeError> {
        let url = self.repo_url(&format!("issues/{number}"));
        let issue: ApiIssue = self.send_json(self.request(reqwest::Method::GET, &url)).await?;
        Ok(issue.into())
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<ForgeIssue>, ForgeError> {
        let url = self.repo_url("issues");
        let mut query: Vec<(String, String)> = vec![("per_page".into(), "100".into())];
        if let Some(milestone) = filter.milestone {
            query.push(("milestone".into(), milestone.to_string()));
        }
        if let Some(state) = &filter.state {
            query.push(("state".into(), state.clone()));
        }
        if !filter.labels.is_empty() {
            query.push(("labels".into(), filter.labels.join(",")));
        }

        let issues: Vec<ApiIssue> = self
            .send_json(self.request(reqwest::Method::GET, &url).query(&query))
            .await?;
        Ok(issues.into_iter().map(Into::into).collect())
    }

    async fn add_comment(&self, number: u64, body: &str) -> Result<(), ForgeError> {
        let url = self.repo_url(&format!("issues/{number}/comments"));
        self.send_expect_success(
            self.request(reqwest::Method::POST, &url)
                .json(&serde_json::json!({ "body": body })),
        )
        .await
    }

    async fn set_label(&self, number: u64, label: &str) -> Result<(), ForgeError> {
        // Status labels are exclusive: drop any other status:* first.
        let issue = self.get_issue(number).await?;
        for existing in issue.labels.iter().filter(|l| is_status_label(l)) {
            if existing == label {
                continue;
            }
            let url = self.repo_url(&format!("issues/{number}/labels/{existing}"));
            self.send_expect_success(self.request(reqwest::Method::DELETE, &url))
                .await?;
        }

        if issue.labels.iter().any(|l| l == label) {
            return Ok(());
        }
        let url = self.repo_url(&format!("issues/{number}/labels"));
        self.send_expect_success(
            self.request(reqwest::Method::POST, &url)
                .json(&serde_json::json!({ "labels": [label] })),
        )
        .await
    }

    async fn create_issue(&self, new: &NewIssue) -> Result<ForgeIssue, ForgeError> {
        let url = self.repo_url("issues");
        let issue: ApiIssue = self
            .send_json(self.request(reqwest::Method::POST, &url).json(new))
            .await?;
        Ok(issue.into())
    }

    async fn list_sprint_milestones(
        &self,
        prefix: &str,
    ) -> Result<Vec<SprintMilestone>, ForgeError> {
        let url = self.repo_url("milestones");
        let milestones: Vec<ApiMilestone> = self
            .send_json(
                self.request(reqwest::Method::GET, &url)
                    .query(&[("state", "all"), ("per_page", "100")]),
            )
            .await?;

        Ok(milestones
            .into_iter()
            .filter_map(|m| {
                parse_sprint_title(prefix, &m.title).map(|sprint_number| SprintMilestone {
                    sprint_number,
                    title: m.title,
                    state: m.state,
                    milestone_number: m.number,
                })
            })
            .collect())
    }

    async fn pr_stats(&self, branch: &str) -> Result<Option<PrStats>, ForgeError> {
        let url = self.repo_url("pulls");
        let pulls: Vec<ApiPull> = self
            .send_json(
                self.request(reqwest::Method::GET, &url)
                    .query(&[("head", format!("{}:{branch}", self.owner)), ("state", "all".into())]),
            )
            .await?;
        let Some(pull) = pulls.into_iter().next() else {
            return Ok(None);
        };

        // The list endpoint omits diff stats; fetch the single PR.
        let url = self.repo_url(&format!("pulls/{}", pull.number));
        let full: ApiPull = self.send_json(self.request(reqwest::Method::GET, &url)).await?;
        Ok(Some(PrStats {
            pr_number: full.number,
            additions: full.additions.unwrap_or(0),
            deletions: full.deletions.unwrap_or(0),
            changed_files: full.changed_files.unwrap_or(0),
        }))
    }

    async fn merge_issue_pr(
        &self,
        branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, ForgeError> {
        let Some(pull) = self.open_pull_for_branch(branch).await? else {
            return Ok(MergeOutcome {
                success: false,
                pr_number: None,
                reason: Some(format!("no open pull request for branch {branch}")),
            });
        };

        let url = self.repo_url(&format!("pulls/{}/merge", pull.number));
        let method = if options.squash { "squash" } else { "merge" };
        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&serde_json::json!({ "merge_method": method }))
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        // 405/409 are merge refusals (dirty, conflicts), not transport errors.
        if !status.is_success() {
            let message = serde_json::from_str::<ApiMergeResponse>(&text)
                .ok()
                .and_then(|m| m.message)
                .unwrap_or(text);
            return Ok(MergeOutcome {
                success: false,
                pr_number: Some(pull.number),
                reason: Some(format!("{status}: {message}")),
            });
        }

        let merged: ApiMergeResponse = serde_json::from_str(&text)?;
        if !merged.merged {
            return Ok(MergeOutcome {
                success: false,
                pr_number: Some(pull.number),
                reason: merged.message,
            });
        }

        if options.delete_branch {
            let url = self.repo_url(&format!("git/refs/heads/{branch}"));
            if let Err(err) = self
                .send_expect_success(self.request(reqwest::Method::DELETE, &url))
                .await
            {
                tracing::warn!("merged but failed to delete branch {branch}: {err}");
            }
        }

        Ok(MergeOutcome {
            success: true,
            pr_number: Some(pull.number),
            reason: None,
        })
    }
}
