//! HuggingFace Hub HTTP client

use crate::error::{HubError, Result};
use crate::resolver::is_repo_id;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

pub const HUGGINGFACE_BASE: &str = "https://huggingface.co";

/// What the Hub API reports about a repository.
#[derive(Debug, Clone)]
pub struct RepoListing {
    pub files: Vec<String>,
    pub pipeline_tag: Option<String>,
}

/// Thin client over the Hub's model API.
///
/// Requests carry `Authorization: Bearer` when a token is set explicitly or
/// found in `HF_TOKEN` / `HUGGINGFACE_TOKEN`; gated and private repos need
/// one.
pub struct HubClient {
    client: Client,
    token: Option<String>,
}

impl HubClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("rinfer/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            token: None,
        }
    }

    pub fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        let token = token.into();
        if !token.is_empty() {
            self.token = Some(token);
        }
        self
    }

    /// List a repository's files and its pipeline tag.
    pub async fn repo_listing(&self, repo_id: &str) -> Result<RepoListing> {
        if !is_repo_id(repo_id) {
            return Err(HubError::InvalidModel(format!(
                "Invalid repo id: '{}'. Expected 'owner/repo'",
                repo_id
            )));
        }

        let url = format!("{}/api/models/{}", HUGGINGFACE_BASE, repo_id);
        log::debug!("Fetching repo metadata: {}", url);

        let response = self.authorized(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(HubError::NotFound(format!(
                "Repository '{}' does not exist or requires a token",
                repo_id
            )));
        }
        let response = response.error_for_status()?;

        #[derive(Deserialize)]
        struct HfModel {
            #[serde(default)]
            siblings: Vec<HfFile>,
            #[serde(default)]
            pipeline_tag: Option<String>,
        }

        #[derive(Deserialize)]
        struct HfFile {
            rfilename: String,
        }

        let model: HfModel = response.json().await?;
        let files: Vec<String> = model.siblings.into_iter().map(|f| f.rfilename).collect();
        log::info!("Found {} files in {}", files.len(), repo_id);

        Ok(RepoListing {
            files,
            pipeline_tag: model.pipeline_tag,
        })
    }

    /// Attach the bearer token: explicit token first, then the environment.
    pub(crate) fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .token
            .clone()
            .or_else(|| std::env::var("HF_TOKEN").ok())
            .or_else(|| std::env::var("HUGGINGFACE_TOKEN").ok())
            .filter(|t| !t.is_empty());

        match token {
            Some(token) => {
                log::debug!("Using HuggingFace token for authentication");
                request.header("Authorization", format!("Bearer {}", token))
            }
            None => request,
        }
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }
}

impl Default for HubClient {
    fn default() -> Self {
        Self::new()
    }
}
