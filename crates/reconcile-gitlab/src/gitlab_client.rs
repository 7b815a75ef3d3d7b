use reconcile_core::tags::TagSet;
use reconcile_core::{
    ClientError, ClientTarget, CoordinationClient, ExecutorDefinition, RegisteredExecutor,
};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const PAGE_SIZE: u32 = 100;
const ACCESS_TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// Client for the GitLab runner REST API (`/api/v4/runners`).
pub struct GitLabClient {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: u64,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListedRunner {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RunnerDetails {
    id: u64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    tag_list: Vec<String>,
}

impl RunnerDetails {
    fn into_registered(self, target_url: &str) -> RegisteredExecutor {
        RegisteredExecutor {
            id: self.id,
            token: self.token.filter(|t| !t.is_empty()),
            target_url: target_url.to_string(),
            description: self.description.unwrap_or_default(),
            kind: None,
            tags: self.tag_list.into_iter().collect(),
        }
    }
}

impl GitLabClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self { http })
    }

    async fn runner_details(
        &self,
        target: &ClientTarget,
        access_token: &str,
        id: u64,
    ) -> Result<RunnerDetails, ClientError> {
        let response = self
            .http
            .get(endpoint(target, &format!("runners/{}", id)))
            .header(ACCESS_TOKEN_HEADER, access_token)
            .send()
            .await
            .map_err(transport_error)?;
        decode(expect_status(response, StatusCode::OK).await?).await
    }

    async fn list_ids(
        &self,
        target: &ClientTarget,
        access_token: &str,
        host: &str,
    ) -> Result<Vec<u64>, ClientError> {
        let mut ids = Vec::new();
        let mut page = 1u32;
        loop {
            let response = self
                .http
                .get(endpoint(target, "runners/all"))
                .header(ACCESS_TOKEN_HEADER, access_token)
                .query(&[
                    ("tag_list", host.to_string()),
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .map_err(transport_error)?;
            let response = expect_status(response, StatusCode::OK).await?;
            let next = next_page(&response);
            let listed: Vec<ListedRunner> = decode(response).await?;
            ids.extend(listed.into_iter().map(|r| r.id));

            match next {
                Some(n) if n > page => page = n,
                _ => break,
            }
        }
        Ok(ids)
    }
}

#[async_trait::async_trait]
impl CoordinationClient for GitLabClient {
    async fn register(
        &self,
        target: &ClientTarget,
        definition: &ExecutorDefinition,
    ) -> Result<RegisteredExecutor, ClientError> {
        if target.registration_token.is_empty() {
            return Err(ClientError::MissingCredential(format!(
                "no registration token for {}",
                target.url
            )));
        }
        let tag_list = join_tags(&definition.tags);
        debug!("POST runners for {} with tags {}", definition.description, tag_list);

        let response = self
            .http
            .post(endpoint(target, "runners"))
            .form(&[
                ("token", target.registration_token.as_str()),
                ("description", definition.description.as_str()),
                ("tag_list", tag_list.as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let created: RegisterResponse =
            decode(expect_status(response, StatusCode::CREATED).await?).await?;

        Ok(RegisteredExecutor {
            id: created.id,
            token: Some(created.token),
            target_url: target.url.clone(),
            description: definition.description.clone(),
            kind: Some(definition.kind.clone()),
            tags: definition.tags.clone(),
        })
    }

    async fn delete(
        &self,
        target: &ClientTarget,
        runner: &RegisteredExecutor,
    ) -> Result<(), ClientError> {
        let (request, by_token) = match (target.access_token(), runner.token.as_deref()) {
            (Some(access_token), _) => (
                self.http
                    .delete(endpoint(target, &format!("runners/{}", runner.id)))
                    .header(ACCESS_TOKEN_HEADER, access_token),
                false,
            ),
            (None, Some(token)) if !token.is_empty() => (
                self.http
                    .delete(endpoint(target, "runners"))
                    .form(&[("token", token)]),
                true,
            ),
            _ => {
                return Err(ClientError::MissingCredential(format!(
                    "runner {} on {} has no token and no access token is configured",
                    runner.id, target.url
                )))
            }
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if delete_succeeded(status, by_token) {
            if status != StatusCode::NO_CONTENT {
                debug!("Runner {} on {} already gone ({})", runner.id, target.url, status);
            }
            return Ok(());
        }
        Err(status_error(response).await)
    }

    async fn verify(&self, target: &ClientTarget, token: &str) -> Result<bool, ClientError> {
        let response = self
            .http
            .post(endpoint(target, "runners/verify"))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::FORBIDDEN => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    async fn fetch_attributed(
        &self,
        target: &ClientTarget,
        host: &str,
    ) -> Result<Vec<RegisteredExecutor>, ClientError> {
        let access_token = target.access_token().ok_or_else(|| {
            ClientError::MissingCredential(format!("no personal access token for {}", target.url))
        })?;

        let ids = self.list_ids(target, access_token, host).await?;
        let mut runners = Vec::with_capacity(ids.len());
        for id in ids {
            let details = self.runner_details(target, access_token, id).await?;
            runners.push(details.into_registered(&target.url));
        }
        debug!("{} runner(s) tagged {} on {}", runners.len(), host, target.url);
        Ok(runners)
    }
}

fn endpoint(target: &ClientTarget, path: &str) -> String {
    format!("{}{}", target.api_base(), path)
}

fn join_tags(tags: &TagSet) -> String {
    tags.iter().cloned().collect::<Vec<_>>().join(",")
}

/// 204 is a delete; 404 means already gone. A token-authenticated delete
/// of a runner that no longer exists is answered with 403.
fn delete_succeeded(status: StatusCode, by_token: bool) -> bool {
    status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_FOUND
        || (by_token && status == StatusCode::FORBIDDEN)
}

fn next_page(response: &Response) -> Option<u32> {
    response
        .headers()
        .get("x-next-page")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// A request that failed to connect never reached the service.
fn transport_error(err: reqwest::Error) -> ClientError {
    ClientError::Transport {
        message: err.to_string(),
        ambiguous: !(err.is_connect() || err.is_builder()),
    }
}

async fn status_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::Status { status, body }
}

async fn expect_status(response: Response, expected: StatusCode) -> Result<Response, ClientError> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}
