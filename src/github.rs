use async_trait::async_trait;
use hyper::{
    body::{Bytes, HttpBody},
    client::HttpConnector,
    header::{self, HeaderValue},
    Body, Client, Request, Response, StatusCode, Uri,
};
use hyper_tls::HttpsConnector;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info};

use crate::{
    api::{ChunkStream, Commit, RepoApi, TreeListing},
    credentials::Credential,
    error::{ApiError, ApiResult},
    location::Location,
};

const API_URL: &str = "https://api.github.com";
const RAW_URL: &str = "https://raw.githubusercontent.com";
const TRUSTED_HOSTS: &[&str] = &["api.github.com", "raw.githubusercontent.com"];
const USER_AGENT: &str = concat!("git-subdir/", env!("CARGO_PKG_VERSION"));
const ACCEPT_JSON: &str = "application/vnd.github+json";
const MAX_REDIRECTS: usize = 5;

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    tree: ObjectRef,
}

#[derive(Deserialize)]
struct ObjectRef {
    sha: String,
}

/// [`RepoApi`] backed by the GitHub REST api and raw content host.
pub struct GithubApi {
    client: Client<HttpsConnector<HttpConnector>>,
    credential: Option<Credential>,
}

impl GithubApi {
    pub fn new(credential: Option<Credential>) -> Self {
        match &credential {
            Some(credential) => {
                info!("Using authenticated GitHub access ({})", credential.source)
            }
            None => info!("No GitHub token found, using anonymous access (lower rate limits)"),
        }

        Self {
            client: Client::builder().build::<_, Body>(HttpsConnector::new()),
            credential,
        }
    }

    fn build_request(&self, uri: &Uri, accept: &'static str) -> ApiResult<Request<Body>> {
        let mut builder = Request::get(uri.clone())
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, accept);
        if let Some(credential) = &self.credential {
            // the token only ever goes to GitHub itself, never to a redirect target
            if uri.host().map_or(false, |host| TRUSTED_HOSTS.contains(&host)) {
                builder = builder.header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", credential.token()),
                );
            }
        }

        builder.body(Body::empty()).map_err(|source| ApiError::Request {
            url: uri.to_string(),
            source,
        })
    }

    async fn get(&self, url: &str, accept: &'static str) -> ApiResult<Response<Body>> {
        let mut current = url.to_string();

        for _ in 0..=MAX_REDIRECTS {
            let uri: Uri = current.parse().map_err(|_| ApiError::InvalidUrl {
                url: current.clone(),
            })?;

            let request = self.build_request(&uri, accept)?;

            debug!("GET {current}");
            let response = self
                .client
                .request(request)
                .await
                .map_err(|source| ApiError::Transport {
                    url: current.clone(),
                    source,
                })?;

            if response.status().is_redirection() {
                let next = redirect_target(&uri, &response).ok_or_else(|| ApiError::Status {
                    url: current.clone(),
                    status: response.status(),
                })?;
                debug!("{current} redirected to {next}");
                current = next;
                continue;
            }

            return check_status(&current, response);
        }

        Err(ApiError::TooManyRedirects {
            url: url.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = self.get(url, ACCEPT_JSON).await?;
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;

        serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl RepoApi for GithubApi {
    async fn resolve_ref(&self, location: &Location) -> ApiResult<Commit> {
        let url = format!(
            "{API_URL}/repos/{}/commits/{}",
            location.slug(),
            urlencoding::encode(&location.reference)
        );
        let response: CommitResponse = self.get_json(&url).await?;

        Ok(Commit {
            sha: response.sha,
            tree_sha: response.commit.tree.sha,
        })
    }

    async fn list_tree(
        &self,
        location: &Location,
        tree_sha: &str,
        recursive: bool,
    ) -> ApiResult<TreeListing> {
        let mut url = format!("{API_URL}/repos/{}/git/trees/{tree_sha}", location.slug());
        if recursive {
            url.push_str("?recursive=1");
        }

        self.get_json(&url).await
    }

    fn content_url(&self, location: &Location, revision: &str, path: &str) -> String {
        let encoded: Vec<_> = path.split('/').map(urlencoding::encode).collect();
        format!(
            "{RAW_URL}/{}/{revision}/{}",
            location.slug(),
            encoded.join("/")
        )
    }

    async fn open_content(&self, url: &str) -> ApiResult<Box<dyn ChunkStream>> {
        let response = self.get(url, "*/*").await?;

        Ok(Box::new(BodyChunks {
            url: url.to_string(),
            body: response.into_body(),
        }))
    }
}

struct BodyChunks {
    url: String,
    body: Body,
}

#[async_trait]
impl ChunkStream for BodyChunks {
    async fn next_chunk(&mut self) -> ApiResult<Option<Bytes>> {
        self.body
            .data()
            .await
            .transpose()
            .map_err(|source| ApiError::Transport {
                url: self.url.clone(),
                source,
            })
    }
}

fn redirect_target(current: &Uri, response: &Response<Body>) -> Option<String> {
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    if location.starts_with('/') {
        let scheme = current.scheme_str()?;
        let authority = current.authority()?;
        Some(format!("{scheme}://{authority}{location}"))
    } else {
        Some(location.to_string())
    }
}

fn check_status(url: &str, response: Response<Body>) -> ApiResult<Response<Body>> {
    let url = url.to_string();
    match response.status() {
        status if status.is_success() => Ok(response),
        // 422 is what the commits endpoint answers for an unknown ref
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(ApiError::NotFound { url })
        }
        StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized { url }),
        StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimited { url }),
        StatusCode::FORBIDDEN if rate_limit_exhausted(&response) => {
            Err(ApiError::RateLimited { url })
        }
        status => Err(ApiError::Status { url, status }),
    }
}

fn rate_limit_exhausted(response: &Response<Body>) -> bool {
    response.headers().get("x-ratelimit-remaining") == Some(&HeaderValue::from_static("0"))
}
