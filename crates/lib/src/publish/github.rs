//! GitHub REST implementation of [`ReleaseHost`].

use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::{HostError, ReleaseHost, ReleaseRequest, RemoteAsset, RemoteRelease};
use crate::consts::APP_NAME;

const API_VERSION: &str = "2022-11-28";
const MEDIA_TYPE: &str = "application/vnd.github+json";

fn http_error(e: reqwest::Error) -> HostError {
  HostError::Request(e.to_string())
}

/// Strip the RFC 6570 query template GitHub appends to `upload_url`.
fn upload_endpoint(template: &str) -> &str {
  template.split('{').next().unwrap_or(template)
}

#[derive(serde::Serialize)]
struct ReleaseBody<'a> {
  tag_name: &'a str,
  name: &'a str,
  body: &'a str,
  prerelease: bool,
  draft: bool,
}

impl<'a> From<&'a ReleaseRequest> for ReleaseBody<'a> {
  fn from(r: &'a ReleaseRequest) -> Self {
    Self {
      tag_name: &r.tag_name,
      name: &r.name,
      body: &r.body,
      prerelease: r.prerelease,
      draft: false,
    }
  }
}

/// Release host for one GitHub repository.
pub struct GithubReleaseHost {
  client: Client,
  api_url: String,
  repository: String,
  token: String,
}

impl std::fmt::Debug for GithubReleaseHost {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GithubReleaseHost")
      .field("api_url", &self.api_url)
      .field("repository", &self.repository)
      .finish_non_exhaustive()
  }
}

impl GithubReleaseHost {
  /// `repository` is `owner/name`; `api_url` is e.g. `https://api.github.com`.
  pub fn new(api_url: &str, repository: &str, token: impl Into<String>) -> Result<Self, HostError> {
    let client = Client::builder()
      .user_agent(format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")))
      .timeout(Duration::from_secs(300))
      .build()
      .map_err(http_error)?;

    Ok(Self {
      client,
      api_url: api_url.trim_end_matches('/').to_string(),
      repository: repository.to_string(),
      token: token.into(),
    })
  }

  fn releases_url(&self) -> String {
    format!("{}/repos/{}/releases", self.api_url, self.repository)
  }

  fn request(&self, method: Method, url: &str) -> RequestBuilder {
    debug!(method = %method, url = %url, "github request");
    self
      .client
      .request(method, url)
      .bearer_auth(&self.token)
      .header(ACCEPT, MEDIA_TYPE)
      .header("X-GitHub-Api-Version", API_VERSION)
  }

  fn check(response: Response) -> Result<Response, HostError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let message = response.text().unwrap_or_default();
    Err(HostError::Http {
      status: status.as_u16(),
      message,
    })
  }

  fn parse<T: DeserializeOwned>(response: Response) -> Result<T, HostError> {
    Self::check(response)?
      .json::<T>()
      .map_err(|e| HostError::Decode(e.to_string()))
  }
}

impl ReleaseHost for GithubReleaseHost {
  fn find_release(&self, tag: &str) -> Result<Option<RemoteRelease>, HostError> {
    let url = format!("{}/tags/{}", self.releases_url(), tag);
    let response = self.request(Method::GET, &url).send().map_err(http_error)?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Ok(None);
    }
    Self::parse(response).map(Some)
  }

  fn create_release(&self, request: &ReleaseRequest) -> Result<RemoteRelease, HostError> {
    let response = self
      .request(Method::POST, &self.releases_url())
      .json(&ReleaseBody::from(request))
      .send()
      .map_err(http_error)?;
    Self::parse(response)
  }

  fn update_release(&self, id: u64, request: &ReleaseRequest) -> Result<RemoteRelease, HostError> {
    let url = format!("{}/{}", self.releases_url(), id);
    let response = self
      .request(Method::PATCH, &url)
      .json(&ReleaseBody::from(request))
      .send()
      .map_err(http_error)?;
    Self::parse(response)
  }

  fn delete_asset(&self, asset_id: u64) -> Result<(), HostError> {
    let url = format!("{}/assets/{}", self.releases_url(), asset_id);
    let response = self.request(Method::DELETE, &url).send().map_err(http_error)?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Ok(());
    }
    Self::check(response).map(|_| ())
  }

  fn upload_asset(&self, release: &RemoteRelease, name: &str, content: Vec<u8>) -> Result<RemoteAsset, HostError> {
    let url = upload_endpoint(&release.upload_url);
    let response = self
      .request(Method::POST, url)
      .query(&[("name", name)])
      .header(CONTENT_TYPE, "application/octet-stream")
      .body(content)
      .send()
      .map_err(http_error)?;
    Self::parse(response)
  }
}
