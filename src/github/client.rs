use chrono::{DateTime, Utc};
use color_eyre::eyre::eyre;
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::cache::{Page, UpstreamProvider};
use crate::config::GithubConfig;
use crate::error::MetricsError;
use crate::github::api_types::{ApiErrorBody, ApiSearchResponse, ApiStargazer};
use crate::metrics::{day_of, reduce_samples, EntityKey, MetricSample};

const STAR_MEDIA_TYPE: &str = "application/vnd.github.star+json";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("repo-surf/", env!("CARGO_PKG_VERSION"));

/// GitHub REST API client
#[derive(Clone)]
pub struct GithubClient {
  http: reqwest::Client,
  base_url: Url,
  per_page: u32,
}

impl GithubClient {
  pub fn new(config: &GithubConfig) -> color_eyre::Result<Self> {
    let base_url = Url::parse(&config.api_url)
      .map_err(|e| eyre!("Invalid GitHub API url {}: {}", config.api_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Invalid GitHub API url {}", config.api_url));
    }

    let http = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| eyre!("Failed to create GitHub client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      per_page: config.per_page.clamp(1, 100),
    })
  }

  /// Check whether an organization exists
  pub async fn organization_exists(
    &self,
    organization: &str,
    credential: Option<&str>,
  ) -> Result<bool, MetricsError> {
    let url = endpoint(&self.base_url, &["orgs", organization]);

    match self.get(url, JSON_MEDIA_TYPE, credential, organization).await {
      Ok(_) => Ok(true),
      Err(MetricsError::NotFound { .. }) => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// One page of a repository's stargazers, as cumulative daily star counts
  async fn stargazer_page(
    &self,
    key: &EntityKey,
    repository: &str,
    page: u32,
    credential: Option<&str>,
  ) -> Result<Page, MetricsError> {
    let key_name = key.to_string();
    let mut url = endpoint(
      &self.base_url,
      &["repos", key.organization(), repository, "stargazers"],
    );
    url
      .query_pairs_mut()
      .append_pair("per_page", &self.per_page.to_string())
      .append_pair("page", &page.to_string());

    let response = self.get(url, STAR_MEDIA_TYPE, credential, &key_name).await?;
    let has_next = has_next_page(response.headers());
    let stargazers: Vec<ApiStargazer> = decode(response, &key_name).await?;

    debug!(key = %key_name, page, stargazers = stargazers.len(), has_next, "fetched stargazer page");

    Ok(Page {
      samples: stargazer_samples(&stargazers, page, self.per_page),
      next_cursor: has_next.then(|| page + 1),
    })
  }

  /// Current open and closed issue totals across an organization
  async fn organization_issue_page(
    &self,
    key: &EntityKey,
    credential: Option<&str>,
  ) -> Result<Page, MetricsError> {
    let open = self.count_issues(key, "open", credential).await?;
    let closed = self.count_issues(key, "closed", credential).await?;

    Ok(Page {
      samples: vec![MetricSample::issues(day_of(Utc::now()), open, closed)],
      next_cursor: None,
    })
  }

  async fn count_issues(
    &self,
    key: &EntityKey,
    state: &str,
    credential: Option<&str>,
  ) -> Result<u64, MetricsError> {
    let key_name = key.to_string();
    let mut url = endpoint(&self.base_url, &["search", "issues"]);
    url
      .query_pairs_mut()
      .append_pair(
        "q",
        &format!("org:{} is:issue is:{}", key.organization(), state),
      )
      .append_pair("per_page", "1");

    let response = self.get(url, JSON_MEDIA_TYPE, credential, &key_name).await?;
    let result: ApiSearchResponse = decode(response, &key_name).await?;
    Ok(result.total_count)
  }

  async fn get(
    &self,
    url: Url,
    accept: &str,
    credential: Option<&str>,
    key: &str,
  ) -> Result<reqwest::Response, MetricsError> {
    let mut request = self
      .http
      .get(url)
      .header(ACCEPT, accept)
      .header("X-GitHub-Api-Version", API_VERSION);
    if let Some(token) = credential {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(|e| transient(key, e))?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let headers = response.headers().clone();
    let body: ApiErrorBody = response
      .bytes()
      .await
      .ok()
      .and_then(|bytes| serde_json::from_slice(&bytes).ok())
      .unwrap_or_default();

    Err(classify_status(status, &headers, key, &body.message))
  }
}

impl UpstreamProvider for GithubClient {
  async fn fetch_page(
    &self,
    key: &EntityKey,
    cursor: Option<u32>,
    credential: Option<&str>,
  ) -> Result<Page, MetricsError> {
    match key.repository() {
      Some(repository) => {
        self
          .stargazer_page(key, repository, cursor.unwrap_or(1), credential)
          .await
      }
      None => self.organization_issue_page(key, credential).await,
    }
  }
}

async fn decode<T: DeserializeOwned>(
  response: reqwest::Response,
  key: &str,
) -> Result<T, MetricsError> {
  let body = response.bytes().await.map_err(|e| transient(key, e))?;
  serde_json::from_slice(&body).map_err(|e| MetricsError::TransientFetch {
    key: key.to_string(),
    message: format!("Failed to parse response: {}", e),
  })
}

fn transient(key: &str, error: reqwest::Error) -> MetricsError {
  MetricsError::TransientFetch {
    key: key.to_string(),
    message: error.to_string(),
  }
}

/// Append path segments to the API base url.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
  let mut url = base.clone();
  if let Ok(mut path) = url.path_segments_mut() {
    path.pop_if_empty().extend(segments);
  }
  url
}

/// Map a non-success response to an error kind.
fn classify_status(status: StatusCode, headers: &HeaderMap, key: &str, message: &str) -> MetricsError {
  if status == StatusCode::NOT_FOUND {
    return MetricsError::NotFound {
      key: key.to_string(),
    };
  }

  let remaining = header_number(headers, "x-ratelimit-remaining");
  if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && remaining == Some(0)) {
    let reset_at = header_number(headers, "x-ratelimit-reset")
      .and_then(|secs| DateTime::from_timestamp(secs, 0));
    return MetricsError::RateLimited {
      key: key.to_string(),
      reset_at,
    };
  }

  let message = if message.is_empty() {
    format!("GitHub returned {}", status)
  } else {
    format!("GitHub returned {}: {}", status, message)
  };
  MetricsError::TransientFetch {
    key: key.to_string(),
    message,
  }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<i64> {
  headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Whether the `Link` header advertises a following page
fn has_next_page(headers: &HeaderMap) -> bool {
  headers
    .get(LINK)
    .and_then(|value| value.to_str().ok())
    .is_some_and(|link| link.split(',').any(|part| part.contains("rel=\"next\"")))
}

/// Stargazer `n` (counting from the first page) brings the star count to `n`.
fn stargazer_samples(stargazers: &[ApiStargazer], page: u32, per_page: u32) -> Vec<MetricSample> {
  let offset = u64::from(page.saturating_sub(1)) * u64::from(per_page);
  reduce_samples(
    stargazers
      .iter()
      .zip(offset + 1..)
      .map(|(stargazer, count)| MetricSample::stars(day_of(stargazer.starred_at), count)),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::HeaderValue;

  fn stargazer(at: &str) -> ApiStargazer {
    ApiStargazer {
      starred_at: at.parse().unwrap(),
    }
  }

  #[test]
  fn test_endpoint_appends_segments() {
    let base = Url::parse("https://api.github.com/").unwrap();
    assert_eq!(
      endpoint(&base, &["repos", "supabase", "realtime", "stargazers"]).as_str(),
      "https://api.github.com/repos/supabase/realtime/stargazers"
    );

    let enterprise = Url::parse("https://ghe.example.com/api/v3").unwrap();
    assert_eq!(
      endpoint(&enterprise, &["orgs", "supabase"]).as_str(),
      "https://ghe.example.com/api/v3/orgs/supabase"
    );
  }

  #[test]
  fn test_has_next_page() {
    let mut headers = HeaderMap::new();
    assert!(!has_next_page(&headers));

    headers.insert(
      LINK,
      HeaderValue::from_static(
        "<https://api.github.com/repositories/1/stargazers?page=3>; rel=\"next\", \
         <https://api.github.com/repositories/1/stargazers?page=9>; rel=\"last\"",
      ),
    );
    assert!(has_next_page(&headers));

    headers.insert(
      LINK,
      HeaderValue::from_static("<https://api.github.com/repositories/1/stargazers?page=1>; rel=\"first\""),
    );
    assert!(!has_next_page(&headers));
  }

  #[test]
  fn test_classify_status() {
    let headers = HeaderMap::new();
    assert_eq!(
      classify_status(StatusCode::NOT_FOUND, &headers, "a/b", "Not Found"),
      MetricsError::NotFound { key: "a/b".into() }
    );
    assert!(matches!(
      classify_status(StatusCode::BAD_GATEWAY, &headers, "a/b", ""),
      MetricsError::TransientFetch { ref message, .. } if message == "GitHub returned 502 Bad Gateway"
    ));
    assert!(matches!(
      classify_status(StatusCode::FORBIDDEN, &headers, "a/b", "Resource not accessible"),
      MetricsError::TransientFetch { .. }
    ));
  }

  #[test]
  fn test_classify_rate_limit() {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
    headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000000"));

    let error = classify_status(StatusCode::FORBIDDEN, &headers, "a/b", "API rate limit exceeded");
    assert_eq!(
      error,
      MetricsError::RateLimited {
        key: "a/b".into(),
        reset_at: DateTime::from_timestamp(1_700_000_000, 0),
      }
    );
    assert!(error.is_transient());

    assert!(matches!(
      classify_status(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), "a/b", ""),
      MetricsError::RateLimited { reset_at: None, .. }
    ));
  }

  #[test]
  fn test_stargazer_samples_count_across_pages() {
    let stargazers = vec![
      stargazer("2021-03-01T10:00:00Z"),
      stargazer("2021-03-01T12:00:00Z"),
      stargazer("2021-03-02T08:00:00Z"),
    ];

    let samples = stargazer_samples(&stargazers, 2, 100);
    let march_first = "2021-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap().timestamp();
    assert_eq!(
      samples,
      vec![
        MetricSample::stars(march_first, 102),
        MetricSample::stars(march_first + 86_400, 103),
      ]
    );
  }

  #[test]
  fn test_stargazer_response_parses() {
    let body = r#"[{"starred_at":"2021-03-01T10:00:00Z","user":{"login":"octocat"}}]"#;
    let stargazers: Vec<ApiStargazer> = serde_json::from_str(body).unwrap();
    assert_eq!(stargazers.len(), 1);

    let search: ApiSearchResponse =
      serde_json::from_str(r#"{"total_count":42,"incomplete_results":false,"items":[]}"#).unwrap();
    assert_eq!(search.total_count, 42);
  }
}
