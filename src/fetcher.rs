use std::time::{Duration, Instant};

use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::model::{InterestsPage, RawInterestItem};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("malformed upstream payload: {0}")]
    Format(String),
}

/// Result of one paginated request. No retry happens at this level.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Zero items means the upstream is exhausted.
    Page(Vec<RawInterestItem>),
    RateLimited,
    Failed(FetchError),
}

/// One page request against an offset space.
pub trait PageSource {
    async fn fetch(&self, offset: u64, page_size: u64) -> FetchOutcome;

    /// Size-1 request used only to learn `totalResults`.
    async fn probe(&self) -> Result<u64, FetchError>;
}

pub struct ApiFetcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ApiFetcher {
            client,
            base_url: base_url.to_string(),
            timeout,
        })
    }

    async fn get(&self, take: u64, skip: Option<u64>) -> Result<(u16, String), FetchError> {
        let mut req = self.client.get(&self.base_url).query(&[("take", take)]);
        if let Some(skip) = skip {
            req = req.query(&[("skip", skip)]);
        }

        let start = Instant::now();
        let response = req.send().await.map_err(|e| self.map_err(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_err(e))?;
        debug!(
            "GET take={} skip={:?} -> {} in {}ms",
            take,
            skip,
            status,
            start.elapsed().as_millis()
        );
        Ok((status, body))
    }

    fn map_err(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl PageSource for ApiFetcher {
    async fn fetch(&self, offset: u64, page_size: u64) -> FetchOutcome {
        match self.get(page_size, Some(offset)).await {
            Ok((status, body)) => classify(status, &body),
            Err(e) => FetchOutcome::Failed(e),
        }
    }

    async fn probe(&self) -> Result<u64, FetchError> {
        let (status, body) = self.get(1, None).await?;
        if status != StatusCode::OK.as_u16() {
            return Err(FetchError::Status(status));
        }
        let page = decode(&body)?;
        page.total_results
            .ok_or_else(|| FetchError::Format("totalResults missing from probe".into()))
    }
}

/// Map an HTTP status and body onto a fetch outcome.
pub fn classify(status: u16, body: &str) -> FetchOutcome {
    match StatusCode::from_u16(status) {
        Ok(s) if s == StatusCode::TOO_MANY_REQUESTS => FetchOutcome::RateLimited,
        Ok(s) if s.is_success() => match decode(body) {
            Ok(page) => FetchOutcome::Page(page.items),
            Err(e) => FetchOutcome::Failed(e),
        },
        _ => FetchOutcome::Failed(FetchError::Status(status)),
    }
}

fn decode(body: &str) -> Result<InterestsPage, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Format(e.to_string()))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const ONE_ITEM: &str = r#"{"totalResults": 9, "items": [{
        "id": 5, "summary": "Speech - £800",
        "registrationDate": "2024-02-02", "publishedDate": "2024-02-09",
        "member": {"id": 1, "nameDisplayAs": "A Member", "memberFrom": "Here", "party": "Green"},
        "category": {"id": 1, "name": "Employment and earnings"}
    }]}"#;

    #[test]
    fn ok_page() {
        match classify(200, ONE_ITEM) {
            FetchOutcome::Page(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].id, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_page() {
        assert!(matches!(
            classify(200, r#"{"items": []}"#),
            FetchOutcome::Page(items) if items.is_empty()
        ));
    }

    #[test]
    fn throttled() {
        assert!(matches!(classify(429, ""), FetchOutcome::RateLimited));
    }

    #[test]
    fn server_error() {
        assert!(matches!(
            classify(503, "unavailable"),
            FetchOutcome::Failed(FetchError::Status(503))
        ));
    }

    #[test]
    fn bad_json_is_format_error() {
        assert!(matches!(
            classify(200, "<html>oops</html>"),
            FetchOutcome::Failed(FetchError::Format(_))
        ));
        assert!(matches!(
            classify(200, r#"{"items": [{"id": 1}]}"#),
            FetchOutcome::Failed(FetchError::Format(_))
        ));
    }

    // ── Over the wire ──

    const API_PATH: &str = "/api/v1/Interests";

    fn fetcher(server: &MockServer, timeout: Duration) -> ApiFetcher {
        ApiFetcher::new(&format!("{}{}", server.uri(), API_PATH), timeout).unwrap()
    }

    #[tokio::test]
    async fn fetch_sends_take_and_skip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(API_PATH))
            .and(query_param("take", "3"))
            .and(query_param("skip", "6"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ONE_ITEM))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetcher(&server, Duration::from_secs(5)).fetch(6, 3).await;
        match outcome {
            FetchOutcome::Page(items) => assert_eq!(items[0].id, 5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn fetch_429_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let outcome = fetcher(&server, Duration::from_secs(5)).fetch(0, 50).await;
        assert!(matches!(outcome, FetchOutcome::RateLimited));
    }

    #[tokio::test]
    async fn fetch_server_error_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let outcome = fetcher(&server, Duration::from_secs(5)).fetch(0, 50).await;
        assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Status(502))));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(ONE_ITEM)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let outcome = fetcher(&server, Duration::from_millis(200)).fetch(0, 50).await;
        assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Timeout(_))));
    }

    #[tokio::test]
    async fn total_count_uses_take_one_without_skip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(API_PATH))
            .and(query_param("take", "1"))
            .and(query_param_is_missing("skip"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ONE_ITEM))
            .expect(1)
            .mount(&server)
            .await;

        let total = fetcher(&server, Duration::from_secs(5)).probe().await.unwrap();
        assert_eq!(total, 9);
    }

    #[tokio::test]
    async fn total_count_rejects_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = fetcher(&server, Duration::from_secs(5)).probe().await;
        assert!(matches!(result, Err(FetchError::Status(503))));
    }

    #[tokio::test]
    async fn total_count_missing_is_format_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
            .mount(&server)
            .await;

        let result = fetcher(&server, Duration::from_secs(5)).probe().await;
        assert!(matches!(result, Err(FetchError::Format(_))));
    }
}
