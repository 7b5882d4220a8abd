//! Remote query API access
//!
//! ## Endpoints
//!
//! - `GET {base}/query/{id}/results?limit=1` - row-count metadata
//!   (`result.metadata.total_row_count`)
//! - `GET {base}/query/{id}/results/csv?offset={o}&limit={l}` - one chunk as CSV
//!
//! Every request carries the API key in the configured header.

use crate::config::{ApiConfig, ConfigError};
use crate::error::SyncError;
use crate::types::{ChunkDescriptor, ExternalQueryHandle};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Longest error body kept in `SyncError::Status`
const MAX_ERROR_BODY: usize = 512;

/// Source of query results, split out so the pipeline runs against fakes in tests
#[async_trait]
pub trait QueryResultsSource: Send + Sync {
    /// Total rows in the query's latest result set
    async fn total_row_count(&self, handle: &ExternalQueryHandle) -> Result<u64, SyncError>;

    /// Stream one chunk's CSV body into `sink`, returning the number of bytes written
    async fn fetch_csv_chunk(
        &self,
        handle: &ExternalQueryHandle,
        chunk: &ChunkDescriptor,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SyncError>;
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    result: Option<ResultsBody>,
}

#[derive(Debug, Deserialize)]
struct ResultsBody {
    metadata: Option<ResultsMetadata>,
}

/// `row_count` is not read: on a `limit=1` request it is the page size, not
/// the size of the result set
#[derive(Debug, Deserialize)]
struct ResultsMetadata {
    total_row_count: Option<u64>,
}

impl ResultsResponse {
    /// `None` when the response carries no `total_row_count`
    fn total_rows(&self) -> Option<u64> {
        self.result
            .as_ref()
            .and_then(|r| r.metadata.as_ref())
            .and_then(|m| m.total_row_count)
    }
}

/// reqwest-backed client for the query API
#[derive(Clone)]
pub struct QueryApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl QueryApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ConfigError> {
        let header_name = HeaderName::from_bytes(config.api_key_header.as_bytes())
            .map_err(|e| ConfigError::InvalidValue(format!("QUERY_API_KEY_HEADER: {}", e)))?;
        let mut header_value = HeaderValue::from_str(&config.api_key)
            .map_err(|e| ConfigError::InvalidValue(format!("QUERY_API_KEY: {}", e)))?;
        header_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header_name, header_value);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        Err(SyncError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl QueryResultsSource for QueryApiClient {
    async fn total_row_count(&self, handle: &ExternalQueryHandle) -> Result<u64, SyncError> {
        let url = self.url(&format!("/query/{}/results", handle.query_id()));

        let response = self.client.get(&url).query(&[("limit", "1")]).send().await?;
        let response = Self::check_status(response).await?;
        let parsed: ResultsResponse = response.json().await?;

        parsed.total_rows().ok_or_else(|| {
            SyncError::Parse(format!(
                "query {} results carry no total_row_count",
                handle.query_id()
            ))
        })
    }

    async fn fetch_csv_chunk(
        &self,
        handle: &ExternalQueryHandle,
        chunk: &ChunkDescriptor,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, SyncError> {
        let url = self.url(&format!("/query/{}/results/csv", handle.query_id()));

        let response = self
            .client
            .get(&url)
            .query(&[("offset", chunk.offset), ("limit", chunk.limit)])
            .send()
            .await?;
        let mut response = Self::check_status(response).await?;

        let mut written = 0u64;
        while let Some(bytes) = response.chunk().await? {
            sink.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        sink.flush().await?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_total_rows_from_metadata() {
        let body = r#"{"execution_id":"01HX","state":"QUERY_STATE_COMPLETED",
            "result":{"rows":[{"user":"abc","volume_usd":1.0}],
            "metadata":{"row_count":1,"total_row_count":25000}}}"#;
        let parsed: ResultsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.total_rows(), Some(25_000));
    }

    #[test]
    fn test_page_row_count_is_not_a_total() {
        // a limit=1 page without total_row_count must not read as a 1-row result set
        let one_row_page: ResultsResponse =
            serde_json::from_str(r#"{"result":{"metadata":{"row_count":1}}}"#).unwrap();
        assert_eq!(one_row_page.total_rows(), None);

        let no_result: ResultsResponse = serde_json::from_str(r#"{"state":"PENDING"}"#).unwrap();
        assert_eq!(no_result.total_rows(), None);
    }

    /// Serve one canned JSON response on a local port
    async fn serve_once(body: &'static str) -> String {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn local_client(base_url: String) -> QueryApiClient {
        QueryApiClient::new(&ApiConfig {
            base_url,
            api_key: "secret".to_string(),
            api_key_header: "X-Api-Key".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_total_is_an_error_and_reads_as_no_data() {
        let handle = ExternalQueryHandle::new("42", "alpha");

        let client = local_client(serve_once(r#"{"result":{"metadata":{"row_count":1}}}"#).await);
        let err = client.total_row_count(&handle).await.unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));

        let client = local_client(serve_once(r#"{"result":{"metadata":{"row_count":1}}}"#).await);
        let availability = crate::ingest::ResultAvailabilityProbe::new(std::sync::Arc::new(client))
            .check(&handle)
            .await;
        assert_eq!(availability, crate::types::Availability::none());
    }

    #[tokio::test]
    async fn test_total_row_count_over_http() {
        let body = r#"{"result":{"metadata":{"row_count":1,"total_row_count":25000}}}"#;
        let client = local_client(serve_once(body).await);

        let rows = client
            .total_row_count(&ExternalQueryHandle::new("42", "alpha"))
            .await
            .unwrap();
        assert_eq!(rows, 25_000);
    }

    #[test]
    fn test_client_rejects_bad_header_name() {
        let config = ApiConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            api_key: "secret".to_string(),
            api_key_header: "bad header".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert!(QueryApiClient::new(&config).is_err());
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let config = ApiConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            api_key: "secret".to_string(),
            api_key_header: "X-Api-Key".to_string(),
            timeout: Duration::from_secs(5),
        };
        let client = QueryApiClient::new(&config).unwrap();
        assert_eq!(
            client.url("/query/42/results"),
            "https://api.example.com/v1/query/42/results"
        );
    }

    #[tokio::test]
    #[ignore] // Run only when testing with live API (needs QUERY_API_KEY + LIVE_QUERY_ID)
    async fn test_live_row_count() {
        let config = ApiConfig {
            base_url: crate::config::DEFAULT_API_BASE_URL.to_string(),
            api_key: std::env::var("QUERY_API_KEY").unwrap(),
            api_key_header: crate::config::DEFAULT_API_KEY_HEADER.to_string(),
            timeout: Duration::from_secs(30),
        };
        let client = QueryApiClient::new(&config).unwrap();
        let handle = ExternalQueryHandle::new(std::env::var("LIVE_QUERY_ID").unwrap(), "live");

        let rows = client.total_row_count(&handle).await.unwrap();
        assert!(rows > 0);
    }
}
