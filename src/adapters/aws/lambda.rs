use crate::application::dispatcher::BatchReport;
use crate::config::PushConfig;
use crate::error::SourceError;
use crate::ports::source::{Batch, Delivery, NotificationSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload {
    error_message: String,
    error_type: &'static str,
}

/// LambdaSource implements NotificationSource over the Lambda Runtime API.
///
/// Each invocation is one batch holding a single delivery. There is no
/// per-message delete; the batch is acknowledged by posting its response.
#[derive(Clone)]
pub struct LambdaSource {
    client: Client,
    base_url: String,
    retry_failed_batches: bool,
}

impl LambdaSource {
    pub fn new(config: &PushConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: format!(
                "http://{}/{}/runtime",
                config.runtime_api, RUNTIME_API_VERSION
            ),
            retry_failed_batches: config.retry_failed_batches,
        }
    }

    /// Reports a startup failure so the platform does not wait for the
    /// first poll.
    pub async fn report_init_error(&self, error: &dyn std::fmt::Display) {
        let url = format!("{}/init/error", self.base_url);
        if let Err(e) = self.post_error(&url, "InitError", error.to_string()).await {
            warn!(error = %e, "Failed to report init error");
        }
    }

    async fn post_error(
        &self,
        url: &str,
        error_type: &'static str,
        error_message: String,
    ) -> Result<(), SourceError> {
        let resp = self
            .client
            .post(url)
            .header(ERROR_TYPE_HEADER, error_type)
            .json(&ErrorPayload {
                error_message,
                error_type,
            })
            .send()
            .await
            .map_err(|e| SourceError::Runtime(e.to_string()))?;
        check_status(url, resp.status())
    }
}

fn check_status(url: &str, status: reqwest::StatusCode) -> Result<(), SourceError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(SourceError::Runtime(format!("{} returned {}", url, status)))
    }
}

#[async_trait]
impl NotificationSource for LambdaSource {
    async fn next_batch(&self) -> Result<Batch, SourceError> {
        let url = format!("{}/invocation/next", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        check_status(&url, resp.status())?;

        let request_id = resp
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| SourceError::Runtime("invocation has no request id".to_string()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| SourceError::Runtime(e.to_string()))?;
        debug!(request_id = %request_id, bytes = body.len(), "Received invocation");

        Ok(Batch {
            token: Some(request_id.clone()),
            deliveries: vec![Delivery {
                id: request_id,
                body,
                receipt: None,
            }],
        })
    }

    /// Acknowledgement is implicit in the invocation response.
    async fn acknowledge(&self, _receipt: &str) -> Result<(), SourceError> {
        Ok(())
    }

    async fn finish_batch(&self, batch: &Batch, report: &BatchReport) -> Result<(), SourceError> {
        let Some(request_id) = &batch.token else {
            return Ok(());
        };

        if self.retry_failed_batches && report.has_failures() {
            let url = format!("{}/invocation/{}/error", self.base_url, request_id);
            let message = format!("{} of the batch's units failed", report.failures.len());
            return self.post_error(&url, "BatchFailed", message).await;
        }

        let url = format!("{}/invocation/{}/response", self.base_url, request_id);
        let resp = self
            .client
            .post(&url)
            .json(report)
            .send()
            .await
            .map_err(|e| SourceError::Runtime(e.to_string()))?;
        check_status(&url, resp.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::UnitFailure;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves a single HTTP exchange and returns the raw request it saw.
    async fn serve_once(headers: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                headers,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (addr, handle)
    }

    fn source(runtime_api: String, retry_failed_batches: bool) -> LambdaSource {
        LambdaSource::new(&PushConfig {
            runtime_api,
            retry_failed_batches,
        })
    }

    fn failed_report() -> BatchReport {
        BatchReport {
            failures: vec![UnitFailure {
                container: "photos".to_string(),
                key: "abc/photo.jpg".to_string(),
                stage: "decode",
                error: "decode failed".to_string(),
            }],
            ..BatchReport::default()
        }
    }

    #[tokio::test]
    async fn test_next_batch_wraps_invocation() {
        let (addr, server) = serve_once(
            "Lambda-Runtime-Aws-Request-Id: req-1\r\n",
            r#"{"Records":[]}"#,
        )
        .await;

        let batch = source(addr, false).next_batch().await.unwrap();
        let request = server.await.unwrap();

        assert!(request.starts_with("GET /2018-06-01/runtime/invocation/next "));
        assert_eq!(batch.token.as_deref(), Some("req-1"));
        assert_eq!(batch.deliveries.len(), 1);
        assert_eq!(batch.deliveries[0].body, r#"{"Records":[]}"#);
        assert!(batch.deliveries[0].receipt.is_none());
    }

    #[tokio::test]
    async fn test_failures_are_reported_as_success_by_default() {
        let (addr, server) = serve_once("", "").await;
        let batch = Batch {
            token: Some("req-2".to_string()),
            deliveries: Vec::new(),
        };

        source(addr, false)
            .finish_batch(&batch, &failed_report())
            .await
            .unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /2018-06-01/runtime/invocation/req-2/response "));
        assert!(request.contains(r#""stage":"decode""#));
    }

    #[tokio::test]
    async fn test_failures_are_retried_when_enabled() {
        let (addr, server) = serve_once("", "").await;
        let batch = Batch {
            token: Some("req-3".to_string()),
            deliveries: Vec::new(),
        };

        source(addr, true)
            .finish_batch(&batch, &failed_report())
            .await
            .unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /2018-06-01/runtime/invocation/req-3/error "));
        assert!(request
            .to_ascii_lowercase()
            .contains("lambda-runtime-function-error-type: batchfailed"));
    }

    #[tokio::test]
    async fn test_batch_without_token_is_not_answered() {
        let source = source("127.0.0.1:9".to_string(), true);
        source
            .finish_batch(&Batch::default(), &failed_report())
            .await
            .unwrap();
    }
}
