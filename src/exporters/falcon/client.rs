// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use tower::BoxError;

use crate::exporters::falcon::MetricPoint;

#[derive(Debug)]
pub struct ConnectError;
impl Display for ConnectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unable to connect")
    }
}
impl Error for ConnectError {}

#[derive(Debug)]
pub struct StatusError {
    pub status: http::StatusCode,
    pub body: Bytes,
}
impl Display for StatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "push rejected with status {}: {}",
            self.status,
            String::from_utf8_lossy(&self.body)
        )
    }
}
impl Error for StatusError {}

/// Transport for a batch of flushed points. Returns the raw acknowledgement
/// payload on success.
pub trait MetricPusher: Send + Sync + 'static {
    fn push(&self, points: &[MetricPoint]) -> impl Future<Output = Result<Bytes, BoxError>> + Send;
}

pub(crate) fn build_hyper_client() -> HyperClient<HttpConnector, Full<Bytes>> {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);

    hyper_util::client::legacy::Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(4)
        .timer(TokioTimer::new())
        .build::<_, Full<Bytes>>(http)
}

/// Pushes points to an Open-Falcon agent or transfer HTTP endpoint.
#[derive(Clone)]
pub struct FalconClient {
    inner: HyperClient<HttpConnector, Full<Bytes>>,
    uri: Uri,
    timeout: Duration,
}

impl FalconClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, BoxError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| format!("invalid falcon url {:?}: {}", url, e))?;
        if uri.scheme_str() != Some("http") {
            return Err(format!("unsupported falcon url {:?}, expected http://", url).into());
        }

        Ok(Self {
            inner: build_hyper_client(),
            uri,
            timeout,
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    async fn perform_request(&self, body: Bytes) -> Result<Bytes, BoxError> {
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(body))?;

        let resp = match self.inner.request(req).await {
            Ok(resp) => resp,
            Err(e) if e.is_connect() => return Err(ConnectError.into()),
            Err(e) => return Err(e.into()),
        };

        let (head, body) = resp.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| format!("failed reading response: {}", e))?
            .to_bytes();

        if !head.status.is_success() {
            return Err(StatusError {
                status: head.status,
                body,
            }
            .into());
        }
        Ok(body)
    }
}

impl MetricPusher for FalconClient {
    async fn push(&self, points: &[MetricPoint]) -> Result<Bytes, BoxError> {
        let payload = Bytes::from(serde_json::to_vec(points)?);
        match tokio::time::timeout(self.timeout, self.perform_request(payload)).await {
            Ok(result) => result,
            Err(_) => Err(format!("push timed out after {:?}", self.timeout).into()),
        }
    }
}
