//! HTTP request health probing

use async_trait::async_trait;
use hyper::{Body, Client, Method, Request, Uri};
use schema::HttpExpect;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::{HealthError, Probe};

/// Probe that passes when a GET to `url` returns the expected response
///
/// Only plain `http://` URLs are supported.
///
/// ```rust
/// use schema::HttpExpect;
/// use warden_core::health::{run_probe, HttpProbe};
/// use std::time::Duration;
///
/// # async fn example() {
/// let probe = HttpProbe::new("http://127.0.0.1:8080/health", HttpExpect::Any2xx, Duration::from_secs(2));
/// let result = run_probe(&probe, Duration::from_secs(2)).await;
/// println!("api healthy: {}", result.healthy);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    expect: HttpExpect,
    request_timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, expect: HttpExpect, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            expect,
            request_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn expect(&self) -> &HttpExpect {
        &self.expect
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> Result<(), HealthError> {
        debug!("HTTP probe requesting {}", self.url);
        let uri: Uri = self.url.parse()?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())?;

        let client = Client::new();
        let response = match timeout(self.request_timeout, client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!("HTTP probe to {} failed: {}", self.url, e);
                return Err(HealthError::Http(e));
            }
            Err(_) => {
                debug!("HTTP probe to {} timed out after {:?}", self.url, self.request_timeout);
                return Err(HealthError::Timeout(self.request_timeout));
            }
        };

        let status = response.status().as_u16();
        if !self.expect.matches_status(status) {
            debug!("HTTP probe to {} returned status {}", self.url, status);
            return Err(HealthError::UnexpectedStatus(status));
        }
        if !self.expect.needs_body() {
            return Ok(());
        }

        let body = match timeout(self.request_timeout, hyper::body::to_bytes(response.into_body())).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(HealthError::Http(e)),
            Err(_) => return Err(HealthError::Timeout(self.request_timeout)),
        };
        if self.expect.matches_body(&String::from_utf8_lossy(&body)) {
            Ok(())
        } else {
            Err(HealthError::BodyMismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Response, Server};
    use std::convert::Infallible;

    async fn start_test_server() -> u16 {
        let make_svc = make_service_fn(|_conn| async {
            Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
                let response = match req.uri().path() {
                    "/health" => Response::new(Body::from("healthy")),
                    "/bad" => Response::builder()
                        .status(500)
                        .body(Body::from("error"))
                        .unwrap(),
                    _ => Response::builder()
                        .status(404)
                        .body(Body::from("not found"))
                        .unwrap(),
                };
                Ok::<_, Infallible>(response)
            }))
        });

        let addr = ([127, 0, 0, 1], 0).into();
        let server = Server::bind(&addr).serve(make_svc);
        let port = server.local_addr().port();
        tokio::spawn(async move {
            let _ = server.await;
        });
        port
    }

    #[tokio::test]
    async fn test_http_probe_any2xx() {
        let port = start_test_server().await;
        let probe = HttpProbe::new(
            format!("http://127.0.0.1:{port}/health"),
            HttpExpect::Any2xx,
            Duration::from_secs(5),
        );
        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_body() {
        let port = start_test_server().await;
        let url = format!("http://127.0.0.1:{port}/health");

        let matching = HttpProbe::new(&url, HttpExpect::BodyContains("healthy".to_string()), Duration::from_secs(5));
        assert!(matching.check().await.is_ok());

        let mismatch = HttpProbe::new(&url, HttpExpect::BodyContains("error".to_string()), Duration::from_secs(5));
        assert!(matches!(mismatch.check().await, Err(HealthError::BodyMismatch)));
    }

    #[tokio::test]
    async fn test_http_probe_unexpected_status() {
        let port = start_test_server().await;
        let probe = HttpProbe::new(
            format!("http://127.0.0.1:{port}/bad"),
            HttpExpect::Status(200),
            Duration::from_secs(5),
        );
        match probe.check().await {
            Err(HealthError::UnexpectedStatus(500)) => {}
            other => panic!("Expected UnexpectedStatus(500), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let probe = HttpProbe::new("not a url", HttpExpect::Any2xx, Duration::from_secs(1));
        assert!(matches!(probe.check().await, Err(HealthError::InvalidUri(_))));
    }
}
