//! HTTP request probe.
//!
//! Healthy means the response status code is a member of the configured
//! accept-set (default {200}). JSON bodies are parsed into a structured
//! value; anything else is captured as raw text.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use url::Url;

use crate::check::{CheckPayload, CheckResult};
use crate::config::{ConfigError, RequestConfig};

const USER_AGENT: &str = concat!("healthzd/", env!("CARGO_PKG_VERSION"));

pub struct RequestRunner {
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    body: Option<String>,
    codes: Vec<u16>,
    sensitive: bool,
    client: Client,
}

impl RequestRunner {
    pub fn new(cfg: &RequestConfig) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            name: cfg.name.clone(),
            message,
        };

        Url::parse(&cfg.url).map_err(|e| invalid(format!("invalid url {}: {e}", cfg.url)))?;

        let method = match &cfg.method {
            Some(m) => Method::from_bytes(m.to_uppercase().as_bytes())
                .map_err(|_| invalid(format!("invalid method {m}")))?,
            None => Method::GET,
        };

        let client = Client::builder()
            .danger_accept_invalid_certs(cfg.insecure)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| invalid(format!("failed to build http client: {e}")))?;

        Ok(Self {
            url: cfg.url.clone(),
            method,
            headers: cfg
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: cfg.body.clone(),
            codes: cfg.codes.clone().unwrap_or_else(|| vec![200]),
            sensitive: cfg.sensitive,
            client,
        })
    }

    pub async fn execute(&self, name: &str, timeout: Duration) -> CheckResult {
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .timeout(timeout);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        // Body only travels on POST, matching the probe's narrow contract.
        if self.method == Method::POST {
            if let Some(body) = &self.body {
                request = request.body(body.trim().to_owned());
            }
        }

        tracing::debug!(check = %name, url = %self.url, "executing request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let error = if err.is_timeout() {
                    "request timed out".to_owned()
                } else {
                    err.to_string()
                };
                tracing::warn!(check = %name, error = %error, "request failed");
                return self.result(name, false, Some(error), None, None, None);
            }
        };

        let status_code = response.status().as_u16();
        let status = response.status().to_string();
        let healthy = self.codes.contains(&status_code);
        if !healthy {
            tracing::warn!(check = %name, status = %status, "unexpected response status");
        }

        if self.sensitive {
            return self.result(name, healthy, None, Some(status), Some(status_code), None);
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim() == "application/json")
            .unwrap_or(false);

        let body = if is_json {
            match response.json::<serde_json::Value>().await {
                Ok(value) => Some(value),
                Err(err) => Some(serde_json::json!({ "BodyDecodeFailure": err.to_string() })),
            }
        } else {
            match response.text().await {
                Ok(text) => Some(serde_json::json!({ "Body": text })),
                Err(err) => Some(serde_json::json!({ "BodyDecodeFailure": err.to_string() })),
            }
        };

        self.result(name, healthy, None, Some(status), Some(status_code), body)
    }

    fn result(
        &self,
        name: &str,
        healthy: bool,
        error: Option<String>,
        status: Option<String>,
        status_code: Option<u16>,
        response: Option<serde_json::Value>,
    ) -> CheckResult {
        CheckResult {
            name: name.to_owned(),
            healthy,
            timestamp: Utc::now(),
            error,
            reason: None,
            payload: CheckPayload::Request {
                status,
                status_code,
                response,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::Router;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;

    fn request_config(name: &str, url: String) -> RequestConfig {
        RequestConfig {
            name: name.into(),
            url,
            method: None,
            body: None,
            headers: BTreeMap::new(),
            codes: None,
            cache: None,
            timeout: None,
            sensitive: false,
            insecure: false,
        }
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn payload(result: &CheckResult) -> (Option<u16>, Option<&serde_json::Value>) {
        match &result.payload {
            CheckPayload::Request {
                status_code,
                response,
                ..
            } => (*status_code, response.as_ref()),
            _ => panic!("expected request payload"),
        }
    }

    #[tokio::test]
    async fn json_response_is_parsed() {
        let addr = serve(Router::new().route(
            "/health",
            get(|| async { axum::Json(serde_json::json!({"status": "ok"})) }),
        ))
        .await;

        let cfg = request_config("api", format!("http://{addr}/health"));
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("api", Duration::from_secs(5)).await;

        assert!(result.healthy);
        let (code, body) = payload(&result);
        assert_eq!(code, Some(200));
        assert_eq!(body.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn plain_text_is_captured_raw() {
        let addr = serve(Router::new().route("/", get(|| async { "all good" }))).await;

        let cfg = request_config("plain", format!("http://{addr}/"));
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("plain", Duration::from_secs(5)).await;

        assert!(result.healthy);
        let (_, body) = payload(&result);
        assert_eq!(body.unwrap()["Body"], "all good");
    }

    #[tokio::test]
    async fn accept_set_governs_health() {
        let addr = serve(Router::new().route(
            "/",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        ))
        .await;

        let mut cfg = request_config("api", format!("http://{addr}/"));
        cfg.codes = Some(vec![200, 204]);
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("api", Duration::from_secs(5)).await;
        assert!(result.healthy);
        assert_eq!(payload(&result).0, Some(204));

        // Default accept-set is {200}; 204 now counts as unhealthy.
        let cfg = request_config("api", format!("http://{addr}/"));
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("api", Duration::from_secs(5)).await;
        assert!(!result.healthy);
        assert_eq!(payload(&result).0, Some(204));
    }

    #[tokio::test]
    async fn timeout_is_distinguished_from_other_errors() {
        let addr = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;

        let cfg = request_config("slow", format!("http://{addr}/slow"));
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("slow", Duration::from_millis(100)).await;
        assert!(!result.healthy);
        assert_eq!(result.error.as_deref(), Some("request timed out"));

        // Connection refused is reported, but not as a timeout.
        let cfg = request_config("refused", "http://127.0.0.1:1/".into());
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("refused", Duration::from_secs(2)).await;
        assert!(!result.healthy);
        assert_ne!(result.error.as_deref(), Some("request timed out"));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn sensitive_suppresses_body_but_keeps_status() {
        let addr = serve(Router::new().route(
            "/",
            get(|| async { axum::Json(serde_json::json!({"secret": "value"})) }),
        ))
        .await;

        let mut cfg = request_config("secret", format!("http://{addr}/"));
        cfg.sensitive = true;
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("secret", Duration::from_secs(5)).await;

        assert!(result.healthy);
        let (code, body) = payload(&result);
        assert_eq!(code, Some(200));
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn post_sends_trimmed_body_and_headers() {
        let addr = serve(Router::new().route(
            "/echo",
            post(|headers: HeaderMap, body: String| async move {
                let token = headers
                    .get("x-token")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_owned();
                axum::Json(serde_json::json!({"body": body, "token": token}))
            }),
        ))
        .await;

        let mut cfg = request_config("post", format!("http://{addr}/echo"));
        cfg.method = Some("post".into());
        cfg.body = Some("  ping  ".into());
        cfg.headers.insert("X-Token".into(), "abc".into());
        let runner = RequestRunner::new(&cfg).unwrap();
        let result = runner.execute("post", Duration::from_secs(5)).await;

        assert!(result.healthy);
        let (_, body) = payload(&result);
        assert_eq!(body.unwrap()["body"], "ping");
        assert_eq!(body.unwrap()["token"], "abc");
    }

    #[test]
    fn invalid_url_and_method_are_config_errors() {
        let cfg = request_config("bad", "not a url".into());
        assert!(RequestRunner::new(&cfg).is_err());

        let mut cfg = request_config("bad", "http://127.0.0.1/".into());
        cfg.method = Some("GE T".into());
        assert!(RequestRunner::new(&cfg).is_err());
    }
}
