//! 一次性请求适配器（HTTP POST）

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::codec::HEADER_RESPONSE_CONTROL;
use crate::error::{NetCode, NetError};
use crate::request::Request;
use crate::response::{Response, ResponseControl};
use crate::transport::TransportAdapter;

pub struct HttpAdapter {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAdapter {
    pub fn new(timeout: Duration) -> Result<Self, NetError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetError::Transport(format!("failed to build http client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, url: &str, error: reqwest::Error) -> NetError {
        if error.is_timeout() {
            NetError::timeout_error(format!("POST {}", url), self.timeout)
        } else if error.is_connect() {
            NetError::connection_error(url, error.to_string())
        } else {
            NetError::Transport(error.to_string())
        }
    }

    async fn send(&self, url: &str, request: Request) -> Response {
        let mut builder = self.client.post(url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let reply = match builder.send().await {
            Ok(reply) => reply,
            Err(e) => return Response::from_error(&self.map_error(url, e)),
        };

        let status = reply.status();
        let control = reply
            .headers()
            .get(HEADER_RESPONSE_CONTROL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if !status.is_success() {
            tracing::debug!("[HTTP] POST {} returned {}", url, status);
            return Response::failure(NetCode::TransportFailure, format!("http status {}", status.as_u16()))
                .with_result(i32::from(status.as_u16()), status.canonical_reason().unwrap_or_default())
                .with_control(ResponseControl::new(control));
        }

        match reply.bytes().await {
            Ok(body) => {
                let body = if body.is_empty() { None } else { Some(body) };
                Response::ok(body).with_control(ResponseControl::new(control))
            }
            Err(e) => Response::from_error(&self.map_error(url, e)),
        }
    }
}

#[async_trait]
impl TransportAdapter for HttpAdapter {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn request(&self, request: Request, cancel: &CancellationToken) -> Response {
        let Some(url) = request.inconstant_url().map(str::to_string) else {
            return Response::from_error(&NetError::missing_url("inconstant_url"));
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Response::from_error(&NetError::Cancelled),
            response = self.send(&url, request) => response,
        }
    }
}
