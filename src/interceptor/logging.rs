use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Interceptor, Next};
use crate::request::Request;
use crate::response::Response;

/// 记录请求 / 响应摘要，不修改负载
pub struct LoggingInterceptor {
    preview_limit: usize,
}

impl LoggingInterceptor {
    pub fn new(preview_limit: usize) -> Self {
        Self { preview_limit }
    }

    /// 截断后的负载预览
    fn preview(&self, body: Option<&Bytes>) -> String {
        match body {
            None => "<none>".to_string(),
            Some(body) if body.len() <= self.preview_limit => String::from_utf8_lossy(body).into_owned(),
            Some(body) => format!(
                "{}... ({} bytes total)",
                String::from_utf8_lossy(&body[..self.preview_limit]),
                body.len()
            ),
        }
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Response {
        let control = request.control().clone();
        let transport = request.transport();
        tracing::debug!(
            "[REQUEST] seq_id={} {}.{} transport={} body={}",
            control.seq_id,
            control.service,
            control.method,
            transport.as_str(),
            self.preview(request.body())
        );

        let started = Instant::now();
        let response = next.proceed(request).await;

        tracing::debug!(
            "[RESPONSE] seq_id={} {}.{} net_code={} code={} elapsed={:?} body={}",
            control.seq_id,
            control.service,
            control.method,
            response.net_code(),
            response.code(),
            started.elapsed(),
            self.preview(response.body())
        );
        response
    }
}
