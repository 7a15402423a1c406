use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Interceptor, Next};
use crate::codec::Compressor;
use crate::error::NetError;
use crate::request::Request;
use crate::response::Response;

/// 请求体超过阈值时压缩，响应带压缩标志时解压
pub struct CompressionInterceptor {
    compressor: Arc<dyn Compressor>,
    threshold: usize,
}

impl CompressionInterceptor {
    pub fn new(compressor: Arc<dyn Compressor>, threshold: usize) -> Self {
        Self { compressor, threshold }
    }
}

#[async_trait]
impl Interceptor for CompressionInterceptor {
    fn name(&self) -> &'static str {
        "compression"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Response {
        let request = match request.body() {
            Some(body) if body.len() > self.threshold => match self.compressor.compress(body) {
                Ok(compressed) => {
                    tracing::trace!(
                        "[COMPRESS] {} -> {} bytes ({})",
                        body.len(),
                        compressed.len(),
                        self.compressor.name()
                    );
                    request.with_body(compressed).with_compressed(true)
                }
                Err(e) => return Response::from_error(&NetError::Codec(e)),
            },
            _ => request,
        };

        let response = next.proceed(request).await;
        if !response.is_compressed() {
            return response;
        }

        let decompressed = match response.body() {
            Some(body) => match self.compressor.decompress(body) {
                Ok(plain) => Some(Bytes::from(plain)),
                Err(e) => return Response::from_error(&NetError::Codec(e)),
            },
            None => None,
        };
        response.with_body(decompressed).with_compressed(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::GzipCompressor;
    use crate::error::{CodecError, NetCode};
    use crate::interceptor::{Chain, TerminalStage};
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Echoes the request body back, keeping its compression flag.
    struct Echo {
        seen: Mutex<Option<Request>>,
    }

    #[async_trait]
    impl TerminalStage for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn dispatch(&self, request: Request, _cancel: &CancellationToken) -> Response {
            *self.seen.lock() = Some(request.clone());
            Response::ok(request.body().cloned()).with_compressed(request.control().compressed)
        }
    }

    struct Corrupt;

    #[async_trait]
    impl TerminalStage for Corrupt {
        fn name(&self) -> &'static str {
            "corrupt"
        }

        async fn dispatch(&self, _request: Request, _cancel: &CancellationToken) -> Response {
            Response::ok(Some(Bytes::from_static(b"not gzip"))).with_compressed(true)
        }
    }

    fn stage() -> Arc<dyn Interceptor> {
        Arc::new(CompressionInterceptor::new(Arc::new(GzipCompressor::default()), 1024))
    }

    #[tokio::test]
    async fn test_small_body_is_not_compressed() {
        let echo = Arc::new(Echo { seen: Mutex::new(None) });
        let chain = Chain::new(vec![stage()], echo.clone(), CancellationToken::new());

        let body = vec![b'a'; 1024];
        let response = chain.run(Request::new("s", "m").with_body(body.clone())).await;

        let seen = echo.seen.lock().clone().unwrap();
        assert!(!seen.control().compressed);
        assert_eq!(seen.body().unwrap().as_ref(), body.as_slice());
        assert_eq!(response.body().unwrap().as_ref(), body.as_slice());
    }

    #[tokio::test]
    async fn test_large_body_round_trips() {
        let echo = Arc::new(Echo { seen: Mutex::new(None) });
        let chain = Chain::new(vec![stage()], echo.clone(), CancellationToken::new());

        let body = vec![b'a'; 1025];
        let response = chain.run(Request::new("s", "m").with_body(body.clone())).await;

        let seen = echo.seen.lock().clone().unwrap();
        assert!(seen.control().compressed);
        assert!(seen.body().unwrap().len() < body.len());
        assert!(response.is_success());
        assert!(!response.is_compressed());
        assert_eq!(response.body().unwrap().as_ref(), body.as_slice());
    }

    /// Compressor whose compress side always fails.
    struct FailingCompressor;

    impl Compressor for FailingCompressor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn compress(&self, _data: &[u8]) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Compress(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
            Ok(data.to_vec())
        }
    }

    #[tokio::test]
    async fn test_compress_failure_skips_dispatch() {
        let echo = Arc::new(Echo { seen: Mutex::new(None) });
        let failing: Arc<dyn Interceptor> =
            Arc::new(CompressionInterceptor::new(Arc::new(FailingCompressor), 1024));
        let chain = Chain::new(vec![failing], echo.clone(), CancellationToken::new());

        let response = chain.run(Request::new("s", "m").with_body(vec![b'a'; 2048])).await;

        assert_eq!(response.net_code(), NetCode::CompressFailed);
        assert!(response.net_message().contains("disk full"));
        assert!(echo.seen.lock().is_none());
    }

    #[tokio::test]
    async fn test_decompress_failure_is_reported() {
        let chain = Chain::new(vec![stage()], Arc::new(Corrupt), CancellationToken::new());
        let response = chain.run(Request::new("s", "m")).await;
        assert_eq!(response.net_code(), NetCode::DecompressFailed);
        assert!(response.body().is_none());
    }
}
