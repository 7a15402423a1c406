//! 拦截器链
//!
//! 固定顺序的中间件加一个终端阶段。请求按声明顺序向下传递，
//! 响应按相反顺序返回。每条链只服务一个请求：内部游标每个阶段前进一次。

pub mod compression;
pub mod dispatch;
pub mod encryption;
pub mod header;
pub mod logging;

pub use compression::CompressionInterceptor;
pub use dispatch::DispatchStage;
pub use encryption::EncryptionInterceptor;
pub use header::HeaderInterceptor;
pub use logging::LoggingInterceptor;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{NetCode, NetError};
use crate::request::Request;
use crate::response::Response;

/// 中间件阶段
///
/// 可以在调用 [`Next::proceed`] 前改写请求、之后改写响应，
/// 也可以不调用 `proceed` 直接返回（短路）。
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn intercept(&self, request: Request, next: Next<'_>) -> Response;
}

/// 终端阶段，链上唯一没有下一个阶段的环节
#[async_trait]
pub trait TerminalStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn dispatch(&self, request: Request, cancel: &CancellationToken) -> Response;
}

pub struct Chain {
    stages: Vec<Arc<dyn Interceptor>>,
    terminal: Arc<dyn TerminalStage>,
    cursor: AtomicUsize,
    cancel: CancellationToken,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Interceptor>>, terminal: Arc<dyn TerminalStage>, cancel: CancellationToken) -> Self {
        Self {
            stages,
            terminal,
            cursor: AtomicUsize::new(0),
            cancel,
        }
    }

    /// 运行整条链。同一条链再次运行会得到 `ChainExhausted`。
    pub async fn run(&self, request: Request) -> Response {
        self.proceed(request).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn proceed(&self, request: Request) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                tracing::debug!("[CHAIN] cancelled before stage {}", self.cursor.load(Ordering::Acquire));
                return Response::from_error(&NetError::Cancelled);
            }

            let index = self.cursor.fetch_add(1, Ordering::AcqRel);
            if let Some(stage) = self.stages.get(index) {
                let stage = Arc::clone(stage);
                return stage.intercept(request, Next { chain: self }).await;
            }

            if index == self.stages.len() {
                return self.terminal.dispatch(request, &self.cancel).await;
            }

            tracing::error!(
                "[CHAIN] proceed called past terminal stage '{}' (cursor {})",
                self.terminal.name(),
                index
            );
            Response::failure(NetCode::ChainExhausted, "interceptor chain already exhausted")
        })
    }
}

/// 指向链上剩余部分的续体，只能使用一次
pub struct Next<'a> {
    chain: &'a Chain,
}

impl<'a> Next<'a> {
    pub async fn proceed(self, request: Request) -> Response {
        self.chain.proceed(request).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.chain.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn intercept(&self, request: Request, next: Next<'_>) -> Response {
            self.log.lock().push(format!("> {}", self.name));
            let response = next.proceed(request).await;
            self.log.lock().push(format!("< {}", self.name));
            response
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor for ShortCircuit {
        fn name(&self) -> &'static str {
            "short"
        }

        async fn intercept(&self, _request: Request, _next: Next<'_>) -> Response {
            Response::failure(NetCode::EncryptFailed, "stop")
        }
    }

    struct Terminal {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TerminalStage for Terminal {
        fn name(&self) -> &'static str {
            "terminal"
        }

        async fn dispatch(&self, request: Request, _cancel: &CancellationToken) -> Response {
            self.log.lock().push("terminal".to_string());
            Response::ok(request.body().cloned())
        }
    }

    fn recording(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Interceptor> {
        Arc::new(Recording {
            name,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn test_stage_order_down_and_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(
            vec![recording("a", &log), recording("b", &log), recording("c", &log)],
            Arc::new(Terminal { log: log.clone() }),
            CancellationToken::new(),
        );

        let response = chain.run(Request::new("s", "m").with_body(&b"x"[..])).await;
        assert!(response.is_success());
        assert_eq!(
            *log.lock(),
            vec!["> a", "> b", "> c", "terminal", "< c", "< b", "< a"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(
            vec![recording("a", &log), Arc::new(ShortCircuit), recording("c", &log)],
            Arc::new(Terminal { log: log.clone() }),
            CancellationToken::new(),
        );

        let response = chain.run(Request::new("s", "m")).await;
        assert_eq!(response.net_code(), NetCode::EncryptFailed);
        assert_eq!(*log.lock(), vec!["> a", "< a"]);
    }

    #[tokio::test]
    async fn test_cancelled_chain_never_reaches_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chain = Chain::new(vec![recording("a", &log)], Arc::new(Terminal { log: log.clone() }), cancel);

        let response = chain.run(Request::new("s", "m")).await;
        assert_eq!(response.net_code(), NetCode::Cancelled);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reused_chain_is_exhausted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Chain::new(vec![], Arc::new(Terminal { log: log.clone() }), CancellationToken::new());

        assert!(chain.run(Request::new("s", "m")).await.is_success());
        let response = chain.run(Request::new("s", "m")).await;
        assert_eq!(response.net_code(), NetCode::ChainExhausted);
        assert_eq!(log.lock().len(), 1);
    }
}
