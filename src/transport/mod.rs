//! 传输层
//!
//! 具体的 HTTP / WebSocket 实现都藏在 [`TransportAdapter`] 之后，
//! 长连接由 [`ConnectionRegistry`] 按地址管理，
//! [`TransportSelector`] 负责在两种传输之间选择和回退。

pub mod frame;
pub mod registry;
pub mod request_manager;
pub mod selector;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use frame::{Frame, FrameFlags, FrameKind};
pub use registry::ConnectionRegistry;
pub use request_manager::RequestManager;
pub use selector::TransportSelector;

#[cfg(feature = "http")]
pub use http::HttpAdapter;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketAdapter, WebSocketAdapterFactory};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::ContentEncoding;
use crate::error::NetError;
use crate::push::PushMessage;
use crate::request::Request;
use crate::response::Response;

/// 传输适配器
///
/// 失败以 [`Response`] 的结果码表达，而不是错误，
/// 这样自适应策略可以观察到超时和连接错误。
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn request(&self, request: Request, cancel: &CancellationToken) -> Response;
}

/// 长连接适配器
#[async_trait]
pub trait PersistentAdapter: TransportAdapter {
    /// 建立连接，已连接时直接返回
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), NetError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn url(&self) -> &str;
}

/// 为每个长连接地址创建一个适配器
pub trait PersistentAdapterFactory: Send + Sync {
    fn create(&self, url: &str, events: EventSink) -> Arc<dyn PersistentAdapter>;
}

/// 连接事件
#[derive(Debug, Clone)]
pub enum ConnectionEventKind {
    /// 服务端推送
    Push(PushMessage),
    /// 连接关闭
    Closed { code: u16, reason: String },
    /// 连接错误
    Error(String),
}

/// 带所属地址的连接事件
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    pub url: String,
    pub kind: ConnectionEventKind,
}

/// 适配器向连接注册表上报事件的通道
///
/// 每个适配器持有一个绑定了自身地址的 sink，订阅方无需知道适配器实例。
#[derive(Debug, Clone)]
pub struct EventSink {
    url: Arc<str>,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl EventSink {
    pub fn new(url: &str, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { url: Arc::from(url), tx }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn push(&self, notify_package: impl Into<String>, body: Bytes, compressed: bool, encoding: ContentEncoding) {
        let message = PushMessage::new(self.url.as_ref(), notify_package, body)
            .with_compressed(compressed)
            .with_content_encoding(encoding);
        self.emit(ConnectionEventKind::Push(message));
    }

    pub fn closed(&self, code: u16, reason: impl Into<String>) {
        self.emit(ConnectionEventKind::Closed {
            code,
            reason: reason.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ConnectionEventKind::Error(message.into()));
    }

    fn emit(&self, kind: ConnectionEventKind) {
        let event = ConnectionEvent {
            url: self.url.to_string(),
            kind,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!("[EVENT] Registry dropped, event for {} discarded", self.url);
        }
    }
}
