//! 长连接注册表
//!
//! 每个地址一个适配器，第一次连接或请求时创建，之后复用。
//! 适配器上报的推送 / 关闭 / 错误事件经由同一个通道带地址转发出去。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::NetError;
use crate::lockfree::LockFreeHashMap;
use crate::request::Request;
use crate::response::Response;
use crate::strategy::ConnectivityProbe;
use crate::transport::{ConnectionEvent, EventSink, PersistentAdapter, PersistentAdapterFactory, TransportAdapter};

pub struct ConnectionRegistry {
    factory: Arc<dyn PersistentAdapterFactory>,
    adapters: LockFreeHashMap<String, Arc<dyn PersistentAdapter>>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionRegistry {
    /// 返回注册表和事件接收端，接收端由调用方的分发循环消费
    pub fn new(factory: Arc<dyn PersistentAdapterFactory>) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            factory,
            adapters: LockFreeHashMap::new(),
            events_tx,
        };
        (registry, events_rx)
    }

    /// 获取或创建地址对应的适配器（不建立连接）
    pub fn adapter(&self, url: &str) -> Arc<dyn PersistentAdapter> {
        self.adapters.get_or_insert_with(url.to_string(), || {
            tracing::debug!("[CONNECT] Creating persistent adapter for {}", url);
            self.factory.create(url, EventSink::new(url, self.events_tx.clone()))
        })
    }

    /// 幂等连接：已连接的适配器直接复用
    pub async fn connect(&self, url: &str, cancel: &CancellationToken) -> Result<Arc<dyn PersistentAdapter>, NetError> {
        let adapter = self.adapter(url);
        if adapter.is_connected() {
            return Ok(adapter);
        }

        tracing::info!("[CONNECT] Connecting to {}", url);
        adapter.connect(cancel).await?;
        tracing::info!("[CONNECT] Connected to {}", url);
        Ok(adapter)
    }

    /// 断开并移除单个连接
    pub async fn disconnect(&self, url: &str) -> bool {
        match self.adapters.remove(&url.to_string()) {
            Some(adapter) => {
                adapter.disconnect().await;
                tracing::info!("[CONNECT] Disconnected from {}", url);
                true
            }
            None => false,
        }
    }

    pub async fn disconnect_all(&self) {
        for (url, adapter) in self.adapters.drain() {
            adapter.disconnect().await;
            tracing::info!("[CONNECT] Disconnected from {}", url);
        }
    }

    /// 已登记的地址
    pub fn urls(&self) -> Vec<String> {
        self.adapters.snapshot().into_keys().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl ConnectivityProbe for ConnectionRegistry {
    fn is_connected(&self, url: &str) -> bool {
        self.adapters
            .get(&url.to_string())
            .map_or(false, |adapter| adapter.is_connected())
    }
}

#[async_trait]
impl TransportAdapter for ConnectionRegistry {
    fn name(&self) -> &'static str {
        "persistent"
    }

    /// 总是先经过 [`ConnectionRegistry::connect`]；仅连接的请求在连接建立后直接成功返回
    async fn request(&self, request: Request, cancel: &CancellationToken) -> Response {
        let Some(url) = request.persistent_url().map(str::to_string) else {
            return Response::from_error(&NetError::missing_url("persistent_url"));
        };

        let adapter = match self.connect(&url, cancel).await {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::warn!("[CONNECT] Connecting to {} failed: {}", url, e);
                return Response::from_error(&e);
            }
        };

        if request.is_connect_only() {
            return Response::ok(None);
        }
        adapter.request(request, cancel).await
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.adapters.len())
            .finish()
    }
}
