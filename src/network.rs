//! 网络门面
//!
//! [`NetworkManager`] 把拦截器链、传输选择、长连接注册表和推送子系统组装在一起。
//! 它是显式构建的句柄而不是全局单例，测试里可以并行创建多个实例。

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::codec::{Compressor, GzipCompressor};
use crate::config::NetworkConfig;
use crate::crypto::SessionCryptoStore;
use crate::error::NetError;
use crate::interceptor::{
    Chain, CompressionInterceptor, DispatchStage, EncryptionInterceptor, HeaderInterceptor, Interceptor,
    LoggingInterceptor, TerminalStage,
};
use crate::push::{HandlerId, PushDispatcher, PushHandler, PushSubscriberRegistry};
use crate::request::Request;
use crate::response::Response;
use crate::routing::RoutingKeyRegistry;
use crate::sequence::TaskIdGenerator;
use crate::strategy::{AdaptiveTransportStrategy, StrategySnapshot};
use crate::transport::{
    ConnectionEvent, ConnectionEventKind, ConnectionRegistry, PersistentAdapterFactory, TransportAdapter,
    TransportSelector,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// 连接生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Closed { url: String, code: u16, reason: String },
    Error { url: String, message: String },
}

/// 网络门面构建器
pub struct NetworkManagerBuilder {
    config: NetworkConfig,
    inconstant: Option<Arc<dyn TransportAdapter>>,
    persistent: Option<Arc<dyn PersistentAdapterFactory>>,
    compressor: Option<Arc<dyn Compressor>>,
    crypto: Option<Arc<SessionCryptoStore>>,
}

impl NetworkManagerBuilder {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            inconstant: None,
            persistent: None,
            compressor: None,
            crypto: None,
        }
    }

    /// 替换一次性请求适配器（默认 HTTP）
    pub fn with_inconstant_adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.inconstant = Some(adapter);
        self
    }

    /// 替换长连接适配器工厂（默认 WebSocket）
    pub fn with_persistent_factory(mut self, factory: Arc<dyn PersistentAdapterFactory>) -> Self {
        self.persistent = Some(factory);
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    /// 使用自定义原语构建的密钥存储
    pub fn with_crypto_store(mut self, store: Arc<SessionCryptoStore>) -> Self {
        self.crypto = Some(store);
        self
    }

    /// 构建门面并启动事件分发循环，必须在 tokio 运行时内调用
    pub fn build(self) -> Result<NetworkManager, NetError> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NetError::Runtime(format!("NetworkManager requires a tokio runtime: {}", e)))?;

        let config = self.config;
        let inconstant = match self.inconstant {
            Some(adapter) => adapter,
            None => default_inconstant(&config)?,
        };
        let persistent = match self.persistent {
            Some(factory) => factory,
            None => default_persistent(&config)?,
        };
        let compressor = self
            .compressor
            .unwrap_or_else(|| Arc::new(GzipCompressor::new(config.compression.level)));
        let crypto = self
            .crypto
            .unwrap_or_else(|| Arc::new(SessionCryptoStore::from_config(&config.crypto)));

        let (registry, connection_events) = ConnectionRegistry::new(persistent);
        let registry = Arc::new(registry);
        let strategy = Arc::new(AdaptiveTransportStrategy::new(config.strategy.clone(), registry.clone()));
        let selector = Arc::new(TransportSelector::new(inconstant, registry.clone(), strategy));
        let routing = Arc::new(RoutingKeyRegistry::new());

        let stages: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(LoggingInterceptor::new(config.logging.body_preview_limit)),
            Arc::new(CompressionInterceptor::new(compressor.clone(), config.compression.threshold)),
            Arc::new(EncryptionInterceptor::new(crypto.clone())),
            Arc::new(HeaderInterceptor::new(config.public_params.clone(), routing.clone())),
        ];
        let terminal: Arc<dyn TerminalStage> = Arc::new(DispatchStage::new(selector.clone()));

        let subscribers = Arc::new(PushSubscriberRegistry::new(config.push.volatile_query_params.clone()));
        let push = Arc::new(PushDispatcher::new(&config.push, crypto.clone(), compressor, subscribers));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();
        runtime.spawn(run_event_loop(connection_events, push.clone(), events.clone(), shutdown.clone()));

        tracing::info!(
            "[NETWORK] ready: inconstant={:?} persistent={:?} default_transport={}",
            config.inconstant_url,
            config.persistent_url,
            config.default_transport.as_str()
        );

        Ok(NetworkManager {
            config,
            ids: TaskIdGenerator::new(),
            crypto,
            routing,
            registry,
            selector,
            stages,
            terminal,
            push,
            account_token: RwLock::new(None),
            events,
            shutdown,
        })
    }
}

#[cfg(feature = "http")]
fn default_inconstant(config: &NetworkConfig) -> Result<Arc<dyn TransportAdapter>, NetError> {
    Ok(Arc::new(crate::transport::HttpAdapter::new(config.request_timeout)?))
}

#[cfg(not(feature = "http"))]
fn default_inconstant(_config: &NetworkConfig) -> Result<Arc<dyn TransportAdapter>, NetError> {
    Err(NetError::config_error("inconstant", "no adapter configured and the `http` feature is disabled"))
}

#[cfg(feature = "websocket")]
fn default_persistent(config: &NetworkConfig) -> Result<Arc<dyn PersistentAdapterFactory>, NetError> {
    Ok(Arc::new(crate::transport::WebSocketAdapterFactory::new(config.request_timeout)))
}

#[cfg(not(feature = "websocket"))]
fn default_persistent(_config: &NetworkConfig) -> Result<Arc<dyn PersistentAdapterFactory>, NetError> {
    Err(NetError::config_error("persistent", "no factory configured and the `websocket` feature is disabled"))
}

/// 连接事件分发循环：推送交给推送子系统，关闭 / 错误广播给订阅者
async fn run_event_loop(
    mut connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    push: Arc<PushDispatcher>,
    events: broadcast::Sender<NetworkEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = connection_events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let ConnectionEvent { url, kind } = event;
        let network_event = match kind {
            ConnectionEventKind::Push(message) => {
                push.dispatch(message);
                continue;
            }
            ConnectionEventKind::Closed { code, reason } => {
                tracing::info!("[CONNECT] {} closed: code={} reason={}", url, code, reason);
                NetworkEvent::Closed { url, code, reason }
            }
            ConnectionEventKind::Error(message) => {
                tracing::warn!("[CONNECT] {} error: {}", url, message);
                NetworkEvent::Error { url, message }
            }
        };
        // 没有订阅者时发送失败是正常情况
        let _ = events.send(network_event);
    }
    tracing::debug!("[NETWORK] event loop stopped");
}

pub struct NetworkManager {
    config: NetworkConfig,
    ids: TaskIdGenerator,
    crypto: Arc<SessionCryptoStore>,
    routing: Arc<RoutingKeyRegistry>,
    registry: Arc<ConnectionRegistry>,
    selector: Arc<TransportSelector>,
    stages: Vec<Arc<dyn Interceptor>>,
    terminal: Arc<dyn TerminalStage>,
    push: Arc<PushDispatcher>,
    account_token: RwLock<Option<String>>,
    events: broadcast::Sender<NetworkEvent>,
    shutdown: CancellationToken,
}

impl NetworkManager {
    pub fn builder(config: NetworkConfig) -> NetworkManagerBuilder {
        NetworkManagerBuilder::new(config)
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// 带配置默认编码的业务请求
    pub fn new_request(&self, service: impl Into<String>, method: impl Into<String>) -> Request {
        Request::new(service, method).with_content_encoding(self.config.content_encoding)
    }

    /// 发送一次逻辑请求
    ///
    /// 带回退的传输偏好会按优先级逐个尝试，每次尝试都完整地走一遍拦截器链。
    pub async fn request(&self, request: Request, cancel: &CancellationToken) -> Response {
        let request = self.prepare(request);
        self.selector
            .execute(request, |attempt| self.run_chain(attempt, cancel))
            .await
    }

    /// 仅建立长连接，不发送业务数据
    pub async fn connect(&self, url: Option<&str>, cancel: &CancellationToken) -> Response {
        let Some(url) = url.or(self.config.persistent_url.as_deref()) else {
            return Response::from_error(&NetError::missing_url("persistent_url"));
        };
        let request = self.prepare(Request::connect_only(url));
        self.run_chain(request, cancel).await
    }

    /// 断开单个长连接，默认为配置中的长连接地址
    pub async fn disconnect(&self, url: Option<&str>) -> bool {
        match url.or(self.config.persistent_url.as_deref()) {
            Some(url) => self.registry.disconnect(url).await,
            None => false,
        }
    }

    pub async fn disconnect_all(&self) {
        self.registry.disconnect_all().await;
    }

    pub fn is_connected(&self, url: &str) -> bool {
        crate::strategy::ConnectivityProbe::is_connected(self.registry.as_ref(), url)
    }

    pub fn register_push_handler(&self, url: &str, handler: PushHandler) -> HandlerId {
        self.push.subscribers().register(url, handler)
    }

    pub fn unregister_push_handler(&self, url: &str, id: HandlerId) -> bool {
        self.push.subscribers().unregister(url, id)
    }

    pub fn push_handler_count(&self, url: &str) -> usize {
        self.push.subscribers().count(url)
    }

    pub fn set_account_token(&self, token: Option<String>) {
        *self.account_token.write() = token;
    }

    pub fn account_token(&self) -> Option<String> {
        self.account_token.read().clone()
    }

    /// 清空账号相关的全部状态并断开所有长连接
    pub async fn logout(&self) {
        self.set_account_token(None);
        self.crypto.clear_all();
        self.push.clear_notify_keys();
        self.routing.clear();
        self.registry.disconnect_all().await;
        tracing::info!("[NETWORK] logged out, session state cleared");
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    pub fn strategy_snapshot(&self, destination: &str) -> Option<StrategySnapshot> {
        self.selector.strategy().snapshot(destination)
    }

    /// 补齐默认地址、序列号、认证令牌和传输方式
    fn prepare(&self, request: Request) -> Request {
        let mut request = request;
        if request.inconstant_url().is_none() {
            if let Some(url) = &self.config.inconstant_url {
                request = request.with_inconstant_url(url.clone());
            }
        }
        if request.persistent_url().is_none() {
            if let Some(url) = &self.config.persistent_url {
                request = request.with_persistent_url(url.clone());
            }
        }
        if request.auth_token().is_none() {
            if let Some(token) = self.account_token() {
                request = request.with_auth_token(token);
            }
        }

        let transport = request.transport().resolve(self.config.default_transport);
        request.with_seq_id(self.ids.generate()).with_transport(transport)
    }

    async fn run_chain(&self, request: Request, cancel: &CancellationToken) -> Response {
        let chain = Chain::new(self.stages.clone(), self.terminal.clone(), cancel.clone());
        chain.run(request).await
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("inconstant_url", &self.config.inconstant_url)
            .field("persistent_url", &self.config.persistent_url)
            .field("registry", &self.registry)
            .finish()
    }
}
