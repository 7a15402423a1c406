use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::ContentEncoding;

/// 传输方式偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportKind {
    /// 未指定，由配置中的默认值决定
    #[default]
    Unset,
    /// 一次性请求（HTTP）
    Inconstant,
    /// 长连接（WebSocket）
    Persistent,
    /// 优先长连接，失败回退到一次性请求
    PersistentPreferred,
    /// 优先一次性请求，失败时在长连接可用的情况下重试
    InconstantPreferred,
    /// 旧版自适应模式，等同于 `PersistentPreferred`
    Adaptive,
}

impl TransportKind {
    /// 带回退策略的变体
    pub fn has_fallback(self) -> bool {
        matches!(
            self,
            TransportKind::PersistentPreferred | TransportKind::InconstantPreferred | TransportKind::Adaptive
        )
    }

    /// 解析哨兵和旧版变体
    pub fn resolve(self, default: TransportKind) -> TransportKind {
        match self {
            TransportKind::Unset => match default {
                TransportKind::Unset => TransportKind::Inconstant,
                other => other.resolve(TransportKind::Inconstant),
            },
            TransportKind::Adaptive => TransportKind::PersistentPreferred,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Unset => "unset",
            TransportKind::Inconstant => "inconstant",
            TransportKind::Persistent => "persistent",
            TransportKind::PersistentPreferred => "persistent_preferred",
            TransportKind::InconstantPreferred => "inconstant_preferred",
            TransportKind::Adaptive => "adaptive",
        }
    }
}

/// 请求控制块，序列化后放入请求控制头
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestControl {
    pub seq_id: i64,
    pub service: String,
    pub method: String,
    pub routing_key: Option<String>,
    pub compressed: bool,
    pub crypto: Option<String>,
    pub reason: Option<String>,
}

/// 一次逻辑请求
///
/// 拦截器之间按值传递，每个阶段通过 `with_*` 产生新的请求，
/// 调用方持有的实例不会被后续阶段修改。
#[derive(Debug, Clone, Default)]
pub struct Request {
    inconstant_url: Option<String>,
    persistent_url: Option<String>,
    transport: TransportKind,
    body: Option<Bytes>,
    content_encoding: ContentEncoding,
    headers: BTreeMap<String, String>,
    auth_token: Option<String>,
    control: RequestControl,
    connect_only: bool,
}

impl Request {
    /// 创建业务请求
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            control: RequestControl {
                service: service.into(),
                method: method.into(),
                ..RequestControl::default()
            },
            ..Self::default()
        }
    }

    /// 创建仅用于建立长连接的请求
    pub fn connect_only(persistent_url: impl Into<String>) -> Self {
        Self {
            persistent_url: Some(persistent_url.into()),
            transport: TransportKind::Persistent,
            connect_only: true,
            ..Self::default()
        }
        .with_reason("connect")
    }

    pub fn inconstant_url(&self) -> Option<&str> {
        self.inconstant_url.as_deref()
    }

    pub fn persistent_url(&self) -> Option<&str> {
        self.persistent_url.as_deref()
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn content_encoding(&self) -> ContentEncoding {
        self.content_encoding
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn control(&self) -> &RequestControl {
        &self.control
    }

    pub fn is_connect_only(&self) -> bool {
        self.connect_only
    }

    /// 自适应统计使用的目标键：优先长连接地址
    pub fn destination_key(&self) -> Option<&str> {
        self.persistent_url().or_else(|| self.inconstant_url())
    }

    /// 当前传输方式对应的目标地址
    pub fn target_url(&self) -> Option<&str> {
        match self.transport {
            TransportKind::Persistent => self.persistent_url(),
            TransportKind::Inconstant => self.inconstant_url(),
            _ => None,
        }
    }

    pub fn with_inconstant_url(mut self, url: impl Into<String>) -> Self {
        self.inconstant_url = Some(url.into());
        self
    }

    pub fn with_persistent_url(mut self, url: impl Into<String>) -> Self {
        self.persistent_url = Some(url.into());
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_content_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.content_encoding = encoding;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_seq_id(mut self, seq_id: i64) -> Self {
        self.control.seq_id = seq_id;
        self
    }

    pub fn with_compressed(mut self, compressed: bool) -> Self {
        self.control.compressed = compressed;
        self
    }

    pub fn with_crypto(mut self, crypto: impl Into<String>) -> Self {
        self.control.crypto = Some(crypto.into());
        self
    }

    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.control.routing_key = Some(routing_key.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.control.reason = Some(reason.into());
        self
    }
}
