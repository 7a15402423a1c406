//! 统一配置
//!
//! 所有配置段都实现 `Default` 并使用 `#[serde(default)]`，
//! 因此可以只写需要覆盖的字段（例如从 TOML 加载）。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::{ContentEncoding, PublicParams};
use crate::error::ConfigError;
use crate::request::TransportKind;

/// 压缩配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// 请求体超过该字节数才压缩
    pub threshold: usize,
    /// gzip 压缩级别 (0-9)
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold: 1024,
            level: 6,
        }
    }
}

/// 会话密钥配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// base64 编码的 X25519 公钥
    pub public_key: Option<String>,
    /// 公钥标识
    pub public_key_id: String,
    /// 一次性请求共享密钥的有效期
    pub inconstant_key_expiry: Duration,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            public_key_id: String::new(),
            inconstant_key_expiry: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// 自适应传输策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// 滚动窗口大小
    pub window_size: usize,
    /// 长连接连续超时阈值
    pub timeout_threshold: u32,
    /// 长连接等待响应数阈值
    pub awaiting_threshold: u32,
    /// 长连接平均延迟超过一次性请求平均延迟的倍数
    pub latency_ratio: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            timeout_threshold: 5,
            awaiting_threshold: 5,
            latency_ratio: 2.0,
        }
    }
}

/// 推送配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// 随会话变化的查询参数，归一化订阅地址时去掉
    pub volatile_query_params: Vec<String>,
    /// 密钥轮换控制消息的通知包名
    pub key_rotation_package: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            volatile_query_params: vec!["uid".to_string(), "userId".to_string()],
            key_rotation_package: "notify.rotate_key".to_string(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志中最多展示的请求 / 响应体字节数
    pub body_preview_limit: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            body_preview_limit: 256,
        }
    }
}

/// 网络层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// 默认一次性请求地址
    pub inconstant_url: Option<String>,
    /// 默认长连接地址
    pub persistent_url: Option<String>,
    /// 请求未指定传输方式时使用
    pub default_transport: TransportKind,
    /// 默认载荷编码
    pub content_encoding: ContentEncoding,
    /// 单次请求超时
    pub request_timeout: Duration,
    pub compression: CompressionConfig,
    pub crypto: CryptoConfig,
    pub strategy: StrategyConfig,
    pub push: PushConfig,
    pub logging: LoggingConfig,
    pub public_params: PublicParams,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            inconstant_url: None,
            persistent_url: None,
            default_transport: TransportKind::InconstantPreferred,
            content_encoding: ContentEncoding::Binary,
            request_timeout: Duration::from_secs(10),
            compression: CompressionConfig::default(),
            crypto: CryptoConfig::default(),
            strategy: StrategyConfig::default(),
            push: PushConfig::default(),
            logging: LoggingConfig::default(),
            public_params: PublicParams::default(),
        }
    }
}

impl NetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inconstant_url(mut self, url: impl Into<String>) -> Self {
        self.inconstant_url = Some(url.into());
        self
    }

    pub fn with_persistent_url(mut self, url: impl Into<String>) -> Self {
        self.persistent_url = Some(url.into());
        self
    }

    pub fn with_default_transport(mut self, transport: TransportKind) -> Self {
        self.default_transport = transport;
        self
    }

    pub fn with_public_key(mut self, key_id: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.crypto.public_key_id = key_id.into();
        self.crypto.public_key = Some(public_key.into());
        self
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        for address in [&self.inconstant_url, &self.persistent_url].into_iter().flatten() {
            url::Url::parse(address).map_err(|e| ConfigError::InvalidAddress {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.strategy.window_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "strategy.window_size".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        if self.strategy.latency_ratio.is_nan() || self.strategy.latency_ratio <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "strategy.latency_ratio".to_string(),
                reason: "must be > 0.0".to_string(),
            });
        }

        if self.compression.level > 9 {
            return Err(ConfigError::InvalidValue {
                field: "compression.level".to_string(),
                reason: "must be in 0..=9".to_string(),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        Ok(())
    }
}
