use std::time::Duration;

/// 传输层结果码
///
/// 稳定的整数编码，调用方根据它做分支判断，而不是解析错误文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(i32)]
pub enum NetCode {
    Ok = 0,
    Timeout = -1,
    Cancelled = -2,
    ConnectionClosed = -3,
    ConnectionError = -4,
    TransportFailure = -5,
    InvalidConfig = -10,
    ChainExhausted = -11,
    CompressFailed = -20,
    DecompressFailed = -21,
    CryptoUnavailable = -30,
    EncryptFailed = -31,
    DecryptFailed = -32,
    HeaderEncodeFailed = -40,
    HeaderDecodeFailed = -41,
}

impl NetCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == NetCode::Ok
    }
}

impl std::fmt::Display for NetCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

/// 编解码错误
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("Decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    /// 出站序列化失败
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Frame error: {0}")]
    Frame(String),
}

/// 加解密错误
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("No session key available")]
    MissingKey,

    #[error("No public key configured")]
    MissingPublicKey,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Key wrapping failed: {0}")]
    Wrap(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// 配置错误
#[derive(Debug, thiserror::Error, Clone)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
}

/// 统一网络错误类型
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// 配置相关错误
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 压缩 / 序列化相关错误
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// 会话密钥相关错误
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// 连接相关错误
    #[error("Connection error on '{url}': {reason}")]
    Connection { url: String, reason: String },

    /// 连接已关闭
    #[error("Connection closed on '{url}'")]
    ConnectionClosed { url: String },

    /// 超时错误
    #[error("Operation '{operation}' timeout after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// 调用方取消
    #[error("Operation cancelled")]
    Cancelled,

    /// 传输层返回失败
    #[error("Transport failure: {0}")]
    Transport(String),

    /// 运行环境错误（例如不在 tokio 运行时中）
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl NetError {
    /// 获取对应的结果码
    pub fn net_code(&self) -> NetCode {
        match self {
            NetError::Config(_) => NetCode::InvalidConfig,
            NetError::Codec(CodecError::Compress(_)) => NetCode::CompressFailed,
            NetError::Codec(CodecError::Decompress(_)) => NetCode::DecompressFailed,
            NetError::Codec(CodecError::Encode(_)) => NetCode::HeaderEncodeFailed,
            NetError::Codec(_) => NetCode::HeaderDecodeFailed,
            NetError::Crypto(CryptoError::Encrypt(_)) => NetCode::EncryptFailed,
            NetError::Crypto(CryptoError::Decrypt(_)) => NetCode::DecryptFailed,
            NetError::Crypto(_) => NetCode::CryptoUnavailable,
            NetError::Connection { .. } => NetCode::ConnectionError,
            NetError::ConnectionClosed { .. } => NetCode::ConnectionClosed,
            NetError::Timeout { .. } => NetCode::Timeout,
            NetError::Cancelled => NetCode::Cancelled,
            NetError::Transport(_) | NetError::Runtime(_) => NetCode::TransportFailure,
        }
    }

    /// 判断错误是否值得由调用方重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetError::Connection { .. } | NetError::ConnectionClosed { .. } | NetError::Timeout { .. }
        )
    }

    /// 创建配置错误
    pub fn config_error(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NetError::Config(ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// 创建缺失目标地址错误
    pub fn missing_url(field: impl Into<String>) -> Self {
        NetError::Config(ConfigError::MissingField { field: field.into() })
    }

    /// 创建连接错误
    pub fn connection_error(url: impl Into<String>, reason: impl Into<String>) -> Self {
        NetError::Connection {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout_error(operation: impl Into<String>, duration: Duration) -> Self {
        NetError::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

impl From<std::io::Error> for NetError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::TimedOut => NetError::Timeout {
                operation: "io".to_string(),
                duration: Duration::ZERO,
            },
            _ => NetError::Transport(format!("IO error: {}", error)),
        }
    }
}
