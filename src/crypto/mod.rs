//! 会话密钥与混合加密
//!
//! 对称密钥由 [`SymmetricCipher`] 使用，非对称包装由 [`KeyWrapper`] 完成，
//! 具体原语可替换；[`SessionCryptoStore`] 负责密钥的生命周期。

pub mod cipher;
pub mod store;

pub use cipher::{ChaChaCipher, X25519KeyWrapper, KEY_LEN};
pub use store::SessionCryptoStore;

use crate::error::CryptoError;

/// 对称加解密原语
pub trait SymmetricCipher: Send + Sync {
    /// 新会话密钥的长度
    fn key_len(&self) -> usize;

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// 用对端公钥包装会话密钥
pub trait KeyWrapper: Send + Sync {
    /// 公钥标识，随引导头一起发送
    fn key_id(&self) -> &str;

    fn wrap(&self, session_key: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// 密钥作用域
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CryptoScope {
    /// 某个长连接地址独占
    Persistent(String),
    /// 所有一次性请求共享
    Inconstant,
}

impl CryptoScope {
    pub fn tag(&self) -> &'static str {
        match self {
            CryptoScope::Persistent(_) => "persistent",
            CryptoScope::Inconstant => "inconstant",
        }
    }
}

/// 会话密钥信息
///
/// 创建后不再修改，轮换时整体替换。
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoInfo {
    key: Vec<u8>,
    public_key_id: String,
    cache: String,
    scope: CryptoScope,
}

impl CryptoInfo {
    pub fn new(key: Vec<u8>, public_key_id: impl Into<String>, cache: impl Into<String>, scope: CryptoScope) -> Self {
        Self {
            key,
            public_key_id: public_key_id.into(),
            cache: cache.into(),
            scope,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }

    pub fn public_key_id(&self) -> &str {
        &self.public_key_id
    }

    /// 已包装并 base64 编码的会话密钥
    pub fn cache(&self) -> &str {
        &self.cache
    }

    pub fn scope(&self) -> &CryptoScope {
        &self.scope
    }

    /// 首次通信使用的引导头：`{publicKeyId},{base64WrappedKey}`
    pub fn bootstrap_value(&self) -> String {
        format!("{},{}", self.public_key_id, self.cache)
    }
}

impl std::fmt::Debug for CryptoInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoInfo")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("public_key_id", &self.public_key_id)
            .field("scope", &self.scope)
            .finish()
    }
}
