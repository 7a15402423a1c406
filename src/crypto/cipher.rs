use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::{KeyWrapper, SymmetricCipher};
use crate::error::CryptoError;

/// 会话密钥长度
pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// 非 32 字节的密钥（例如服务端下发的通知密钥）先用 SHA-256 拉伸
fn normalize_key(key: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::MissingKey);
    }
    if key.len() == KEY_LEN {
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(key);
        return Ok(out);
    }
    Ok(Sha256::digest(key).into())
}

/// ChaCha20-Poly1305，输出格式 `nonce || ciphertext || tag`
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaChaCipher;

impl SymmetricCipher for ChaChaCipher {
    fn key_len(&self) -> usize {
        KEY_LEN
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = normalize_key(key)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }
        let key = normalize_key(key)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

/// X25519 密封包装：临时密钥协商 + SHA-256 派生 + ChaCha20-Poly1305
///
/// 输出格式 `ephemeral_public(32) || nonce || sealed_key || tag`
#[derive(Clone)]
pub struct X25519KeyWrapper {
    key_id: String,
    peer: PublicKey,
}

impl X25519KeyWrapper {
    pub fn new(key_id: impl Into<String>, peer: PublicKey) -> Self {
        Self {
            key_id: key_id.into(),
            peer,
        }
    }

    /// 从 base64 编码的 32 字节公钥创建
    pub fn from_base64(key_id: impl Into<String>, public_key: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(public_key.trim())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidPublicKey(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self::new(key_id, PublicKey::from(bytes)))
    }

    /// 生成一对密钥，公钥以 base64 返回
    pub fn generate_keypair() -> (StaticSecret, String) {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        (secret, STANDARD.encode(public.as_bytes()))
    }

    fn derive_kek(shared: &[u8], ephemeral: &PublicKey, peer: &PublicKey) -> [u8; KEY_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(shared);
        hasher.update(ephemeral.as_bytes());
        hasher.update(peer.as_bytes());
        hasher.finalize().into()
    }

    /// 对端使用自己的私钥解出会话密钥
    pub fn unwrap_with(secret: &StaticSecret, wrapped: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if wrapped.len() < 32 {
            return Err(CryptoError::Decrypt("wrapped key too short".to_string()));
        }
        let (ephemeral, sealed) = wrapped.split_at(32);
        let mut ephemeral_bytes = [0u8; 32];
        ephemeral_bytes.copy_from_slice(ephemeral);
        let ephemeral = PublicKey::from(ephemeral_bytes);

        let shared = secret.diffie_hellman(&ephemeral);
        let kek = Self::derive_kek(shared.as_bytes(), &ephemeral, &PublicKey::from(secret));
        ChaChaCipher.decrypt(&kek, sealed)
    }
}

impl KeyWrapper for X25519KeyWrapper {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn wrap(&self, session_key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral = PublicKey::from(&ephemeral_secret);
        let shared = ephemeral_secret.diffie_hellman(&self.peer);
        let kek = Self::derive_kek(shared.as_bytes(), &ephemeral, &self.peer);

        let sealed = ChaChaCipher
            .encrypt(&kek, session_key)
            .map_err(|e| CryptoError::Wrap(e.to_string()))?;

        let mut out = Vec::with_capacity(32 + sealed.len());
        out.extend_from_slice(ephemeral.as_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }
}

impl std::fmt::Debug for X25519KeyWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519KeyWrapper")
            .field("key_id", &self.key_id)
            .finish()
    }
}
