use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};

use super::{ChaChaCipher, CryptoInfo, CryptoScope, KeyWrapper, SymmetricCipher, X25519KeyWrapper};
use crate::config::CryptoConfig;
use crate::lockfree::LockFreeHashMap;

struct InconstantEntry {
    info: Arc<CryptoInfo>,
    updated_at: Instant,
}

/// Session key lifecycle for both scopes.
///
/// Persistent destinations get one key each for the lifetime of the store.
/// All one-shot destinations share a single key that is replaced once it is
/// older than the expiry window.
pub struct SessionCryptoStore {
    cipher: Arc<dyn SymmetricCipher>,
    wrapper: Option<Arc<dyn KeyWrapper>>,
    public_key_id: String,
    expiry: Duration,
    persistent: LockFreeHashMap<String, Arc<CryptoInfo>>,
    inconstant: Mutex<Option<InconstantEntry>>,
    /// 对端下发的短期令牌，按会话密钥的引导值索引
    short_term: LockFreeHashMap<String, String>,
}

impl SessionCryptoStore {
    pub fn new(
        cipher: Arc<dyn SymmetricCipher>,
        wrapper: Option<Arc<dyn KeyWrapper>>,
        public_key_id: impl Into<String>,
        expiry: Duration,
    ) -> Self {
        Self {
            cipher,
            wrapper,
            public_key_id: public_key_id.into(),
            expiry,
            persistent: LockFreeHashMap::new(),
            inconstant: Mutex::new(None),
            short_term: LockFreeHashMap::new(),
        }
    }

    /// Builds the store with the default primitives. A missing or unparsable
    /// public key is not fatal: keys are still generated, only the bootstrap
    /// value degrades to a placeholder.
    pub fn from_config(config: &CryptoConfig) -> Self {
        let wrapper: Option<Arc<dyn KeyWrapper>> = match config.public_key.as_deref() {
            Some(public_key) => match X25519KeyWrapper::from_base64(config.public_key_id.clone(), public_key) {
                Ok(wrapper) => Some(Arc::new(wrapper)),
                Err(e) => {
                    tracing::warn!("[CRYPTO] ignoring configured public key: {}", e);
                    None
                }
            },
            None => None,
        };

        Self::new(
            Arc::new(ChaChaCipher),
            wrapper,
            config.public_key_id.clone(),
            config.inconstant_key_expiry,
        )
    }

    pub fn cipher(&self) -> &Arc<dyn SymmetricCipher> {
        &self.cipher
    }

    /// Per-destination key, created on first use.
    pub fn get_persistent(&self, destination: &str) -> Arc<CryptoInfo> {
        self.persistent.get_or_insert_with(destination.to_string(), || {
            Arc::new(self.build(CryptoScope::Persistent(destination.to_string())))
        })
    }

    /// Per-destination key without creating one.
    pub fn peek_persistent(&self, destination: &str) -> Option<Arc<CryptoInfo>> {
        self.persistent.get(&destination.to_string())
    }

    /// Shared one-shot key, rotated once older than the expiry window.
    pub fn get_inconstant(&self) -> Arc<CryptoInfo> {
        let mut slot = self.inconstant.lock();
        if let Some(entry) = slot.as_ref() {
            if entry.updated_at.elapsed() <= self.expiry {
                return Arc::clone(&entry.info);
            }
            tracing::info!("[CRYPTO] inconstant session key expired, rotating");
        }

        let info = Arc::new(self.build(CryptoScope::Inconstant));
        *slot = Some(InconstantEntry {
            info: Arc::clone(&info),
            updated_at: Instant::now(),
        });
        info
    }

    /// Token the peer issued for this key, sent instead of the bootstrap value.
    pub fn short_term_token(&self, info: &CryptoInfo) -> Option<String> {
        self.short_term.get(&info.cache().to_string())
    }

    pub fn set_short_term_token(&self, info: &CryptoInfo, token: impl Into<String>) {
        self.short_term.insert(info.cache().to_string(), token.into());
    }

    /// Drops every key and issued token; used on logout or account switch.
    pub fn clear_all(&self) {
        self.persistent.clear();
        *self.inconstant.lock() = None;
        self.short_term.clear();
        tracing::debug!("[CRYPTO] all session keys cleared");
    }

    fn build(&self, scope: CryptoScope) -> CryptoInfo {
        let mut key = vec![0u8; self.cipher.key_len()];
        OsRng.fill_bytes(&mut key);

        let wrapped = match &self.wrapper {
            Some(wrapper) => wrapper
                .wrap(&key)
                .map(|bytes| (wrapper.key_id().to_string(), STANDARD.encode(bytes).replace('\n', ""))),
            None => Err(crate::error::CryptoError::MissingPublicKey),
        };

        match wrapped {
            Ok((key_id, cache)) => CryptoInfo::new(key, key_id, cache, scope),
            Err(e) => {
                let placeholder = format!("{}-{}", scope.tag(), chrono::Utc::now().timestamp_millis());
                tracing::warn!(
                    "[CRYPTO] key wrapping unavailable ({}), using placeholder bootstrap for {:?}",
                    e,
                    scope
                );
                CryptoInfo::new(key, self.public_key_id.clone(), placeholder, scope)
            }
        }
    }
}

impl std::fmt::Debug for SessionCryptoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCryptoStore")
            .field("persistent", &self.persistent.len())
            .field("has_wrapper", &self.wrapper.is_some())
            .field("expiry", &self.expiry)
            .finish()
    }
}
