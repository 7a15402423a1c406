use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{PushMessage, PushSubscriberRegistry};
use crate::codec::Compressor;
use crate::config::PushConfig;
use crate::crypto::SessionCryptoStore;
use crate::lockfree::LockFreeHashMap;

/// 密钥轮换控制消息的负载
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotation {
    pub notify_key: String,
}

/// 推送被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 长连接还没有会话密钥
    MissingSessionKey,
    /// 还没有收到过轮换消息
    MissingNotifyKey,
    DecryptFailed,
    DecompressFailed,
    DecodeFailed,
    EmptyNotifyKey,
}

/// 一条推送的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    KeyRotated,
    Delivered(usize),
    NoSubscriber,
    Dropped(DropReason),
}

pub struct PushDispatcher {
    rotation_package: String,
    crypto: Arc<SessionCryptoStore>,
    compressor: Arc<dyn Compressor>,
    subscribers: Arc<PushSubscriberRegistry>,
    /// 地址 -> 最近一次轮换下发的通知密钥
    notify_keys: LockFreeHashMap<String, Arc<Vec<u8>>>,
}

impl PushDispatcher {
    pub fn new(
        config: &PushConfig,
        crypto: Arc<SessionCryptoStore>,
        compressor: Arc<dyn Compressor>,
        subscribers: Arc<PushSubscriberRegistry>,
    ) -> Self {
        Self {
            rotation_package: config.key_rotation_package.clone(),
            crypto,
            compressor,
            subscribers,
            notify_keys: LockFreeHashMap::new(),
        }
    }

    pub fn subscribers(&self) -> &Arc<PushSubscriberRegistry> {
        &self.subscribers
    }

    pub fn has_notify_key(&self, url: &str) -> bool {
        self.notify_keys.contains_key(&url.to_string())
    }

    pub fn clear_notify_keys(&self) {
        self.notify_keys.clear();
    }

    /// 处理一条推送。任何解码失败只影响这一条消息。
    pub fn dispatch(&self, message: PushMessage) -> PushOutcome {
        let outcome = if message.notify_package() == self.rotation_package {
            self.rotate(&message)
        } else {
            self.deliver(message)
        };

        if let PushOutcome::Dropped(reason) = outcome {
            tracing::warn!("[PUSH] message dropped: {:?}", reason);
        }
        outcome
    }

    fn rotate(&self, message: &PushMessage) -> PushOutcome {
        let info = match self.crypto.peek_persistent(message.url()) {
            Some(info) if info.has_key() => info,
            _ => return PushOutcome::Dropped(DropReason::MissingSessionKey),
        };

        let payload = match self.open(info.key(), message) {
            Ok(payload) => payload,
            Err(reason) => return PushOutcome::Dropped(reason),
        };

        let rotation: KeyRotation = match message.content_encoding().decode(&payload) {
            Ok(rotation) => rotation,
            Err(e) => {
                tracing::debug!("[PUSH] undecodable key rotation from {}: {}", message.url(), e);
                return PushOutcome::Dropped(DropReason::DecodeFailed);
            }
        };
        if rotation.notify_key.is_empty() {
            return PushOutcome::Dropped(DropReason::EmptyNotifyKey);
        }

        self.notify_keys
            .insert(message.url().to_string(), Arc::new(rotation.notify_key.into_bytes()));
        tracing::info!("[PUSH] notify key rotated for {}", message.url());
        PushOutcome::KeyRotated
    }

    fn deliver(&self, message: PushMessage) -> PushOutcome {
        let Some(key) = self.notify_keys.get(&message.url().to_string()) else {
            tracing::debug!("[PUSH] no notify key yet for {}", message.url());
            return PushOutcome::Dropped(DropReason::MissingNotifyKey);
        };

        let payload = match self.open(&key, &message) {
            Ok(payload) => payload,
            Err(reason) => return PushOutcome::Dropped(reason),
        };
        let message = message.with_body(payload).with_compressed(false);

        let handlers = self.subscribers.handlers(message.url());
        if handlers.is_empty() {
            tracing::warn!(
                "[PUSH] no subscriber for {} ({})",
                self.subscribers.normalize(message.url()),
                message.notify_package()
            );
            return PushOutcome::NoSubscriber;
        }

        let mut delivered = 0;
        for handler in handlers {
            let copy = message.clone();
            match catch_unwind(AssertUnwindSafe(|| handler(copy))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!("[PUSH] subscriber panicked handling {}", message.notify_package()),
            }
        }
        PushOutcome::Delivered(delivered)
    }

    /// 解密，再按标志解压
    fn open(&self, key: &[u8], message: &PushMessage) -> Result<Vec<u8>, DropReason> {
        let plain = self
            .crypto
            .cipher()
            .decrypt(key, message.body())
            .map_err(|_| DropReason::DecryptFailed)?;
        if !message.is_compressed() {
            return Ok(plain);
        }
        self.compressor
            .decompress(&plain)
            .map_err(|_| DropReason::DecompressFailed)
    }
}

impl std::fmt::Debug for PushDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushDispatcher")
            .field("rotation_package", &self.rotation_package)
            .field("notify_keys", &self.notify_keys.len())
            .finish()
    }
}
