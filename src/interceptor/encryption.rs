use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Interceptor, Next};
use crate::crypto::{CryptoInfo, SessionCryptoStore};
use crate::error::{CryptoError, NetError};
use crate::request::{Request, TransportKind};
use crate::response::Response;

/// 负载加解密
///
/// 长连接使用该地址独占的会话密钥，其余传输共享一次性密钥。
pub struct EncryptionInterceptor {
    store: Arc<SessionCryptoStore>,
}

impl EncryptionInterceptor {
    pub fn new(store: Arc<SessionCryptoStore>) -> Self {
        Self { store }
    }

    fn crypto_info(&self, request: &Request) -> Option<Arc<CryptoInfo>> {
        match request.transport() {
            TransportKind::Persistent => request.persistent_url().map(|url| self.store.get_persistent(url)),
            _ => Some(self.store.get_inconstant()),
        }
    }
}

#[async_trait]
impl Interceptor for EncryptionInterceptor {
    fn name(&self) -> &'static str {
        "encryption"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Response {
        let info = match self.crypto_info(&request) {
            Some(info) if info.has_key() => info,
            _ => return Response::from_error(&NetError::Crypto(CryptoError::MissingKey)),
        };

        let transport = request.transport();
        let crypto_header = self
            .store
            .short_term_token(&info)
            .unwrap_or_else(|| info.bootstrap_value());
        let mut request = request.with_crypto(crypto_header);

        if let Some(body) = request.body() {
            match self.store.cipher().encrypt(info.key(), body) {
                Ok(sealed) => request = request.with_body(sealed),
                Err(e) => return Response::from_error(&NetError::Crypto(e)),
            }
        }

        let response = next.proceed(request).await;

        if transport != TransportKind::Persistent {
            if let Some(epoch) = response.encrypt_epoch().filter(|epoch| !epoch.is_empty()) {
                tracing::debug!("[CRYPTO] peer issued short-term key token");
                self.store.set_short_term_token(&info, epoch);
            }
        }

        let Some(body) = response.body() else {
            return response;
        };
        match self.store.cipher().decrypt(info.key(), body) {
            Ok(plain) => response.with_body(Some(Bytes::from(plain))),
            Err(e) => Response::from_error(&NetError::Crypto(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CryptoConfig;
    use crate::crypto::{SymmetricCipher, X25519KeyWrapper};
    use crate::error::NetCode;
    use crate::interceptor::{Chain, TerminalStage};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Plays the peer: decrypts with the session key it was given and
    /// seals a reply under the same key.
    struct Peer {
        store: Arc<SessionCryptoStore>,
        epoch: Option<String>,
        seen: Mutex<Vec<Request>>,
    }

    #[async_trait]
    impl TerminalStage for Peer {
        fn name(&self) -> &'static str {
            "peer"
        }

        async fn dispatch(&self, request: Request, _cancel: &CancellationToken) -> Response {
            self.seen.lock().push(request.clone());
            let key = match request.transport() {
                TransportKind::Persistent => self.store.get_persistent(request.persistent_url().unwrap()),
                _ => self.store.get_inconstant(),
            };
            let plain = self
                .store
                .cipher()
                .decrypt(key.key(), request.body().unwrap())
                .unwrap();
            let mut reply = b"echo:".to_vec();
            reply.extend_from_slice(&plain);
            let sealed = self.store.cipher().encrypt(key.key(), &reply).unwrap();
            Response::ok(Some(Bytes::from(sealed))).with_encrypt_epoch(self.epoch.clone())
        }
    }

    struct Garbage;

    #[async_trait]
    impl TerminalStage for Garbage {
        fn name(&self) -> &'static str {
            "garbage"
        }

        async fn dispatch(&self, _request: Request, _cancel: &CancellationToken) -> Response {
            Response::ok(Some(Bytes::from_static(b"definitely not ciphertext")))
        }
    }

    fn store() -> Arc<SessionCryptoStore> {
        let (_, public) = X25519KeyWrapper::generate_keypair();
        Arc::new(SessionCryptoStore::from_config(&CryptoConfig {
            public_key: Some(public),
            public_key_id: "pk-1".to_string(),
            inconstant_key_expiry: Duration::from_secs(3600),
        }))
    }

    fn run_chain(store: &Arc<SessionCryptoStore>, terminal: Arc<dyn TerminalStage>) -> Chain {
        Chain::new(
            vec![Arc::new(EncryptionInterceptor::new(store.clone()))],
            terminal,
            CancellationToken::new(),
        )
    }

    /// Cipher that generates keys but refuses to seal anything.
    struct FailingCipher;

    impl SymmetricCipher for FailingCipher {
        fn key_len(&self) -> usize {
            32
        }

        fn encrypt(&self, _key: &[u8], _plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Err(CryptoError::Encrypt("cipher offline".into()))
        }

        fn decrypt(&self, _key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(ciphertext.to_vec())
        }
    }

    #[tokio::test]
    async fn test_encrypt_failure_skips_dispatch() {
        let store = Arc::new(SessionCryptoStore::new(
            Arc::new(FailingCipher),
            None,
            "pk-1",
            Duration::from_secs(3600),
        ));
        let peer = Arc::new(Peer {
            store: store.clone(),
            epoch: None,
            seen: Mutex::new(Vec::new()),
        });

        let request = Request::new("s", "m")
            .with_transport(TransportKind::Inconstant)
            .with_body(&b"hello"[..]);
        let response = run_chain(&store, peer.clone()).run(request).await;

        assert_eq!(response.net_code(), NetCode::EncryptFailed);
        assert!(response.net_message().contains("cipher offline"));
        assert!(response.body().is_none());
        assert!(peer.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_and_bootstrap_header() {
        let store = store();
        let peer = Arc::new(Peer {
            store: store.clone(),
            epoch: None,
            seen: Mutex::new(Vec::new()),
        });

        let request = Request::new("s", "m")
            .with_inconstant_url("https://api.example.com")
            .with_transport(TransportKind::Inconstant)
            .with_body(&b"hello"[..]);
        let response = run_chain(&store, peer.clone()).run(request).await;

        assert!(response.is_success());
        assert_eq!(response.body().unwrap().as_ref(), b"echo:hello");

        let seen = peer.seen.lock()[0].clone();
        assert_ne!(seen.body().unwrap().as_ref(), b"hello");
        assert_eq!(seen.control().crypto.as_deref(), Some(store.get_inconstant().bootstrap_value().as_str()));
    }

    #[tokio::test]
    async fn test_epoch_token_replaces_bootstrap_for_inconstant() {
        let store = store();
        let peer = Arc::new(Peer {
            store: store.clone(),
            epoch: Some("epoch-7".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let request = Request::new("s", "m")
            .with_transport(TransportKind::Inconstant)
            .with_body(&b"x"[..]);

        run_chain(&store, peer.clone()).run(request.clone()).await;
        run_chain(&store, peer.clone()).run(request).await;

        let seen = peer.seen.lock();
        assert!(seen[0].control().crypto.as_deref().unwrap().starts_with("pk-1,"));
        assert_eq!(seen[1].control().crypto.as_deref(), Some("epoch-7"));
    }

    #[tokio::test]
    async fn test_persistent_scope_ignores_epoch() {
        let store = store();
        let peer = Arc::new(Peer {
            store: store.clone(),
            epoch: Some("epoch-9".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let request = Request::new("s", "m")
            .with_persistent_url("wss://a.example.com/ws")
            .with_transport(TransportKind::Persistent)
            .with_body(&b"x"[..]);

        run_chain(&store, peer.clone()).run(request.clone()).await;
        let response = run_chain(&store, peer.clone()).run(request).await;
        assert_eq!(response.body().unwrap().as_ref(), b"echo:x");

        let seen = peer.seen.lock();
        let bootstrap = store.get_persistent("wss://a.example.com/ws").bootstrap_value();
        assert_eq!(seen[1].control().crypto.as_deref(), Some(bootstrap.as_str()));
    }

    #[tokio::test]
    async fn test_decrypt_failure_short_circuits() {
        let store = store();
        let request = Request::new("s", "m").with_transport(TransportKind::Inconstant);
        let response = run_chain(&store, Arc::new(Garbage)).run(request).await;
        assert_eq!(response.net_code(), NetCode::DecryptFailed);
        assert!(response.body().is_none());
    }

    #[tokio::test]
    async fn test_persistent_without_url_has_no_key() {
        let store = store();
        let request = Request::new("s", "m").with_transport(TransportKind::Persistent);
        let response = run_chain(&store, Arc::new(Garbage)).run(request).await;
        assert_eq!(response.net_code(), NetCode::CryptoUnavailable);
    }
}
