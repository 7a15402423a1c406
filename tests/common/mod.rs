//! 集成测试共用的内存对端
//!
//! 对端像真实服务器一样工作：从请求控制头里取出引导值，用私钥解出会话密钥，
//! 解密（解压）请求体，再用同一个密钥加密回复。

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use parking_lot::Mutex;
use x25519_dalek::StaticSecret;

use hybridnet::codec::{
    decode_structured, encode_structured, Compressor, GzipCompressor, ResponseControlHeader, HEADER_AUTH_TOKEN,
    HEADER_REQUEST_CONTROL,
};
use hybridnet::crypto::{ChaChaCipher, SymmetricCipher, X25519KeyWrapper};
use hybridnet::transport::{EventSink, PersistentAdapter, PersistentAdapterFactory, TransportAdapter};
use hybridnet::{CancellationToken, ContentEncoding, NetCode, NetError, NetworkConfig, Request, RequestControl, Response, ResponseControl};

pub const INCONSTANT_URL: &str = "https://api.example.com/rpc";
pub const PERSISTENT_URL: &str = "wss://api.example.com/ws";

/// 对端看到的一次请求
#[derive(Debug, Clone)]
pub struct Observed {
    pub transport: &'static str,
    pub control: RequestControl,
    pub auth_token: Option<String>,
    pub plaintext: Vec<u8>,
}

pub struct Peer {
    secret: StaticSecret,
    /// 短期令牌 -> 会话密钥
    tokens: Mutex<HashMap<String, Vec<u8>>>,
    /// 下次回复携带的短期令牌
    issue_epoch: Mutex<Option<String>>,
    pub observed: Mutex<Vec<Observed>>,
    /// 最近一次长连接请求使用的会话密钥
    pub persistent_key: Mutex<Option<Vec<u8>>>,
}

impl Peer {
    pub fn new(secret: StaticSecret) -> Arc<Self> {
        Arc::new(Self {
            secret,
            tokens: Mutex::new(HashMap::new()),
            issue_epoch: Mutex::new(None),
            observed: Mutex::new(Vec::new()),
            persistent_key: Mutex::new(None),
        })
    }

    pub fn issue_epoch(&self, token: &str) {
        *self.issue_epoch.lock() = Some(token.to_string());
    }

    pub fn observed(&self) -> Vec<Observed> {
        self.observed.lock().clone()
    }

    fn session_key(&self, crypto: &str) -> Vec<u8> {
        if let Some(key) = self.tokens.lock().get(crypto) {
            return key.clone();
        }
        let (_, wrapped) = crypto.split_once(',').expect("bootstrap value");
        let wrapped = STANDARD.decode(wrapped).expect("base64 wrapped key");
        X25519KeyWrapper::unwrap_with(&self.secret, &wrapped).expect("unwrap session key")
    }

    pub fn handle(&self, transport: &'static str, request: &Request) -> Response {
        let control: RequestControl =
            decode_structured(request.content_encoding(), &request.headers()[HEADER_REQUEST_CONTROL]).unwrap();
        let key = self.session_key(control.crypto.as_deref().unwrap());
        if transport == "persistent" {
            *self.persistent_key.lock() = Some(key.clone());
        }

        let mut plaintext = match request.body() {
            Some(body) => ChaChaCipher.decrypt(&key, body).unwrap(),
            None => Vec::new(),
        };
        if control.compressed {
            plaintext = GzipCompressor::default().decompress(&plaintext).unwrap();
        }

        self.observed.lock().push(Observed {
            transport,
            control: control.clone(),
            auth_token: request.headers().get(HEADER_AUTH_TOKEN).cloned(),
            plaintext: plaintext.clone(),
        });

        let epoch = self.issue_epoch.lock().take();
        if let Some(token) = &epoch {
            self.tokens.lock().insert(token.clone(), key.clone());
        }

        let mut reply = format!("{}:", transport).into_bytes();
        reply.extend_from_slice(&plaintext);
        let sealed = ChaChaCipher.encrypt(&key, &reply).unwrap();

        let header = ResponseControlHeader {
            code: 200,
            message: "ok".to_string(),
            encrypt_epoch: epoch,
            server_time: Some(1_700_000_000_000),
            ..ResponseControlHeader::default()
        };
        let raw = encode_structured(request.content_encoding(), &header).unwrap();
        Response::ok(Some(Bytes::from(sealed))).with_control(ResponseControl::new(Some(raw)))
    }
}

/// 一次性请求适配器
pub struct FakeHttp {
    pub peer: Arc<Peer>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeHttp {
    pub fn new(peer: Arc<Peer>) -> Arc<Self> {
        Arc::new(Self {
            peer,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TransportAdapter for FakeHttp {
    fn name(&self) -> &'static str {
        "fake-http"
    }

    async fn request(&self, request: Request, _cancel: &CancellationToken) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Response::failure(NetCode::TransportFailure, "http unavailable");
        }
        self.peer.handle("inconstant", &request)
    }
}

/// 长连接适配器
pub struct FakeSocket {
    url: String,
    peer: Arc<Peer>,
    connected: AtomicBool,
    fail: Arc<AtomicBool>,
    pub events: EventSink,
}

impl FakeSocket {
    /// 模拟服务端关闭连接
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.events.closed(1001, "going away");
    }
}

#[async_trait]
impl TransportAdapter for FakeSocket {
    fn name(&self) -> &'static str {
        "fake-socket"
    }

    async fn request(&self, request: Request, _cancel: &CancellationToken) -> Response {
        if self.fail.load(Ordering::SeqCst) {
            return Response::failure(NetCode::Timeout, "socket timeout");
        }
        self.peer.handle("persistent", &request)
    }
}

#[async_trait]
impl PersistentAdapter for FakeSocket {
    async fn connect(&self, _cancel: &CancellationToken) -> Result<(), NetError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.events.closed(1000, "client disconnect");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

pub struct FakeSocketFactory {
    peer: Arc<Peer>,
    pub fail: Arc<AtomicBool>,
    pub sockets: Mutex<HashMap<String, Arc<FakeSocket>>>,
}

impl FakeSocketFactory {
    pub fn new(peer: Arc<Peer>) -> Arc<Self> {
        Arc::new(Self {
            peer,
            fail: Arc::new(AtomicBool::new(false)),
            sockets: Mutex::new(HashMap::new()),
        })
    }

    pub fn socket(&self, url: &str) -> Arc<FakeSocket> {
        self.sockets.lock()[url].clone()
    }
}

impl PersistentAdapterFactory for FakeSocketFactory {
    fn create(&self, url: &str, events: EventSink) -> Arc<dyn PersistentAdapter> {
        let socket = Arc::new(FakeSocket {
            url: url.to_string(),
            peer: self.peer.clone(),
            connected: AtomicBool::new(false),
            fail: self.fail.clone(),
            events,
        });
        self.sockets.lock().insert(url.to_string(), socket.clone());
        socket
    }
}

pub struct Harness {
    pub peer: Arc<Peer>,
    pub http: Arc<FakeHttp>,
    pub sockets: Arc<FakeSocketFactory>,
    pub network: hybridnet::NetworkManager,
}

pub fn config() -> (NetworkConfig, StaticSecret) {
    let (secret, public_key) = X25519KeyWrapper::generate_keypair();
    let config = NetworkConfig::default()
        .with_inconstant_url(INCONSTANT_URL)
        .with_persistent_url(PERSISTENT_URL)
        .with_public_key("pk-test", public_key);
    (config, secret)
}

/// 测试日志，只在用例失败时显示
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn harness_with(config: NetworkConfig, secret: StaticSecret) -> Harness {
    init_tracing();
    let peer = Peer::new(secret);
    let http = FakeHttp::new(peer.clone());
    let sockets = FakeSocketFactory::new(peer.clone());
    let network = hybridnet::NetworkManager::builder(config)
        .with_inconstant_adapter(http.clone())
        .with_persistent_factory(sockets.clone())
        .build()
        .expect("network manager");
    Harness {
        peer,
        http,
        sockets,
        network,
    }
}

pub fn harness() -> Harness {
    let (config, secret) = config();
    harness_with(config, secret)
}

pub fn json_request(network: &hybridnet::NetworkManager, body: &[u8]) -> Request {
    network
        .new_request("user", "profile")
        .with_content_encoding(ContentEncoding::Json)
        .with_body(body.to_vec())
}
