//! WebSocket 长连接适配器
//!
//! 每个连接一个 actor 任务：命令通道负责发送，读取循环负责把回复交给
//! [`RequestManager`]、把推送和关闭事件交给 [`EventSink`]。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::codec::HEADER_RESPONSE_CONTROL;
use crate::error::NetError;
use crate::request::Request;
use crate::response::{Response, ResponseControl};
use crate::transport::frame::{Frame, FrameKind, HEADER_NOTIFY_PACKAGE};
use crate::transport::{EventSink, PersistentAdapter, PersistentAdapterFactory, RequestManager, TransportAdapter};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 关闭帧缺失时使用的关闭码
const CLOSE_NO_STATUS: u16 = 1005;
const CLOSE_ABNORMAL: u16 = 1006;

/// WebSocket 命令
enum WebSocketCommand {
    Send {
        data: Bytes,
        result_tx: oneshot::Sender<Result<(), NetError>>,
    },
    Close,
}

pub struct WebSocketAdapter {
    url: String,
    events: EventSink,
    timeout: Duration,
    pending: Arc<RequestManager>,
    connected: Arc<AtomicBool>,
    /// 当前连接的命令通道；互斥锁同时串行化拨号
    command_tx: Mutex<Option<mpsc::Sender<WebSocketCommand>>>,
}

impl WebSocketAdapter {
    pub fn new(url: impl Into<String>, events: EventSink, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            events,
            timeout,
            pending: Arc::new(RequestManager::new()),
            connected: Arc::new(AtomicBool::new(false)),
            command_tx: Mutex::new(None),
        }
    }

    async fn dial(&self) -> Result<WsStream, NetError> {
        let connecting = tokio_tungstenite::connect_async(self.url.as_str());
        match tokio::time::timeout(self.timeout, connecting).await {
            Ok(Ok((stream, _))) => Ok(stream),
            Ok(Err(e)) => Err(NetError::connection_error(&self.url, e.to_string())),
            Err(_) => Err(NetError::timeout_error(format!("connect {}", self.url), self.timeout)),
        }
    }

    async fn send(&self, data: Bytes) -> Result<(), NetError> {
        let command_tx = self
            .command_tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| NetError::ConnectionClosed { url: self.url.clone() })?;

        let (result_tx, result_rx) = oneshot::channel();
        command_tx
            .send(WebSocketCommand::Send { data, result_tx })
            .await
            .map_err(|_| NetError::ConnectionClosed { url: self.url.clone() })?;
        result_rx
            .await
            .map_err(|_| NetError::ConnectionClosed { url: self.url.clone() })?
    }

    fn request_frame(request: &Request) -> Frame {
        Frame::new(FrameKind::Request, request.control().seq_id)
            .with_headers(request.headers().clone())
            .with_body(request.body().cloned().unwrap_or_default())
            .with_compressed(request.control().compressed)
            .with_encoding(request.content_encoding())
    }

    fn response_from_frame(frame: Frame) -> Response {
        let control = ResponseControl::new(frame.header(HEADER_RESPONSE_CONTROL).map(str::to_string));
        let body = if frame.body.is_empty() { None } else { Some(frame.body) };
        Response::ok(body)
            .with_compressed(frame.flags.is_compressed())
            .with_control(control)
    }
}

#[async_trait]
impl TransportAdapter for WebSocketAdapter {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn request(&self, request: Request, cancel: &CancellationToken) -> Response {
        if request.is_connect_only() {
            return Response::ok(None);
        }

        let seq_id = request.control().seq_id;
        let data = match Self::request_frame(&request).to_bytes() {
            Ok(data) => data,
            Err(e) => return Response::from_error(&NetError::from(e)),
        };

        // 等待者被丢弃（取消、超时或外层放弃这个 future）时自动注销
        let mut waiter = self.pending.register(seq_id);
        if let Err(e) = self.send(data).await {
            return Response::from_error(&e);
        }

        tokio::select! {
            _ = cancel.cancelled() => Response::from_error(&NetError::Cancelled),
            result = tokio::time::timeout(self.timeout, &mut waiter) => match result {
                Ok(Ok(frame)) => Self::response_from_frame(frame),
                Ok(Err(_)) => Response::from_error(&NetError::ConnectionClosed { url: self.url.clone() }),
                Err(_) => {
                    Response::from_error(&NetError::timeout_error(format!("request seq_id={}", seq_id), self.timeout))
                }
            }
        }
    }
}

#[async_trait]
impl PersistentAdapter for WebSocketAdapter {
    async fn connect(&self, cancel: &CancellationToken) -> Result<(), NetError> {
        let mut command_tx = self.command_tx.lock().await;
        if command_tx.is_some() && self.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(NetError::Cancelled),
            stream = self.dial() => stream?,
        };

        let (tx, rx) = mpsc::channel(100);
        self.connected.store(true, Ordering::Release);
        let actor = WebSocketActor {
            stream,
            command_rx: rx,
            pending: self.pending.clone(),
            events: self.events.clone(),
            connected: self.connected.clone(),
        };
        tokio::spawn(actor.run());

        *command_tx = Some(tx);
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(tx) = self.command_tx.lock().await.take() {
            let _ = tx.send(WebSocketCommand::Close).await;
        }
        self.connected.store(false, Ordering::Release);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// WebSocket Actor
struct WebSocketActor {
    stream: WsStream,
    command_rx: mpsc::Receiver<WebSocketCommand>,
    pending: Arc<RequestManager>,
    events: EventSink,
    connected: Arc<AtomicBool>,
}

impl WebSocketActor {
    async fn run(self) {
        let WebSocketActor {
            mut stream,
            mut command_rx,
            pending,
            events,
            connected,
        } = self;

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(WebSocketCommand::Send { data, result_tx }) => {
                        let result = stream
                            .send(Message::Binary(data.to_vec()))
                            .await
                            .map_err(|e| NetError::connection_error(events.url(), e.to_string()));
                        let _ = result_tx.send(result);
                    }
                    Some(WebSocketCommand::Close) | None => {
                        let _ = stream.close(None).await;
                        Self::mark_closed(&connected, &pending);
                        events.closed(1000, "client disconnect");
                        break;
                    }
                },

                message = stream.next() => match message {
                    Some(Ok(Message::Binary(data))) => Self::handle_binary(&data, &pending, &events),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((CLOSE_NO_STATUS, String::new()));
                        tracing::info!("[CONNECT] {} closed by peer: code={} reason={}", events.url(), code, reason);
                        Self::mark_closed(&connected, &pending);
                        events.closed(code, reason);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text / Ping / Pong
                    }
                    Some(Err(e)) => {
                        tracing::warn!("[CONNECT] {} read error: {}", events.url(), e);
                        Self::mark_closed(&connected, &pending);
                        events.error(e.to_string());
                        break;
                    }
                    None => {
                        Self::mark_closed(&connected, &pending);
                        events.closed(CLOSE_ABNORMAL, "stream ended");
                        break;
                    }
                },
            }
        }
    }

    /// 在发出关闭 / 错误事件之前调用，事件订阅者立即重连时能看到断开状态
    fn mark_closed(connected: &AtomicBool, pending: &RequestManager) {
        connected.store(false, Ordering::Release);
        pending.clear();
    }

    fn handle_binary(data: &[u8], pending: &RequestManager, events: &EventSink) {
        let frame = match Frame::from_bytes(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("[CONNECT] {} sent an undecodable frame: {}", events.url(), e);
                events.error(format!("frame decode error: {}", e));
                return;
            }
        };

        match frame.kind {
            FrameKind::Response => {
                pending.complete(frame);
            }
            FrameKind::Push => {
                let package = frame.header(HEADER_NOTIFY_PACKAGE).unwrap_or_default().to_string();
                events.push(package, frame.body, frame.flags.is_compressed(), frame.encoding);
            }
            FrameKind::Request => {
                tracing::warn!("[CONNECT] {} sent an unexpected request frame seq_id={}", events.url(), frame.seq_id);
            }
        }
    }
}

/// 为每个地址创建 [`WebSocketAdapter`]
#[derive(Debug, Clone)]
pub struct WebSocketAdapterFactory {
    timeout: Duration,
}

impl WebSocketAdapterFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl PersistentAdapterFactory for WebSocketAdapterFactory {
    fn create(&self, url: &str, events: EventSink) -> Arc<dyn PersistentAdapter> {
        Arc::new(WebSocketAdapter::new(url, events, self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ContentEncoding;
    use crate::config::StrategyConfig;
    use crate::error::NetCode;
    use crate::interceptor::{DispatchStage, TerminalStage};
    use crate::request::TransportKind;
    use crate::strategy::AdaptiveTransportStrategy;
    use crate::transport::{ConnectionEventKind, ConnectionRegistry, TransportSelector};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    /// 读取所有帧但从不回复的服务端
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        format!("ws://{}/ws", addr)
    }

    /// 握手后立即以 1001 关闭的服务端
    async fn closing_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws
                .close(Some(CloseFrame {
                    code: CloseCode::Away,
                    reason: "going away".into(),
                }))
                .await;
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{}/ws", addr)
    }

    struct CapturingFactory {
        created: parking_lot::Mutex<Option<Arc<WebSocketAdapter>>>,
    }

    impl PersistentAdapterFactory for CapturingFactory {
        fn create(&self, url: &str, events: EventSink) -> Arc<dyn PersistentAdapter> {
            let adapter = Arc::new(WebSocketAdapter::new(url, events, Duration::from_secs(10)));
            *self.created.lock() = Some(adapter.clone());
            adapter
        }
    }

    struct NoInconstant;

    #[async_trait]
    impl TransportAdapter for NoInconstant {
        fn name(&self) -> &'static str {
            "none"
        }

        async fn request(&self, _request: Request, _cancel: &CancellationToken) -> Response {
            Response::failure(NetCode::TransportFailure, "unused")
        }
    }

    #[tokio::test]
    async fn test_cancelled_requests_leave_no_pending_waiters() {
        let url = silent_server().await;
        let factory = Arc::new(CapturingFactory {
            created: parking_lot::Mutex::new(None),
        });
        let (registry, _events) = ConnectionRegistry::new(factory.clone());
        let registry = Arc::new(registry);
        let strategy = Arc::new(AdaptiveTransportStrategy::new(StrategyConfig::default(), registry.clone()));
        let selector = TransportSelector::new(Arc::new(NoInconstant), registry.clone(), strategy);
        let stage = DispatchStage::new(Arc::new(selector));

        registry.connect(&url, &CancellationToken::new()).await.unwrap();

        for seq_id in 1..=5 {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                trigger.cancel();
            });

            let request = Request::new("chat", "send")
                .with_persistent_url(url.clone())
                .with_transport(TransportKind::Persistent)
                .with_seq_id(seq_id)
                .with_body(&b"hello"[..]);
            let response = stage.dispatch(request, &cancel).await;
            assert_eq!(response.net_code(), NetCode::Cancelled);
        }

        let adapter = factory.created.lock().clone().unwrap();
        assert!(adapter.is_connected());
        assert_eq!(adapter.pending.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_before_close_event() {
        let url = closing_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let adapter = WebSocketAdapter::new(url.as_str(), EventSink::new(&url, tx), Duration::from_secs(5));
        adapter.connect(&CancellationToken::new()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.kind, ConnectionEventKind::Closed { code: 1001, .. }));
        assert!(!adapter.is_connected());
    }

    #[test]
    fn test_request_frame_carries_control() {
        let request = Request::new("chat", "send")
            .with_seq_id(42)
            .with_compressed(true)
            .with_content_encoding(ContentEncoding::Json)
            .with_header("X-Auth-Token", "token")
            .with_body(&b"body"[..]);

        let frame = WebSocketAdapter::request_frame(&request);
        assert_eq!(frame.kind, FrameKind::Request);
        assert_eq!(frame.seq_id, 42);
        assert!(frame.flags.is_compressed());
        assert_eq!(frame.encoding, ContentEncoding::Json);
        assert_eq!(frame.header("X-Auth-Token"), Some("token"));
    }

    #[test]
    fn test_push_frames_become_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EventSink::new("wss://a.example.com/ws", tx);
        let pending = RequestManager::new();

        let push = Frame::new(FrameKind::Push, 0)
            .with_header(HEADER_NOTIFY_PACKAGE, "notify.rotate_key")
            .with_body(&b"sealed"[..])
            .to_bytes()
            .unwrap();
        WebSocketActor::handle_binary(&push, &pending, &events);

        match rx.try_recv().unwrap().kind {
            ConnectionEventKind::Push(message) => {
                assert_eq!(message.notify_package(), "notify.rotate_key");
                assert_eq!(message.body().as_ref(), b"sealed");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        WebSocketActor::handle_binary(&[0xff; 3], &pending, &events);
        assert!(matches!(
            rx.try_recv().unwrap().kind,
            ConnectionEventKind::Error(_)
        ));
    }

    #[tokio::test]
    async fn test_request_without_connection_is_closed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let adapter = WebSocketAdapter::new(
            "ws://127.0.0.1:9/ws",
            EventSink::new("ws://127.0.0.1:9/ws", tx),
            Duration::from_millis(200),
        );

        let response = adapter
            .request(Request::new("s", "m").with_seq_id(1), &CancellationToken::new())
            .await;
        assert_eq!(response.net_code(), NetCode::ConnectionClosed);
        assert!(!adapter.is_connected());
        assert_eq!(adapter.pending.pending_count(), 0);
    }
}
