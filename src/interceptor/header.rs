use std::sync::Arc;

use async_trait::async_trait;

use super::{Interceptor, Next};
use crate::codec::{
    decode_structured, encode_structured, PublicParams, ResponseControlHeader, HEADER_ACCEPT, HEADER_AUTH_TOKEN,
    HEADER_CONTENT_TYPE, HEADER_PUBLIC_PARAMS, HEADER_REQUEST_CONTROL,
};
use crate::error::{CodecError, NetCode};
use crate::request::Request;
use crate::response::Response;
use crate::routing::RoutingKeyRegistry;

/// 头部编排：公共参数、请求控制块、认证令牌和路由键
pub struct HeaderInterceptor {
    public_params: PublicParams,
    routing: Arc<RoutingKeyRegistry>,
}

impl HeaderInterceptor {
    pub fn new(public_params: PublicParams, routing: Arc<RoutingKeyRegistry>) -> Self {
        Self { public_params, routing }
    }

    fn frame_request(&self, request: Request) -> Result<Request, CodecError> {
        let mut request = request;
        if request.control().routing_key.is_none() {
            if let Some(routing_key) = self.routing.get(&request.control().service) {
                request = request.with_routing_key(routing_key);
            }
        }

        let encoding = request.content_encoding();
        let public_params = encode_structured(encoding, &self.public_params)?;
        let control = encode_structured(encoding, request.control())?;
        let media_type = encoding.media_type();

        let mut request = request
            .with_header(HEADER_PUBLIC_PARAMS, public_params)
            .with_header(HEADER_REQUEST_CONTROL, control)
            .with_header(HEADER_CONTENT_TYPE, media_type)
            .with_header(HEADER_ACCEPT, media_type);
        if let Some(token) = request.auth_token().map(str::to_string) {
            request = request.with_header(HEADER_AUTH_TOKEN, token);
        }
        Ok(request)
    }
}

#[async_trait]
impl Interceptor for HeaderInterceptor {
    fn name(&self) -> &'static str {
        "header"
    }

    async fn intercept(&self, request: Request, next: Next<'_>) -> Response {
        let encoding = request.content_encoding();
        let request = match self.frame_request(request) {
            Ok(request) => request,
            Err(e) => return Response::failure(NetCode::HeaderEncodeFailed, e.to_string()),
        };

        let response = next.proceed(request).await;
        let Some(raw) = response.control().raw() else {
            return response;
        };

        match decode_structured::<ResponseControlHeader>(encoding, raw) {
            Ok(control) => {
                if let Some(update) = &control.routing {
                    self.routing.apply(update);
                }
                let compressed = response.is_compressed() || control.compressed;
                response
                    .with_result(control.code, control.message)
                    .with_encrypt_epoch(control.encrypt_epoch)
                    .with_server_time(control.server_time)
                    .with_compressed(compressed)
            }
            Err(e) => {
                tracing::warn!("[HEADER] undecodable response control header: {}", e);
                Response::failure(NetCode::HeaderDecodeFailed, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_header_value, encode_header_value, ContentEncoding, RoutingUpdate};
    use crate::interceptor::{Chain, TerminalStage};
    use crate::request::RequestControl;
    use crate::response::ResponseControl;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Peer {
        reply: Option<String>,
        seen: Mutex<Option<Request>>,
    }

    #[async_trait]
    impl TerminalStage for Peer {
        fn name(&self) -> &'static str {
            "peer"
        }

        async fn dispatch(&self, request: Request, _cancel: &CancellationToken) -> Response {
            *self.seen.lock() = Some(request);
            Response::ok(None).with_control(ResponseControl::new(self.reply.clone()))
        }
    }

    fn chain(routing: &Arc<RoutingKeyRegistry>, peer: &Arc<Peer>) -> Chain {
        let params = PublicParams {
            app_id: "app".to_string(),
            platform: "linux".to_string(),
            ..PublicParams::default()
        };
        Chain::new(
            vec![Arc::new(HeaderInterceptor::new(params, routing.clone()))],
            peer.clone(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_request_headers_follow_encoding() {
        let routing = Arc::new(RoutingKeyRegistry::new());
        let peer = Arc::new(Peer {
            reply: None,
            seen: Mutex::new(None),
        });
        let request = Request::new("user", "profile")
            .with_seq_id(11)
            .with_auth_token("token-1")
            .with_content_encoding(ContentEncoding::Json);

        let response = chain(&routing, &peer).run(request).await;
        assert!(response.is_success());

        let seen = peer.seen.lock().clone().unwrap();
        assert_eq!(seen.headers().get(HEADER_AUTH_TOKEN).map(String::as_str), Some("token-1"));
        assert_eq!(
            seen.headers().get(HEADER_CONTENT_TYPE).map(String::as_str),
            Some("application/json")
        );

        let raw = decode_header_value(&seen.headers()[HEADER_REQUEST_CONTROL]).unwrap();
        let control: RequestControl = serde_json::from_slice(&raw).unwrap();
        assert_eq!(control.seq_id, 11);
        assert_eq!(control.service, "user");

        let params: PublicParams =
            decode_structured(ContentEncoding::Json, &seen.headers()[HEADER_PUBLIC_PARAMS]).unwrap();
        assert_eq!(params.app_id, "app");
    }

    #[tokio::test]
    async fn test_response_control_populates_response_and_routing() {
        let routing = Arc::new(RoutingKeyRegistry::new());
        let header = ResponseControlHeader {
            code: 7,
            message: "partial".to_string(),
            encrypt_epoch: Some("epoch-2".to_string()),
            server_time: Some(1_700_000_000_000),
            compressed: true,
            routing: Some(RoutingUpdate {
                service: "user".to_string(),
                routing_key: "shard-3".to_string(),
            }),
        };
        let peer = Arc::new(Peer {
            reply: Some(encode_structured(ContentEncoding::Binary, &header).unwrap()),
            seen: Mutex::new(None),
        });

        let response = chain(&routing, &peer).run(Request::new("user", "profile")).await;
        assert_eq!(response.code(), 7);
        assert_eq!(response.message(), "partial");
        assert_eq!(response.encrypt_epoch(), Some("epoch-2"));
        assert_eq!(response.server_time(), Some(1_700_000_000_000));
        assert!(response.is_compressed());
        assert_eq!(routing.get("user").as_deref(), Some("shard-3"));

        chain(&routing, &peer).run(Request::new("user", "profile")).await;
        let seen = peer.seen.lock().clone().unwrap();
        let control: RequestControl =
            decode_structured(ContentEncoding::Binary, &seen.headers()[HEADER_REQUEST_CONTROL]).unwrap();
        assert_eq!(control.routing_key.as_deref(), Some("shard-3"));
    }

    #[tokio::test]
    async fn test_bad_response_control_is_reported() {
        let routing = Arc::new(RoutingKeyRegistry::new());
        let peer = Arc::new(Peer {
            reply: Some(encode_header_value(b"\x01")),
            seen: Mutex::new(None),
        });
        let response = chain(&routing, &peer).run(Request::new("s", "m")).await;
        assert_eq!(response.net_code(), NetCode::HeaderDecodeFailed);
    }
}
