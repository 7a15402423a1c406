//! hybridnet - 混合传输客户端请求管线
//!
//! 一次性请求（HTTP）和长连接（WebSocket）共用同一条拦截器链：
//! 日志、压缩、加密、头部编排，最后由传输选择器分发。
//! 长连接上的推送绕过拦截器链，由推送子系统解密并分发给订阅者。

// 核心类型
pub mod error;
pub mod request;
pub mod response;
pub mod config;

// 基础组件
pub mod codec;
pub mod crypto;
pub mod lockfree;
pub mod routing;
pub mod sequence;
pub mod strategy;

// 传输层
pub mod transport;

// 请求管线
pub mod interceptor;
pub mod push;
pub mod network;

pub type Result<T> = std::result::Result<T, NetError>;

// 重新导出核心类型
pub use config::NetworkConfig;
pub use error::{NetCode, NetError};
pub use network::{NetworkEvent, NetworkManager, NetworkManagerBuilder};
pub use push::{HandlerId, PushHandler, PushMessage};
pub use request::{Request, RequestControl, TransportKind};
pub use response::{Response, ResponseControl};
pub use codec::ContentEncoding;
pub use tokio_util::sync::CancellationToken;
