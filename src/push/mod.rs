//! 推送 / 通知子系统
//!
//! 推送不经过拦截器链：连接注册表把消息交给 [`PushDispatcher`]，
//! 由它处理密钥轮换消息、解密普通推送并分发给订阅者。

pub mod dispatcher;
pub mod message;
pub mod subscriber;

pub use dispatcher::{DropReason, KeyRotation, PushDispatcher, PushOutcome};
pub use message::PushMessage;
pub use subscriber::{HandlerId, PushHandler, PushSubscriberRegistry};
