use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::PushMessage;

pub type PushHandler = Arc<dyn Fn(PushMessage) + Send + Sync>;

/// 注册推送处理器时返回，用于注销
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "push-handler-{}", self.0)
    }
}

/// 推送订阅表
///
/// 以归一化地址为键（去掉随会话变化的查询参数），所有修改都在同一把锁下进行。
/// 地址的最后一个处理器被移除时，条目一并删除。
pub struct PushSubscriberRegistry {
    volatile_params: Vec<String>,
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(HandlerId, PushHandler)>>>,
}

impl PushSubscriberRegistry {
    pub fn new(volatile_params: Vec<String>) -> Self {
        Self {
            volatile_params,
            next_id: AtomicU64::new(1),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// 去掉随会话变化的查询参数；无法解析的地址原样返回
    pub fn normalize(&self, url: &str) -> String {
        let Ok(mut parsed) = url::Url::parse(url) else {
            return url.to_string();
        };

        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(name, _)| !self.volatile_params.iter().any(|volatile| volatile == name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
        parsed.to_string()
    }

    pub fn register(&self, url: &str, handler: PushHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let key = self.normalize(url);
        tracing::debug!("[PUSH] {} registered for {}", id, key);
        self.handlers.lock().entry(key).or_default().push((id, handler));
        id
    }

    pub fn unregister(&self, url: &str, id: HandlerId) -> bool {
        let key = self.normalize(url);
        let mut handlers = self.handlers.lock();
        let Some(list) = handlers.get_mut(&key) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&key);
        }
        removed
    }

    /// 当前处理器快照，分发时不持有锁
    pub fn handlers(&self, url: &str) -> Vec<PushHandler> {
        let key = self.normalize(url);
        self.handlers
            .lock()
            .get(&key)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, url: &str) -> usize {
        let key = self.normalize(url);
        self.handlers.lock().get(&key).map_or(0, Vec::len)
    }

    /// 有订阅者的地址数量
    pub fn destinations(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl std::fmt::Debug for PushSubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSubscriberRegistry")
            .field("volatile_params", &self.volatile_params)
            .field("destinations", &self.destinations())
            .finish()
    }
}
