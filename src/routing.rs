use std::collections::HashMap;

use parking_lot::RwLock;

use crate::codec::RoutingUpdate;

/// 服务名 -> 路由键
///
/// 服务端在响应控制头里下发路由键，后续同一服务的请求带上它，
/// 以便落到同一个后端实例。
#[derive(Debug, Default)]
pub struct RoutingKeyRegistry {
    keys: RwLock<HashMap<String, String>>,
}

impl RoutingKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service: &str) -> Option<String> {
        self.keys.read().get(service).cloned()
    }

    /// 空路由键表示服务端撤销了绑定
    pub fn apply(&self, update: &RoutingUpdate) {
        if update.service.is_empty() {
            return;
        }
        let mut keys = self.keys.write();
        if update.routing_key.is_empty() {
            keys.remove(&update.service);
        } else {
            keys.insert(update.service.clone(), update.routing_key.clone());
        }
    }

    pub fn clear(&self) {
        self.keys.write().clear();
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
