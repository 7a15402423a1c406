use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::TerminalStage;
use crate::error::{NetCode, NetError};
use crate::request::Request;
use crate::response::Response;
use crate::transport::TransportSelector;

/// 终端阶段：选择适配器并执行，调用前后记录自适应统计
pub struct DispatchStage {
    selector: Arc<TransportSelector>,
}

impl DispatchStage {
    pub fn new(selector: Arc<TransportSelector>) -> Self {
        Self { selector }
    }
}

#[async_trait]
impl TerminalStage for DispatchStage {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    async fn dispatch(&self, request: Request, cancel: &CancellationToken) -> Response {
        let adapter = match self.selector.select(&request) {
            Ok(adapter) => adapter,
            Err(e) => return Response::from_error(&e),
        };

        // 仅建连不计入延迟统计
        if request.is_connect_only() {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => Response::from_error(&NetError::Cancelled),
                response = adapter.request(request, cancel) => response,
            };
        }

        let destination = request.destination_key().unwrap_or_default().to_string();
        let strategy = self.selector.strategy();
        let ticket = strategy.before_process(&destination, request.transport());
        tracing::trace!(
            "[DISPATCH] seq_id={} via {} to {}",
            request.control().seq_id,
            adapter.name(),
            destination
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Response::from_error(&NetError::Cancelled),
            response = adapter.request(request, cancel) => response,
        };

        if response.net_code() == NetCode::Cancelled {
            strategy.discard(ticket);
        } else {
            strategy.after_process(ticket, &response);
        }
        response
    }
}
