//! Transport selection and the fallback precedence policy.

use std::future::Future;
use std::sync::Arc;

use crate::error::{NetCode, NetError};
use crate::request::{Request, TransportKind};
use crate::response::Response;
use crate::strategy::AdaptiveTransportStrategy;
use crate::transport::{ConnectionRegistry, TransportAdapter};

pub struct TransportSelector {
    inconstant: Arc<dyn TransportAdapter>,
    registry: Arc<ConnectionRegistry>,
    strategy: Arc<AdaptiveTransportStrategy>,
}

impl TransportSelector {
    pub fn new(
        inconstant: Arc<dyn TransportAdapter>,
        registry: Arc<ConnectionRegistry>,
        strategy: Arc<AdaptiveTransportStrategy>,
    ) -> Self {
        Self {
            inconstant,
            registry,
            strategy,
        }
    }

    pub fn strategy(&self) -> &Arc<AdaptiveTransportStrategy> {
        &self.strategy
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Adapter for a request pinned to an explicit transport kind.
    pub fn select(&self, request: &Request) -> Result<Arc<dyn TransportAdapter>, NetError> {
        match request.transport() {
            TransportKind::Inconstant => {
                if request.inconstant_url().is_none() {
                    return Err(NetError::missing_url("inconstant_url"));
                }
                Ok(self.inconstant.clone())
            }
            TransportKind::Persistent => {
                if request.persistent_url().is_none() {
                    return Err(NetError::missing_url("persistent_url"));
                }
                let registry: Arc<dyn TransportAdapter> = self.registry.clone();
                Ok(registry)
            }
            other => Err(NetError::config_error(
                "transport",
                format!("'{}' must be resolved before dispatch", other.as_str()),
            )),
        }
    }

    /// Runs `attempt` once per transport the precedence policy picks.
    ///
    /// Explicit kinds run a single attempt. Preferred kinds pin each attempt
    /// to an explicit kind, so the attempt can be a complete chain run.
    pub async fn execute<F, Fut>(&self, request: Request, mut attempt: F) -> Response
    where
        F: FnMut(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let kind = request.transport().resolve(TransportKind::Inconstant);
        if !kind.has_fallback() {
            return attempt(request.with_transport(kind)).await;
        }

        match kind {
            TransportKind::PersistentPreferred => {
                if let Err(e) = Self::require_both(&request) {
                    return Response::from_error(&e);
                }

                if self.strategy.can_use_persistent(&request) {
                    let response = attempt(request.clone().with_transport(TransportKind::Persistent)).await;
                    if response.is_success() || response.net_code() == NetCode::Cancelled {
                        return response;
                    }
                    tracing::debug!(
                        "[STRATEGY] Persistent attempt failed with {}, falling back to inconstant",
                        response.net_code()
                    );
                }
                attempt(request.with_transport(TransportKind::Inconstant)).await
            }
            TransportKind::InconstantPreferred => {
                if let Err(e) = Self::require_both(&request) {
                    return Response::from_error(&e);
                }

                let response = attempt(request.clone().with_transport(TransportKind::Inconstant)).await;
                if response.is_success() || response.net_code() == NetCode::Cancelled {
                    return response;
                }
                if !self.strategy.can_use_persistent(&request) {
                    return response;
                }
                tracing::debug!(
                    "[STRATEGY] Inconstant attempt failed with {}, retrying over persistent",
                    response.net_code()
                );
                attempt(request.with_transport(TransportKind::Persistent)).await
            }
            // resolve 之后只剩两种回退方向
            other => attempt(request.with_transport(other)).await,
        }
    }

    fn require_both(request: &Request) -> Result<(), NetError> {
        if request.persistent_url().is_none() {
            return Err(NetError::missing_url("persistent_url"));
        }
        if request.inconstant_url().is_none() {
            return Err(NetError::missing_url("inconstant_url"));
        }
        Ok(())
    }
}
