//! Copy trading: follow another trader's positions with the active account.

use std::sync::Arc;

use copydesk_core::storage::keys;
use copydesk_core::{AuthState, ClientError, RequestName};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::info;

use crate::snapshot::RequestSender;

/// Whether the active account is copying a trader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CopyStatus {
    /// Not copying.
    #[default]
    Idle,
    /// Copying started successfully.
    Copying,
}

/// Starts and stops copying for the active account.
pub struct CopyTrader {
    sender: Arc<dyn RequestSender>,
    auth: Arc<AuthState>,
    status: Mutex<CopyStatus>,
}

impl CopyTrader {
    /// Copy trader issuing requests through `sender`.
    pub fn new(sender: Arc<dyn RequestSender>, auth: Arc<AuthState>) -> Self {
        Self {
            sender,
            auth,
            status: Mutex::new(CopyStatus::Idle),
        }
    }

    /// Last known status.
    pub fn status(&self) -> CopyStatus {
        *self.status.lock()
    }

    /// Authorize as the copier and start copying `trader_token`.
    pub async fn start(&self, trader_token: &str) -> Result<Value, ClientError> {
        let response = self.run(RequestName::CopyStart, trader_token).await?;
        *self.status.lock() = CopyStatus::Copying;
        info!("copy trading started");
        Ok(response)
    }

    /// Authorize as the copier and stop copying `trader_token`.
    pub async fn stop(&self, trader_token: &str) -> Result<Value, ClientError> {
        let response = self.run(RequestName::CopyStop, trader_token).await?;
        *self.status.lock() = CopyStatus::Idle;
        info!("copy trading stopped");
        Ok(response)
    }

    async fn run(&self, request: RequestName, trader_token: &str) -> Result<Value, ClientError> {
        let trader_token = trader_token.trim();
        if trader_token.is_empty() {
            return Err(ClientError::InvalidInput("trader token is empty".into()));
        }
        let copier_token = self.copier_token().ok_or(ClientError::MissingToken)?;

        let _ = self
            .sender
            .send(RequestName::Authorize, Some(&json!({ "authorize": copier_token })))
            .await?;

        let field = request.as_str();
        let response = self
            .sender
            .send(request, Some(&json!({ field: trader_token })))
            .await?;
        if response[field].as_i64() == Some(1) {
            Ok(response)
        } else {
            Err(ClientError::UnexpectedResponse {
                request: field.to_string(),
                body: response.to_string(),
            })
        }
    }

    fn copier_token(&self) -> Option<String> {
        self.auth
            .auth_token()
            .or_else(|| self.auth.store().get_non_empty(keys::AUTH_TOKEN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::session::SessionContext;
    use crate::transport::Transport;
    use crate::transport::mock::{MockTransport, default_reply};
    use assert_matches::assert_matches;
    use copydesk_core::MemoryStore;
    use copydesk_settings::CopydeskSettings;

    fn setup(store: MemoryStore, mock: &Arc<MockTransport>) -> (Arc<SessionContext>, CopyTrader) {
        let auth = Arc::new(AuthState::new(Arc::new(store)));
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(mock) as Arc<dyn Transport>));
        let ctx = SessionContext::new(Arc::new(CopydeskSettings::default()), Arc::clone(&auth), registry);
        let _ = ctx.initialize();
        let trader = CopyTrader::new(Arc::clone(&ctx) as Arc<dyn RequestSender>, auth);
        (ctx, trader)
    }

    fn logged_in() -> MemoryStore {
        MemoryStore::new()
            .with(keys::ACTIVE_LOGINID, "CR10")
            .with(keys::CLIENT_ACCOUNTS, r#"{"CR10": {"token": "copier-tok"}}"#)
    }

    #[tokio::test]
    async fn start_authorizes_then_copies() {
        let mock = Arc::new(MockTransport::new());
        let (ctx, trader) = setup(logged_in(), &mock);

        let response = trader.start("trader-tok").await.unwrap();
        assert_eq!(response["copy_start"], 1);
        assert_eq!(trader.status(), CopyStatus::Copying);

        let frames = mock.frames();
        assert_eq!(frames[0]["authorize"], "copier-tok");
        assert_eq!(frames[1]["copy_start"], "trader-tok");

        let _ = trader.stop("trader-tok").await.unwrap();
        assert_eq!(trader.status(), CopyStatus::Idle);
        assert_eq!(mock.frames_named("copy_stop")[0]["copy_stop"], "trader-tok");
        ctx.shutdown();
    }

    #[tokio::test]
    async fn empty_trader_token_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let (ctx, trader) = setup(logged_in(), &mock);
        assert_matches!(trader.start("  ").await, Err(ClientError::InvalidInput(_)));
        assert!(mock.frames().is_empty());
        ctx.shutdown();
    }

    #[tokio::test]
    async fn missing_copier_token() {
        let mock = Arc::new(MockTransport::new());
        let (ctx, trader) = setup(MemoryStore::new(), &mock);
        assert_matches!(trader.start("trader-tok").await, Err(ClientError::MissingToken));
        ctx.shutdown();
    }

    #[tokio::test]
    async fn mirrored_token_is_used_as_fallback() {
        let mock = Arc::new(MockTransport::new());
        let (ctx, trader) = setup(MemoryStore::new().with(keys::AUTH_TOKEN, "mirror"), &mock);
        let _ = trader.start("trader-tok").await.unwrap();
        assert_eq!(mock.frames_named("authorize")[0]["authorize"], "mirror");
        ctx.shutdown();
    }

    #[tokio::test]
    async fn api_error_propagates() {
        let mock = Arc::new(MockTransport::with_responder(Arc::new(|req: &Value| {
            if req.get("copy_start").is_some() {
                vec![json!({"msg_type": "copy_start", "error": {"code": "CopyTradingNotAllowed", "message": "no"}})]
            } else {
                default_reply(req).into_iter().collect::<Vec<_>>()
            }
        })));
        let (ctx, trader) = setup(logged_in(), &mock);
        assert_matches!(
            trader.start("trader-tok").await,
            Err(ClientError::Api { code, .. }) if code == "CopyTradingNotAllowed"
        );
        assert_eq!(trader.status(), CopyStatus::Idle);
        ctx.shutdown();
    }

    #[tokio::test]
    async fn unexpected_response_is_error() {
        let mock = Arc::new(MockTransport::with_responder(Arc::new(|req: &Value| {
            if req.get("copy_start").is_some() {
                vec![json!({"msg_type": "copy_start", "copy_start": 0})]
            } else {
                default_reply(req).into_iter().collect::<Vec<_>>()
            }
        })));
        let (ctx, trader) = setup(logged_in(), &mock);
        assert_matches!(
            trader.start("trader-tok").await,
            Err(ClientError::UnexpectedResponse { request, .. }) if request == "copy_start"
        );
        assert_eq!(trader.status(), CopyStatus::Idle);
        ctx.shutdown();
    }
}
