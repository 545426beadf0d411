//! Background watchers spawned by [`SessionContext::start`].
//!
//! Each watcher runs until the session's cancellation token fires.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::session::{ReconnectState, SessionContext};

/// Ping the active connection every keepalive interval (standalone only).
pub(crate) async fn keepalive(ctx: Arc<SessionContext>) {
    let period = ctx.settings().session.keepalive_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = ctx.cancelled().cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !ctx.is_standalone() {
            continue;
        }
        match ctx.active_connection() {
            Some(conn) if conn.is_open() => {
                debug!(conn_id = conn.id(), "keepalive ping");
                if let Err(e) = conn.send_untracked(&json!({ "ping": 1 })) {
                    warn!(error = %e, "keepalive ping failed");
                }
            }
            _ => debug!("keepalive skipped, no open connection"),
        }
    }
}

/// Re-initialize whenever the reconnect flag goes pending.
pub(crate) async fn reconnect(ctx: Arc<SessionContext>) {
    let mut signal = ctx.reconnect_signal();
    loop {
        tokio::select! {
            () = ctx.cancelled().cancelled() => break,
            changed = signal.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        let state = *signal.borrow_and_update();
        if state == ReconnectState::Pending {
            ctx.reconnect_now().await;
        }
    }
}

/// Follow active login-id changes.
///
/// Changes made through [`AuthState`](copydesk_core::AuthState) arrive on
/// `signal`, which the caller subscribes before spawning so no change is
/// missed. Writers outside the process are caught by re-reading the store
/// every poll interval and comparing against the last login id handled.
pub(crate) async fn login_watch(ctx: Arc<SessionContext>, mut signal: watch::Receiver<Option<String>>) {
    let period = ctx.settings().session.login_poll_interval();
    let mut poll = tokio::time::interval_at(Instant::now() + period, period);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = ctx.cancelled().cancelled() => break,
            changed = signal.changed() => {
                if changed.is_err() {
                    break;
                }
                let loginid = signal.borrow_and_update().clone();
                ctx.handle_loginid(loginid).await;
            }
            _ = poll.tick() => {
                let _ = ctx.auth().sync_from_store();
                ctx.handle_loginid(ctx.auth().active_loginid()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use copydesk_core::storage::{KeyValueStore, keys};
    use copydesk_core::{AuthState, Environment, MemoryStore, RequestName};
    use copydesk_settings::CopydeskSettings;

    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::transport::Transport;
    use crate::transport::mock::MockTransport;

    struct Harness {
        mock: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        ctx: Arc<SessionContext>,
    }

    fn harness(standalone: bool, store: MemoryStore) -> Harness {
        let mut settings = CopydeskSettings::default();
        settings.session.standalone = standalone;
        settings.api.demo_endpoint = "demo.example.com".into();
        let mock = Arc::new(MockTransport::new());
        let store = Arc::new(store);
        let auth = Arc::new(AuthState::new(Arc::clone(&store) as Arc<dyn KeyValueStore>));
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&mock) as Arc<dyn Transport>));
        let ctx = SessionContext::new(Arc::new(settings), auth, registry);
        Harness { mock, store, ctx }
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_every_interval() {
        let h = harness(true, MemoryStore::new());
        h.ctx.start();
        h.ctx.active_connection().unwrap().wait_open().await.unwrap();

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(h.mock.frames_named("ping").is_empty());

        tokio::time::sleep(Duration::from_millis(20_200)).await;
        let pings = h.mock.frames_named("ping");
        assert_eq!(pings.len(), 3);
        // Untracked: no req_id on the wire
        assert!(pings.iter().all(|p| p.get("req_id").is_none()));
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn shared_mode_does_not_ping() {
        let h = harness(false, MemoryStore::new());
        h.ctx.start();
        assert!(h.ctx.active_connection().is_none());
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(h.mock.frames_named("ping").is_empty());
        assert_eq!(h.mock.open_count(), 0);
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_close() {
        let h = harness(true, MemoryStore::new().with(keys::ACTIVE_LOGINID, "CR7"));
        h.ctx.start();
        let first = h.ctx.active_connection().unwrap();
        first.wait_open().await.unwrap();
        // Let the start-up snapshot finish
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.mock.kill(0);
        first.wait_closed().await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.mock.open_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.mock.open_count(), 2);
        assert_eq!(h.ctx.reconnect_state(), ReconnectState::Stable);

        let second = h.ctx.active_connection().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.url(), second.url());
        let pong = h.ctx.send(RequestName::Ping, None).await.unwrap();
        assert_eq!(pong["ping"], "pong");
        // Snapshot taken on start and again after reconnecting
        assert_eq!(h.mock.frames_named("get_settings").len(), 2);
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reopen_keeps_retrying() {
        let h = harness(true, MemoryStore::new());
        h.ctx.start();
        let first = h.ctx.active_connection().unwrap();
        first.wait_open().await.unwrap();

        h.mock.fail_next_opens(2);
        h.mock.kill(0);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.mock.open_count(), 2);
        assert!(h.ctx.active_connection().unwrap().is_open());
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn login_signal_switches_environment() {
        let h = harness(true, MemoryStore::new().with(keys::ACTIVE_LOGINID, "CR1"));
        h.ctx.start();
        assert_eq!(h.ctx.environment(), Environment::Real);

        h.ctx.auth().set_active_loginid("VRTC900").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.ctx.environment(), Environment::Demo);
        let urls = h.mock.opened_urls();
        assert!(urls.last().unwrap().starts_with("wss://demo.example.com/"));
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn login_change_right_after_start_is_not_lost() {
        let h = harness(true, MemoryStore::new().with(keys::ACTIVE_LOGINID, "CR1"));
        h.ctx.start();
        // No yield between start and the change
        h.ctx.auth().set_active_loginid("VRTC900").unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(h.ctx.environment(), Environment::Demo);
        assert_eq!(h.store.get(keys::ACTIVE_LOGINID).as_deref(), Some("VRTC900"));
        assert!(h.ctx.active_connection().unwrap().url().starts_with("wss://demo.example.com/"));
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn poll_recovers_change_already_seen_by_auth_state() {
        let h = harness(true, MemoryStore::new().with(keys::ACTIVE_LOGINID, "CR1"));
        // AuthState publishes before any watcher has subscribed
        h.ctx.auth().set_active_loginid("VRTC3").unwrap();
        h.ctx.start();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(h.ctx.environment(), Environment::Demo);
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn external_store_write_is_polled() {
        let h = harness(true, MemoryStore::new().with(keys::ACTIVE_LOGINID, "VRTC1"));
        h.ctx.start();
        assert_eq!(h.ctx.environment(), Environment::Demo);

        // Written behind AuthState's back
        h.store.set(keys::ACTIVE_LOGINID, "CR55").unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(h.ctx.environment(), Environment::Real);
        assert!(h.ctx.active_connection().unwrap().url().starts_with("wss://ws.derivws.com/"));
        h.ctx.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn custom_environment_does_not_reinitialize() {
        let store = MemoryStore::new()
            .with(keys::ACTIVE_LOGINID, "CR1")
            .with(keys::SERVER_URL, "qa3.deriv.dev");
        let h = harness(true, store);
        h.ctx.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let opens = h.mock.open_count();

        h.ctx.auth().set_active_loginid("VRTC2").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.ctx.environment(), Environment::Custom);
        assert_eq!(h.mock.open_count(), opens);
        // Snapshot still refreshed for the new login id
        assert_eq!(h.mock.frames_named("get_settings").len(), 2);
        h.ctx.shutdown();
    }
}
