//! Session Registry
//!
//! Thread-safe map of live sessions using DashMap for concurrent access.
//! A session is present only while it has not reached a terminal state: each
//! entry gets a watcher that evicts it on `ended`/`errored`, and explicit
//! disconnect evicts synchronously. Whichever runs first wins; the other is a
//! no-op.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, info};

use super::instance::Session;
use super::types::SessionInfo;
use crate::config::ManagerSettings;
use crate::ssh::{ConnectionConfig, SshError};

struct SessionEntry {
    session: Arc<Session>,
    /// Insertion order, for `list`
    order: usize,
}

/// Owner of every live session in the process
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    /// Counter for insertion order
    order_counter: AtomicUsize,
    /// Serializes insert/evict so an eviction never races an insertion
    create_lock: parking_lot::Mutex<()>,
    settings: ManagerSettings,
}

impl SessionRegistry {
    pub fn new(settings: ManagerSettings) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            order_counter: AtomicUsize::new(0),
            create_lock: parking_lot::Mutex::new(()),
            settings,
        })
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Negotiate a new session and register it. Nothing is stored on failure.
    pub async fn create(self: &Arc<Self>, config: ConnectionConfig) -> Result<String, SshError> {
        let session = Session::establish(config, self.settings.clone()).await?;
        self.register(session)
    }

    /// Register an established session and hand back its id. A session that
    /// already ended (shell exited during setup) is an error, not an id.
    pub(crate) fn register(self: &Arc<Self>, session: Arc<Session>) -> Result<String, SshError> {
        let session_id = session.id().to_string();
        if self.insert(session) {
            Ok(session_id)
        } else {
            Err(SshError::Channel(format!(
                "Session {} ended during setup",
                session_id
            )))
        }
    }

    /// `false` if the session was already terminal and was not stored
    pub(crate) fn insert(self: &Arc<Self>, session: Arc<Session>) -> bool {
        let session_id = session.id().to_string();
        let mut state_rx = session.state_receiver();

        {
            let _guard = self.create_lock.lock();
            if session.state().is_terminal() {
                debug!("Session {} ended before registration", session_id);
                return false;
            }
            let order = self.order_counter.fetch_add(1, Ordering::SeqCst);
            info!(
                "Registering session {}: {} (order: {})",
                session_id,
                session.config().address(),
                order
            );
            self.sessions
                .insert(session_id.clone(), SessionEntry { session, order });
        }

        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            // Err means the session was dropped, which only happens after removal
            let _ = state_rx.wait_for(|state| state.is_terminal()).await;
            if let Some(registry) = registry.upgrade() {
                registry.evict(&session_id);
            }
        });
        true
    }

    fn evict(&self, session_id: &str) -> Option<Arc<Session>> {
        let _guard = self.create_lock.lock();
        let removed = self.sessions.remove(session_id).map(|(_, entry)| entry.session);
        if removed.is_some() {
            info!("Session {} removed from registry", session_id);
        }
        removed
    }

    /// Live session by id
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(&entry.session))
            .filter(|session| !session.state().is_terminal())
    }

    /// Live session ids in insertion order
    pub fn list(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .map(|session| session.id().to_string())
            .collect()
    }

    pub fn list_info(&self) -> Vec<SessionInfo> {
        self.snapshot().iter().map(|session| session.info()).collect()
    }

    pub fn info(&self, session_id: &str) -> Option<SessionInfo> {
        self.get(session_id).map(|session| session.info())
    }

    fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut entries: Vec<(usize, Arc<Session>)> = self
            .sessions
            .iter()
            .filter(|entry| !entry.session.state().is_terminal())
            .map(|entry| (entry.order, Arc::clone(&entry.session)))
            .collect();
        entries.sort_by_key(|(order, _)| *order);
        entries.into_iter().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Disconnect and remove. `false` if the id was unknown or already gone.
    pub async fn disconnect(&self, session_id: &str) -> bool {
        match self.evict(session_id) {
            Some(session) => {
                session.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnect every live session and clear the map (process shutdown)
    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let _guard = self.create_lock.lock();
            let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
            ids.iter()
                .filter_map(|id| self.sessions.remove(id).map(|(_, entry)| entry.session))
                .collect()
        };

        info!("Disconnecting {} sessions", sessions.len());
        for session in sessions {
            session.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::instance::testing::{detached_session, session_with_shell};
    use crate::ssh::{ShellCommand, ShellExit};
    use std::time::Duration;

    fn registry() -> Arc<SessionRegistry> {
        SessionRegistry::new(ManagerSettings::default())
    }

    async fn wait_until_absent(registry: &SessionRegistry, id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.sessions.contains_key(id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = registry();
        assert!(registry.get("missing").is_none());
        assert!(registry.info("missing").is_none());
        assert!(!registry.disconnect("missing").await);
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_insert_and_list_in_order() {
        let registry = registry();
        let a = detached_session("a");
        let b = detached_session("b");
        let c = detached_session("c");
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));
        registry.insert(Arc::clone(&c));

        assert_eq!(
            registry.list(),
            vec![a.id().to_string(), b.id().to_string(), c.id().to_string()]
        );
        let hosts: Vec<String> = registry.list_info().into_iter().map(|i| i.host).collect();
        assert_eq!(hosts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let registry = registry();
        let session = detached_session("h");
        let id = session.id().to_string();
        registry.insert(session);

        assert!(registry.disconnect(&id).await);
        assert!(!registry.disconnect(&id).await);
        assert!(registry.get(&id).is_none());
        assert!(!registry.list().contains(&id));
    }

    #[tokio::test]
    async fn test_shell_exit_evicts_automatically() {
        let registry = registry();
        let (session, _shell_rx, exit) = session_with_shell("h");
        let id = session.id().to_string();
        registry.insert(Arc::clone(&session));
        drop(session);

        exit.send(ShellExit::Remote).unwrap();
        wait_until_absent(&registry, &id).await;

        assert!(registry.get(&id).is_none());
        // Explicit disconnect after automatic eviction is a no-op
        assert!(!registry.disconnect(&id).await);
    }

    #[tokio::test]
    async fn test_direct_session_disconnect_evicts() {
        let registry = registry();
        let session = detached_session("h");
        let id = session.id().to_string();
        registry.insert(Arc::clone(&session));

        session.disconnect().await;
        // Terminal sessions are hidden immediately, removed shortly after
        assert!(registry.get(&id).is_none());
        wait_until_absent(&registry, &id).await;
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let registry = registry();
        let (one, mut one_rx, _one_exit) = session_with_shell("one");
        let (two, mut two_rx, _two_exit) = session_with_shell("two");
        let id_one = one.id().to_string();
        let id_two = two.id().to_string();
        assert_ne!(id_one, id_two);
        registry.insert(one);
        registry.insert(two);

        assert!(registry.disconnect(&id_one).await);
        assert!(matches!(one_rx.recv().await, Some(ShellCommand::Close)));

        let two = registry.get(&id_two).unwrap();
        assert!(two.write_to_shell(b"still here").await);
        assert!(matches!(two_rx.recv().await, Some(ShellCommand::Data(_))));
        assert_eq!(registry.list(), vec![id_two]);
    }

    #[tokio::test]
    async fn test_disconnect_all_clears() {
        let registry = registry();
        let a = detached_session("a");
        let b = detached_session("b");
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));

        registry.disconnect_all().await;
        assert!(registry.is_empty());
        assert!(a.state().is_terminal());
        assert!(b.state().is_terminal());
    }

    #[tokio::test]
    async fn test_terminal_session_is_not_registered() {
        let registry = registry();
        let session = detached_session("h");
        session.disconnect().await;
        assert!(!registry.insert(session));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_register_reports_session_lost_during_setup() {
        let registry = registry();
        let (session, _shell_rx, exit) = session_with_shell("nologin");
        let mut state = session.state_receiver();
        exit.send(ShellExit::Remote).unwrap();
        state.wait_for(|s| s.is_terminal()).await.unwrap();

        let err = registry.register(session).unwrap_err();
        assert!(matches!(err, SshError::Channel(ref m) if m.contains("ended during setup")));
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_registered_id_is_listed() {
        let registry = registry();
        let id = registry.register(detached_session("h")).unwrap();
        assert_eq!(registry.list(), vec![id]);
    }

    #[tokio::test]
    async fn test_session_whose_transport_died_early_is_evicted() {
        let registry = registry();
        let (controller, disconnect_rx) = crate::ssh::spawn_detached_owner();
        controller.disconnect().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let session = Arc::new(Session::new(
            "doa".to_string(),
            ConnectionConfig::with_password("h", 22, "u", "p"),
            ManagerSettings::default(),
            controller,
        ));
        session.spawn_lifecycle(disconnect_rx, None);
        session.mark_ready();
        // Either refused outright or evicted by the watcher
        registry.insert(session);

        wait_until_absent(&registry, "doa").await;
        assert!(registry.list().is_empty());
    }
}
