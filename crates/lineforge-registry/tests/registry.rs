//! Integration tests for the registry, driven entirely through the
//! in-memory test connection.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lineforge_registry::{
    HookError, Lifecycle, LineHandler, MemoryUserStore, NullWorld, RegistryConfig,
    RegistryError, SessionRegistry, UserStore, World,
};
use lineforge_session::{CommandHistory, Observer, ObserverEvent, SessionState};
use lineforge_transport::{ConnectionEvent, ConnectionId, Key, TestConnection, TestHandle};
use tokio::sync::mpsc;

// =========================================================================
// Recording collaborators
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Transition(String, SessionState),
    Modal(String, Key),
    Line(String, String),
    Interrupt(String),
}

type Log<T> = Arc<Mutex<Vec<T>>>;

fn take<T: Clone>(log: &Log<T>) -> Vec<T> {
    std::mem::take(&mut *log.lock().unwrap())
}

struct RecLifecycle(Log<Call>);

impl Lifecycle for RecLifecycle {
    fn transition(
        &mut self,
        _registry: &mut SessionRegistry,
        id: &ConnectionId,
        state: &SessionState,
    ) -> Result<(), HookError> {
        self.0
            .lock()
            .unwrap()
            .push(Call::Transition(id.to_string(), state.clone()));
        Ok(())
    }

    fn handle_modal_input(
        &mut self,
        _registry: &mut SessionRegistry,
        id: &ConnectionId,
        key: Key,
    ) -> Result<(), HookError> {
        self.0.lock().unwrap().push(Call::Modal(id.to_string(), key));
        Ok(())
    }
}

struct RecLines(Log<Call>);

impl LineHandler for RecLines {
    fn on_line(
        &mut self,
        _registry: &mut SessionRegistry,
        id: &ConnectionId,
        line: &str,
    ) -> Result<(), HookError> {
        self.0
            .lock()
            .unwrap()
            .push(Call::Line(id.to_string(), line.to_string()));
        Ok(())
    }

    fn on_interrupt(
        &mut self,
        _registry: &mut SessionRegistry,
        id: &ConnectionId,
    ) -> Result<(), HookError> {
        self.0.lock().unwrap().push(Call::Interrupt(id.to_string()));
        Ok(())
    }
}

struct RecUsers {
    inner: MemoryUserStore,
    log: Log<String>,
}

impl CommandHistory for RecUsers {
    fn entries(&self, username: &str) -> Vec<String> {
        self.inner.entries(username)
    }
}

impl UserStore for RecUsers {
    fn active_session_for(&self, username: &str) -> Option<ConnectionId> {
        self.inner.active_session_for(username)
    }

    fn register(&mut self, username: &str, id: &ConnectionId) {
        self.log.lock().unwrap().push(format!("register {username} {id}"));
        self.inner.register(username, id);
    }

    fn unregister(&mut self, username: &str) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("unregister {username}"));
        self.inner.unregister(username)
    }

    fn cancel_pending_transfer(&mut self, username: &str) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("cancel {username}"));
        Ok(())
    }

    fn record_command(&mut self, username: &str, line: &str) {
        self.inner.record_command(username, line);
    }
}

struct RecWorld {
    log: Log<String>,
    fail: bool,
}

impl World for RecWorld {
    fn resolve_combat_on_disconnect(
        &mut self,
        _id: &ConnectionId,
        username: &str,
    ) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("combat {username}"));
        if self.fail {
            return Err(HookError::new("combat engine down"));
        }
        Ok(())
    }

    fn remove_from_all_locations(&mut self, username: &str) -> Result<(), HookError> {
        self.log.lock().unwrap().push(format!("locations {username}"));
        Ok(())
    }
}

// =========================================================================
// Harness
// =========================================================================

struct Harness {
    registry: SessionRegistry,
    calls: Log<Call>,
    users: Log<String>,
    world: Log<String>,
}

fn harness_with(fail_world: bool) -> Harness {
    let calls: Log<Call> = Arc::default();
    let users: Log<String> = Arc::default();
    let world: Log<String> = Arc::default();
    let mut registry = SessionRegistry::new(
        RegistryConfig::default(),
        RecUsers {
            inner: MemoryUserStore::new(),
            log: Arc::clone(&users),
        },
        RecWorld {
            log: Arc::clone(&world),
            fail: fail_world,
        },
    );
    registry.install(RecLifecycle(Arc::clone(&calls)), RecLines(Arc::clone(&calls)));
    Harness {
        registry,
        calls,
        users,
        world,
    }
}

fn harness() -> Harness {
    harness_with(false)
}

impl Harness {
    fn connect(&mut self, name: &str) -> (ConnectionId, TestHandle) {
        let (conn, handle) = TestConnection::new(name);
        let id = self.registry.create(Box::new(conn)).expect("create");
        (id, handle)
    }

    fn login(&mut self, name: &str, user: &str) -> (ConnectionId, TestHandle) {
        let (id, handle) = self.connect(name);
        self.registry.authenticate(&id, user).expect("authenticate");
        (id, handle)
    }

    fn lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Line(_, line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }
}

// =========================================================================
// create / install
// =========================================================================

#[test]
fn test_create_before_install_returns_not_ready() {
    let mut registry =
        SessionRegistry::new(RegistryConfig::default(), MemoryUserStore::new(), NullWorld);
    let (conn, _h) = TestConnection::new("c1");
    assert!(matches!(
        registry.create(Box::new(conn)),
        Err(RegistryError::NotReady)
    ));
    assert!(registry.is_empty());
}

#[test]
fn test_create_starts_lifecycle_at_connecting() {
    let mut h = harness();
    let (id, _handle) = h.connect("c1");
    assert_eq!(
        take(&h.calls),
        vec![Call::Transition("c1".into(), SessionState::Connecting)]
    );
    assert_eq!(
        h.registry.get(&id).map(|s| s.state().clone()),
        Some(SessionState::Connecting)
    );
}

#[test]
fn test_create_duplicate_connection_id_rejected() {
    let mut h = harness();
    h.connect("c1");
    let (conn, _handle) = TestConnection::new("c1");
    assert!(matches!(
        h.registry.create(Box::new(conn)),
        Err(RegistryError::DuplicateConnection(_))
    ));
    assert_eq!(h.registry.len(), 1);
}

// =========================================================================
// dispatch
// =========================================================================

#[test]
fn test_simulate_input_hello_delivers_line() {
    let mut h = harness();
    let (id, handle) = h.connect("c1");

    h.registry.simulate_input(&id, "hello\r");

    assert_eq!(h.lines(), vec!["hello"]);
    let session = h.registry.get(&id).expect("session");
    assert_eq!(session.line().text(), "");
    assert_eq!(session.line().cursor(), 0);
    assert_eq!(handle.output(), "hello\r\n");
}

#[test]
fn test_dispatch_unknown_connection_is_ignored() {
    let mut h = harness();
    h.registry
        .dispatch(ConnectionId::new("ghost"), ConnectionEvent::Input(Key::Char('x')));
    h.registry.dispatch(ConnectionId::new("ghost"), ConnectionEvent::End);
    assert!(h.registry.is_empty());
}

#[test]
fn test_dispatch_modal_routes_to_lifecycle() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    h.registry
        .transition(&id, SessionState::Modal { name: "pager".into() })
        .expect("transition");
    take(&h.calls);

    h.registry.simulate_input(&id, "q");

    assert_eq!(take(&h.calls), vec![Call::Modal("c1".into(), Key::Char('q'))]);
    assert_eq!(handle.output(), "");
}

#[test]
fn test_dispatch_records_history_for_recall() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    h.registry.simulate_input(&id, "look\rnorth\r");
    handle.take_output();

    h.registry.simulate_input(&id, "\x1b[A\x1b[A");
    assert_eq!(h.registry.get(&id).expect("session").line().text(), "look");
}

#[test]
fn test_dispatch_masked_line_is_not_recalled() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    h.registry.set_masked(&id, true).expect("mask on");
    h.registry.simulate_input(&id, "hunter2\r");
    h.registry.set_masked(&id, false).expect("mask off");
    handle.take_output();

    h.registry.simulate_input(&id, "\x1b[A");
    assert!(!handle.output().contains("hunter2"));
    assert_eq!(h.registry.get(&id).expect("session").line().text(), "");
    assert!(h.registry.users().entries("alice").is_empty());
    assert_eq!(h.lines(), vec!["hunter2".to_string()]);
}

// =========================================================================
// Movement mode and input block
// =========================================================================

#[test]
fn test_movement_mode_queues_without_echo_or_callback() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    h.registry.set_movement_mode(&id, true).expect("movement");

    h.registry.simulate_input(&id, "look\r");

    assert!(h.lines().is_empty());
    assert_eq!(handle.output(), "");
    assert_eq!(
        h.registry.take_pending_commands(&id).expect("drain"),
        vec!["look"]
    );
    assert!(h.registry.take_pending_commands(&id).expect("drain").is_empty());
}

#[test]
fn test_input_block_passes_only_interrupt() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    h.registry.set_input_blocked(&id, true).expect("block");

    h.registry.simulate_input(&id, "rm\r\x03");
    assert!(h.lines().is_empty());
    assert_eq!(handle.output(), "");
    assert!(take(&h.calls).contains(&Call::Interrupt("c1".into())));

    h.registry.set_input_blocked(&id, false).expect("unblock");
    h.registry.simulate_input(&id, "x");
    assert_eq!(handle.output(), "x");
}

// =========================================================================
// Broadcast
// =========================================================================

#[test]
fn test_broadcast_repairs_recipient_prompt_and_buffer() {
    let mut h = harness();
    let (speaker, speaker_out) = h.login("c1", "alice");
    let (viewer, viewer_out) = h.login("c2", "bob");
    let (_guest, guest_out) = h.connect("c3");
    h.registry.set_prompt(&viewer, "> ").expect("prompt");
    h.registry.simulate_input(&viewer, "hel");
    viewer_out.take_output();

    let sent = h.registry.broadcast("alice waves.", Some(&speaker));

    assert_eq!(sent, 1);
    assert_eq!(viewer_out.output(), "\r\x1b[Kalice waves.\r\n\r\x1b[K> hel");
    assert_eq!(speaker_out.output(), "");
    assert_eq!(guest_out.output(), "");
}

#[test]
fn test_lookup_by_username_case_insensitive() {
    let mut h = harness();
    let (id, _handle) = h.login("c1", "Alice");
    h.connect("c2");
    assert_eq!(h.registry.lookup_by_username("aLiCe"), Some(id));
    assert_eq!(h.registry.lookup_by_username("bob"), None);
}

// =========================================================================
// Takeover and disconnect
// =========================================================================

#[test]
fn test_authenticate_same_user_twice_evicts_first() {
    let mut h = harness();
    let (first, first_out) = h.login("c1", "alice");
    let (second, _second_out) = h.connect("c2");

    h.registry.authenticate(&second, "ALICE").expect("authenticate");

    assert!(first_out.output().contains("logged in elsewhere"));
    assert!(first_out.is_ended());
    assert!(!h.registry.contains(&first));
    assert_eq!(h.registry.len(), 1);
    assert_eq!(h.registry.lookup_by_username("alice"), Some(second.clone()));
    assert_eq!(
        take(&h.users),
        vec![
            "register alice c1".to_string(),
            "unregister alice".to_string(),
            "register ALICE c2".to_string(),
        ]
    );
}

#[test]
fn test_disconnect_evicts_other_live_session_of_same_user() {
    let mut h = harness();
    let (a, _a_out) = h.login("c1", "alice");
    let (b, b_out) = h.connect("c2");
    // Force a duplicate past the takeover path.
    h.registry.get_mut(&b).expect("session").mark_authenticated("alice");

    h.registry.dispatch(a.clone(), ConnectionEvent::End);

    assert!(b_out.output().contains("logged in elsewhere"));
    assert!(b_out.is_ended());
    assert!(h.registry.is_empty());
    assert_eq!(h.registry.lookup_by_username("alice"), None);
}

#[test]
fn test_disconnect_twice_is_noop() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    take(&h.users);

    assert!(h.registry.disconnect(&id, true));
    assert!(!h.registry.disconnect(&id, true));
    h.registry.dispatch(id.clone(), ConnectionEvent::End);

    assert_eq!(take(&h.users), vec!["unregister alice".to_string()]);
    assert_eq!(take(&h.world), vec!["combat alice", "locations alice"]);
    assert_eq!(handle.end_calls(), 1);
}

#[test]
fn test_disconnect_end_broadcasts_departure_error_does_not() {
    let mut h = harness();
    let (a, _a_out) = h.login("c1", "alice");
    let (b, _b_out) = h.login("c2", "bob");
    let (_c, c_out) = h.login("c3", "carol");

    h.registry.dispatch(a, ConnectionEvent::End);
    assert!(c_out.take_output().contains("alice has left."));

    h.registry.dispatch(
        b,
        ConnectionEvent::Error(lineforge_transport::TransportError::Closed("reset".into())),
    );
    assert!(!c_out.output().contains("bob has left."));
}

#[test]
fn test_disconnect_unauthenticated_skips_world_and_directory() {
    let mut h = harness();
    let (id, _handle) = h.connect("c1");
    take(&h.users);

    h.registry.dispatch(id, ConnectionEvent::End);

    assert!(take(&h.users).is_empty());
    assert!(take(&h.world).is_empty());
    assert!(h.registry.is_empty());
}

#[test]
fn test_disconnect_survives_failing_collaborator() {
    let mut h = harness_with(true);
    let (id, _handle) = h.login("c1", "alice");

    h.registry.dispatch(id.clone(), ConnectionEvent::End);

    assert!(!h.registry.contains(&id));
    assert_eq!(take(&h.world), vec!["combat alice", "locations alice"]);
    assert!(take(&h.users).contains(&"unregister alice".to_string()));
}

#[test]
fn test_disconnect_cancels_pending_transfer() {
    let mut h = harness();
    let (id, _handle) = h.login("c1", "alice");
    h.registry
        .set_pending_transfer(&id, Some("other-world".into()))
        .expect("transfer");
    take(&h.users);

    h.registry.disconnect(&id, false);
    assert_eq!(
        take(&h.users),
        vec!["cancel alice".to_string(), "unregister alice".to_string()]
    );
}

#[test]
fn test_disconnect_notifies_and_detaches_observer() {
    let mut h = harness();
    let (id, _handle) = h.login("c1", "alice");
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.registry
        .attach_observer(&id, Observer::new("admin", tx))
        .expect("attach");
    h.registry.set_input_blocked(&id, true).expect("block");

    h.registry.dispatch(id.clone(), ConnectionEvent::End);

    assert_eq!(
        rx.try_recv().ok(),
        Some(ObserverEvent::Ended {
            id: id.clone(),
            username: Some("alice".into())
        })
    );
    assert!(matches!(rx.try_recv(), Ok(ObserverEvent::Notice(_))));
}

#[test]
fn test_kick_writes_reason_and_broadcasts_departure() {
    let mut h = harness();
    let (a, a_out) = h.login("c1", "alice");
    let (_b, b_out) = h.login("c2", "bob");

    h.registry.kick(&a, "Behave.").expect("kick");

    assert!(a_out.output().contains("Behave."));
    assert!(a_out.is_ended());
    assert!(b_out.output().contains("alice has left."));
    assert!(matches!(
        h.registry.kick(&a, "again"),
        Err(RegistryError::Session(_))
    ));
}

#[test]
fn test_shutdown_ends_every_session_without_departures() {
    let mut h = harness();
    let (_a, a_out) = h.login("c1", "alice");
    let (_b, b_out) = h.connect("c2");

    h.registry.shutdown("Server going down.\r\n");

    assert!(h.registry.is_empty());
    assert!(a_out.is_ended() && b_out.is_ended());
    assert!(a_out.output().contains("Server going down."));
    assert!(!a_out.output().contains("has left"));
}

// =========================================================================
// Idle sweep
// =========================================================================

#[test]
fn test_idle_sweep_warns_then_reaps_after_grace() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    let later = Instant::now() + Duration::from_secs(120);

    let flagged = h.registry.idle_sweep_at(Duration::from_secs(60), later);

    assert_eq!(flagged, 1);
    assert!(handle.output().contains("idle too long"));
    assert!(!handle.is_ended());
    assert_eq!(h.registry.reap_scheduled_closes(later), 0);

    let closed = h.registry.reap_scheduled_closes(later + Duration::from_secs(2));
    assert_eq!(closed, 1);
    assert!(handle.is_ended());
    assert!(!h.registry.contains(&id));
}

#[test]
fn test_idle_sweep_input_during_grace_cancels_close() {
    let mut h = harness();
    let (id, handle) = h.login("c1", "alice");
    let later = Instant::now() + Duration::from_secs(120);
    assert_eq!(h.registry.idle_sweep_at(Duration::from_secs(60), later), 1);

    h.registry.simulate_input(&id, "x");

    assert_eq!(
        h.registry.reap_scheduled_closes(later + Duration::from_secs(5)),
        0
    );
    assert!(!handle.is_ended());
    assert!(h.registry.contains(&id));
}

#[test]
fn test_idle_sweep_oversized_grace_falls_back_to_default() {
    let config = RegistryConfig {
        idle_grace: Duration::MAX,
        ..RegistryConfig::default()
    };
    let mut registry = SessionRegistry::new(config, MemoryUserStore::new(), NullWorld);
    registry.install(RecLifecycle(Arc::default()), RecLines(Arc::default()));
    let (conn, handle) = TestConnection::new("c1");
    let id = registry.create(Box::new(conn)).expect("create");
    registry.authenticate(&id, "alice").expect("authenticate");
    let later = Instant::now() + Duration::from_secs(120);

    assert_eq!(registry.idle_sweep_at(Duration::from_secs(60), later), 1);
    assert_eq!(registry.reap_scheduled_closes(later + Duration::from_secs(2)), 1);
    assert!(handle.is_ended());
}

#[test]
fn test_idle_sweep_zero_timeout_is_noop() {
    let mut h = harness();
    let (_id, handle) = h.login("c1", "alice");
    let later = Instant::now() + Duration::from_secs(3600);
    assert_eq!(h.registry.idle_sweep_at(Duration::ZERO, later), 0);
    assert_eq!(handle.output(), "");
}

#[test]
fn test_idle_sweep_exempts_observed_and_unauthenticated() {
    let mut h = harness();
    let (watched, watched_out) = h.login("c1", "alice");
    let (_guest, guest_out) = h.connect("c2");
    let (tx, _rx) = mpsc::unbounded_channel();
    h.registry
        .attach_observer(&watched, Observer::new("admin", tx))
        .expect("attach");
    let later = Instant::now() + Duration::from_secs(120);

    assert_eq!(h.registry.idle_sweep_at(Duration::from_secs(60), later), 0);
    assert!(!watched_out.output().contains("idle"));
    assert_eq!(guest_out.output(), "");
}

// =========================================================================
// Admin view
// =========================================================================

#[test]
fn test_session_infos_reflects_flags() {
    let mut h = harness();
    let (id, _handle) = h.login("c1", "alice");
    h.connect("c2");
    h.registry.set_input_blocked(&id, true).expect("block");

    let infos = h.registry.session_infos();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].id, id);
    assert_eq!(infos[0].username.as_deref(), Some("alice"));
    assert_eq!(infos[0].state, SessionState::Authenticated);
    assert!(infos[0].input_blocked);
    assert_eq!(infos[1].username, None);
}

// =========================================================================
// Re-entrant handlers
// =========================================================================

/// Logs a session in with whatever name it types first.
struct NameLogin;

impl LineHandler for NameLogin {
    fn on_line(
        &mut self,
        registry: &mut SessionRegistry,
        id: &ConnectionId,
        line: &str,
    ) -> Result<(), HookError> {
        let authenticated = registry.get(id).is_some_and(|s| s.is_authenticated());
        if authenticated {
            registry.broadcast(line, Some(id));
        } else {
            registry
                .authenticate(id, line)
                .map_err(|e| HookError::new(e.to_string()))?;
            registry
                .write(id, &format!("Welcome, {line}.\r\n"))
                .map_err(|e| HookError::new(e.to_string()))?;
        }
        Ok(())
    }
}

#[test]
fn test_line_handler_can_drive_registry() {
    let calls: Log<Call> = Arc::default();
    let mut registry =
        SessionRegistry::new(RegistryConfig::default(), MemoryUserStore::new(), lineforge_registry::NullWorld);
    registry.install(RecLifecycle(calls), NameLogin);

    let (c1, h1) = TestConnection::new("c1");
    let c1 = registry.create(Box::new(c1)).expect("create");
    let (c2, h2) = TestConnection::new("c2");
    let c2 = registry.create(Box::new(c2)).expect("create");

    registry.simulate_input(&c1, "alice\r");
    registry.simulate_input(&c2, "alice\r");

    assert!(h1.output().contains("Welcome, alice."));
    assert!(h1.is_ended(), "first login was taken over");
    assert!(h2.output().contains("Welcome, alice."));
    assert_eq!(registry.lookup_by_username("alice"), Some(c2));
    assert!(!registry.contains(&c1));
}
