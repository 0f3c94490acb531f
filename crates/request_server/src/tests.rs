// End-to-end scenarios over an in-memory transport: a real node with one
// worker, driven entirely through TransportEvents and per-connection
// outbound channels.
#[cfg(test)]
mod tests {
    use crate::cache::CacheBounds;
    use crate::config::NodeConfig;
    use crate::connection::ConnectionHandle;
    use crate::db::{DatabaseContext, DbError};
    use crate::dispatch::RequestEnvelope;
    use crate::handler::{
        HandlerResult, PingHandler, RequestContext, RequestHandler, PING_DESCRIPTOR,
    };
    use crate::node::{spawn_node, ContextFactory, ProcessorNode, TransportEvent};
    use crate::registry::HandlerRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use warden_protocol::{
        codec::Record, codes, frame, paged, AuthScope, Direction, FieldSpec, HandlerDescriptor,
        ParamSet, ParamSpec, ParamTree, RequestFrame, Value, ValueKind,
    };

    // ------------------------------------------------------------------
    // Database probe
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct DbProbe {
        begins: AtomicU32,
        commits: AtomicU32,
        rollbacks: AtomicU32,
        fail_next_commit: AtomicBool,
    }

    struct RecordingDb {
        probe: Arc<DbProbe>,
    }

    #[async_trait]
    impl DatabaseContext for RecordingDb {
        async fn begin_transaction(&mut self) -> Result<(), DbError> {
            self.probe.begins.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }

        async fn commit_transaction(&mut self) -> Result<(), DbError> {
            if self.probe.fail_next_commit.swap(false, AtomicOrdering::SeqCst) {
                return Err(DbError::Database("forced commit failure".into()));
            }
            self.probe.commits.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }

        async fn rollback_transaction(&mut self) -> Result<(), DbError> {
            self.probe.rollbacks.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Test handlers
    // ------------------------------------------------------------------

    const ECHO_PARAMS: &[ParamSpec] = &[
        ParamSpec {
            index: 1,
            direction: Direction::Input,
            name: "msg",
            kind: ValueKind::String,
        },
        ParamSpec {
            index: 1,
            direction: Direction::Output,
            name: "msg",
            kind: ValueKind::String,
        },
    ];

    static ECHO: HandlerDescriptor = HandlerDescriptor {
        category: 2,
        method: 1,
        server_id: 0,
        auth: AuthScope::Unauthenticated,
        params: ECHO_PARAMS,
        constraints: &[],
    };

    struct EchoHandler {
        params: ParamSet,
    }

    fn new_echo() -> Box<dyn RequestHandler> {
        Box::new(EchoHandler {
            params: ParamSet::for_descriptor(&ECHO),
        })
    }

    #[async_trait]
    impl RequestHandler for EchoHandler {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &ECHO
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, _ctx: &mut RequestContext<'_>) -> HandlerResult {
            // Input and output share the `msg` field; nothing to do.
            Ok(codes::SUCCESS)
        }
    }

    const GARRISON_FIELDS: &[FieldSpec] = &[
        FieldSpec {
            index: 1,
            name: "id",
            kind: ValueKind::U64,
        },
        FieldSpec {
            index: 2,
            name: "name",
            kind: ValueKind::String,
        },
    ];

    const PAGED_PARAMS: &[ParamSpec] = &[
        paged::SKIP,
        paged::TAKE,
        paged::ORDER_BY_FIELD,
        paged::ORDER_BY_ASCENDING,
        paged::list_param(&ValueKind::Object(GARRISON_FIELDS)),
    ];

    static PAGED: HandlerDescriptor = HandlerDescriptor {
        category: 3,
        method: 1,
        server_id: 0,
        auth: AuthScope::Unauthenticated,
        params: PAGED_PARAMS,
        constraints: &paged::CONSTRAINTS,
    };

    #[derive(Clone)]
    struct Garrison {
        id: u64,
        name: &'static str,
    }

    impl Record for Garrison {
        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "id" => Some(Value::U64(self.id)),
                "name" => Some(Value::Str(self.name.to_owned())),
                _ => None,
            }
        }

        fn field_names(&self) -> &'static [&'static str] {
            &["id", "name"]
        }
    }

    const GARRISON_SORT_KEYS: &[(&str, paged::SortKey<Garrison>)] = &[
        ("id", |a, b| a.id.cmp(&b.id)),
        ("name", |a, b| Ord::cmp(a.name, b.name)),
    ];

    fn garrisons() -> Vec<Garrison> {
        [(31, "east"), (4, "north"), (17, "south"), (2, "west"), (9, "gate")]
            .into_iter()
            .map(|(id, name)| Garrison { id, name })
            .collect()
    }

    struct PagedGarrisons {
        params: ParamSet,
        tree: ParamTree,
    }

    fn new_paged() -> Box<dyn RequestHandler> {
        Box::new(PagedGarrisons {
            params: ParamSet::for_descriptor(&PAGED),
            tree: ParamTree::build(&PAGED),
        })
    }

    #[async_trait]
    impl RequestHandler for PagedGarrisons {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &PAGED
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, _ctx: &mut RequestContext<'_>) -> HandlerResult {
            let args = paged::PageArgs::read(&self.params)?;
            let page = match paged::apply(garrisons(), &args, GARRISON_SORT_KEYS) {
                Ok(page) => page,
                Err(code) => return Ok(code),
            };
            let list_node = &self.tree.output[0];
            if paged::bind_page(list_node, &mut self.params, &page).is_err() {
                return Ok(codes::SERVER_ERROR);
            }
            Ok(codes::SUCCESS)
        }
    }

    static CONFLICT: HandlerDescriptor = HandlerDescriptor {
        category: 4,
        method: 1,
        server_id: 0,
        auth: AuthScope::Unauthenticated,
        params: &[],
        constraints: &[],
    };

    struct ConflictOnce {
        params: ParamSet,
        attempts: u32,
    }

    fn new_conflict() -> Box<dyn RequestHandler> {
        Box::new(ConflictOnce {
            params: ParamSet::for_descriptor(&CONFLICT),
            attempts: 0,
        })
    }

    #[async_trait]
    impl RequestHandler for ConflictOnce {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &CONFLICT
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, ctx: &mut RequestContext<'_>) -> HandlerResult {
            self.attempts += 1;
            if self.attempts == 1 {
                // Queued before the conflict; must never be delivered.
                ctx.notify(42, 9, 9);
                return Err(DbError::SynchronizationConflict.into());
            }
            Ok(codes::SUCCESS)
        }
    }

    static NOTIFY: HandlerDescriptor = HandlerDescriptor {
        category: 5,
        method: 1,
        server_id: 0,
        auth: AuthScope::Unauthenticated,
        params: &[],
        constraints: &[],
    };

    struct NotifyTwice {
        params: ParamSet,
    }

    fn new_notify() -> Box<dyn RequestHandler> {
        Box::new(NotifyTwice {
            params: ParamSet::for_descriptor(&NOTIFY),
        })
    }

    #[async_trait]
    impl RequestHandler for NotifyTwice {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &NOTIFY
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, ctx: &mut RequestContext<'_>) -> HandlerResult {
            ctx.notify(42, 1, 100);
            ctx.notify(42, 2, 200);
            Ok(codes::SUCCESS)
        }
    }

    static SILENT: HandlerDescriptor = HandlerDescriptor {
        category: 5,
        method: 2,
        server_id: 0,
        auth: AuthScope::Unauthenticated,
        params: &[],
        constraints: &[],
    };

    struct SilentHandler {
        params: ParamSet,
    }

    fn new_silent() -> Box<dyn RequestHandler> {
        Box::new(SilentHandler {
            params: ParamSet::for_descriptor(&SILENT),
        })
    }

    #[async_trait]
    impl RequestHandler for SilentHandler {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &SILENT
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, _ctx: &mut RequestContext<'_>) -> HandlerResult {
            Ok(codes::NO_RESPONSE)
        }
    }

    const LOGIN_PARAMS: &[ParamSpec] = &[ParamSpec {
        index: 1,
        direction: Direction::Input,
        name: "user",
        kind: ValueKind::U64,
    }];

    static LOGIN: HandlerDescriptor = HandlerDescriptor {
        category: 6,
        method: 1,
        server_id: 0,
        auth: AuthScope::Unauthenticated,
        params: LOGIN_PARAMS,
        constraints: &[],
    };

    struct LoginHandler {
        params: ParamSet,
    }

    fn new_login() -> Box<dyn RequestHandler> {
        Box::new(LoginHandler {
            params: ParamSet::for_descriptor(&LOGIN),
        })
    }

    #[async_trait]
    impl RequestHandler for LoginHandler {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &LOGIN
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, ctx: &mut RequestContext<'_>) -> HandlerResult {
            ctx.authenticated_id = self.params.get_u64("user")?;
            Ok(codes::SUCCESS)
        }
    }

    static LOGOUT: HandlerDescriptor = HandlerDescriptor {
        category: 6,
        method: 2,
        server_id: 0,
        auth: AuthScope::Authenticated,
        params: &[],
        constraints: &[],
    };

    struct LogoutHandler {
        params: ParamSet,
    }

    fn new_logout() -> Box<dyn RequestHandler> {
        Box::new(LogoutHandler {
            params: ParamSet::for_descriptor(&LOGOUT),
        })
    }

    #[async_trait]
    impl RequestHandler for LogoutHandler {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &LOGOUT
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, ctx: &mut RequestContext<'_>) -> HandlerResult {
            ctx.authenticated_id = 0;
            Ok(codes::SUCCESS)
        }
    }

    const WHOAMI_PARAMS: &[ParamSpec] = &[ParamSpec {
        index: 1,
        direction: Direction::Output,
        name: "id",
        kind: ValueKind::U64,
    }];

    static WHOAMI: HandlerDescriptor = HandlerDescriptor {
        category: 6,
        method: 3,
        server_id: 0,
        auth: AuthScope::Authenticated,
        params: WHOAMI_PARAMS,
        constraints: &[],
    };

    struct WhoamiHandler {
        params: ParamSet,
    }

    fn new_whoami() -> Box<dyn RequestHandler> {
        Box::new(WhoamiHandler {
            params: ParamSet::for_descriptor(&WHOAMI),
        })
    }

    #[async_trait]
    impl RequestHandler for WhoamiHandler {
        fn descriptor(&self) -> &'static HandlerDescriptor {
            &WHOAMI
        }

        fn params(&self) -> &ParamSet {
            &self.params
        }

        fn params_mut(&mut self) -> &mut ParamSet {
            &mut self.params
        }

        async fn process(&mut self, ctx: &mut RequestContext<'_>) -> HandlerResult {
            self.params.set("id", Value::U64(ctx.authenticated_id));
            Ok(codes::SUCCESS)
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct TestNode {
        node: Arc<ProcessorNode>,
        events: mpsc::UnboundedSender<TransportEvent>,
        probe: Arc<DbProbe>,
    }

    fn start_node() -> TestNode {
        let mut registry = HandlerRegistry::new(0);
        registry
            .register(&PING_DESCRIPTOR, PingHandler::new)
            .expect("ping");
        registry.register(&ECHO, new_echo).expect("echo");
        registry.register(&PAGED, new_paged).expect("paged");
        registry.register(&CONFLICT, new_conflict).expect("conflict");
        registry.register(&NOTIFY, new_notify).expect("notify");
        registry.register(&SILENT, new_silent).expect("silent");
        registry.register(&LOGIN, new_login).expect("login");
        registry.register(&LOGOUT, new_logout).expect("logout");
        registry.register(&WHOAMI, new_whoami).expect("whoami");

        let probe = Arc::new(DbProbe::default());
        let factory: ContextFactory = {
            let probe = probe.clone();
            Arc::new(move || {
                Box::new(RecordingDb {
                    probe: probe.clone(),
                }) as Box<dyn DatabaseContext>
            })
        };

        let config = NodeConfig {
            workers: 1,
            cache: CacheBounds {
                start_x: 0,
                start_y: 0,
                width: 64,
                height: 64,
                los_radius: 3,
            },
            ..NodeConfig::default()
        };
        let node = Arc::new(ProcessorNode::new(config, registry, factory));
        let (events, event_rx) = mpsc::unbounded_channel();
        let _ = spawn_node(node.clone(), event_rx);

        TestNode {
            node,
            events,
            probe,
        }
    }

    impl TestNode {
        fn open(&self) -> (ConnectionHandle, mpsc::UnboundedReceiver<Vec<u8>>) {
            self.node.manager().open_connection(None)
        }

        fn send(&self, connection: &ConnectionHandle, category: u8, method: u8, payload: Vec<u8>) {
            let envelope = RequestEnvelope {
                connection_id: connection.id(),
                frame: RequestFrame {
                    category,
                    method,
                    payload,
                },
            };
            self.events
                .send(TransportEvent::Request(envelope))
                .expect("node is running");
        }
    }

    async fn recv_frame(receiver: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection channel closed")
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread")]
    async fn ping_answers_success_with_no_payload() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        server.send(&connection, 1, 1, Vec::new());
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echo_round_trips_the_string_bytes() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        server.send(&connection, 2, 1, vec![0x02, 0x00, b'H', b'i']);
        assert_eq!(
            recv_frame(&mut rx).await,
            [0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, b'H', b'i']
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_method_is_invalid_request_type_with_no_side_effects() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        server.send(&connection, 200, 9, Vec::new());
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x03, 0x00]);
        assert_eq!(server.probe.begins.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn short_payload_is_invalid_parameters() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        // Echo's string claims two bytes but carries one.
        server.send(&connection, 2, 1, vec![0x02, 0x00, b'H']);
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x04, 0x00]);
        assert_eq!(server.probe.begins.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn paged_list_returns_the_two_lowest_ids() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        // skip=0, take=2, order_by_field="id", ascending=true
        let mut payload = Vec::new();
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&2i32.to_le_bytes());
        payload.extend_from_slice(&[0x02, 0x00, b'i', b'd']);
        payload.push(0x01);
        server.send(&connection, 3, 1, payload);

        let mut expected = vec![0x00, 0x00]; // SUCCESS
        expected.extend_from_slice(&[0x02, 0x00]); // two entries
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(&[0x04, 0x00]);
        expected.extend_from_slice(b"west");
        expected.extend_from_slice(&4u64.to_le_bytes());
        expected.extend_from_slice(&[0x05, 0x00]);
        expected.extend_from_slice(b"north");
        let mut frame_bytes = (expected.len() as u32).to_le_bytes().to_vec();
        frame_bytes.extend_from_slice(&expected);

        assert_eq!(recv_frame(&mut rx).await, frame_bytes);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn paged_sort_by_unregistered_field_is_invalid_parameters() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        let mut payload = Vec::new();
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&2i32.to_le_bytes());
        payload.extend_from_slice(&[0x06, 0x00]);
        payload.extend_from_slice(b"rating");
        payload.push(0x01);
        server.send(&connection, 3, 1, payload);

        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x04, 0x00]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_rolls_back_retries_and_delivers_nothing() {
        let server = start_node();
        let (connection, mut rx) = server.open();
        let (observer, mut observer_rx) = server.open();
        server.node.manager().authenticate(observer.id(), 42).await;

        server.send(&connection, 4, 1, Vec::new());
        // The transport-level retry re-runs the frame; the second attempt
        // succeeds.
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);

        assert_eq!(server.probe.begins.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(server.probe.rollbacks.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(server.probe.commits.load(AtomicOrdering::SeqCst), 1);
        // The notification queued before the conflict was discarded.
        assert!(observer_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_failure_rolls_back_and_answers_server_error() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        server
            .probe
            .fail_next_commit
            .store(true, AtomicOrdering::SeqCst);
        server.send(&connection, 1, 1, Vec::new());

        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x02, 0x00]);
        assert_eq!(server.probe.rollbacks.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notifications_arrive_in_outbox_order() {
        let server = start_node();
        let (connection, mut rx) = server.open();
        let (observer, mut observer_rx) = server.open();
        server.node.manager().authenticate(observer.id(), 42).await;

        server.send(&connection, 5, 1, Vec::new());
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);

        assert_eq!(
            recv_frame(&mut observer_rx).await,
            frame::encode_notification(1, 100)
        );
        assert_eq!(
            recv_frame(&mut observer_rx).await,
            frame::encode_notification(2, 200)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_response_suppresses_the_reply_frame() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        server.send(&connection, 5, 2, Vec::new());
        server.send(&connection, 1, 1, Vec::new());

        // The only frame the connection sees is the ping's answer.
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(rx.try_recv().is_err());
        // The suppressed request still committed.
        assert_eq!(server.probe.commits.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn login_and_logout_drive_the_connection_directory() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        let mut payload = Vec::new();
        payload.extend_from_slice(&77u64.to_le_bytes());
        server.send(&connection, 6, 1, payload);
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(server.node.manager().is_user_connected(77).await);

        // Authenticated now: whoami reports the id.
        server.send(&connection, 6, 3, Vec::new());
        let mut expected = vec![0x0A, 0x00, 0x00, 0x00, 0x00, 0x00];
        expected.extend_from_slice(&77u64.to_le_bytes());
        assert_eq!(recv_frame(&mut rx).await, expected);

        server.send(&connection, 6, 2, Vec::new());
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(!server.node.manager().is_user_connected(77).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_keyspaces_are_disjoint() {
        let server = start_node();
        let (connection, mut rx) = server.open();

        // Whoami requires authentication.
        server.send(&connection, 6, 3, Vec::new());
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x03, 0x00]);

        // After login, unauthenticated-only handlers disappear.
        let mut payload = Vec::new();
        payload.extend_from_slice(&77u64.to_le_bytes());
        server.send(&connection, 6, 1, payload.clone());
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
        server.send(&connection, 6, 1, payload);
        assert_eq!(recv_frame(&mut rx).await, [0x02, 0x00, 0x00, 0x00, 0x03, 0x00]);
    }
}
