// Copyright 2025 AgentGauge (https://github.com/agentgauge)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! End-to-end worker behavior over the in-memory broker: ack/redelivery
//! semantics, event routing, completion firing, and shutdown.

use agentgauge_core::{
    ApiError, EvalDefinition, EvalKind, EvalOutcome, EvalPack, EvalPackLoader, EvalResult,
    EvalTrigger, MessageRole, ProviderResolver, ProviderSpec, ResultSource, SessionApi,
    SessionEvent, SessionEventKind, SessionMessage, SessionMeta,
};
use agentgauge_worker::broker::memory::MemoryBroker;
use agentgauge_worker::broker::{BrokerError, StreamBroker, StreamDelivery, EVENT_FIELD};
use agentgauge_worker::dispatcher::{EvalInvocation, EvalRunError, EvalRunner};
use agentgauge_worker::sampler::SamplerConfig;
use agentgauge_worker::worker::{EvalWorker, WorkerError, WorkerOptions};
use agentgauge_worker::WorkerConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NAMESPACE: &str = "acme";
const STREAM: &str = "agent-sessions:acme";
const GROUP: &str = "eval-worker:acme";

struct MockSessionApi {
    messages: Vec<SessionMessage>,
    written: Mutex<Vec<EvalResult>>,
    /// `get_session` fails with a transport error while this is > 0.
    failures_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl MockSessionApi {
    fn new() -> Self {
        Self {
            messages: vec![
                SessionMessage::user("hi"),
                SessionMessage::assistant("hello, how can I help?"),
            ],
            written: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(n: usize) -> Self {
        let api = Self::new();
        api.failures_remaining.store(n, Ordering::SeqCst);
        api
    }
}

#[async_trait]
impl SessionApi for MockSessionApi {
    async fn get_session(&self, session_id: &str) -> Result<SessionMeta, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ApiError::Transport("session api unavailable".to_string()));
        }
        Ok(SessionMeta {
            session_id: session_id.to_string(),
            agent_name: "support-bot".to_string(),
            namespace: NAMESPACE.to_string(),
            pack_name: Some("quality".to_string()),
            pack_version: Some("1".to_string()),
        })
    }

    async fn get_session_messages(
        &self,
        _session_id: &str,
    ) -> Result<Vec<SessionMessage>, ApiError> {
        Ok(self.messages.clone())
    }

    async fn write_eval_results(&self, results: &[EvalResult]) -> Result<(), ApiError> {
        self.written.lock().extend_from_slice(results);
        Ok(())
    }
}

struct StaticPackLoader {
    pack: EvalPack,
}

#[async_trait]
impl EvalPackLoader for StaticPackLoader {
    async fn load_evals(
        &self,
        _namespace: &str,
        _pack_name: &str,
        _pack_version: &str,
    ) -> Result<EvalPack, ApiError> {
        Ok(self.pack.clone())
    }
}

struct StaticResolver;

#[async_trait]
impl ProviderResolver for StaticResolver {
    async fn resolve_provider_specs(
        &self,
        _agent_name: &str,
        _namespace: &str,
    ) -> Result<HashMap<String, ProviderSpec>, ApiError> {
        Ok(HashMap::from([(
            "openai".to_string(),
            ProviderSpec {
                provider_type: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                credential: "sk-test".to_string(),
                endpoint: None,
            },
        )]))
    }
}

/// Runner that always passes, recording which invocation path each call took.
struct PassRunner {
    plain_calls: AtomicUsize,
    provider_calls: AtomicUsize,
}

impl PassRunner {
    fn new() -> Self {
        Self {
            plain_calls: AtomicUsize::new(0),
            provider_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EvalRunner for PassRunner {
    async fn run(&self, invocation: EvalInvocation<'_>) -> Result<EvalOutcome, EvalRunError> {
        match invocation {
            EvalInvocation::Plain { .. } => self.plain_calls.fetch_add(1, Ordering::SeqCst),
            EvalInvocation::WithProviders { .. } => {
                self.provider_calls.fetch_add(1, Ordering::SeqCst)
            }
        };
        Ok(EvalOutcome {
            passed: true,
            score: Some(1.0),
            explanation: None,
            duration_ms: None,
        })
    }
}

fn definition(id: &str, kind: EvalKind, trigger: EvalTrigger) -> EvalDefinition {
    EvalDefinition {
        id: id.to_string(),
        kind,
        trigger,
        params: serde_json::Value::Null,
    }
}

fn default_pack() -> EvalPack {
    EvalPack {
        name: "quality".to_string(),
        version: "1".to_string(),
        evals: vec![
            definition("turn-check", EvalKind::RuleBased, EvalTrigger::PerTurn),
            definition(
                "final-check",
                EvalKind::RuleBased,
                EvalTrigger::OnSessionComplete,
            ),
        ],
    }
}

fn test_config() -> WorkerConfig {
    WorkerConfig {
        namespaces: vec![NAMESPACE.to_string()],
        read_block: Duration::from_millis(50),
        sweep_interval: Duration::from_millis(25),
        // Long enough that no sweep interferes with tests about other paths.
        inactivity_timeout: Duration::from_secs(60),
        sampler: SamplerConfig {
            default_rate: 100,
            llm_judge_rate: 100,
        },
        ..WorkerConfig::default()
    }
}

struct Harness {
    broker: Arc<MemoryBroker>,
    session_api: Arc<MockSessionApi>,
    runner: Arc<PassRunner>,
    worker: Arc<EvalWorker>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<Result<(), WorkerError>>,
}

impl Harness {
    fn start(pack: EvalPack, session_api: MockSessionApi, with_resolver: bool) -> Self {
        Self::start_with_config(pack, session_api, with_resolver, test_config())
    }

    fn start_with_config(
        pack: EvalPack,
        session_api: MockSessionApi,
        with_resolver: bool,
        config: WorkerConfig,
    ) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let broker = Arc::new(MemoryBroker::new());
        let session_api = Arc::new(session_api);
        let runner = Arc::new(PassRunner::new());

        let worker = Arc::new(EvalWorker::new(WorkerOptions {
            broker: broker.clone(),
            session_api: session_api.clone(),
            pack_loader: Arc::new(StaticPackLoader { pack }),
            provider_resolver: with_resolver
                .then(|| Arc::new(StaticResolver) as Arc<dyn ProviderResolver>),
            runner: Some(runner.clone()),
            config,
        }));

        let cancel = CancellationToken::new();
        let handle = {
            let worker = worker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.start(cancel).await })
        };

        Self {
            broker,
            session_api,
            runner,
            worker,
            cancel,
            handle,
        }
    }

    fn publish(&self, event: &SessionEvent) {
        self.broker.publish(
            STREAM,
            vec![(
                EVENT_FIELD.to_string(),
                serde_json::to_string(event).unwrap(),
            )],
        );
    }

    async fn stop(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("worker did not stop after cancellation")
            .unwrap()
            .unwrap();
    }
}

fn assistant_event(session_id: &str) -> SessionEvent {
    SessionEvent {
        kind: SessionEventKind::AgentMessage,
        session_id: session_id.to_string(),
        namespace: NAMESPACE.to_string(),
        agent_name: "support-bot".to_string(),
        role: Some(MessageRole::Assistant),
        message_id: Some("m1".to_string()),
        pack_name: None,
        pack_version: None,
    }
}

fn completed_event(session_id: &str) -> SessionEvent {
    SessionEvent {
        kind: SessionEventKind::SessionCompleted,
        session_id: session_id.to_string(),
        namespace: NAMESPACE.to_string(),
        agent_name: "support-bot".to_string(),
        role: None,
        message_id: None,
        pack_name: None,
        pack_version: None,
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

#[tokio::test]
async fn test_assistant_turn_runs_per_turn_evals() {
    let harness = Harness::start(default_pack(), MockSessionApi::new(), false);
    harness.publish(&assistant_event("s1"));

    let session_api = harness.session_api.clone();
    wait_until("per-turn result written", || {
        !session_api.written.lock().is_empty()
    })
    .await;

    {
        let written = harness.session_api.written.lock();
        assert_eq!(written.len(), 1, "only the per-turn definition fires");
        let result = &written[0];
        assert_eq!(result.eval_id, "turn-check");
        assert_eq!(result.session_id, "s1");
        assert_eq!(result.namespace, NAMESPACE);
        assert_eq!(result.agent_name, "support-bot");
        assert_eq!(result.message_id.as_deref(), Some("m1"));
        assert_eq!(result.pack_name.as_deref(), Some("quality"));
        assert_eq!(result.source, ResultSource::Worker);
        assert!(result.passed);
    }

    let broker = harness.broker.clone();
    wait_until("message acknowledged", || {
        broker.pending_count(STREAM, GROUP) == 0
    })
    .await;

    assert_eq!(harness.worker.stats().turns_processed.load(Ordering::SeqCst), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_is_acked_and_does_not_block() {
    let harness = Harness::start(default_pack(), MockSessionApi::new(), false);

    harness.broker.publish(
        STREAM,
        vec![(EVENT_FIELD.to_string(), "{not json".to_string())],
    );
    harness
        .broker
        .publish(STREAM, vec![("other".to_string(), "field".to_string())]);
    harness.publish(&assistant_event("s1"));

    // The valid event behind the two bad ones still gets processed.
    let session_api = harness.session_api.clone();
    wait_until("valid event processed", || {
        !session_api.written.lock().is_empty()
    })
    .await;

    let broker = harness.broker.clone();
    wait_until("bad messages acknowledged", || {
        broker.pending_count(STREAM, GROUP) == 0
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_failed_turn_is_redelivered_until_it_succeeds() {
    // The first two get_session calls fail transiently.
    let harness = Harness::start(default_pack(), MockSessionApi::failing_first(2), false);
    harness.publish(&assistant_event("s1"));

    let session_api = harness.session_api.clone();
    wait_until("redelivered turn eventually processed", || {
        !session_api.written.lock().is_empty()
    })
    .await;

    let stats = harness.worker.stats();
    assert!(
        stats.turns_failed.load(Ordering::SeqCst) >= 2,
        "both transient failures left the message unacked"
    );
    assert_eq!(stats.turns_processed.load(Ordering::SeqCst), 1);
    assert_eq!(harness.session_api.written.lock().len(), 1);

    let broker = harness.broker.clone();
    wait_until("message finally acknowledged", || {
        broker.pending_count(STREAM, GROUP) == 0
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_session_completed_event_runs_completion_evals() {
    let harness = Harness::start(default_pack(), MockSessionApi::new(), false);

    harness.publish(&completed_event("s1"));

    let session_api = harness.session_api.clone();
    wait_until("completion result written", || {
        !session_api.written.lock().is_empty()
    })
    .await;

    {
        let written = harness.session_api.written.lock();
        assert_eq!(written.len(), 1);
        let result = &written[0];
        assert_eq!(result.eval_id, "final-check");
        assert_eq!(result.trigger, EvalTrigger::OnSessionComplete);
        assert!(result.message_id.is_none());
    }
    assert_eq!(
        harness.worker.stats().completions_fired.load(Ordering::SeqCst),
        1
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_inactivity_timeout_fires_completion_once() {
    let pack = EvalPack {
        evals: vec![definition(
            "final-check",
            EvalKind::RuleBased,
            EvalTrigger::OnSessionComplete,
        )],
        ..default_pack()
    };
    let config = WorkerConfig {
        inactivity_timeout: Duration::from_millis(150),
        ..test_config()
    };
    let harness = Harness::start_with_config(pack, MockSessionApi::new(), false, config);

    // Activity with no explicit completion; the sweep must fire it.
    harness.publish(&assistant_event("s1"));

    let session_api = harness.session_api.clone();
    wait_until("inactivity completion result written", || {
        session_api
            .written
            .lock()
            .iter()
            .any(|r| r.eval_id == "final-check")
    })
    .await;

    // Give further sweeps a chance to double-fire, then check they did not.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let completions = harness
        .session_api
        .written
        .lock()
        .iter()
        .filter(|r| r.eval_id == "final-check")
        .count();
    assert_eq!(completions, 1);
    assert_eq!(
        harness.worker.stats().completions_fired.load(Ordering::SeqCst),
        1
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_other_event_kinds_are_acked_without_processing() {
    let harness = Harness::start(default_pack(), MockSessionApi::new(), false);

    let mut user_event = assistant_event("s1");
    user_event.kind = SessionEventKind::UserMessage;
    user_event.role = Some(MessageRole::User);
    harness.publish(&user_event);

    let mut tool_event = assistant_event("s1");
    tool_event.kind = SessionEventKind::ToolCall;
    tool_event.role = Some(MessageRole::Tool);
    harness.publish(&tool_event);

    // Agent message with a non-assistant role is also ignored.
    let mut system_note = assistant_event("s1");
    system_note.role = Some(MessageRole::System);
    harness.publish(&system_note);

    let stats = harness.worker.stats();
    wait_until("all ignored events acked", || {
        stats.events_acked.load(Ordering::SeqCst) == 3
    })
    .await;

    assert!(harness.session_api.written.lock().is_empty());
    assert_eq!(harness.session_api.calls.load(Ordering::SeqCst), 0);
    harness.stop().await;
}

#[tokio::test]
async fn test_judge_definitions_reach_provider_aware_path() {
    let pack = EvalPack {
        evals: vec![
            definition("turn-check", EvalKind::RuleBased, EvalTrigger::PerTurn),
            definition("judge-check", EvalKind::ModelJudge, EvalTrigger::PerTurn),
        ],
        ..default_pack()
    };
    let harness = Harness::start(pack, MockSessionApi::new(), true);
    harness.publish(&assistant_event("s1"));

    let session_api = harness.session_api.clone();
    wait_until("both evals written", || session_api.written.lock().len() == 2).await;

    // Rule-based went provider-agnostic, judge went provider-aware.
    assert_eq!(harness.runner.plain_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.runner.provider_calls.load(Ordering::SeqCst), 1);
    harness.stop().await;
}

#[tokio::test]
async fn test_every_n_turns_trigger_respects_turn_index() {
    let pack = EvalPack {
        evals: vec![definition(
            "periodic-check",
            EvalKind::RuleBased,
            EvalTrigger::EveryNTurns { n: 2 },
        )],
        ..default_pack()
    };
    // Transcript holds two assistant messages: turn index 2 fires n=2.
    let mut session_api = MockSessionApi::new();
    session_api.messages = vec![
        SessionMessage::user("hi"),
        SessionMessage::assistant("hello"),
        SessionMessage::user("more"),
        SessionMessage::assistant("sure"),
    ];
    let harness = Harness::start(pack, session_api, false);
    harness.publish(&assistant_event("s1"));

    let session_api = harness.session_api.clone();
    wait_until("periodic eval written", || {
        !session_api.written.lock().is_empty()
    })
    .await;
    assert_eq!(
        harness.session_api.written.lock()[0].eval_id,
        "periodic-check"
    );
    harness.stop().await;
}

#[tokio::test]
async fn test_group_create_failure_is_fatal() {
    struct BrokenBroker;

    #[async_trait]
    impl StreamBroker for BrokenBroker {
        async fn create_group(&self, _stream: &str, _group: &str) -> Result<(), BrokerError> {
            Err(BrokerError::Backend("connection refused".to_string()))
        }

        async fn read_group(
            &self,
            _group: &str,
            _consumer: &str,
            _streams: &[String],
            _count: usize,
            _block: Duration,
        ) -> Result<Vec<StreamDelivery>, BrokerError> {
            Ok(Vec::new())
        }

        async fn ack(&self, _stream: &str, _group: &str, _id: &str) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    let worker = EvalWorker::new(WorkerOptions {
        broker: Arc::new(BrokenBroker),
        session_api: Arc::new(MockSessionApi::new()),
        pack_loader: Arc::new(StaticPackLoader {
            pack: default_pack(),
        }),
        provider_resolver: None,
        runner: None,
        config: test_config(),
    });

    let result = worker.start(CancellationToken::new()).await;
    assert!(matches!(result, Err(WorkerError::GroupCreate { .. })));
}

#[tokio::test]
async fn test_empty_namespace_list_is_fatal() {
    let worker = EvalWorker::new(WorkerOptions {
        broker: Arc::new(MemoryBroker::new()),
        session_api: Arc::new(MockSessionApi::new()),
        pack_loader: Arc::new(StaticPackLoader {
            pack: default_pack(),
        }),
        provider_resolver: None,
        runner: None,
        config: WorkerConfig::default(),
    });

    assert!(matches!(
        worker.start(CancellationToken::new()).await,
        Err(WorkerError::NoNamespaces)
    ));
}

#[tokio::test]
async fn test_cancellation_stops_worker_promptly() {
    let harness = Harness::start(default_pack(), MockSessionApi::new(), false);
    // Let it enter the read loop, then cancel with nothing in flight.
    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.stop().await;
}

#[tokio::test]
async fn test_accessors_expose_topology() {
    let worker = EvalWorker::new(WorkerOptions {
        broker: Arc::new(MemoryBroker::new()),
        session_api: Arc::new(MockSessionApi::new()),
        pack_loader: Arc::new(StaticPackLoader {
            pack: default_pack(),
        }),
        provider_resolver: None,
        runner: None,
        config: test_config(),
    });

    assert_eq!(worker.namespaces(), &[NAMESPACE.to_string()]);
    assert_eq!(worker.stream_keys(), &[STREAM.to_string()]);
    assert_eq!(worker.consumer_group(), GROUP);
}
