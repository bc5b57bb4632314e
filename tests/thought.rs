//! End-to-end thought-process tests with mock adapters.

use async_trait::async_trait;
use parlance::adapter::{Adapter, MessageAdapter, NluAdapter, StorageAdapter};
use parlance::conditions::Condition;
use parlance::nlu::{NluIntent, NluResult};
use parlance::{
    Action, Bit, Bot, Conditions, Envelope, Message, NluCriteria, Room, Settings, User,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// --- mock adapters ---

#[derive(Default)]
struct MessengerInner {
    dispatched: Mutex<Vec<Envelope>>,
}

#[derive(Clone, Default)]
struct MockMessenger {
    inner: Arc<MessengerInner>,
}

impl MockMessenger {
    fn dispatched(&self) -> Vec<Envelope> {
        self.inner.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Adapter for MockMessenger {
    fn name(&self) -> &str {
        "mock-messenger"
    }

    async fn start(&self, _bot: Arc<Bot>) -> parlance::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> parlance::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MessageAdapter for MockMessenger {
    async fn dispatch(&self, envelope: &Envelope) -> parlance::Result<()> {
        self.inner.dispatched.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

#[derive(Default)]
struct NluInner {
    calls: AtomicUsize,
}

#[derive(Clone, Default)]
struct MockNlu {
    inner: Arc<NluInner>,
}

impl MockNlu {
    fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockNlu {
    fn name(&self) -> &str {
        "mock-nlu"
    }

    async fn start(&self, _bot: Arc<Bot>) -> parlance::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> parlance::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl NluAdapter for MockNlu {
    async fn process(&self, _message: &Message) -> parlance::Result<NluResult> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        Ok(NluResult {
            intents: vec![NluIntent::new("greeting", 0.95)],
            language: Some("en".to_string()),
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct StorageInner {
    saves: Mutex<Vec<serde_json::Value>>,
    snapshot: Mutex<serde_json::Value>,
}

#[derive(Clone)]
struct MockStorage {
    inner: Arc<StorageInner>,
}

impl Default for MockStorage {
    fn default() -> Self {
        let inner = StorageInner {
            saves: Mutex::new(Vec::new()),
            snapshot: Mutex::new(json!({})),
        };
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl MockStorage {
    fn save_count(&self) -> usize {
        self.inner.saves.lock().unwrap().len()
    }
}

#[async_trait]
impl Adapter for MockStorage {
    fn name(&self) -> &str {
        "mock-storage"
    }

    async fn start(&self, _bot: Arc<Bot>) -> parlance::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> parlance::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for MockStorage {
    async fn save_memory(&self, snapshot: serde_json::Value) -> parlance::Result<()> {
        *self.inner.snapshot.lock().unwrap() = snapshot.clone();
        self.inner.saves.lock().unwrap().push(snapshot);
        Ok(())
    }

    async fn load_memory(&self) -> parlance::Result<serde_json::Value> {
        Ok(self.inner.snapshot.lock().unwrap().clone())
    }

    async fn keep(&self, _collection: &str, _record: serde_json::Value) -> parlance::Result<()> {
        Ok(())
    }

    async fn lose(&self, _collection: &str, _criteria: serde_json::Value) -> parlance::Result<()> {
        Ok(())
    }

    async fn find(
        &self,
        _collection: &str,
        _criteria: serde_json::Value,
    ) -> parlance::Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn find_one(
        &self,
        _collection: &str,
        _criteria: serde_json::Value,
    ) -> parlance::Result<Option<serde_json::Value>> {
        Ok(None)
    }
}

// --- helpers ---

fn settings(name: &str) -> Settings {
    Settings {
        name: name.to_string(),
        ..Default::default()
    }
}

async fn started_bot(settings: Settings, messenger: &MockMessenger) -> Arc<Bot> {
    let bot = Bot::new(settings);
    bot.with_adapters(|registry| registry.use_message(Arc::new(messenger.clone())))
        .unwrap();
    bot
}

fn text_from(user_id: &str, text: &str) -> Message {
    Message::text(
        User::new(user_id, user_id),
        Room::new("general", "general"),
        text,
    )
}

fn counting_action(counter: &Arc<AtomicUsize>) -> Action {
    let counter = counter.clone();
    Action::sync(move |_state| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

// --- scenarios ---

#[tokio::test]
async fn direct_text_match_runs_the_callback_without_auto_envelope() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let calls = Arc::new(AtomicUsize::new(0));
    bot.direct(Conditions::parse("/hello/").unwrap(), counting_action(&calls))
        .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "bb hello")).await;

    assert_eq!(state.matched().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(messenger.dispatched().is_empty());
    bot.shutdown().await;
}

#[tokio::test]
async fn unaddressed_text_does_not_match_a_direct_branch() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let calls = Arc::new(AtomicUsize::new(0));
    bot.direct(Conditions::parse("/hello/").unwrap(), counting_action(&calls))
        .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "hello")).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // Unmatched text falls through to act as a catch-all wrap.
    assert!(state.message.is_catch_all());
    bot.shutdown().await;
}

#[tokio::test]
async fn unmatched_message_falls_through_to_catch_all() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let listen_calls = Arc::new(AtomicUsize::new(0));
    let act_calls = Arc::new(AtomicUsize::new(0));
    bot.text(
        Conditions::single(Condition::new().contains("deploy")).unwrap(),
        counting_action(&listen_calls),
    )
    .unwrap();
    bot.catch_all(counting_action(&act_calls)).unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "nope")).await;

    assert_eq!(listen_calls.load(Ordering::SeqCst), 0);
    assert_eq!(act_calls.load(Ordering::SeqCst), 1);
    assert!(state.message.is_catch_all());
    assert_eq!(state.matched().len(), 1);
    bot.shutdown().await;
}

#[tokio::test]
async fn nlu_is_skipped_for_short_text() {
    let messenger = MockMessenger::default();
    let nlu = MockNlu::default();
    let mut config = settings("bb");
    config.nlu_min_length = 10;
    let bot = started_bot(config, &messenger).await;
    bot.with_adapters(|registry| registry.use_nlu(Arc::new(nlu.clone())))
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    bot.understand(NluCriteria::intent("greeting"), counting_action(&calls))
        .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "hi")).await;
    assert_eq!(nlu.calls(), 0);
    assert!(state.nlu.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    bot.shutdown().await;
}

#[tokio::test]
async fn nlu_runs_once_and_understand_branches_match() {
    let messenger = MockMessenger::default();
    let nlu = MockNlu::default();
    let mut config = settings("bb");
    config.nlu_min_length = 5;
    let bot = started_bot(config, &messenger).await;
    bot.with_adapters(|registry| registry.use_nlu(Arc::new(nlu.clone())))
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    bot.understand(
        NluCriteria::intent("greeting").with_score(0.8),
        counting_action(&calls),
    )
    .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "well hello there friend")).await;
    assert_eq!(nlu.calls(), 1);
    assert!(state.nlu.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    bot.shutdown().await;
}

#[tokio::test]
async fn responses_are_dispatched_through_the_message_adapter() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    bot.text(
        Conditions::single(Condition::new().contains("ping")).unwrap(),
        Action::sync(|state| {
            state.respond(["pong"]);
            Ok(())
        }),
    )
    .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "ping")).await;

    let dispatched = messenger.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].strings, vec!["pong"]);
    assert_eq!(dispatched[0].room.as_ref().unwrap().id, "general");
    assert_eq!(state.dispatched_envelopes().len(), 1);
    assert!(state.pending_envelopes().is_empty());
    bot.shutdown().await;
}

#[tokio::test]
async fn first_match_wins_but_forced_branches_still_run() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let forced = Arc::new(AtomicUsize::new(0));

    let hello = || Conditions::single(Condition::new().contains("hello")).unwrap();
    bot.text(hello(), counting_action(&first)).unwrap();
    bot.text(hello(), counting_action(&second)).unwrap();
    bot.add_branch(
        parlance::Branch::new(parlance::Matcher::Text(hello()), counting_action(&forced))
            .with_force(),
        parlance::BranchStage::Listen,
    )
    .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "hello")).await;

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(forced.load(Ordering::SeqCst), 1);
    assert_eq!(state.matched().len(), 2);
    bot.shutdown().await;
}

#[tokio::test]
async fn once_branch_is_removed_after_its_first_match() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let hello = Conditions::single(Condition::new().contains("hello")).unwrap();
    bot.add_branch(
        parlance::Branch::new(parlance::Matcher::Text(hello), counting_action(&calls))
            .with_once(),
        parlance::BranchStage::Listen,
    )
    .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "hello")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.matched().len(), 1);

    // The branch is gone; the same text now falls through unmatched.
    let state = bot.receive(text_from("u1", "hello again")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(state.message.is_catch_all());
    bot.shutdown().await;
}

#[tokio::test]
async fn hear_middleware_can_drop_a_message() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let calls = Arc::new(AtomicUsize::new(0));
    bot.text(
        Conditions::single(Condition::new().contains("hello")).unwrap(),
        counting_action(&calls),
    )
    .unwrap();
    bot.register_middleware(
        parlance::Stage::Hear,
        |state: &mut parlance::State, _control: &mut parlance::middleware::Control| {
            state.set_done();
            Box::pin(async { Ok(()) })
        },
    )
    .unwrap();
    bot.start().await.unwrap();

    let state = bot.receive(text_from("u1", "hello")).await;

    assert!(state.is_done());
    assert!(state.matched().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // Dropped messages are not remembered.
    assert!(bot.memory.users().is_empty());
    bot.shutdown().await;
}

#[tokio::test]
async fn remember_records_users_and_rooms() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;
    bot.catch_all(Action::sync(|_| Ok(()))).unwrap();
    bot.start().await.unwrap();

    bot.receive(text_from("alice", "whatever")).await;

    let users = bot.memory.users();
    assert!(users.contains_key("alice"));
    assert_eq!(users["alice"]["room"], json!("general"));
    assert!(bot.memory.rooms().contains_key("general"));
    bot.shutdown().await;
}

#[tokio::test]
async fn server_events_route_through_serve_branches() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let calls = Arc::new(AtomicUsize::new(0));
    bot.on_server(json!({"event": "deploy"}), counting_action(&calls))
        .unwrap();
    bot.start().await.unwrap();

    let state = bot
        .serve(Message::server(json!({"event": "deploy", "env": "prod"})))
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.matched().len(), 1);

    let state = bot
        .serve(Message::server(json!({"event": "restart"})))
        .await;
    // No serve match: the event falls through to act, where nothing is
    // registered.
    assert!(state.message.is_catch_all());
    bot.shutdown().await;
}

#[tokio::test]
async fn bit_chain_opens_a_scene_scoped_to_the_user() {
    let messenger = MockMessenger::default();
    let bot = started_bot(settings("bb"), &messenger).await;

    let confirmed = Arc::new(AtomicUsize::new(0));
    {
        let confirmed = confirmed.clone();
        bot.register_bit(
            Bit::new("confirm")
                .condition(Conditions::single(Condition::new().is("yes")).unwrap())
                .send(["confirmed!"])
                .callback(move |_state| {
                    confirmed.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(()) })
                }),
        )
        .unwrap();
    }
    bot.register_bit(
        Bit::new("ask")
            .send(["are you sure?"])
            .next(["confirm"]),
    )
    .unwrap();
    bot.with_path(|path| {
        path.text_to_bit(
            Conditions::single(Condition::new().contains("delete")).unwrap(),
            "ask",
        )
    })
    .unwrap();
    bot.start().await.unwrap();

    // Trigger the ask bit; it opens a scene for u1.
    bot.receive(text_from("u1", "delete everything")).await;
    assert_eq!(messenger.dispatched().len(), 1);

    // Another user saying yes does not enter the scene.
    let state = bot.receive(text_from("u2", "yes")).await;
    assert_eq!(confirmed.load(Ordering::SeqCst), 0);
    assert!(state.message.is_catch_all());

    // The scoped user confirms; the scene is consumed.
    let state = bot.receive(text_from("u1", "yes")).await;
    assert_eq!(confirmed.load(Ordering::SeqCst), 1);
    assert_eq!(state.matched().len(), 1);

    // Scene is gone: a second yes no longer matches.
    let state = bot.receive(text_from("u1", "yes")).await;
    assert_eq!(confirmed.load(Ordering::SeqCst), 1);
    assert!(state.message.is_catch_all());
    bot.shutdown().await;
}

#[tokio::test]
async fn memory_round_trips_through_storage() {
    let messenger = MockMessenger::default();
    let storage = MockStorage::default();

    let mut config = settings("bb");
    config.auto_save = false;
    let bot = started_bot(config, &messenger).await;
    bot.with_adapters(|registry| registry.use_storage(Arc::new(storage.clone())))
        .unwrap();
    bot.start().await.unwrap();

    bot.memory.set("topic", json!("gardening"));
    bot.memory
        .remember_user(&User::new("u1", "alice"));
    bot.save_memory().await.unwrap();
    bot.shutdown().await;

    // A fresh bot sharing the storage loads the same collections.
    let messenger2 = MockMessenger::default();
    let mut config = settings("bb");
    config.auto_save = false;
    let revived = started_bot(config, &messenger2).await;
    revived
        .with_adapters(|registry| registry.use_storage(Arc::new(storage.clone())))
        .unwrap();
    revived.start().await.unwrap();

    assert_eq!(revived.memory.get("topic"), Some(json!("gardening")));
    assert!(revived.memory.users().contains_key("u1"));
    revived.shutdown().await;
}

#[tokio::test]
async fn autosave_snapshots_periodically_until_cancelled() {
    let messenger = MockMessenger::default();
    let storage = MockStorage::default();

    let mut config = settings("bb");
    config.auto_save = true;
    config.save_interval_ms = 50;
    let bot = started_bot(config, &messenger).await;
    bot.with_adapters(|registry| registry.use_storage(Arc::new(storage.clone())))
        .unwrap();
    bot.start().await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    let after_ticks = storage.save_count();
    assert!(after_ticks >= 2, "expected >= 2 saves, got {after_ticks}");

    bot.memory.cancel_save_interval();
    let frozen = storage.save_count();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(storage.save_count(), frozen);
    bot.shutdown().await;
}
