//! The bot context: settings, registries, memory, events, and the
//! lifecycle state machine that owns them.
//!
//! There are no module-level singletons; everything threads through an
//! [`Arc<Bot>`] created by the embedding application (or a test).

use crate::adapter::{AdapterRegistry, MessageAdapter, NluAdapter, StorageAdapter};
use crate::bit::{Bit, BitScope};
use crate::branch::{Action, Branch, CustomMatcher, Matcher};
use crate::conditions::Conditions;
use crate::envelope::Envelope;
use crate::error::{AdapterError, LifecycleError, MemoryError, Result};
use crate::memory::Memory;
use crate::message::Message;
use crate::middleware::{Control, Middleware, MiddlewareSet};
use crate::nlu::{NluCriteria, NluResult};
use crate::path::{BranchStage, Path};
use crate::settings::Settings;
use crate::state::{BotIdentity, State};
use crate::thought::{Stage, Thought};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

/// Global lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Waiting,
    Loading,
    Loaded,
    Starting,
    Started,
    Shutdown,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Waiting => "waiting",
            Status::Loading => "loading",
            Status::Loaded => "loaded",
            Status::Starting => "starting",
            Status::Started => "started",
            Status::Shutdown => "shutdown",
        };
        write!(f, "{name}")
    }
}

/// Observer events emitted while the thought process runs.
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// A stage began for a message.
    Stage { stage: Stage, message_id: uuid::Uuid },
    /// A branch matched.
    Match {
        stage: Stage,
        branch_id: String,
        message_id: uuid::Uuid,
    },
    /// Listen, understand, and serve produced no match.
    NoMatch { message_id: uuid::Uuid },
}

/// The bot: registries, memory, adapters, and the lifecycle controller.
pub struct Bot {
    settings: Settings,
    pub memory: Arc<Memory>,
    path: RwLock<Path>,
    scenes: Mutex<Vec<Path>>,
    bits: RwLock<HashMap<String, Bit>>,
    middleware: RwLock<MiddlewareSet>,
    adapters: RwLock<AdapterRegistry>,
    events: broadcast::Sender<BotEvent>,
    status: watch::Sender<Status>,
    exit_code: AtomicI32,
}

impl Bot {
    pub fn new(settings: Settings) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (status, _) = watch::channel(Status::Waiting);
        Arc::new(Self {
            settings,
            memory: Arc::new(Memory::new()),
            path: RwLock::new(Path::global()),
            scenes: Mutex::new(Vec::new()),
            bits: RwLock::new(HashMap::new()),
            middleware: RwLock::new(MiddlewareSet::new()),
            adapters: RwLock::new(AdapterRegistry::new()),
            events,
            status,
            exit_code: AtomicI32::new(0),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn identity(&self) -> BotIdentity {
        self.settings.identity()
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    /// The process exit code: 0 for a clean shutdown, otherwise the code
    /// supplied to [`Bot::shutdown_with_code`].
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: Status) {
        tracing::info!(%status, "lifecycle transition");
        self.status.send_replace(status);
    }

    pub fn events(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: BotEvent) {
        let _ = self.events.send(event);
    }

    /// Registries accept mutation until the bot starts.
    fn ensure_unfrozen(&self) -> Result<()> {
        match self.status() {
            Status::Waiting | Status::Loading | Status::Loaded => Ok(()),
            status => Err(LifecycleError::Frozen {
                status: status.to_string(),
            }
            .into()),
        }
    }

    // --- branch registration ---

    pub fn add_branch(&self, branch: Branch, stage: BranchStage) -> Result<String> {
        self.ensure_unfrozen()?;
        Ok(self.path.write().unwrap().add(branch, stage))
    }

    /// Full access to the global path during setup.
    pub fn with_path<R>(&self, f: impl FnOnce(&mut Path) -> R) -> Result<R> {
        self.ensure_unfrozen()?;
        Ok(f(&mut self.path.write().unwrap()))
    }

    /// Listen for text matching the conditions.
    pub fn text(&self, conditions: Conditions, action: Action) -> Result<String> {
        self.add_branch(Branch::new(Matcher::Text(conditions), action), BranchStage::Listen)
    }

    /// Listen for text that addresses the bot directly.
    pub fn direct(&self, conditions: Conditions, action: Action) -> Result<String> {
        self.add_branch(
            Branch::new(Matcher::TextDirect(conditions), action),
            BranchStage::Listen,
        )
    }

    /// Listen with an arbitrary predicate.
    pub fn custom(&self, matcher: CustomMatcher, action: Action) -> Result<String> {
        self.add_branch(Branch::new(Matcher::Custom(matcher), action), BranchStage::Listen)
    }

    /// Understand via NLU criteria.
    pub fn understand(&self, criteria: NluCriteria, action: Action) -> Result<String> {
        self.add_branch(
            Branch::new(Matcher::NaturalLanguage(criteria), action),
            BranchStage::Understand,
        )
    }

    /// Understand via NLU criteria, requiring direct addressing.
    pub fn understand_direct(&self, criteria: NluCriteria, action: Action) -> Result<String> {
        self.add_branch(
            Branch::new(Matcher::NaturalLanguageDirect(criteria), action),
            BranchStage::Understand,
        )
    }

    /// Serve structured server events matching the criteria.
    pub fn on_server(&self, criteria: serde_json::Value, action: Action) -> Result<String> {
        self.add_branch(Branch::new(Matcher::Server(criteria), action), BranchStage::Serve)
    }

    /// Act on messages nothing else matched.
    pub fn catch_all(&self, action: Action) -> Result<String> {
        self.add_branch(Branch::new(Matcher::CatchAll, action), BranchStage::Act)
    }

    // --- middleware ---

    pub fn register_middleware<F>(&self, stage: Stage, piece: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut State, &'a mut Control) -> BoxFuture<'a, crate::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.ensure_unfrozen()?;
        self.middleware.write().unwrap().register(stage, piece);
        Ok(())
    }

    pub(crate) fn middleware_stack(&self, stage: Stage) -> Middleware {
        self.middleware.read().unwrap().stack(stage).clone()
    }

    // --- bits ---

    pub fn register_bit(&self, bit: Bit) -> Result<String> {
        self.ensure_unfrozen()?;
        if bit.is_inert() {
            tracing::warn!(bit_id = %bit.id, "bit has neither send strings nor a callback");
        }
        let id = bit.id.clone();
        self.bits.write().unwrap().insert(id.clone(), bit);
        Ok(id)
    }

    pub fn bit(&self, id: &str) -> Option<Bit> {
        self.bits.read().unwrap().get(id).cloned()
    }

    /// Run the bit registered under `id`: deliver its send strings, then
    /// its callback, then open a scene for its follow-ups. A missing id
    /// logs and returns without failing the caller.
    pub async fn do_bit(self: &Arc<Self>, id: &str, state: &mut State) -> Result<()> {
        let Some(bit) = self.bit(id) else {
            tracing::warn!(bit_id = id, "no bit registered under id");
            return Ok(());
        };
        if !bit.send.is_empty() {
            state.respond(bit.send.clone());
        }
        if let Some(callback) = &bit.callback {
            callback(state).await?;
        }
        if !bit.next.is_empty() {
            self.open_scene(&bit, state);
        }
        Ok(())
    }

    /// Register an ephemeral scoped path whose branches enter the bit's
    /// follow-ups.
    fn open_scene(&self, bit: &Bit, state: &State) {
        let (user_id, room_id) = match bit.scope {
            BitScope::User => (Some(state.message.user.id.clone()), None),
            BitScope::Room => (None, Some(state.message.room.id.clone())),
            BitScope::UserInRoom => (
                Some(state.message.user.id.clone()),
                Some(state.message.room.id.clone()),
            ),
        };
        let expires_at = Instant::now() + Duration::from_millis(self.settings.scene_timeout_ms);
        let mut scene = Path::scene(user_id, room_id, expires_at);

        for next_id in &bit.next {
            let Some(next) = self.bit(next_id) else {
                tracing::warn!(bit_id = %next_id, "scene follow-up references unknown bit");
                continue;
            };
            if let Some(conditions) = &next.condition {
                scene.add(
                    Branch::new(Matcher::Text(conditions.clone()), Action::bit(next_id)),
                    BranchStage::Listen,
                );
            } else if let Some(criteria) = &next.intent {
                scene.add(
                    Branch::new(
                        Matcher::NaturalLanguage(criteria.clone()),
                        Action::bit(next_id),
                    ),
                    BranchStage::Understand,
                );
            } else {
                tracing::warn!(bit_id = %next_id, "scene follow-up bit has no entry criteria");
            }
        }

        if scene.is_empty() {
            return;
        }
        tracing::debug!(bit_id = %bit.id, "scene opened");
        self.scenes.lock().unwrap().push(scene);
    }

    /// Scene branches applicable to a participant at a stage, plus whether
    /// any applicable scene is attending to this stage (which narrows the
    /// global path to forced branches). Expired scenes are pruned here.
    pub(crate) fn scene_branches(
        &self,
        user_id: &str,
        room_id: &str,
        stage: BranchStage,
    ) -> (Vec<Branch>, bool) {
        let mut scenes = self.scenes.lock().unwrap();
        let now = Instant::now();
        scenes.retain(|scene| scene.expires_at.is_none_or(|at| at > now));

        let mut branches = Vec::new();
        let mut attending = false;
        for scene in scenes.iter() {
            let applies = scene.user_id.as_deref().is_none_or(|u| u == user_id)
                && scene.room_id.as_deref().is_none_or(|r| r == room_id);
            if applies && scene.has_branches(stage) {
                attending = true;
                branches.extend(scene.branches(stage).iter().cloned());
            }
        }
        (branches, attending)
    }

    /// Discard the scene containing a branch that just matched. A chained
    /// follow-up has already opened its own scene by then.
    pub(crate) fn consume_scene(&self, branch_id: &str) {
        self.scenes.lock().unwrap().retain(|scene| {
            !(scene.branches(BranchStage::Listen).iter())
                .chain(scene.branches(BranchStage::Understand))
                .any(|branch| branch.id == branch_id)
        });
    }

    pub(crate) fn global_branches(&self, stage: BranchStage) -> Vec<Branch> {
        self.path.read().unwrap().branches(stage).to_vec()
    }

    /// Drop a `once` branch from the global path after its first match.
    pub(crate) fn discard_branch(&self, branch_id: &str) {
        if self.path.write().unwrap().remove(branch_id) {
            tracing::debug!(branch_id, "once branch removed after match");
        }
    }

    // --- adapters ---

    pub fn with_adapters<R>(&self, f: impl FnOnce(&mut AdapterRegistry) -> R) -> Result<R> {
        self.ensure_unfrozen()?;
        Ok(f(&mut self.adapters.write().unwrap()))
    }

    pub(crate) fn message_adapter(&self) -> Option<Arc<dyn MessageAdapter>> {
        self.adapters.read().unwrap().message()
    }

    pub(crate) fn nlu_adapter(&self) -> Option<Arc<dyn NluAdapter>> {
        self.adapters.read().unwrap().nlu()
    }

    pub(crate) fn storage_adapter(&self) -> Option<Arc<dyn StorageAdapter>> {
        self.adapters.read().unwrap().storage()
    }

    pub fn has_nlu(&self) -> bool {
        self.nlu_adapter().is_some()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.request_timeout)
    }

    /// Deliver one envelope through the message adapter, bounded by the
    /// request timeout.
    pub(crate) async fn dispatch_envelope(&self, envelope: &Envelope) -> Result<()> {
        let adapter = self
            .message_adapter()
            .ok_or(AdapterError::Missing { slot: "message" })?;
        match tokio::time::timeout(self.request_timeout(), adapter.dispatch(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                slot: "message",
                timeout_ms: self.settings.request_timeout,
            }
            .into()),
        }
    }

    /// Run a message through the NLU adapter, bounded by the request
    /// timeout. Failures are logged and treated as "no result".
    pub(crate) async fn process_nlu(&self, message: &Message) -> Option<NluResult> {
        let adapter = self.nlu_adapter()?;
        match tokio::time::timeout(self.request_timeout(), adapter.process(message)).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(error)) => {
                tracing::warn!(%error, "nlu adapter failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.settings.request_timeout,
                    "nlu adapter timed out"
                );
                None
            }
        }
    }

    // --- memory through storage ---

    pub async fn save_memory(self: &Arc<Self>) -> Result<()> {
        let storage = self
            .storage_adapter()
            .ok_or(MemoryError::StorageUnavailable)?;
        self.memory.save(&storage).await
    }

    pub async fn load_memory(&self) -> Result<()> {
        let storage = self
            .storage_adapter()
            .ok_or(MemoryError::StorageUnavailable)?;
        self.memory.load(&storage).await
    }

    // --- thought process entry points ---

    /// Route an adapter-originated message through the thought process.
    pub async fn receive(self: &Arc<Self>, message: Message) -> State {
        Thought::new(Arc::clone(self)).process(message).await
    }

    /// Route a server-originated event through the thought process.
    pub async fn serve(self: &Arc<Self>, message: Message) -> State {
        Thought::new(Arc::clone(self)).process(message).await
    }

    /// Send an unprompted envelope through respond and remember.
    pub async fn dispatch(self: &Arc<Self>, envelope: Envelope) -> State {
        Thought::new(Arc::clone(self)).dispatch(envelope).await
    }

    // --- lifecycle ---

    /// Wire adapters: `waiting -> loading -> loaded`.
    pub async fn load(self: &Arc<Self>) -> Result<()> {
        let current = self.status();
        if current != Status::Waiting {
            return Err(LifecycleError::InvalidTransition {
                from: current.to_string(),
                to: Status::Loading.to_string(),
            }
            .into());
        }
        self.set_status(Status::Loading);
        // Give concurrent observers (a shutdown racing this load) a chance
        // to see the transition.
        tokio::task::yield_now().await;

        let result = self
            .adapters
            .write()
            .unwrap()
            .load_all(&self.settings);
        self.set_status(Status::Loaded);
        if let Err(error) = result {
            tracing::error!(%error, "load failed, shutting down");
            self.shutdown_with_code(1).await;
            return Err(error);
        }
        Ok(())
    }

    /// Start adapters and memory: `loaded -> starting -> started`. Loads
    /// first when still waiting.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.status() == Status::Waiting {
            self.load().await?;
        }
        let current = self.status();
        if current != Status::Loaded {
            return Err(LifecycleError::InvalidTransition {
                from: current.to_string(),
                to: Status::Starting.to_string(),
            }
            .into());
        }
        self.set_status(Status::Starting);

        let result = self.start_inner().await;
        self.set_status(Status::Started);
        if let Err(error) = result {
            tracing::error!(%error, "start failed, shutting down");
            self.shutdown_with_code(1).await;
            return Err(error);
        }
        tracing::info!(name = %self.settings.name, "bot started");
        Ok(())
    }

    async fn start_inner(self: &Arc<Self>) -> Result<()> {
        if let Some(storage) = self.storage_adapter()
            && let Err(error) = self.memory.load(&storage).await
        {
            tracing::warn!(%error, "memory load failed, starting empty");
        }

        let slots = self.adapters.read().unwrap().populated();
        for (slot, adapter) in slots {
            tracing::info!(slot, adapter = adapter.name(), "starting adapter");
            adapter.start(Arc::clone(self)).await?;
        }

        if self.settings.auto_save
            && let Some(storage) = self.storage_adapter()
        {
            self.memory
                .set_save_interval(storage, self.settings.save_interval_ms);
        }
        Ok(())
    }

    /// Tear down with a clean (zero) exit code.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutdown_with_code(0).await;
    }

    /// Tear down in LIFO order, recording `code` as the process exit code.
    /// Awaits an in-flight load or start first so the transition is atomic
    /// for callers; failures are logged, never re-thrown. A non-zero code
    /// already recorded is not overwritten by a later clean shutdown.
    pub async fn shutdown_with_code(self: &Arc<Self>, code: i32) {
        if code != 0 {
            self.exit_code.store(code, Ordering::SeqCst);
        }
        let mut status_rx = self.status.subscribe();
        loop {
            match self.status() {
                Status::Loading | Status::Starting => {
                    let _ = status_rx
                        .wait_for(|s| !matches!(s, Status::Loading | Status::Starting))
                        .await;
                }
                Status::Waiting | Status::Shutdown => return,
                Status::Loaded | Status::Started => break,
            }
        }

        self.memory.cancel_save_interval();
        if let Some(storage) = self.storage_adapter()
            && let Err(error) = self.memory.save(&storage).await
        {
            tracing::error!(%error, "final memory save failed");
        }

        let slots = self.adapters.read().unwrap().populated();
        for (slot, adapter) in slots.into_iter().rev() {
            if let Err(error) = adapter.shutdown().await {
                tracing::error!(slot, adapter = adapter.name(), %error, "adapter shutdown failed");
            }
        }
        self.set_status(Status::Shutdown);
        tracing::info!("bot shut down");
    }

    /// Stop adapters but stay loaded: `started -> loaded`.
    pub async fn pause(self: &Arc<Self>) -> Result<()> {
        let current = self.status();
        if current != Status::Started {
            return Err(LifecycleError::InvalidTransition {
                from: current.to_string(),
                to: Status::Loaded.to_string(),
            }
            .into());
        }
        self.memory.cancel_save_interval();
        let slots = self.adapters.read().unwrap().populated();
        for (_slot, adapter) in slots.into_iter().rev() {
            if let Err(error) = adapter.shutdown().await {
                tracing::error!(adapter = adapter.name(), %error, "adapter pause failed");
            }
        }
        self.set_status(Status::Loaded);
        Ok(())
    }

    /// Return to `waiting`, emptying the global path, bits, middleware, and
    /// adapter slots.
    pub fn reset(&self) -> Result<()> {
        let current = self.status();
        if !matches!(current, Status::Shutdown | Status::Waiting | Status::Loaded) {
            return Err(LifecycleError::InvalidTransition {
                from: current.to_string(),
                to: Status::Waiting.to_string(),
            }
            .into());
        }
        *self.path.write().unwrap() = Path::global();
        self.scenes.lock().unwrap().clear();
        self.bits.write().unwrap().clear();
        self.middleware.write().unwrap().reset();
        self.adapters.write().unwrap().unload_all();
        self.set_status(Status::Waiting);
        Ok(())
    }
}
