//! Generic interruptible async piece stacks, one per stage.
//!
//! A piece continues the stack by returning normally, interrupts it with
//! [`Control::interrupt`] (the stage completion does not run), or schedules
//! cleanup to run after completion with [`Control::defer`]. Deferred
//! cleanups drain in LIFO order.

use crate::error::MiddlewareError;
use crate::state::State;
use crate::thought::Stage;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

/// One function in a middleware stack.
pub type Piece = Arc<
    dyn for<'a> Fn(&'a mut State, &'a mut Control) -> BoxFuture<'a, crate::Result<()>>
        + Send
        + Sync,
>;

/// A cleanup continuation deferred by a piece.
pub type Cleanup = Box<dyn for<'a> FnOnce(&'a mut State) -> BoxFuture<'a, ()> + Send + Sync>;

/// Flow control handle passed to each piece.
#[derive(Default)]
pub struct Control {
    interrupted: bool,
    cleanups: Vec<Cleanup>,
}

impl Control {
    /// Stop the stack: no further piece runs and completion is skipped.
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Push a cleanup to run after the stage completion, LIFO.
    pub fn defer(&mut self, cleanup: Cleanup) {
        self.cleanups.push(cleanup);
    }
}

/// Whether a stack ran to completion or was interrupted by a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Interrupted,
}

/// An ordered stack of pieces for one stage.
#[derive(Clone)]
pub struct Middleware {
    kind: &'static str,
    pieces: Vec<Piece>,
}

impl Middleware {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            pieces: Vec::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn register<F>(&mut self, piece: F)
    where
        F: for<'a> Fn(&'a mut State, &'a mut Control) -> BoxFuture<'a, crate::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.pieces.push(Arc::new(piece));
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Run the stack over the state. `complete` is the stage's own work; it
    /// runs only when no piece interrupted. Deferred cleanups drain in LIFO
    /// order whether or not the stack was interrupted. The caller keeps the
    /// state either way; an error reports which stack failed.
    pub async fn execute<C>(
        &self,
        state: &mut State,
        complete: C,
    ) -> Result<Outcome, MiddlewareError>
    where
        C: for<'a> FnOnce(&'a mut State) -> BoxFuture<'a, crate::Result<()>> + Send,
    {
        // Begin on a fresh task-queue step so registration in the current
        // frame settles first.
        tokio::task::yield_now().await;

        let mut control = Control::default();
        for piece in &self.pieces {
            if let Err(source) = piece(state, &mut control).await {
                return Err(self.annotate(state, source));
            }
            if control.is_interrupted() {
                tracing::debug!(kind = self.kind, "middleware interrupted");
                drain_cleanups(&mut control, state).await;
                return Ok(Outcome::Interrupted);
            }
        }

        if let Err(source) = complete(state).await {
            return Err(self.annotate(state, source));
        }
        drain_cleanups(&mut control, state).await;
        Ok(Outcome::Completed)
    }

    fn annotate(&self, state: &State, source: crate::Error) -> MiddlewareError {
        let error = MiddlewareError {
            kind: self.kind,
            message_id: state.message.id,
            source: source.into(),
        };
        tracing::error!(kind = self.kind, message_id = %state.message.id, %error, "middleware failed");
        error
    }
}

async fn drain_cleanups(control: &mut Control, state: &mut State) {
    while let Some(cleanup) = control.cleanups.pop() {
        cleanup(state).await;
    }
}

/// The pre-registered stacks, one per stage.
#[derive(Clone)]
pub struct MiddlewareSet {
    stacks: HashMap<Stage, Middleware>,
}

impl MiddlewareSet {
    pub fn new() -> Self {
        let mut stacks = HashMap::new();
        for stage in Stage::ALL {
            stacks.insert(stage, Middleware::new(stage.as_str()));
        }
        Self { stacks }
    }

    pub fn stack(&self, stage: Stage) -> &Middleware {
        &self.stacks[&stage]
    }

    pub fn register<F>(&mut self, stage: Stage, piece: F)
    where
        F: for<'a> Fn(&'a mut State, &'a mut Control) -> BoxFuture<'a, crate::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        if let Some(stack) = self.stacks.get_mut(&stage) {
            stack.register(piece);
        }
    }

    /// Replace every stack with an empty one.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for MiddlewareSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Room, User};
    use crate::state::BotIdentity;
    use std::sync::Mutex;

    fn fresh_state() -> State {
        let message = Message::text(User::new("u1", "alice"), Room::direct(), "hi");
        State::new(message, BotIdentity::new("bb", None))
    }

    fn trace() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> impl for<'a> Fn(&'a mut State, &'a mut Control) -> BoxFuture<'a, crate::Result<()>>
    + Send
    + Sync
    + 'static {
        let log = log.clone();
        move |_state, _control| {
            log.lock().unwrap().push(label);
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn pieces_run_in_order_then_complete() {
        let log = trace();
        let mut middleware = Middleware::new("hear");
        middleware.register(recorder(&log, "one"));
        middleware.register(recorder(&log, "two"));

        let mut state = fresh_state();
        let complete_log = log.clone();
        let outcome = middleware
            .execute(&mut state, move |_state| {
                complete_log.lock().unwrap().push("complete");
                Box::pin(async { Ok(()) })
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["one", "two", "complete"]);
    }

    #[tokio::test]
    async fn interrupt_skips_rest_and_complete() {
        let log = trace();
        let mut middleware = Middleware::new("hear");
        middleware.register(recorder(&log, "one"));
        {
            let log = log.clone();
            middleware.register(move |_state: &mut State, control: &mut Control| {
                log.lock().unwrap().push("stopper");
                control.interrupt();
                Box::pin(async { Ok(()) })
            });
        }
        middleware.register(recorder(&log, "never"));

        let mut state = fresh_state();
        let complete_log = log.clone();
        let outcome = middleware
            .execute(&mut state, move |_state| {
                complete_log.lock().unwrap().push("complete");
                Box::pin(async { Ok(()) })
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Interrupted);
        assert_eq!(*log.lock().unwrap(), vec!["one", "stopper"]);
    }

    #[tokio::test]
    async fn deferred_cleanups_run_after_complete_in_lifo_order() {
        let log = trace();
        let mut middleware = Middleware::new("hear");
        for label in ["first", "second"] {
            let log = log.clone();
            middleware.register(move |_state: &mut State, control: &mut Control| {
                let log = log.clone();
                control.defer(Box::new(move |_state: &mut State| {
                    Box::pin(async move {
                        log.lock().unwrap().push(label);
                    })
                }));
                Box::pin(async { Ok(()) })
            });
        }

        let mut state = fresh_state();
        let complete_log = log.clone();
        middleware
            .execute(&mut state, move |_state| {
                complete_log.lock().unwrap().push("complete");
                Box::pin(async { Ok(()) })
            })
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["complete", "second", "first"]);
    }

    #[tokio::test]
    async fn piece_error_is_annotated_with_the_kind() {
        let mut middleware = Middleware::new("listen");
        middleware.register(|_state: &mut State, _control: &mut Control| {
            Box::pin(async { Err(anyhow::anyhow!("piece exploded").into()) })
        });

        let mut state = fresh_state();
        let err = middleware
            .execute(&mut state, |_state| Box::pin(async { Ok(()) }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, "listen");
        assert!(err.source.to_string().contains("piece exploded"));
    }

    #[tokio::test]
    async fn state_mutations_survive_the_stack() {
        let mut middleware = Middleware::new("hear");
        middleware.register(|state: &mut State, _control: &mut Control| {
            state.set("seen", serde_json::json!(true));
            Box::pin(async { Ok(()) })
        });

        let mut state = fresh_state();
        middleware
            .execute(&mut state, |_state| Box::pin(async { Ok(()) }))
            .await
            .unwrap();
        assert_eq!(state.get("seen"), Some(&serde_json::json!(true)));
    }
}
