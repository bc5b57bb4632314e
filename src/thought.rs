//! The thought process: the ordered stage machine from received input to
//! dispatched and remembered output.
//!
//! Stages run in order: hear, listen, understand (or serve for server
//! events), act, respond, remember. Each runs through its middleware
//! stack, with branch evaluation as the stage completion. A middleware
//! piece setting `state.done` stops the remaining stages.

use crate::bot::{Bot, BotEvent};
use crate::envelope::Envelope;
use crate::error::BranchError;
use crate::message::Message;
use crate::path::BranchStage;
use crate::state::{BranchMatch, State};
use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The stages of the thought process, in running order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Hear,
    Listen,
    Understand,
    Serve,
    Act,
    Respond,
    Remember,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Hear,
        Stage::Listen,
        Stage::Understand,
        Stage::Serve,
        Stage::Act,
        Stage::Respond,
        Stage::Remember,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Hear => "hear",
            Stage::Listen => "listen",
            Stage::Understand => "understand",
            Stage::Serve => "serve",
            Stage::Act => "act",
            Stage::Respond => "respond",
            Stage::Remember => "remember",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<BranchStage> for Stage {
    fn from(stage: BranchStage) -> Self {
        match stage {
            BranchStage::Listen => Stage::Listen,
            BranchStage::Understand => Stage::Understand,
            BranchStage::Serve => Stage::Serve,
            BranchStage::Act => Stage::Act,
        }
    }
}

/// One orchestrator invocation over one state.
pub struct Thought {
    bot: Arc<Bot>,
}

impl Thought {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self { bot }
    }

    /// Run the full stage machine over an inbound message, resolving with
    /// the final state.
    pub async fn process(&self, message: Message) -> State {
        let mut state = State::new(message, self.bot.identity());
        tracing::debug!(message_id = %state.message.id, "thought process started");

        self.run_stage(&mut state, Stage::Hear, |_state| Box::pin(async { Ok(()) }))
            .await;
        if state.is_done() {
            tracing::debug!(message_id = %state.message.id, "message dropped in hear");
            return state;
        }

        if state.message.is_audible() {
            self.branch_stage(&mut state, Stage::Listen, BranchStage::Listen)
                .await;
            if !state.is_done() && self.understand_applies(&state) {
                self.understand_stage(&mut state).await;
            }
        } else if state.message.is_server() && !state.is_done() {
            self.branch_stage(&mut state, Stage::Serve, BranchStage::Serve)
                .await;
        }

        if !state.is_done() && state.matched().is_empty() && !state.message.is_catch_all() {
            self.bot.emit(BotEvent::NoMatch {
                message_id: state.message.id,
            });
            state.message = Message::catch_all(state.message.clone());
            self.branch_stage(&mut state, Stage::Act, BranchStage::Act).await;
        }

        if !state.is_done() && !state.pending_envelopes().is_empty() {
            self.respond_stage(&mut state).await;
        }

        if !state.is_done() {
            self.remember_stage(&mut state).await;
        }

        tracing::debug!(
            message_id = %state.message.id,
            matched = state.matched().len(),
            dispatched = state.dispatched_envelopes().len(),
            "thought process finished"
        );
        state
    }

    /// Run respond and remember over a synthetic state carrying one
    /// unprompted envelope.
    pub async fn dispatch(&self, envelope: Envelope) -> State {
        let message = Message::server(serde_json::json!({ "dispatch": true }));
        let mut state = State::new(message, self.bot.identity());
        state.queue(envelope);

        self.respond_stage(&mut state).await;
        if !state.is_done() {
            self.remember_stage(&mut state).await;
        }
        state
    }

    /// NLU applies to text long enough to bother the vendor with, when
    /// nothing has matched yet and an NLU adapter is registered.
    fn understand_applies(&self, state: &State) -> bool {
        if !state.matched().is_empty() || !self.bot.has_nlu() {
            return false;
        }
        state
            .message
            .text_content()
            .is_some_and(|text| text.chars().count() >= self.bot.settings().nlu_min_length)
    }

    async fn run_stage<C>(&self, state: &mut State, stage: Stage, complete: C)
    where
        C: for<'a> FnOnce(&'a mut State) -> BoxFuture<'a, crate::Result<()>> + Send,
    {
        state.stage = Some(stage);
        self.bot.emit(BotEvent::Stage {
            stage,
            message_id: state.message.id,
        });
        let middleware = self.bot.middleware_stack(stage);
        // Stage errors are logged and annotated by the stack; the thought
        // process carries on with later stages regardless.
        let _ = middleware.execute(state, complete).await;
    }

    async fn branch_stage(&self, state: &mut State, stage: Stage, branch_stage: BranchStage) {
        let bot = Arc::clone(&self.bot);
        self.run_stage(state, stage, move |state| {
            Box::pin(async move {
                evaluate_branches(&bot, state, stage, branch_stage).await;
                Ok(())
            })
        })
        .await;
    }

    async fn understand_stage(&self, state: &mut State) {
        let bot = Arc::clone(&self.bot);
        self.run_stage(state, Stage::Understand, move |state| {
            Box::pin(async move {
                if state.nlu.is_none() {
                    state.nlu = bot.process_nlu(&state.message).await;
                }
                evaluate_branches(&bot, state, Stage::Understand, BranchStage::Understand).await;
                Ok(())
            })
        })
        .await;
    }

    async fn respond_stage(&self, state: &mut State) {
        let bot = Arc::clone(&self.bot);
        self.run_stage(state, Stage::Respond, move |state| {
            Box::pin(async move {
                for envelope in state.take_pending() {
                    match bot.dispatch_envelope(&envelope).await {
                        Ok(()) => state.record_dispatched(envelope),
                        Err(error) => {
                            tracing::error!(envelope_id = %envelope.id, %error, "envelope dispatch failed");
                        }
                    }
                }
                Ok(())
            })
        })
        .await;
    }

    async fn remember_stage(&self, state: &mut State) {
        let bot = Arc::clone(&self.bot);
        self.run_stage(state, Stage::Remember, move |state| {
            Box::pin(async move {
                if !state.message.is_server() {
                    let mut user = state.message.user.clone();
                    user.room = Some(state.message.room.id.clone());
                    bot.memory.remember_user(&user);
                    bot.memory.remember_room(&state.message.room);
                }
                Ok(())
            })
        })
        .await;
    }
}

/// Evaluate a stage's branches in registration order: applicable scene
/// branches first, then the global path (narrowed to forced branches while
/// a scene is attending). First match wins within the stage unless a later
/// branch is forced.
async fn evaluate_branches(
    bot: &Arc<Bot>,
    state: &mut State,
    stage: Stage,
    branch_stage: BranchStage,
) {
    let scoped = matches!(branch_stage, BranchStage::Listen | BranchStage::Understand);
    let (mut branches, scene_attending) = if scoped {
        bot.scene_branches(&state.message.user.id, &state.message.room.id, branch_stage)
    } else {
        (Vec::new(), false)
    };
    let scene_count = branches.len();

    let global = bot.global_branches(branch_stage);
    if scene_attending {
        branches.extend(global.into_iter().filter(|branch| branch.force));
    } else {
        branches.extend(global);
    }

    for (index, branch) in branches.iter().enumerate() {
        if state.matched_in(stage) && !branch.force {
            continue;
        }
        let Some(evidence) = branch.matches(&state.message, state).await else {
            continue;
        };

        tracing::debug!(branch_id = %branch.id, stage = %stage, "branch matched");
        state.record_match(BranchMatch {
            branch_id: branch.id.clone(),
            stage,
            outcome: evidence.outcome,
            captured: evidence.captured,
            matched_at: Utc::now(),
            error: None,
        });
        bot.emit(BotEvent::Match {
            stage,
            branch_id: branch.id.clone(),
            message_id: state.message.id,
        });

        // Consume the matched scene before executing: a chained follow-up
        // opens its own scene during execution.
        if index < scene_count {
            bot.consume_scene(&branch.id);
        } else if branch.once {
            bot.discard_branch(&branch.id);
        }

        if let Err(source) = branch.execute(state, bot).await {
            let error = BranchError {
                branch_id: branch.id.clone(),
                message_id: state.message.id,
                source: source.into(),
            };
            tracing::error!(%error, "branch callback failed");
            state.record_match_error(&branch.id, error.to_string());
        }
    }
}
