//! The per-event state envelope threaded through every stage.

use crate::envelope::{Envelope, Method};
use crate::message::Message;
use crate::nlu::NluResult;
use crate::thought::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The identity branches match direct addressing against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub name: String,
    pub alias: Option<String>,
}

impl BotIdentity {
    pub fn new(name: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            name: name.into(),
            alias,
        }
    }
}

/// A record of one branch that matched during orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchMatch {
    pub branch_id: String,
    pub stage: Stage,
    /// Raw match evidence (condition captures, NLU evidence, custom data).
    pub outcome: serde_json::Value,
    pub captured: Option<String>,
    pub matched_at: DateTime<Utc>,
    /// Recorded when the branch callback failed; the stage continues.
    pub error: Option<String>,
}

/// The mutable envelope for one orchestrator invocation: what arrived, what
/// matched, what was queued, and whether processing should stop.
///
/// A state is confined to the invocation that created it; concurrent
/// orchestrations never share one.
#[derive(Debug)]
pub struct State {
    pub message: Message,
    pub bot: BotIdentity,
    /// The stage currently being processed.
    pub stage: Option<Stage>,
    /// NLU result cached by the understand stage.
    pub nlu: Option<NluResult>,
    matched: Vec<BranchMatch>,
    pending: Vec<Envelope>,
    dispatched: Vec<Envelope>,
    done: bool,
    scratch: HashMap<String, serde_json::Value>,
}

impl State {
    pub fn new(message: Message, bot: BotIdentity) -> Self {
        Self {
            message,
            bot,
            stage: None,
            nlu: None,
            matched: Vec::new(),
            pending: Vec::new(),
            dispatched: Vec::new(),
            done: false,
            scratch: HashMap::new(),
        }
    }

    /// Stop the thought process after the current stage's middleware
    /// resolves.
    pub fn set_done(&mut self) {
        self.done = true;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn matched(&self) -> &[BranchMatch] {
        &self.matched
    }

    pub fn last_match(&self) -> Option<&BranchMatch> {
        self.matched.last()
    }

    pub fn matched_in(&self, stage: Stage) -> bool {
        self.matched.iter().any(|record| record.stage == stage)
    }

    pub(crate) fn record_match(&mut self, record: BranchMatch) {
        self.matched.push(record);
    }

    pub(crate) fn record_match_error(&mut self, branch_id: &str, error: String) {
        if let Some(record) = self
            .matched
            .iter_mut()
            .rev()
            .find(|record| record.branch_id == branch_id)
        {
            record.error = Some(error);
        }
    }

    /// Queue an envelope back at the incoming room.
    pub fn respond<I, S>(&mut self, strings: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_envelope(Method::Send, strings);
    }

    /// Queue a reply addressed at the sending user.
    pub fn reply<I, S>(&mut self, strings: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_envelope(Method::Reply, strings);
    }

    /// Queue a reaction to the incoming message.
    pub fn react(&mut self, reaction: impl Into<String>) {
        self.push_envelope(Method::React, [reaction]);
    }

    /// Queue an emote in the incoming room.
    pub fn emote(&mut self, action: impl Into<String>) {
        self.push_envelope(Method::Emote, [action]);
    }

    fn push_envelope<I, S>(&mut self, method: Method, strings: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut envelope = Envelope::for_message(&self.message);
        // A fresh envelope has no method yet, so this cannot conflict.
        let _ = envelope.via(method);
        envelope.write(strings);
        self.pending.push(envelope);
    }

    /// Append strings to the last queued envelope, creating one (with the
    /// default method) when none is pending.
    pub fn write<I, S>(&mut self, strings: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.pending.last_mut() {
            Some(envelope) => {
                envelope.write(strings);
            }
            None => self.respond(strings),
        }
    }

    /// Queue a fully composed envelope.
    pub fn queue(&mut self, envelope: Envelope) {
        self.pending.push(envelope);
    }

    pub fn pending_envelopes(&self) -> &[Envelope] {
        &self.pending
    }

    /// Drain pending envelopes for dispatch.
    pub(crate) fn take_pending(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.pending)
    }

    pub(crate) fn record_dispatched(&mut self, envelope: Envelope) {
        self.dispatched.push(envelope);
    }

    pub fn dispatched_envelopes(&self) -> &[Envelope] {
        &self.dispatched
    }

    /// Scratch storage for middleware and callbacks.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.scratch.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.scratch.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Room, User};

    fn text_state(text: &str) -> State {
        let message = Message::text(User::new("u1", "alice"), Room::new("r1", "general"), text);
        State::new(message, BotIdentity::new("bb", None))
    }

    #[test]
    fn respond_targets_the_incoming_room() {
        let mut state = text_state("hello");
        state.respond(["hi there"]);

        let pending = state.pending_envelopes();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].room.as_ref().unwrap().id, "r1");
        assert_eq!(pending[0].strings, vec!["hi there"]);
        assert_eq!(pending[0].method(), Method::Send);
    }

    #[test]
    fn write_appends_to_the_open_envelope() {
        let mut state = text_state("hello");
        state.respond(["first"]);
        state.write(["second"]);
        assert_eq!(state.pending_envelopes().len(), 1);
        assert_eq!(state.pending_envelopes()[0].strings, vec!["first", "second"]);

        let mut empty = text_state("hello");
        empty.write(["created"]);
        assert_eq!(empty.pending_envelopes().len(), 1);
    }

    #[test]
    fn take_pending_drains_the_queue() {
        let mut state = text_state("hello");
        state.respond(["one"]);
        state.reply(["two"]);
        let drained = state.take_pending();
        assert_eq!(drained.len(), 2);
        assert!(state.pending_envelopes().is_empty());
        assert_eq!(drained[1].method(), Method::Reply);
    }
}
