//! Bits: reusable micro-dialogue units referenced by id.
//!
//! A bit can send strings, run a callback, and chain follow-up bits into an
//! implicit scene via `next`.

use crate::branch::BranchCallback;
use crate::conditions::Conditions;
use crate::nlu::NluCriteria;
use crate::state::State;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Who a bit's follow-up scene attends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitScope {
    /// The user who triggered the bit, in any room.
    #[default]
    User,
    /// Anyone in the room the bit was triggered in.
    Room,
    /// The triggering user, only in the triggering room.
    UserInRoom,
}

/// A registered micro-dialogue unit.
#[derive(Clone)]
pub struct Bit {
    pub id: String,
    /// Strings delivered before the callback runs.
    pub send: Vec<String>,
    pub callback: Option<BranchCallback>,
    /// Text entry criteria, for use as a scene follow-up.
    pub condition: Option<Conditions>,
    /// NLU entry criteria, for use as a scene follow-up.
    pub intent: Option<NluCriteria>,
    /// Follow-up bit ids forming an implicit scene.
    pub next: Vec<String>,
    pub scope: BitScope,
}

impl Bit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            send: Vec::new(),
            callback: None,
            condition: None,
            intent: None,
            next: Vec::new(),
            scope: BitScope::default(),
        }
    }

    pub fn send(mut self, strings: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.send.extend(strings.into_iter().map(Into::into));
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, crate::Result<()>> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn condition(mut self, conditions: Conditions) -> Self {
        self.condition = Some(conditions);
        self
    }

    pub fn intent(mut self, criteria: NluCriteria) -> Self {
        self.intent = Some(criteria);
        self
    }

    pub fn next(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.next.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn scope(mut self, scope: BitScope) -> Self {
        self.scope = scope;
        self
    }

    /// A bit with nothing to send and no callback does nothing when run.
    pub fn is_inert(&self) -> bool {
        self.send.is_empty() && self.callback.is_none()
    }

    /// Whether the bit can serve as a scene follow-up entry.
    pub fn has_entry(&self) -> bool {
        self.condition.is_some() || self.intent.is_some()
    }
}

impl std::fmt::Debug for Bit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bit")
            .field("id", &self.id)
            .field("send", &self.send)
            .field("has_callback", &self.callback.is_some())
            .field("next", &self.next)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::Condition;

    #[test]
    fn inert_bit_is_detected() {
        assert!(Bit::new("empty").is_inert());
        assert!(!Bit::new("speaks").send(["hello"]).is_inert());
        assert!(!Bit::new("acts").callback(|_s| Box::pin(async { Ok(()) })).is_inert());
    }

    #[test]
    fn entry_criteria_qualify_a_follow_up() {
        assert!(!Bit::new("plain").has_entry());
        let with_condition = Bit::new("yes")
            .condition(Conditions::single(Condition::new().is("yes")).unwrap());
        assert!(with_condition.has_entry());
        let with_intent = Bit::new("confirm").intent(NluCriteria::intent("confirm"));
        assert!(with_intent.has_entry());
    }
}
