//! Branches: a matcher plus an action, registered at a stage.

use crate::bot::Bot;
use crate::conditions::Conditions;
use crate::message::Message;
use crate::nlu::NluCriteria;
use crate::state::{BotIdentity, State};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Async branch callback invoked with the state that matched.
pub type BranchCallback =
    Arc<dyn for<'a> Fn(&'a mut State) -> BoxFuture<'a, crate::Result<()>> + Send + Sync>;

/// User-supplied predicate for custom branches. Returning `Some` means the
/// branch matched, with arbitrary match data.
pub type CustomMatcher = Arc<
    dyn for<'a> Fn(&'a Message, &'a State) -> BoxFuture<'a, Option<serde_json::Value>>
        + Send
        + Sync,
>;

/// What to do when a branch matches.
#[derive(Clone)]
pub enum Action {
    Callback(BranchCallback),
    /// Run the bit registered under this id.
    Bit(String),
}

impl Action {
    pub fn new<F>(callback: F) -> Self
    where
        F: for<'a> Fn(&'a mut State) -> BoxFuture<'a, crate::Result<()>> + Send + Sync + 'static,
    {
        Action::Callback(Arc::new(callback))
    }

    /// Wrap a synchronous callback.
    pub fn sync<F>(callback: F) -> Self
    where
        F: Fn(&mut State) -> crate::Result<()> + Send + Sync + 'static,
    {
        Action::Callback(Arc::new(move |state| {
            let result = callback(state);
            Box::pin(async move { result })
        }))
    }

    pub fn bit(id: impl Into<String>) -> Self {
        Action::Bit(id.into())
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Callback(_) => write!(f, "Action::Callback"),
            Action::Bit(id) => write!(f, "Action::Bit({id})"),
        }
    }
}

/// How a branch decides whether a message concerns it.
#[derive(Clone)]
pub enum Matcher {
    /// Conditions over the message text.
    Text(Conditions),
    /// Conditions over text that addresses the bot by name, prefix stripped.
    TextDirect(Conditions),
    /// Criteria over the cached NLU result.
    NaturalLanguage(NluCriteria),
    /// NLU criteria, requiring direct addressing.
    NaturalLanguageDirect(NluCriteria),
    /// Deep key-subset equality against a server message payload.
    Server(serde_json::Value),
    /// Arbitrary user predicate.
    Custom(CustomMatcher),
    /// Matches only when nothing else has matched.
    CatchAll,
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Matcher::Text(_) => "Text",
            Matcher::TextDirect(_) => "TextDirect",
            Matcher::NaturalLanguage(_) => "NaturalLanguage",
            Matcher::NaturalLanguageDirect(_) => "NaturalLanguageDirect",
            Matcher::Server(_) => "Server",
            Matcher::Custom(_) => "Custom",
            Matcher::CatchAll => "CatchAll",
        };
        write!(f, "Matcher::{name}")
    }
}

/// Evidence produced by a successful match.
#[derive(Debug, Clone)]
pub struct MatchEvidence {
    pub outcome: serde_json::Value,
    pub captured: Option<String>,
}

/// A registered matcher/action pair. Immutable after registration; match
/// outcomes are recorded on the state, never on the branch.
#[derive(Debug, Clone)]
pub struct Branch {
    pub id: String,
    pub matcher: Matcher,
    pub action: Action,
    /// Evaluate even after another branch matched in the same stage.
    pub force: bool,
    /// Remove from the owning path after the first match.
    pub once: bool,
    pub meta: HashMap<String, serde_json::Value>,
}

impl Branch {
    pub fn new(matcher: Matcher, action: Action) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            matcher,
            action,
            force: false,
            once: false,
            meta: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Evaluate this branch against a message. The caller records the
    /// evidence on the state.
    pub async fn matches(&self, message: &Message, state: &State) -> Option<MatchEvidence> {
        match &self.matcher {
            Matcher::Text(conditions) => {
                let text = message.text_content()?;
                exec_conditions(conditions, text)
            }
            Matcher::TextDirect(conditions) => {
                let text = message.text_content()?;
                let rest = strip_direct(text, &state.bot)?;
                exec_conditions(conditions, rest)
            }
            Matcher::NaturalLanguage(criteria) => {
                let result = state.nlu.as_ref()?;
                let evidence = criteria.matches(result)?;
                Some(MatchEvidence {
                    outcome: serde_json::Value::Array(evidence),
                    captured: None,
                })
            }
            Matcher::NaturalLanguageDirect(criteria) => {
                let text = message.text_content()?;
                strip_direct(text, &state.bot)?;
                let result = state.nlu.as_ref()?;
                let evidence = criteria.matches(result)?;
                Some(MatchEvidence {
                    outcome: serde_json::Value::Array(evidence),
                    captured: None,
                })
            }
            Matcher::Server(criteria) => {
                let payload = message.server_payload()?;
                json_subset(criteria, payload).then(|| MatchEvidence {
                    outcome: criteria.clone(),
                    captured: None,
                })
            }
            Matcher::Custom(matcher) => {
                let outcome = matcher(message, state).await?;
                Some(MatchEvidence {
                    outcome,
                    captured: None,
                })
            }
            Matcher::CatchAll => state.matched().is_empty().then(|| MatchEvidence {
                outcome: serde_json::Value::Bool(true),
                captured: None,
            }),
        }
    }

    /// Run the branch's action against the state.
    pub async fn execute(&self, state: &mut State, bot: &Arc<Bot>) -> crate::Result<()> {
        match &self.action {
            Action::Callback(callback) => callback(state).await,
            Action::Bit(bit_id) => bot.do_bit(bit_id, state).await,
        }
    }
}

fn exec_conditions(conditions: &Conditions, text: &str) -> Option<MatchEvidence> {
    let result = conditions.exec(text);
    result.success().then(|| MatchEvidence {
        outcome: result.to_value(),
        captured: result.captured().map(str::to_string),
    })
}

/// Strip a leading bot-name (or alias) address from the text: optional `@`,
/// the name, an optional `:` or `,`, then whitespace or end of input.
pub(crate) fn strip_direct<'t>(text: &'t str, identity: &BotIdentity) -> Option<&'t str> {
    let trimmed = text.trim_start();
    let unprefixed = trimmed.strip_prefix('@').unwrap_or(trimmed);

    let mut names = vec![identity.name.as_str()];
    if let Some(alias) = identity.alias.as_deref() {
        names.push(alias);
    }

    for name in names {
        if name.is_empty() || unprefixed.len() < name.len() {
            continue;
        }
        let Some((head, rest)) = unprefixed.split_at_checked(name.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(name) {
            continue;
        }
        let rest = rest.strip_prefix([':', ',']).unwrap_or(rest);
        if rest.is_empty() {
            return Some(rest);
        }
        if rest.starts_with(char::is_whitespace) {
            return Some(rest.trim_start());
        }
    }
    None
}

/// Recursive key-subset equality: every key in `criteria` must exist in
/// `payload` with an equal (or recursively matching) value.
pub(crate) fn json_subset(criteria: &serde_json::Value, payload: &serde_json::Value) -> bool {
    match (criteria, payload) {
        (serde_json::Value::Object(want), serde_json::Value::Object(have)) => {
            want.iter().all(|(key, value)| {
                have.get(key)
                    .is_some_and(|candidate| json_subset(value, candidate))
            })
        }
        (want, have) => want == have,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::Condition;
    use crate::message::{Room, User};
    use serde_json::json;

    fn state_for(text: &str) -> (Message, State) {
        let message = Message::text(User::new("u1", "alice"), Room::new("r1", "general"), text);
        let state = State::new(message.clone(), BotIdentity::new("bb", Some("robot".into())));
        (message, state)
    }

    fn noop() -> Action {
        Action::sync(|_| Ok(()))
    }

    #[tokio::test]
    async fn text_branch_matches_and_captures() {
        let conditions = Conditions::single(Condition::new().after("echo")).unwrap();
        let branch = Branch::new(Matcher::Text(conditions), noop());
        let (message, state) = state_for("echo hello world");

        let evidence = branch.matches(&message, &state).await.unwrap();
        assert_eq!(evidence.captured.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn direct_branch_requires_the_bot_name() {
        let conditions = Conditions::parse("/hello/i").unwrap();
        let branch = Branch::new(Matcher::TextDirect(conditions), noop());

        let (message, state) = state_for("hello");
        assert!(branch.matches(&message, &state).await.is_none());

        for text in ["bb hello", "@bb hello", "BB: hello", "robot, hello"] {
            let (message, state) = state_for(text);
            assert!(
                branch.matches(&message, &state).await.is_some(),
                "should match: {text}"
            );
        }

        // Name must be a full word prefix.
        let (message, state) = state_for("bbq hello");
        assert!(branch.matches(&message, &state).await.is_none());
    }

    #[tokio::test]
    async fn server_branch_matches_payload_subset() {
        let branch = Branch::new(
            Matcher::Server(json!({"event": "deploy", "env": {"name": "prod"}})),
            noop(),
        );
        let message = Message::server(json!({
            "event": "deploy",
            "env": {"name": "prod", "region": "eu"},
            "extra": true,
        }));
        let state = State::new(message.clone(), BotIdentity::new("bb", None));
        assert!(branch.matches(&message, &state).await.is_some());

        let other = Message::server(json!({"event": "deploy", "env": {"name": "staging"}}));
        let state = State::new(other.clone(), BotIdentity::new("bb", None));
        assert!(branch.matches(&other, &state).await.is_none());
    }

    #[tokio::test]
    async fn custom_branch_returns_match_data() {
        let matcher: CustomMatcher = Arc::new(|message, _state| {
            let long = message.text_content().is_some_and(|t| t.len() > 5);
            Box::pin(async move { long.then(|| json!({"long": true})) })
        });
        let branch = Branch::new(Matcher::Custom(matcher), noop());

        let (message, state) = state_for("long enough");
        let evidence = branch.matches(&message, &state).await.unwrap();
        assert_eq!(evidence.outcome, json!({"long": true}));

        let (message, state) = state_for("shrt");
        assert!(branch.matches(&message, &state).await.is_none());
    }

    #[tokio::test]
    async fn catch_all_matches_only_unmatched_states() {
        let branch = Branch::new(Matcher::CatchAll, noop());
        let (message, mut state) = state_for("anything");
        assert!(branch.matches(&message, &state).await.is_some());

        state.record_match(crate::state::BranchMatch {
            branch_id: "prior".into(),
            stage: crate::thought::Stage::Listen,
            outcome: serde_json::Value::Bool(true),
            captured: None,
            matched_at: chrono::Utc::now(),
            error: None,
        });
        assert!(branch.matches(&message, &state).await.is_none());
    }
}
