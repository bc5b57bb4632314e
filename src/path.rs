//! Paths: named collections of branches grouped by stage.
//!
//! The `global` path holds process-wide branches; scenes create scoped
//! paths that take precedence for their participants.

use crate::branch::{Action, Branch, CustomMatcher, Matcher};
use crate::conditions::Conditions;
use crate::nlu::NluCriteria;
use std::time::Instant;

/// The stages branches can be registered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchStage {
    Listen,
    Understand,
    Serve,
    Act,
}

impl std::fmt::Display for BranchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchStage::Listen => write!(f, "listen"),
            BranchStage::Understand => write!(f, "understand"),
            BranchStage::Serve => write!(f, "serve"),
            BranchStage::Act => write!(f, "act"),
        }
    }
}

/// A named, stage-grouped set of branches in registration order.
#[derive(Debug, Clone, Default)]
pub struct Path {
    pub scope: String,
    /// Scene scoping: the user this path attends to.
    pub user_id: Option<String>,
    /// Scene scoping: the room this path attends to, when room-scoped.
    pub room_id: Option<String>,
    /// Scene expiry; `None` for the global path.
    pub expires_at: Option<Instant>,
    listen: Vec<Branch>,
    understand: Vec<Branch>,
    serve: Vec<Branch>,
    act: Vec<Branch>,
}

impl Path {
    /// The process-wide path.
    pub fn global() -> Self {
        Self {
            scope: "global".to_string(),
            ..Self::default()
        }
    }

    /// An ephemeral scene path scoped to a user, a room, or both.
    pub fn scene(user_id: Option<String>, room_id: Option<String>, expires_at: Instant) -> Self {
        Self {
            scope: "scene".to_string(),
            user_id,
            room_id,
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    fn stage_branches(&self, stage: BranchStage) -> &Vec<Branch> {
        match stage {
            BranchStage::Listen => &self.listen,
            BranchStage::Understand => &self.understand,
            BranchStage::Serve => &self.serve,
            BranchStage::Act => &self.act,
        }
    }

    fn stage_branches_mut(&mut self, stage: BranchStage) -> &mut Vec<Branch> {
        match stage {
            BranchStage::Listen => &mut self.listen,
            BranchStage::Understand => &mut self.understand,
            BranchStage::Serve => &mut self.serve,
            BranchStage::Act => &mut self.act,
        }
    }

    /// Register a branch at a stage, returning its id. A branch id appears
    /// in exactly one stage of one path; re-registration replaces.
    pub fn add(&mut self, branch: Branch, stage: BranchStage) -> String {
        let id = branch.id.clone();
        let target = self.stage_branches_mut(stage);
        if let Some(slot) = target.iter_mut().find(|b| b.id == id) {
            *slot = branch;
            return id;
        }
        for other in [
            BranchStage::Listen,
            BranchStage::Understand,
            BranchStage::Serve,
            BranchStage::Act,
        ] {
            if other != stage {
                self.stage_branches_mut(other).retain(|b| b.id != id);
            }
        }
        self.stage_branches_mut(stage).push(branch);
        id
    }

    pub fn branches(&self, stage: BranchStage) -> &[Branch] {
        self.stage_branches(stage)
    }

    /// Remove a branch from whichever stage map holds it. Used for `once`
    /// branches after their first match.
    pub fn remove(&mut self, branch_id: &str) -> bool {
        let mut removed = false;
        for stage in [
            BranchStage::Listen,
            BranchStage::Understand,
            BranchStage::Serve,
            BranchStage::Act,
        ] {
            let branches = self.stage_branches_mut(stage);
            let before = branches.len();
            branches.retain(|branch| branch.id != branch_id);
            removed |= branches.len() != before;
        }
        removed
    }

    /// Empty the listen, understand, and act collections. Serve branches
    /// are preserved.
    pub fn reset(&mut self) {
        self.listen.clear();
        self.understand.clear();
        self.act.clear();
    }

    /// Drop every branch without `force` at the stage, returning how many
    /// remain.
    pub fn forced(&mut self, stage: BranchStage) -> usize {
        let branches = self.stage_branches_mut(stage);
        branches.retain(|branch| branch.force);
        branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listen.is_empty()
            && self.understand.is_empty()
            && self.serve.is_empty()
            && self.act.is_empty()
    }

    pub fn has_branches(&self, stage: BranchStage) -> bool {
        !self.stage_branches(stage).is_empty()
    }

    // Convenience factories, one per branch subtype.

    /// Listen for text matching the conditions.
    pub fn text(&mut self, conditions: Conditions, action: Action) -> String {
        self.add(Branch::new(Matcher::Text(conditions), action), BranchStage::Listen)
    }

    /// Listen for text that addresses the bot directly.
    pub fn direct(&mut self, conditions: Conditions, action: Action) -> String {
        self.add(
            Branch::new(Matcher::TextDirect(conditions), action),
            BranchStage::Listen,
        )
    }

    /// Listen with an arbitrary predicate.
    pub fn custom(&mut self, matcher: CustomMatcher, action: Action) -> String {
        self.add(Branch::new(Matcher::Custom(matcher), action), BranchStage::Listen)
    }

    /// Understand via NLU criteria.
    pub fn nlu(&mut self, criteria: NluCriteria, action: Action) -> String {
        self.add(
            Branch::new(Matcher::NaturalLanguage(criteria), action),
            BranchStage::Understand,
        )
    }

    /// Understand via NLU criteria, requiring direct addressing.
    pub fn nlu_direct(&mut self, criteria: NluCriteria, action: Action) -> String {
        self.add(
            Branch::new(Matcher::NaturalLanguageDirect(criteria), action),
            BranchStage::Understand,
        )
    }

    /// Serve structured server events matching the criteria.
    pub fn server(&mut self, criteria: serde_json::Value, action: Action) -> String {
        self.add(Branch::new(Matcher::Server(criteria), action), BranchStage::Serve)
    }

    /// Act on messages nothing else matched.
    pub fn catch_all(&mut self, action: Action) -> String {
        self.add(Branch::new(Matcher::CatchAll, action), BranchStage::Act)
    }

    /// Listen for text and run a bit when it matches.
    pub fn text_to_bit(&mut self, conditions: Conditions, bit_id: impl Into<String>) -> String {
        self.add(
            Branch::new(Matcher::Text(conditions), Action::bit(bit_id)),
            BranchStage::Listen,
        )
    }
}
