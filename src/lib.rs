//! Parlance: a conversational-bot framework.
//!
//! Inbound messages from chat platforms route through a staged thought
//! process (hear, listen, understand, act, respond, remember) that
//! decides whether, how, and with what content to reply. Branches pair
//! declarative matchers with callbacks, middleware stacks wrap every
//! stage, and memory persists through a pluggable storage adapter.

pub mod adapter;
pub mod bit;
pub mod bot;
pub mod branch;
pub mod conditions;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod message;
pub mod middleware;
pub mod nlu;
pub mod path;
pub mod settings;
pub mod state;
pub mod thought;

pub use bit::{Bit, BitScope};
pub use bot::{Bot, BotEvent, Status};
pub use branch::{Action, Branch, Matcher};
pub use conditions::{Condition, ConditionOptions, Conditions};
pub use envelope::{Envelope, Method};
pub use error::{Error, Result};
pub use memory::Memory;
pub use message::{Message, MessageKind, Room, User};
pub use middleware::{Control, Middleware, MiddlewareSet};
pub use nlu::{NluCriteria, NluIntent, NluResult};
pub use path::{BranchStage, Path};
pub use settings::Settings;
pub use state::{BotIdentity, BranchMatch, State};
pub use thought::{Stage, Thought};
