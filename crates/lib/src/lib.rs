//! Switchyard core library: normalizes inbound chat events from several channels into one message
//! shape and dispatches them to application handlers, tracking short-lived per-user conversation
//! state (pending replies, vague answers, conversation scopes).

pub mod bot;
pub mod channels;
pub mod condition;
pub mod config;
pub mod conversation;
pub mod error;
pub mod handler;
pub mod init;
pub mod message;
pub mod router;
pub mod store;
pub mod users;
pub mod vague;

pub use bot::Bot;
pub use channels::{Channel, Specifications};
pub use condition::Condition;
pub use conversation::{Action, Button, ConversationState, Fallback, ResponseMatch};
pub use error::{Error, Result};
pub use handler::{Context, Handler, Matched};
pub use message::{EventKind, Location, Message, Passthrough, Transcoder, UserId};
pub use router::{CommandHandle, Outcome, Router, Stage};
pub use store::{JsonFileStore, MemoryStore, StoreError, UserStore};
pub use users::{User, UserRegistry};
pub use vague::{VagueContainer, VagueMatch, VagueMatcher};
