//! Condition registry: named handlers with the conditions that select them.
//!
//! Built once at startup, then frozen inside the [`crate::Bot`]. Commands are tried in the order
//! their names were first registered; within a command, its conditions are tried in the order they
//! were added, and the first one that holds wins. Adding a condition to an existing command widens
//! it (OR), it never narrows it.

use crate::condition::Condition;
use crate::handler::Handler;
use crate::message::Message;

/// Which pipeline stage handled an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// A remembered pending response matched by label or vague matcher.
    PendingResponse,
    /// The remembered on-other-response fallback.
    Fallback,
    /// A global condition; carries the command name.
    Condition(String),
    ChannelCatchAll,
    /// The router-level catch-all.
    CatchAll,
    /// A button click resolved straight to a handler.
    Button,
    Location,
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Handled(Stage),
    /// Nothing matched. Adapters may send a generic reply.
    Unhandled,
}

impl Outcome {
    pub fn handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }
}

/// Returned by [`Router::register`]; names the command for later [`Router::add_condition`] calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHandle {
    name: String,
}

impl CommandHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Command {
    name: String,
    handler: Handler,
    conditions: Vec<Condition>,
}

#[derive(Default)]
pub struct Router {
    commands: Vec<Command>,
    catch_all: Option<Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, selected when `condition` holds.
    ///
    /// If `name` is already registered, `condition` is appended as an alternative and the handler
    /// registered first is kept.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        condition: Condition,
        handler: Handler,
    ) -> CommandHandle {
        let name = name.into();
        match self.commands.iter_mut().find(|c| c.name == name) {
            Some(existing) => {
                log::debug!("command {}: adding alternative {:?}", name, condition);
                existing.conditions.push(condition);
            }
            None => {
                log::debug!("command {}: registered with {:?}", name, condition);
                self.commands.push(Command {
                    name: name.clone(),
                    handler,
                    conditions: vec![condition],
                });
            }
        }
        CommandHandle { name }
    }

    /// Add an alternative condition to a registered command.
    pub fn add_condition(&mut self, handle: &CommandHandle, condition: Condition) {
        if let Some(c) = self.commands.iter_mut().find(|c| c.name == handle.name) {
            c.conditions.push(condition);
        }
    }

    /// Router-level catch-all, tried after the channel's own catch-all.
    pub fn set_catch_all(&mut self, handler: Handler) {
        self.catch_all = Some(handler);
    }

    pub fn catch_all(&self) -> Option<&Handler> {
        self.catch_all.as_ref()
    }

    /// First command with a condition that holds for `message`.
    pub fn resolve(&self, message: &Message) -> Option<(&str, &Handler)> {
        self.commands
            .iter()
            .find(|c| c.conditions.iter().any(|cond| cond.matches(message)))
            .map(|c| (c.name.as_str(), &c.handler))
    }

    pub fn command_names(&self) -> Vec<&str> {
        self.commands.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
