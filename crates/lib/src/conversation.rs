//! Per-user conversation state: pending responses ("buttons") in a default scope and an optional
//! conversation scope that shadows it while active.
//!
//! Pending responses are one-shot: consuming one clears the whole table of the active scope, so
//! buttons from an earlier prompt cannot be replayed once the conversation has moved on.

use crate::handler::Handler;
use crate::vague::VagueContainer;
use serde_json::Value;

/// What happens when a pending response is chosen.
#[derive(Debug, Clone)]
pub enum Action {
    /// Re-dispatch as if the user had typed this text.
    Literal(String),
    Handler(Handler),
}

impl Action {
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(s) => Some(s),
            Self::Handler(_) => None,
        }
    }
}

/// A remembered expected reply: the label a user may type back, what to do, and optional vague
/// matchers consulted when the label itself does not match.
#[derive(Debug, Clone)]
pub struct Button {
    pub label: String,
    pub action: Action,
    pub vague: Vec<VagueContainer>,
}

impl Button {
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action,
            vague: Vec::new(),
        }
    }

    pub fn literal(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(label, Action::Literal(text.into()))
    }

    pub fn handler(label: impl Into<String>, handler: Handler) -> Self {
        Self::new(label, Action::Handler(handler))
    }

    pub fn with_vague(mut self, container: VagueContainer) -> Self {
        self.vague.push(container);
        self
    }

    /// What an adapter should send back when this button is pressed: the literal text, or the
    /// label for handler actions.
    pub fn payload(&self) -> &str {
        self.action.as_literal().unwrap_or(&self.label)
    }
}

/// The "no exact or fuzzy match" fallback remembered with a question, plus the caller's stage value.
#[derive(Debug, Clone)]
pub struct Fallback {
    pub handler: Handler,
    pub value: Value,
}

impl Fallback {
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            value: Value::Null,
        }
    }

    pub fn with_value(handler: Handler, value: Value) -> Self {
        Self { handler, value }
    }
}

/// Result of [`ConversationState::get_response`].
#[derive(Debug, Clone)]
pub struct ResponseMatch {
    pub action: Action,
    /// The button label that was chosen.
    pub label: String,
    /// Definitive value of the vague container that matched, or the label for a label match.
    pub definitive: String,
    /// The text that matched.
    pub matched: String,
}

/// One scope's pending-response table. Insertion order is evaluation order.
#[derive(Debug, Clone, Default)]
struct ResponseTable {
    buttons: Vec<Button>,
    fallback: Option<Fallback>,
}

impl ResponseTable {
    fn insert(&mut self, button: Button) {
        // Last write wins on the whole entry; the slot keeps its original position.
        match self.buttons.iter_mut().find(|b| b.label == button.label) {
            Some(slot) => *slot = button,
            None => self.buttons.push(button),
        }
    }

    fn clear(&mut self) {
        self.buttons.clear();
        self.fallback = None;
    }
}

#[derive(Debug, Clone, Default)]
struct Conversation {
    responses: ResponseTable,
    exit_command: Option<String>,
}

/// Conversation state of one user.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    default_scope: ResponseTable,
    conversation: Option<Conversation>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> &ResponseTable {
        match &self.conversation {
            Some(c) => &c.responses,
            None => &self.default_scope,
        }
    }

    fn active_mut(&mut self) -> &mut ResponseTable {
        match &mut self.conversation {
            Some(c) => &mut c.responses,
            None => &mut self.default_scope,
        }
    }

    /// Open an empty conversation scope. Any previous conversation scope is discarded; the default
    /// scope is left as is.
    pub fn start_conversation(&mut self) {
        self.start_conversation_with_exit(None);
    }

    /// Like [`Self::start_conversation`], remembering a command that forces the conversation to end.
    pub fn start_conversation_with_exit(&mut self, exit_command: Option<String>) {
        self.conversation = Some(Conversation {
            responses: ResponseTable::default(),
            exit_command: exit_command.map(|c| c.trim().to_lowercase()),
        });
    }

    pub fn end_conversation(&mut self) {
        self.conversation = None;
    }

    pub fn in_conversation(&self) -> bool {
        self.conversation.is_some()
    }

    /// Lower-cased exit command of the active conversation, if any.
    pub fn exit_command(&self) -> Option<&str> {
        self.conversation.as_ref()?.exit_command.as_deref()
    }

    pub fn remember_response(&mut self, button: Button) {
        self.active_mut().insert(button);
    }

    pub fn remember_responses(
        &mut self,
        buttons: impl IntoIterator<Item = Button>,
        on_other: Option<Fallback>,
    ) {
        let table = self.active_mut();
        for b in buttons {
            table.insert(b);
        }
        if let Some(f) = on_other {
            table.fallback = Some(f);
        }
    }

    pub fn remember_on_other_response(&mut self, fallback: Fallback) {
        self.active_mut().fallback = Some(fallback);
    }

    /// Drop every pending response (and the fallback) of the active scope.
    pub fn clear_responses(&mut self) {
        self.active_mut().clear();
    }

    /// Labels pending in the active scope, in evaluation order.
    pub fn pending_labels(&self) -> Vec<&str> {
        self.active().buttons.iter().map(|b| b.label.as_str()).collect()
    }

    pub fn has_pending(&self) -> bool {
        let t = self.active();
        !t.buttons.is_empty() || t.fallback.is_some()
    }

    /// Look up by exact label, else by literal action text ("the action itself was typed back").
    /// A hit clears the active table unless `clear` is false.
    pub fn get_button(&mut self, key: &str, clear: bool) -> Option<Button> {
        let table = self.active_mut();
        let found = table
            .buttons
            .iter()
            .find(|b| b.label == key)
            .or_else(|| table.buttons.iter().find(|b| b.action.as_literal() == Some(key)))
            .cloned()?;
        if clear {
            table.clear();
        }
        Some(found)
    }

    /// Match a typed reply: labels (case-insensitive) across the whole table first, then vague
    /// matchers in registration order. A hit clears the active table unless `clear` is false.
    pub fn get_response(&mut self, query: &str, clear: bool) -> Option<ResponseMatch> {
        let query = query.to_lowercase();
        let table = self.active_mut();

        let by_label = table
            .buttons
            .iter()
            .find(|b| b.label.to_lowercase() == query)
            .map(|b| ResponseMatch {
                action: b.action.clone(),
                label: b.label.clone(),
                definitive: b.label.clone(),
                matched: b.label.to_lowercase(),
            });

        let found = by_label.or_else(|| {
            table.buttons.iter_mut().find_map(|b| {
                let action = &b.action;
                let label = &b.label;
                b.vague.iter_mut().find_map(|c| {
                    c.find(&query).map(|m| ResponseMatch {
                        action: action.clone(),
                        label: label.clone(),
                        definitive: c.definitive().to_string(),
                        matched: m.text,
                    })
                })
            })
        })?;

        if clear {
            table.clear();
        }
        Some(found)
    }

    /// The remembered fallback of the active scope. Never clears.
    pub fn get_on_other_response(&self) -> Option<Fallback> {
        self.active().fallback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vague::VagueMatcher;

    fn noop() -> Handler {
        Handler::new(|_cx| async { Ok(()) })
    }

    fn digits() -> VagueContainer {
        VagueContainer::new("number", vec![VagueMatcher::regex(r"\d+").unwrap()])
    }

    #[test]
    fn label_lookup_is_case_insensitive_and_one_shot() {
        let mut s = ConversationState::new();
        s.remember_response(Button::handler("Cats", noop()));
        s.remember_response(Button::handler("Dogs", noop()));

        let hit = s.get_response("cats", true).unwrap();
        assert_eq!(hit.label, "Cats");
        assert_eq!(hit.matched, "cats");
        assert!(s.pending_labels().is_empty());
        assert!(s.get_response("cats", true).is_none());
    }

    #[test]
    fn get_response_without_clear_keeps_table() {
        let mut s = ConversationState::new();
        s.remember_response(Button::literal("Yes", "/confirm"));
        assert!(s.get_response("YES", false).is_some());
        assert_eq!(s.pending_labels(), vec!["Yes"]);
    }

    #[test]
    fn label_match_beats_earlier_vague_match() {
        let mut s = ConversationState::new();
        // The first entry's vague matcher would accept "12" too.
        s.remember_response(Button::literal("Age", "/age").with_vague(digits()));
        s.remember_response(Button::literal("12", "/twelve"));

        let hit = s.get_response("12", true).unwrap();
        assert_eq!(hit.label, "12");
        assert_eq!(hit.action.as_literal(), Some("/twelve"));
    }

    #[test]
    fn vague_match_reports_matched_text_and_definitive() {
        let mut s = ConversationState::new();
        s.remember_response(Button::literal("Tell me", "/age").with_vague(digits()));

        let hit = s.get_response("42", true).unwrap();
        assert_eq!(hit.definitive, "number");
        assert_eq!(hit.matched, "42");
        assert_eq!(hit.label, "Tell me");
    }

    #[test]
    fn vague_matchers_are_tried_in_registration_order() {
        let mut s = ConversationState::new();
        s.remember_response(Button::literal("First", "/first").with_vague(digits()));
        s.remember_response(
            Button::literal("Second", "/second")
                .with_vague(VagueContainer::new("any", vec![VagueMatcher::contains(".").unwrap()])),
        );
        assert_eq!(s.get_response("7", true).unwrap().label, "First");
    }

    #[test]
    fn duplicate_label_overwrites_whole_entry() {
        let mut s = ConversationState::new();
        s.remember_response(Button::literal("Pick", "/old").with_vague(digits()));
        s.remember_response(Button::literal("Other", "/other"));
        s.remember_response(Button::literal("Pick", "/new"));

        assert_eq!(s.pending_labels(), vec!["Pick", "Other"]);
        // The overwritten entry's matchers are gone with it.
        assert!(s.get_response("5", false).is_none());
        assert_eq!(
            s.get_response("pick", false).unwrap().action.as_literal(),
            Some("/new")
        );
    }

    #[test]
    fn conversation_scope_is_isolated_and_discarded() {
        let mut s = ConversationState::new();
        s.remember_response(Button::literal("Menu", "/menu"));

        s.start_conversation();
        assert!(s.pending_labels().is_empty());
        s.remember_response(Button::literal("Step", "/step"));
        assert!(s.get_response("menu", false).is_none());
        s.end_conversation();

        assert_eq!(s.pending_labels(), vec!["Menu"]);
        assert!(s.get_response("step", false).is_none());
    }

    #[test]
    fn restarting_a_conversation_discards_the_previous_one() {
        let mut s = ConversationState::new();
        s.start_conversation_with_exit(Some(" /Cancel ".to_string()));
        s.remember_response(Button::literal("A", "/a"));
        assert_eq!(s.exit_command(), Some("/cancel"));

        s.start_conversation();
        assert!(s.in_conversation());
        assert!(s.pending_labels().is_empty());
        assert_eq!(s.exit_command(), None);
    }

    #[test]
    fn get_button_falls_back_to_literal_action() {
        let mut s = ConversationState::new();
        s.remember_response(Button::literal("Help me", "/help"));
        s.remember_response(Button::literal("Later", "/later"));

        let b = s.get_button("/help", true).unwrap();
        assert_eq!(b.label, "Help me");
        assert!(!s.has_pending());
    }

    #[test]
    fn get_button_is_exact_about_labels() {
        let mut s = ConversationState::new();
        s.remember_response(Button::literal("Help me", "/help"));
        assert!(s.get_button("help me", true).is_none());
        assert!(s.get_button("Help me", false).is_some());
        assert!(s.has_pending());
    }

    #[test]
    fn fallback_survives_lookups_until_table_is_consumed() {
        let mut s = ConversationState::new();
        s.remember_responses(
            vec![Button::literal("Yes", "/yes")],
            Some(Fallback::with_value(noop(), serde_json::json!("stage-2"))),
        );

        assert!(s.get_response("maybe", true).is_none());
        let f = s.get_on_other_response().unwrap();
        assert_eq!(f.value, serde_json::json!("stage-2"));
        assert!(s.get_on_other_response().is_some());

        assert!(s.get_response("yes", true).is_some());
        assert!(s.get_on_other_response().is_none());
    }

    #[test]
    fn fallback_is_scoped_like_buttons() {
        let mut s = ConversationState::new();
        s.remember_on_other_response(Fallback::new(noop()));
        s.start_conversation();
        assert!(s.get_on_other_response().is_none());
        s.end_conversation();
        assert!(s.get_on_other_response().is_some());
    }

    #[test]
    fn payload_is_literal_text_or_label() {
        assert_eq!(Button::literal("Help", "/help").payload(), "/help");
        assert_eq!(Button::handler("Cats", noop()).payload(), "Cats");
    }
}
