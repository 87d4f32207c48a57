//! Outbound formatting helpers shared by adapters.
//!
//! None of this is enforced by the core; each adapter picks what its platform needs.

use crate::conversation::{Action, Button};
use serde::{Deserialize, Serialize};

/// A button as it goes over the wire: what to show and what comes back when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundButton {
    pub label: String,
    pub payload: String,
}

pub fn outbound_buttons(buttons: &[Button]) -> Vec<OutboundButton> {
    buttons
        .iter()
        .map(|b| OutboundButton {
            label: b.label.clone(),
            payload: b.payload().to_string(),
        })
        .collect()
}

/// Render buttons as trailing text lines for platforms without native buttons.
///
/// Literal actions show as `label: text` so the user can see what to type; handler actions show the
/// label alone. With `numbered`, lines are prefixed `1) `, `2) `, ...
pub fn format_buttons_as_text(buttons: &[Button], numbered: bool) -> String {
    let mut out = String::new();
    for (i, b) in buttons.iter().enumerate() {
        out.push('\n');
        if numbered {
            out.push_str(&format!("{}) ", i + 1));
        }
        out.push_str(&b.label);
        if let Action::Literal(text) = &b.action {
            if text != &b.label {
                out.push_str(": ");
                out.push_str(text);
            }
        }
    }
    if !out.is_empty() {
        out.insert(0, '\n');
    }
    out
}

/// URL without its scheme, for link text.
pub fn link_display(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

/// Host part of a URL.
pub fn link_domain(url: &str) -> &str {
    let rest = link_display(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

/// Escape text for an HTML attribute value or element body.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Split `text` into chunks of at most `max_len` characters, preferring to break at a newline,
/// then at a space. The separator at a break is dropped. `max_len == 0` disables splitting.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.chars().count() > max_len {
        let hard = byte_offset(rest, max_len);
        let window = &rest[..byte_offset(rest, max_len + 1)];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0);
        match cut {
            Some(i) => {
                chunks.push(rest[..i].to_string());
                rest = &rest[i + 1..];
            }
            None => {
                chunks.push(rest[..hard].to_string());
                rest = &rest[hard..];
            }
        }
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map(|(i, _)| i).unwrap_or(s.len())
}
