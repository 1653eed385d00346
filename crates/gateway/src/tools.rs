//! The tool catalog: names, scope requirements, and typed arguments.
//!
//! `scope_for` is consulted before anything else touches a request: a tool
//! that is dispatchable but absent from these tables is treated as unknown
//! and fails closed, so adding a handler without deciding its scope can
//! never open a hole.

use serde::Deserialize;

use courant_provider::MediaKind;

use crate::{api_keys::Scope, templates::TemplateParameterInput};

const READ_TOOLS: &[&str] = &[
    "list_conversations",
    "list_unanswered",
    "get_conversation",
    "search_messages",
    "list_templates",
];

const SEND_TOOLS: &[&str] = &["send_text", "send_template", "send_media", "send_reaction"];

const WRITE_TOOLS: &[&str] = &["update_conversation"];

/// The scope a tool requires, or `None` for unknown tools.
pub fn scope_for(tool: &str) -> Option<Scope> {
    if READ_TOOLS.contains(&tool) {
        return Some(Scope::Read);
    }
    if SEND_TOOLS.contains(&tool) {
        return Some(Scope::Send);
    }
    if WRITE_TOOLS.contains(&tool) {
        return Some(Scope::Write);
    }
    None
}

/// A fully typed tool invocation: the untyped `{tool, args}` wire shape is
/// validated into one of these at the dispatch boundary.
///
/// Content fields stay `Option` even where the tool cannot proceed
/// without them: an omitted `from` or `phone` must come back as a
/// disclosure, so deserialization cannot be allowed to fail on a missing
/// content field first. Presence is checked in dispatch after resolution.
#[derive(Debug, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    ListConversations {
        from: Option<String>,
        #[serde(default)]
        include_archived: bool,
        limit: Option<u32>,
    },
    ListUnanswered {
        from: Option<String>,
        limit: Option<u32>,
    },
    GetConversation {
        from: Option<String>,
        phone: Option<String>,
        limit: Option<u32>,
        before: Option<i64>,
    },
    SearchMessages {
        from: Option<String>,
        query: Option<String>,
        limit: Option<u32>,
    },
    ListTemplates {
        from: Option<String>,
    },
    SendText {
        from: Option<String>,
        phone: Option<String>,
        body: Option<String>,
    },
    SendTemplate {
        from: Option<String>,
        phone: Option<String>,
        template: Option<String>,
        language: Option<String>,
        #[serde(default)]
        parameters: Vec<TemplateParameterInput>,
    },
    SendMedia {
        from: Option<String>,
        phone: Option<String>,
        media_kind: Option<MediaKind>,
        link: Option<String>,
        caption: Option<String>,
    },
    SendReaction {
        from: Option<String>,
        phone: Option<String>,
        message_id: Option<String>,
        emoji: Option<String>,
    },
    UpdateConversation {
        from: Option<String>,
        phone: Option<String>,
        archived: Option<bool>,
        mark_read: Option<bool>,
    },
}
