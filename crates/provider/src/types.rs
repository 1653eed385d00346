//! Request/response types for the provider's messaging REST API.

use serde::{Deserialize, Serialize};

/// The per-account credentials every API call needs.
#[derive(Debug, Clone)]
pub struct ProviderAccount {
    /// External phone-number id (the API path segment for sends).
    pub phone_id: String,
    /// External business-account id (the API path segment for templates).
    pub business_id: String,
    pub access_token: String,
}

/// A free-form outbound message.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text {
        to: String,
        body: String,
    },
    Media {
        to: String,
        media_kind: MediaKind,
        link: String,
        caption: Option<String>,
    },
    Reaction {
        to: String,
        /// External id of the message being reacted to.
        message_id: String,
        emoji: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }
}

/// A pre-approved template send, already validated by the caller.
#[derive(Debug, Clone)]
pub struct TemplateSend {
    pub to: String,
    pub name: String,
    pub language: String,
    pub parameters: Vec<TemplateParameterValue>,
}

/// One resolved template variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateParameterValue {
    /// Present for NAMED variables, absent for POSITIONAL ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_name: Option<String>,
    pub text: String,
}

/// The provider's acknowledgment of an accepted send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// The provider's globally unique message id.
    pub message_id: String,
}

/// One entry of the template catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub language: String,
    pub status: String,
    pub components: Vec<TemplateComponent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentKind {
    Header,
    Body,
    Footer,
    Buttons,
}

/// Metadata for a media object, resolved from its provider id.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaInfo {
    pub url: String,
    pub mime_type: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}
