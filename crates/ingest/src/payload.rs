//! The provider's webhook envelope: zero or more messages and/or status
//! receipts, scoped to one external phone-number id.

use courant_store::MessageKind;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

impl WebhookPayload {
    /// The external phone-number id this delivery is scoped to.
    pub fn phone_id(&self) -> Option<&str> {
        self.entry
            .iter()
            .flat_map(|e| e.changes.iter())
            .find_map(|c| c.value.metadata.as_ref())
            .map(|m| m.phone_number_id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Change {
    pub field: String,
    pub value: ChangeValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub contacts: Vec<ContactInfo>,
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    #[serde(default)]
    pub statuses: Vec<StatusReceipt>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub phone_number_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactInfo {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    /// Epoch seconds, as a string, per the provider's wire format.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<TextBody>,
    #[serde(default)]
    pub image: Option<MediaBody>,
    #[serde(default)]
    pub video: Option<MediaBody>,
    #[serde(default)]
    pub audio: Option<MediaBody>,
    #[serde(default)]
    pub document: Option<MediaBody>,
    #[serde(default)]
    pub sticker: Option<MediaBody>,
    #[serde(default)]
    pub location: Option<LocationBody>,
    #[serde(default)]
    pub reaction: Option<ReactionBody>,
    #[serde(default)]
    pub context: Option<Context>,
}

impl InboundMessage {
    /// Map the provider's type tag to the internal kind. Tags we do not
    /// recognize become `Unknown` rather than being dropped.
    pub fn kind(&self) -> MessageKind {
        match self.message_type.as_str() {
            "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "audio" => MessageKind::Audio,
            "document" => MessageKind::Document,
            "sticker" => MessageKind::Sticker,
            "location" => MessageKind::Location,
            "interactive" | "button" => MessageKind::Interactive,
            "reaction" => MessageKind::Reaction,
            _ => MessageKind::Unknown,
        }
    }

    /// Message timestamp in epoch millis.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.parse::<i64>().unwrap_or_default() * 1_000
    }

    fn media(&self) -> Option<&MediaBody> {
        self.image
            .as_ref()
            .or(self.video.as_ref())
            .or(self.audio.as_ref())
            .or(self.document.as_ref())
            .or(self.sticker.as_ref())
    }

    pub fn media_id(&self) -> Option<&str> {
        self.media().map(|m| m.id.as_str())
    }

    /// Text content: the body for text messages, the caption for media.
    pub fn body_text(&self) -> Option<String> {
        if let Some(ref text) = self.text {
            return Some(text.body.clone());
        }
        if let Some(media) = self.media() {
            return media.caption.clone();
        }
        if let Some(ref reaction) = self.reaction {
            return Some(reaction.emoji.clone());
        }
        None
    }

    /// Conversation preview: body/caption when present, the reaction emoji
    /// for reactions, otherwise a kind label like `[Image]`.
    pub fn preview(&self) -> String {
        match self.body_text() {
            Some(text) if !text.is_empty() => courant_common::truncate_preview(&text, 100),
            _ => self.kind().preview_label().to_string(),
        }
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaBody {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionBody {
    pub message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Context {
    pub id: String,
}

/// A delivery/read/failure receipt for a previously sent message.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReceipt {
    /// External id of the message the receipt refers to.
    pub id: String,
    pub status: String,
    pub timestamp: String,
    #[serde(default)]
    pub errors: Vec<ReceiptError>,
}

impl StatusReceipt {
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.parse::<i64>().unwrap_or_default() * 1_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
}
