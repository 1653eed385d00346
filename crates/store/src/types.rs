//! Row types and the enums whose transition rules the store enforces.

use serde::{Deserialize, Serialize};

/// Lifecycle of a provisioned messaging account.
///
/// Accounts are created by the provisioning flow and only ever move between
/// statuses; they are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Provisioning,
    PendingNameReview,
    Active,
    NameDeclined,
    Failed,
}

impl AccountStatus {
    /// Whether this account may ingest inbound webhooks and send messages.
    pub fn is_eligible(self) -> bool {
        matches!(self, Self::Active | Self::PendingNameReview)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::PendingNameReview => "pending_name_review",
            Self::Active => "active",
            Self::NameDeclined => "name_declined",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provisioning" => Some(Self::Provisioning),
            "pending_name_review" => Some(Self::PendingNameReview),
            "active" => Some(Self::Active),
            "name_declined" => Some(Self::NameDeclined),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Message content kind. Provider type tags we do not recognize map to
/// `Unknown` rather than being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Interactive,
    Reaction,
    Template,
    Unknown,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Interactive => "interactive",
            Self::Reaction => "reaction",
            Self::Template => "template",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "document" => Some(Self::Document),
            "sticker" => Some(Self::Sticker),
            "location" => Some(Self::Location),
            "interactive" => Some(Self::Interactive),
            "reaction" => Some(Self::Reaction),
            "template" => Some(Self::Template),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Fallback conversation-preview label for messages without a caption.
    pub fn preview_label(self) -> &'static str {
        match self {
            Self::Text => "",
            Self::Image => "[Image]",
            Self::Video => "[Video]",
            Self::Audio => "[Audio]",
            Self::Document => "[Document]",
            Self::Sticker => "[Sticker]",
            Self::Location => "[Location]",
            Self::Interactive => "[Interactive]",
            Self::Reaction => "[Reaction]",
            Self::Template => "[Template]",
            Self::Unknown => "[Unsupported]",
        }
    }
}

/// Delivery status of a message.
///
/// Statuses form a total order pending < sent < delivered < read; `failed`
/// is reachable from every state and absorbing. [`MessageStatus::accepts`]
/// is the single place the lattice is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed => 4,
        }
    }

    /// Whether a message currently in `self` accepts a transition to `next`.
    pub fn accepts(self, next: Self) -> bool {
        if self == Self::Failed {
            return false;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One externally-registered messaging identity.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub business_id: String,
    /// External phone-number id; None until registration completes.
    pub phone_id: Option<String>,
    pub phone: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub verify_token: String,
    pub status: AccountStatus,
    pub created_at: i64,
}

/// A phone number known to one account.
#[derive(Debug, Clone, Serialize)]
pub struct Contact {
    pub id: String,
    pub account_id: String,
    /// Provider contact id: digits only, no leading `+`.
    pub external_id: String,
    pub phone: String,
    pub display_name: Option<String>,
    pub created_at: i64,
}

/// The 1:1 thread between an account and a contact.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub account_id: String,
    pub contact_id: String,
    pub last_message_at: Option<i64>,
    pub last_message_preview: String,
    pub unread_count: i64,
    /// Advanced only by inbound messages, to their timestamp + 24h.
    pub window_expires_at: Option<i64>,
    pub archived: bool,
}

impl Conversation {
    /// Whether a free-form (non-template) send is currently allowed.
    pub fn window_open(&self, now: i64) -> bool {
        self.window_expires_at.is_some_and(|exp| now < exp)
    }
}

/// A conversation joined with its contact, as listed to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub contact_phone: String,
    pub contact_name: Option<String>,
}

/// Immutable record of one exchanged message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub account_id: String,
    /// The provider's globally unique message id, the idempotency key.
    pub external_id: String,
    pub direction: Direction,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub status_at: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub body: Option<String>,
    /// Provider media reference, if the message carries media.
    pub media_id: Option<String>,
    /// Blob-storage key; None until (and unless) the download succeeds.
    pub media_key: Option<String>,
    pub reply_to: Option<String>,
    pub sent_at: i64,
}

/// Staging record of one raw inbound webhook payload. Never deleted.
#[derive(Debug, Clone)]
pub struct WebhookLog {
    pub id: String,
    pub account_id: Option<String>,
    pub payload: String,
    pub processed: bool,
    pub error: Option<String>,
    pub attempts: i64,
    pub created_at: i64,
}

/// A record with an expiry consumed by the escalating tier notifier.
#[derive(Debug, Clone)]
pub struct ExpiringCredential {
    pub id: String,
    pub account_id: String,
    pub label: String,
    pub expires_at: i64,
    /// Index into the notifier's tier list; higher = more urgent. None
    /// means no tier has been notified yet.
    pub last_notified_tier: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_advances_forward_only() {
        assert!(MessageStatus::Pending.accepts(MessageStatus::Sent));
        assert!(MessageStatus::Sent.accepts(MessageStatus::Read));
        assert!(!MessageStatus::Read.accepts(MessageStatus::Sent));
        assert!(!MessageStatus::Delivered.accepts(MessageStatus::Delivered));
    }

    #[test]
    fn failed_is_reachable_from_anywhere_and_absorbing() {
        assert!(MessageStatus::Pending.accepts(MessageStatus::Failed));
        assert!(MessageStatus::Read.accepts(MessageStatus::Failed));
        assert!(!MessageStatus::Failed.accepts(MessageStatus::Sent));
        assert!(!MessageStatus::Failed.accepts(MessageStatus::Failed));
    }

    #[test]
    fn eligibility_gate() {
        assert!(AccountStatus::Active.is_eligible());
        assert!(AccountStatus::PendingNameReview.is_eligible());
        assert!(!AccountStatus::Provisioning.is_eligible());
        assert!(!AccountStatus::NameDeclined.is_eligible());
        assert!(!AccountStatus::Failed.is_eligible());
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [
            MessageStatus::Pending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Failed,
        ] {
            assert_eq!(MessageStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MessageStatus::parse("bogus"), None);
    }

    #[test]
    fn window_open_boundaries() {
        let conv = Conversation {
            id: "c".into(),
            account_id: "a".into(),
            contact_id: "k".into(),
            last_message_at: Some(1_000),
            last_message_preview: String::new(),
            unread_count: 0,
            window_expires_at: Some(86_401_000),
            archived: false,
        };
        assert!(conv.window_open(86_400_999));
        assert!(!conv.window_open(86_401_000));
        assert!(!conv.window_open(86_401_001));
    }
}
