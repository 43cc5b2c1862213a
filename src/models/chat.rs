use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;

pub const MAX_MESSAGE_CHARS: usize = 1000;

/// One message in the rider/driver conversation of a single ride.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Trims `content`; blank and oversized messages are refused.
    pub fn compose(
        ride_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Self, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::Empty);
        }

        let length = content.chars().count();
        if length > MAX_MESSAGE_CHARS {
            return Err(ChatError::TooLong {
                length,
                max: MAX_MESSAGE_CHARS,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            ride_id,
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{ChatMessage, MAX_MESSAGE_CHARS};
    use crate::error::ChatError;

    #[test]
    fn content_is_trimmed() {
        let message =
            ChatMessage::compose(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "  on my way \n")
                .unwrap();

        assert_eq!(message.content, "on my way");
    }

    #[test]
    fn blank_message_refused() {
        let result = ChatMessage::compose(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), "   ");

        assert_eq!(result, Err(ChatError::Empty));
    }

    #[test]
    fn oversized_message_refused() {
        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);

        let result = ChatMessage::compose(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), &long);

        assert!(matches!(result, Err(ChatError::TooLong { .. })));
    }
}
