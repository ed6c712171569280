//! Change events as delivered by the store.

use sqlx::postgres::PgNotification;

/// Channel the default transaction trigger notifies on.
pub const TX_CREATED_CHANNEL: &str = "txCreated";

/// A notification exactly as the store delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// Channel name.
    pub channel: String,
    /// Opaque payload, the identifier of the changed row.
    pub payload: String,
}

impl RawNotification {
    /// Create a raw notification.
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

impl From<&PgNotification> for RawNotification {
    fn from(notification: &PgNotification) -> Self {
        Self::new(notification.channel(), notification.payload())
    }
}

/// A decoded change event, alive for one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    channel: String,
    payload: String,
}

impl ChangeEvent {
    /// Decode a raw notification.
    ///
    /// Both fields are plain strings, so decoding cannot fail.
    pub fn decode(raw: RawNotification) -> Self {
        Self {
            channel: raw.channel,
            payload: raw.payload,
        }
    }

    /// Channel the event arrived on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Row identifier carried by the event.
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

impl From<RawNotification> for ChangeEvent {
    fn from(raw: RawNotification) -> Self {
        Self::decode(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_keeps_fields() {
        let event = ChangeEvent::decode(RawNotification::new(TX_CREATED_CHANNEL, "abc123"));

        assert_eq!(event.channel(), "txCreated");
        assert_eq!(event.payload(), "abc123");
    }

    #[test]
    fn test_decode_empty_payload() {
        let event: ChangeEvent = RawNotification::new("other", "").into();

        assert_eq!(event.channel(), "other");
        assert!(event.payload().is_empty());
    }
}
