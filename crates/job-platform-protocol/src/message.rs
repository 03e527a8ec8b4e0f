use serde::{Deserialize, Serialize};

/// Message types for the broker delivery protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Subscribe = 1,
    Delivery = 2,
    Commit = 3,
    Ack = 4,
    Nack = 5,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Subscribe),
            2 => Some(MessageType::Delivery),
            3 => Some(MessageType::Commit),
            4 => Some(MessageType::Ack),
            5 => Some(MessageType::Nack),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages exchanged between a consumer and the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Consumer joins a consumer group on a topic
    Subscribe(SubscribeRequest),

    /// Broker pushes one record to the consumer
    Delivery(DeliveryMessage),

    /// Consumer commits the offset of a handled record
    Commit(CommitRequest),

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Subscribe(_) => MessageType::Subscribe,
            Message::Delivery(_) => MessageType::Delivery,
            Message::Commit(_) => MessageType::Commit,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub topic: String,
    pub group_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMessage {
    pub partition: i32,
    pub offset: i64,
    /// Protobuf-encoded `JobTask`
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NackResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::Subscribe));
        assert_eq!(MessageType::from_u8(5), Some(MessageType::Nack));
        assert_eq!(MessageType::from_u8(99), None);

        assert_eq!(MessageType::Delivery.as_u8(), 2);
        assert_eq!(
            Message::Commit(CommitRequest { partition: 0, offset: 3 }).message_type(),
            MessageType::Commit
        );
    }
}
