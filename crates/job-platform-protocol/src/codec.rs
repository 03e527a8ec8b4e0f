use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for encoding/decoding broker messages with length-prefixed framing
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload]
///
/// The length covers the message type byte and the payload.
pub struct MessageCodec;

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Need at least 5 bytes for length prefix + message type
        if src.len() < 5 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(ProtocolError::Protocol("empty frame".to_string()));
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let msg_type_byte = src.get_u8();
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;

        let payload = src.split_to(length - 1);

        let message = match msg_type {
            MessageType::Subscribe => Message::Subscribe(bincode::deserialize(&payload)?),
            MessageType::Delivery => Message::Delivery(bincode::deserialize(&payload)?),
            MessageType::Commit => Message::Commit(bincode::deserialize(&payload)?),
            MessageType::Ack => Message::Ack(bincode::deserialize(&payload)?),
            MessageType::Nack => Message::Nack(bincode::deserialize(&payload)?),
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Message::Subscribe(req) => bincode::serialize(req)?,
            Message::Delivery(msg) => bincode::serialize(msg)?,
            Message::Commit(req) => bincode::serialize(req)?,
            Message::Ack(resp) => bincode::serialize(resp)?,
            Message::Nack(resp) => bincode::serialize(resp)?,
        };

        let total_length = 1 + payload.len();
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommitRequest, DeliveryMessage, SubscribeRequest};
    use proptest::prelude::*;

    fn delivery(value: Vec<u8>) -> Message {
        Message::Delivery(DeliveryMessage {
            partition: 2,
            offset: 1041,
            value,
        })
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();

        let message = Message::Subscribe(SubscribeRequest {
            topic: "job_requests".to_string(),
            group_id: "job-workers-group-v1".to_string(),
            client_id: "worker-1".to_string(),
        });

        codec.encode(message.clone(), &mut buffer).unwrap();
        let decoded = codec.decode(&mut buffer).unwrap();

        assert_eq!(decoded, Some(message));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();

        codec.encode(delivery(b"first".to_vec()), &mut buffer).unwrap();
        codec
            .encode(Message::Commit(CommitRequest { partition: 2, offset: 1041 }), &mut buffer)
            .unwrap();

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(delivery(b"first".to_vec())));
        assert!(matches!(codec.decode(&mut buffer).unwrap(), Some(Message::Commit(_))));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_invalid_message_type() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32(1);
        buffer.put_u8(42);

        match codec.decode(&mut buffer) {
            Err(ProtocolError::InvalidMessageType(42)) => {}
            other => panic!("Expected InvalidMessageType, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32((MAX_MESSAGE_SIZE + 1) as u32);
        buffer.put_u8(MessageType::Delivery.as_u8());

        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut codec = MessageCodec;
        let mut buffer = BytesMut::new();
        buffer.put_u32(0);
        buffer.put_u8(MessageType::Ack.as_u8());

        assert!(matches!(codec.decode(&mut buffer), Err(ProtocolError::Protocol(_))));
    }

    proptest! {
        #[test]
        fn prop_partial_frame_waits_for_more_data(
            value in proptest::collection::vec(any::<u8>(), 0..512),
            cut in 0usize..1024,
        ) {
            let mut codec = MessageCodec;
            let mut full = BytesMut::new();
            codec.encode(delivery(value.clone()), &mut full).unwrap();

            let cut = cut % full.len();
            let mut partial = BytesMut::from(&full[..cut]);
            prop_assert!(codec.decode(&mut partial).unwrap().is_none());

            partial.extend_from_slice(&full[cut..]);
            prop_assert_eq!(codec.decode(&mut partial).unwrap(), Some(delivery(value)));
        }
    }
}
