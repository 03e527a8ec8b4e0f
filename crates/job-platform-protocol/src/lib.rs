mod message;
mod codec;
mod wire;

pub use message::{
    Message, MessageType, SubscribeRequest, DeliveryMessage, CommitRequest, AckResponse,
    NackResponse,
};
pub use codec::MessageCodec;
pub use wire::{
    update_job_status_request, JobTask, TaskType, UpdateJobStatusRequest,
    UpdateJobStatusResponse,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("Protobuf decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum message size: 11MB (10MB broker fetch limit + framing overhead)
pub const MAX_MESSAGE_SIZE: usize = 11 * 1024 * 1024;
