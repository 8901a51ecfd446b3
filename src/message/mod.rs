//! Outbound message construction.

pub mod serializer;

pub use serializer::{create_security_message, SerializedMessage, SerializerError};
