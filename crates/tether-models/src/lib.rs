pub mod gateway;
pub mod message;

pub use gateway::{ClientEvent, ServerEvent};
pub use message::{Attachment, MessageType, StoredMessage};
