pub mod conversation;
pub mod validation;

pub use conversation::conversation_id;
pub use validation::ValidationError;
