pub mod completion;
pub mod config;
pub mod console;
pub mod conversation;
pub mod error;
pub mod guidance;
pub mod library;
pub mod messages;
pub mod playback;
pub mod prompt;
pub mod session;
pub mod speech;

pub use config::Config;
pub use conversation::{ConversationStore, Message, Role};
pub use error::VoxchatError;
pub use library::TranscriptLibrary;
pub use session::Session;
