mod command_registry;
mod intent_parser;

pub use command_registry::{HELP_TEXT, SAY_PREFIX, WHISPER_PREFIX};
pub use intent_parser::{parse_intent, Intent, RenderTarget};
