use thiserror::Error;

/// Everything a registry, render or dispatch operation can fail with.
///
/// Every variant translates to a chat-visible reply via [`BotError::user_message`];
/// none of them is allowed to take the process down.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("template name {0:?} is empty or reserved")]
    InvalidName(String),
    #[error("template {0:?} already exists")]
    DuplicateName(String),
    #[error("custom prefix {0:?} is already in use")]
    DuplicatePrefix(String),
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("template {0:?} does not exist")]
    NotFound(String),
    #[error("caller may not administer templates")]
    PermissionDenied,
    #[error("no caption text provided")]
    EmptyInput,
    #[error("font unavailable: {0}")]
    Font(String),
    #[error("image fetch failed: {0}")]
    Fetch(String),
    #[error("persistence failed: {0}")]
    Persist(#[from] std::io::Error),
    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl BotError {
    /// The reply text the bot posts back into the channel for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            BotError::InvalidName(_) => "That name can't be used!",
            BotError::DuplicateName(_) => "That meme already exists!",
            BotError::DuplicatePrefix(_) => "That prefix is already in use!",
            BotError::InvalidUrl(_) => "Invalid URL!",
            BotError::UnsupportedImage(_) | BotError::Fetch(_) => "Unsupported image type!",
            BotError::NotFound(_) => "That meme doesn't exist!",
            BotError::PermissionDenied => "You don't have permission to do that!",
            BotError::EmptyInput => "No text provided!",
            BotError::Font(_) | BotError::Persist(_) | BotError::Snapshot(_) => {
                "Something went wrong, try again later!"
            }
        }
    }
}
