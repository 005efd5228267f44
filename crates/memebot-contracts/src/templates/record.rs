use serde::{Deserialize, Serialize};

use crate::error::BotError;

/// Names that collide with the command surface and can never be templates.
pub const RESERVED_NAMES: &[&str] = &["config", "help"];

/// One configured meme template. The backing raster lives at
/// `<images dir>/<filename>`; `filename` is always derived from `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub name: String,
    pub filename: String,
    #[serde(
        rename = "customPrefix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_prefix: Option<String>,
}

impl TemplateRecord {
    pub fn new(name: impl Into<String>, custom_prefix: Option<String>) -> Self {
        let name = name.into();
        let filename = format!("{name}.png");
        Self {
            name,
            filename,
            custom_prefix,
        }
    }
}

/// A name must be non-empty, a single token, and not a reserved command word.
pub fn validate_name(name: &str) -> Result<(), BotError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(BotError::InvalidName(name.to_string()));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(BotError::InvalidName(name.to_string()));
    }
    Ok(())
}
