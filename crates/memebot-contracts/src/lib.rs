pub mod chat;
pub mod error;
pub mod events;
pub mod gallery;
pub mod templates;
