use indexmap::IndexMap;

use crate::error::BotError;

use super::record::{validate_name, TemplateRecord};

/// In-memory map of template name to record, in insertion ("date added")
/// order. Pure bookkeeping: persistence and raster files are the caller's
/// concern.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, TemplateRecord>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot, keeping file order.
    pub fn from_records(records: Vec<TemplateRecord>) -> Self {
        let mut registry = Self::new();
        for record in records {
            registry
                .templates
                .insert(record.name.clone(), record);
        }
        registry
    }

    pub fn insert(&mut self, record: TemplateRecord) -> Result<(), BotError> {
        validate_name(&record.name)?;
        if self.templates.contains_key(&record.name) {
            return Err(BotError::DuplicateName(record.name));
        }
        if let Some(prefix) = record.custom_prefix.as_deref() {
            if self.prefix_in_use(prefix) {
                return Err(BotError::DuplicatePrefix(prefix.to_string()));
            }
        }
        self.templates.insert(record.name.clone(), record);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<TemplateRecord, BotError> {
        self.templates
            .shift_remove(name)
            .ok_or_else(|| BotError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&TemplateRecord> {
        self.templates.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &TemplateRecord> {
        self.templates.values()
    }

    pub fn records(&self) -> Vec<TemplateRecord> {
        self.templates.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn prefix_in_use(&self, prefix: &str) -> bool {
        self.templates
            .values()
            .any(|record| record.custom_prefix.as_deref() == Some(prefix))
    }

    /// The record whose custom prefix opens `content`, if any.
    pub fn match_custom_prefix(&self, content: &str) -> Option<&TemplateRecord> {
        self.templates.values().find(|record| {
            record
                .custom_prefix
                .as_deref()
                .is_some_and(|prefix| content.starts_with(prefix))
        })
    }
}
