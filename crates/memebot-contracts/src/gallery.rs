use crate::templates::TemplateRecord;

/// Presentational sort/filter over a registry snapshot, as used by the
/// gallery page. Read-only: callers hand in a point-in-time snapshot and get
/// back a reordered copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    DateAdded,
    Alphabetical,
}

impl SortKey {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "date-added" => Some(Self::DateAdded),
            "alphabetical" => Some(Self::Alphabetical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "asc" | "ascending" => Some(Self::Ascending),
            "desc" | "descending" => Some(Self::Descending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GalleryQuery {
    pub sort: SortKey,
    pub direction: SortDirection,
    pub filter: String,
}

impl GalleryQuery {
    /// Case-insensitive substring filter on name, then sort. Date-added order
    /// is the snapshot's own (insertion) order.
    pub fn apply(&self, records: &[TemplateRecord]) -> Vec<TemplateRecord> {
        let needle = self.filter.to_lowercase();
        let mut view: Vec<TemplateRecord> = records
            .iter()
            .filter(|record| needle.is_empty() || record.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        if self.sort == SortKey::Alphabetical {
            view.sort_by(|a, b| a.name.cmp(&b.name));
        }
        if self.direction == SortDirection::Descending {
            view.reverse();
        }
        view
    }
}
