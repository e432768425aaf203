use serde::{Deserialize, Serialize};

/// One page of adapter-reported records.
///
/// `total_count` is a hint: adapters that cannot count cheaply leave it empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchPage<T> {
    pub records: Vec<T>,
    pub total_count: Option<u64>,
}

impl<T> SearchPage<T> {
    pub fn new(records: Vec<T>, total_count: Option<u64>) -> Self {
        Self { records, total_count }
    }

    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            total_count: Some(0),
        }
    }

    /// Slice an in-memory result set the way a gateway would page it.
    pub fn from_slice(all: &[T], offset: u64, limit: u64) -> Self
    where
        T: Clone,
    {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(all.len());
        let end = start
            .saturating_add(usize::try_from(limit).unwrap_or(usize::MAX))
            .min(all.len());
        Self {
            records: all[start..end].to_vec(),
            total_count: Some(all.len() as u64),
        }
    }
}
