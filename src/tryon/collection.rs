use crate::tryon::types::{OutfitRecord, OutfitStatus};

/// Ordered outfit records, most recent first.
#[derive(Debug, Default)]
pub struct OutfitCollection {
    records: Vec<OutfitRecord>,
}

impl OutfitCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[OutfitRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&OutfitRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn insert_front(&mut self, record: OutfitRecord) {
        self.records.insert(0, record);
    }

    /// Moves a pending record to its terminal status.
    ///
    /// Returns false when the record is gone or already terminal; nothing is
    /// changed in that case.
    pub fn resolve(&mut self, id: &str, status: OutfitStatus) -> bool {
        if status.is_pending() {
            return false;
        }
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) if record.status.is_pending() => {
                record.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<OutfitRecord> {
        let index = self.records.iter().position(|record| record.id == id)?;
        Some(self.records.remove(index))
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status.is_pending())
            .count()
    }
}
