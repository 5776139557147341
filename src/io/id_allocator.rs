use std::collections::BTreeSet;

pub const MIN_POSITIVE_ID: u16 = 1;
pub const MAX_POSITIVE_ID: u16 = 0x7FFF;
pub const MIN_NEGATIVE_ID: u16 = 0x8001;
pub const MAX_NEGATIVE_ID: u16 = 0xFFFF;

/// Hands out file ids. Positive ids (1..=32767) label live files, negative ids
/// (32769..=65535) label tombstoned ones. Every id sits in exactly one of the
/// four pools.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    available_positive: BTreeSet<u16>,
    used_positive: BTreeSet<u16>,
    available_negative: BTreeSet<u16>,
    used_negative: BTreeSet<u16>,
}

impl IdAllocator {
    pub fn new() -> IdAllocator {
        IdAllocator {
            available_positive: (MIN_POSITIVE_ID..=MAX_POSITIVE_ID).collect(),
            used_positive: BTreeSet::new(),
            available_negative: (MIN_NEGATIVE_ID..=MAX_NEGATIVE_ID).collect(),
            used_negative: BTreeSet::new(),
        }
    }

    pub fn is_positive(id: u16) -> bool {
        (MIN_POSITIVE_ID..=MAX_POSITIVE_ID).contains(&id)
    }

    pub fn is_negative(id: u16) -> bool {
        id >= MIN_NEGATIVE_ID
    }

    pub fn allocate_positive(&mut self) -> Option<u16> {
        let id = self.available_positive.pop_first()?;
        self.used_positive.insert(id);
        Some(id)
    }

    pub fn allocate_negative(&mut self) -> Option<u16> {
        let id = self.available_negative.pop_first()?;
        self.used_negative.insert(id);
        Some(id)
    }

    /// Returns an id to its available pool. Unknown ids are ignored.
    pub fn release(&mut self, id: u16) -> bool {
        if Self::is_positive(id) && self.used_positive.remove(&id) {
            self.available_positive.insert(id);
            true
        } else if Self::is_negative(id) && self.used_negative.remove(&id) {
            self.available_negative.insert(id);
            true
        } else {
            false
        }
    }

    /// Marks an id as used while rebuilding the pools from an existing disk.
    pub fn claim(&mut self, id: u16) -> bool {
        if Self::is_positive(id) && self.available_positive.remove(&id) {
            self.used_positive.insert(id);
            true
        } else if Self::is_negative(id) && self.available_negative.remove(&id) {
            self.used_negative.insert(id);
            true
        } else {
            false
        }
    }

    pub fn is_used(&self, id: u16) -> bool {
        self.used_positive.contains(&id) || self.used_negative.contains(&id)
    }

    pub fn used_positive(&self) -> impl Iterator<Item = u16> + '_ {
        self.used_positive.iter().copied()
    }

    pub fn used_negative(&self) -> impl Iterator<Item = u16> + '_ {
        self.used_negative.iter().copied()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator::new()
    }
}
