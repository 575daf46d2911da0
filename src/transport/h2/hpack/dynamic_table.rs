//! HPACK dynamic table (RFC 7541 Section 2.3.2).

use std::collections::VecDeque;

/// Per-entry overhead counted toward the table size (RFC 7541 Section 4.1).
const ENTRY_OVERHEAD: usize = 32;

/// Default table size before any SETTINGS or size update.
pub const DEFAULT_TABLE_SIZE: usize = 4096;

#[derive(Debug, Clone)]
struct Entry {
    name: Vec<u8>,
    value: Vec<u8>,
}

impl Entry {
    fn size(&self) -> usize {
        ENTRY_OVERHEAD + self.name.len() + self.value.len()
    }
}

/// FIFO table of recently indexed fields; index 1 is the newest entry.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Change the maximum size, evicting the oldest entries as needed.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict(0);
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at a 1-based dynamic index.
    pub fn get(&self, index: usize) -> Option<(&[u8], &[u8])> {
        let entry = self.entries.get(index.checked_sub(1)?)?;
        Some((&entry.name, &entry.value))
    }

    /// Insert a new entry. An entry larger than the whole table empties it.
    pub fn insert(&mut self, name: Vec<u8>, value: Vec<u8>) {
        let entry = Entry { name, value };
        let entry_size = entry.size();
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.evict(entry_size);
        self.size += entry_size;
        self.entries.push_front(entry);
    }

    /// Evict until `incoming` more bytes fit.
    fn evict(&mut self, incoming: usize) {
        while self.size + incoming > self.max_size {
            match self.entries.pop_back() {
                Some(oldest) => self.size -= oldest.size(),
                None => break,
            }
        }
    }
}

impl Default for DynamicTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let mut table = DynamicTable::default();
        table.insert(b"first".to_vec(), b"1".to_vec());
        table.insert(b"second".to_vec(), b"2".to_vec());

        assert_eq!(table.get(1), Some((b"second".as_slice(), b"2".as_slice())));
        assert_eq!(table.get(2), Some((b"first".as_slice(), b"1".as_slice())));
        assert_eq!(table.get(0), None);
        assert_eq!(table.get(3), None);
    }

    #[test]
    fn test_eviction_on_insert() {
        // Each entry is 32 + 4 + 2 = 38 bytes; two fit in 80, three do not
        let mut table = DynamicTable::new(80);
        table.insert(b"key1".to_vec(), b"v1".to_vec());
        table.insert(b"key2".to_vec(), b"v2".to_vec());
        table.insert(b"key3".to_vec(), b"v3".to_vec());

        assert_eq!(table.len(), 2);
        assert_eq!(table.size(), 76);
        assert_eq!(table.get(2).unwrap().0, b"key2");
    }

    #[test]
    fn test_shrink_and_oversized() {
        let mut table = DynamicTable::default();
        table.insert(b"name".to_vec(), b"value".to_vec());
        table.set_max_size(0);
        assert_eq!(table.len(), 0);
        assert_eq!(table.size(), 0);

        table.set_max_size(40);
        table.insert(b"a-much-longer-name".to_vec(), b"value".to_vec());
        assert_eq!(table.len(), 0);
    }
}
