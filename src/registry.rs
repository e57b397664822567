use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;

/// Room-code alphabet. Glyphs that read ambiguously over voice or a screen
/// (0/O, 1/I) are left out.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 5;

fn random_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

/// Live rooms of a single game mode, keyed by room code.
///
/// Each mode owns its own table, so codes only have to be unique within a
/// mode. Uniqueness is checked against live rooms at creation time only;
/// once a room is gone its code can be dealt again.
pub struct RoomTable<H> {
    rooms: DashMap<String, H>,
}

impl<H: Clone> RoomTable<H> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
        })
    }

    /// Insert a new room under a freshly generated code and return both.
    /// `make` receives the code so the handle can carry it.
    pub fn create(&self, make: impl FnOnce(&str) -> H) -> (String, H) {
        loop {
            let code = random_code();
            match self.rooms.entry(code.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    let handle = make(&code);
                    slot.insert(handle.clone());
                    return (code, handle);
                }
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<H> {
        self.rooms.get(code).map(|h| h.clone())
    }

    pub fn remove(&self, code: &str) {
        self.rooms.remove(code);
    }

    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_registers_a_five_char_code() {
        let table: Arc<RoomTable<u32>> = RoomTable::new();
        let (code, handle) = table.create(|_| 7);
        assert_eq!(code.len(), CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert_eq!(handle, 7);
        assert_eq!(table.get(&code), Some(7));
        assert!(table.contains(&code));
    }

    #[test]
    fn codes_are_unique_among_live_rooms() {
        let table: Arc<RoomTable<usize>> = RoomTable::new();
        let mut codes = Vec::new();
        for i in 0..100 {
            let (code, _) = table.create(|_| i);
            codes.push(code);
        }
        let mut deduped = codes.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn make_receives_the_assigned_code() {
        let table: Arc<RoomTable<String>> = RoomTable::new();
        let (code, handle) = table.create(|c| c.to_string());
        assert_eq!(code, handle);
    }

    #[test]
    fn remove_frees_the_code() {
        let table: Arc<RoomTable<u32>> = RoomTable::new();
        let (code, _) = table.create(|_| 1);
        table.remove(&code);
        assert!(!table.contains(&code));
        assert!(table.get(&code).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn tables_are_independent_namespaces() {
        let spy: Arc<RoomTable<u8>> = RoomTable::new();
        let chess: Arc<RoomTable<u8>> = RoomTable::new();
        let (code, _) = spy.create(|_| 1);
        assert!(!chess.contains(&code));
        chess.remove(&code);
        assert!(spy.contains(&code));
    }
}
