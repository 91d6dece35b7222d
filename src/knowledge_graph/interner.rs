use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::error::{KnowledgeError, KnowledgeResult};

/// Compact handle for a string stored in a [`StringArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sym(u32);

impl Sym {
    pub const fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Append-only string arena.
///
/// Every distinct string lives exactly once in `buffer`; `spans` maps a handle
/// to its byte offset and length. Handles and string lengths are `u32`, offsets
/// are `u64`; interning past either limit is an error. The lookup table is keyed by hash rather than by string
/// so the text is never duplicated. Hash collisions between different strings
/// are kept in a side table.
#[derive(Debug, Default)]
pub struct StringArena {
    buffer: String,
    spans: Vec<(u64, u32)>,
    lookup: HashMap<u64, Sym>,
    collisions: HashMap<u64, Vec<Sym>>,
}

fn hash_of(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

impl StringArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its handle.
    pub fn intern(&mut self, s: &str) -> KnowledgeResult<Sym> {
        let hash = hash_of(s);
        if let Some(sym) = self.find(hash, s) {
            return Ok(sym);
        }

        let sym = self.push(s)?;
        match self.lookup.get(&hash) {
            None => {
                self.lookup.insert(hash, sym);
            }
            Some(_) => self.collisions.entry(hash).or_default().push(sym),
        }
        Ok(sym)
    }

    /// Look up an existing handle without inserting.
    pub fn get(&self, s: &str) -> Option<Sym> {
        self.find(hash_of(s), s)
    }

    pub fn resolve(&self, sym: Sym) -> &str {
        let (start, len) = self.spans[sym.index()];
        let start = start as usize;
        &self.buffer[start..start + len as usize]
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn byte_size(&self) -> usize {
        self.buffer.len()
    }

    fn find(&self, hash: u64, s: &str) -> Option<Sym> {
        let primary = *self.lookup.get(&hash)?;
        if self.resolve(primary) == s {
            return Some(primary);
        }
        self.collisions
            .get(&hash)?
            .iter()
            .copied()
            .find(|sym| self.resolve(*sym) == s)
    }

    fn push(&mut self, s: &str) -> KnowledgeResult<Sym> {
        let sym = next_sym(self.spans.len())?;
        let len = u32::try_from(s.len()).map_err(|_| KnowledgeError::Capacity {
            what: "string length",
            limit: u32::MAX as u64,
        })?;
        let start = u64::try_from(self.buffer.len()).map_err(|_| KnowledgeError::Capacity {
            what: "arena bytes",
            limit: u64::MAX,
        })?;
        self.spans.push((start, len));
        self.buffer.push_str(s);
        Ok(sym)
    }

    /// Raw parts for persistence: the text buffer and the span table.
    pub(crate) fn parts(&self) -> (&str, &[(u64, u32)]) {
        (&self.buffer, &self.spans)
    }

    /// Rebuild an arena from persisted parts, recomputing the hash table.
    pub(crate) fn from_parts(buffer: String, spans: Vec<(u64, u32)>) -> Option<Self> {
        let mut arena = Self {
            buffer,
            spans: Vec::with_capacity(spans.len()),
            lookup: HashMap::with_capacity(spans.len()),
            collisions: HashMap::new(),
        };

        for (start, len) in spans {
            let begin = usize::try_from(start).ok()?;
            let end = begin.checked_add(len as usize)?;
            if end > arena.buffer.len() || !arena.buffer.is_char_boundary(begin)
                || !arena.buffer.is_char_boundary(end)
            {
                return None;
            }
            let sym = next_sym(arena.spans.len()).ok()?;
            arena.spans.push((start, len));
            let hash = hash_of(arena.resolve(sym));
            if arena.lookup.contains_key(&hash) {
                arena.collisions.entry(hash).or_default().push(sym);
            } else {
                arena.lookup.insert(hash, sym);
            }
        }

        Some(arena)
    }
}

/// Handle for the string that will be stored at position `len`.
fn next_sym(len: usize) -> KnowledgeResult<Sym> {
    u32::try_from(len).map(Sym).map_err(|_| KnowledgeError::Capacity {
        what: "interned strings",
        limit: u32::MAX as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut arena = StringArena::new();
        let rome = arena.intern("Rome").unwrap();
        let italy = arena.intern("Italy").unwrap();

        assert_ne!(rome, italy);
        assert_eq!(arena.intern("Rome").unwrap(), rome);
        assert_eq!(arena.resolve(italy), "Italy");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.byte_size(), "RomeItaly".len());
    }

    #[test]
    fn test_get_does_not_insert() {
        let mut arena = StringArena::new();
        arena.intern("Rome").unwrap();

        assert!(arena.get("Roma").is_none());
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_from_parts_rebuilds_lookup() {
        let mut arena = StringArena::new();
        let a = arena.intern("Albert_Einstein").unwrap();
        let b = arena.intern("Ulm").unwrap();
        let (buffer, spans) = arena.parts();

        let rebuilt = StringArena::from_parts(buffer.to_string(), spans.to_vec()).unwrap();
        assert_eq!(rebuilt.get("Albert_Einstein"), Some(a));
        assert_eq!(rebuilt.get("Ulm"), Some(b));
    }

    #[test]
    fn test_from_parts_rejects_bad_spans() {
        assert!(StringArena::from_parts("abc".to_string(), vec![(2, 5)]).is_none());
        assert!(StringArena::from_parts("abc".to_string(), vec![(u64::MAX, 1)]).is_none());
    }

    #[test]
    fn test_handle_limit_is_an_error() {
        assert_eq!(next_sym(7).unwrap(), Sym(7));
        assert_eq!(next_sym(u32::MAX as usize).unwrap(), Sym(u32::MAX));
        assert!(matches!(
            next_sym(u32::MAX as usize + 1),
            Err(KnowledgeError::Capacity { what: "interned strings", .. })
        ));
    }
}
