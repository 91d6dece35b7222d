use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{KnowledgeError, KnowledgeResult};

pub mod interner;
pub mod ontology;
pub mod resolver;

pub use interner::{StringArena, Sym};
pub use ontology::{Ontology, OntologyPath};
pub use resolver::{EntityResolver, EntityType, TypeSource};

/// Separator joining subject and object in relation dump keys.
pub const COMPOSITE_KEY_SEPARATOR: &str = "###";

const PERSISTED_FORMAT_VERSION: u32 = 2;
const PROGRESS_EVERY: u64 = 5_000_000;

/// Persistent bidirectional multimap over a flat `key<TAB>value` dump.
///
/// Keys and values are interned once in a [`StringArena`]. Both directions
/// keep insertion order: the forward map lists values per key as their lines
/// appear in the source, the reverse map lists keys per value the same way.
/// Built once, then read-only: shared references are safe across threads.
#[derive(Debug, Default)]
pub struct KnowledgeIndex {
    arena: StringArena,
    forward: HashMap<Sym, Vec<Sym>>,
    reverse: HashMap<Sym, Vec<Sym>>,
    pairs: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub lines: u64,
    pub skipped: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub keys: usize,
    pub values: usize,
    pub pairs: usize,
    pub strings: usize,
    pub arena_bytes: usize,
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} keys, {} values, {} pairs ({} strings, {} bytes)",
            self.keys, self.values, self.pairs, self.strings, self.arena_bytes
        )
    }
}

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    version: u32,
    buffer: &'a str,
    spans: &'a [(u64, u32)],
    forward: Vec<(Sym, &'a [Sym])>,
    reverse: Vec<(Sym, &'a [Sym])>,
}

#[derive(Deserialize)]
struct PersistedIndex {
    version: u32,
    buffer: String,
    spans: Vec<(u64, u32)>,
    forward: Vec<(Sym, Vec<Sym>)>,
    reverse: Vec<(Sym, Vec<Sym>)>,
}

impl KnowledgeIndex {
    /// Build an index by streaming a two-column source dump.
    ///
    /// Lines without exactly two tab-separated, non-empty columns are skipped.
    /// Files ending in `.gz` are decompressed on the fly.
    pub fn build(source: &Path) -> KnowledgeResult<Self> {
        let start = Instant::now();
        info!("Building index from: {}", source.display());

        let file = File::open(source).map_err(|e| KnowledgeError::io(source, e))?;
        let reader: Box<dyn Read> = if source.extension().and_then(|e| e.to_str()) == Some("gz") {
            Box::new(flate2::read::MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let (index, stats) = Self::read_records(BufReader::with_capacity(1 << 20, reader), source)?;

        if stats.skipped > 0 {
            warn!("Skipped {} malformed lines in {}", stats.skipped, source.display());
        }
        info!(
            "Index built from {} lines in {:.2}s: {}",
            stats.lines,
            start.elapsed().as_secs_f64(),
            index.stats()
        );

        Ok(index)
    }

    /// Build from any buffered reader, one record per line.
    pub fn from_reader<R: BufRead>(reader: R) -> KnowledgeResult<(Self, BuildStats)> {
        Self::read_records(reader, Path::new("<reader>"))
    }

    fn read_records<R: BufRead>(reader: R, origin: &Path) -> KnowledgeResult<(Self, BuildStats)> {
        let mut index = Self::default();
        let mut stats = BuildStats::default();

        for line in reader.split(b'\n') {
            let line = line.map_err(|e| KnowledgeError::io(origin, e))?;
            stats.lines += 1;
            if stats.lines % PROGRESS_EVERY == 0 {
                debug!("Indexed {} lines", stats.lines);
            }

            let Some((key, value)) = parse_record(&line) else {
                stats.skipped += 1;
                continue;
            };

            if !index.insert(key, value)? {
                stats.duplicates += 1;
            }
        }

        Ok((index, stats))
    }

    /// Build from in-memory pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> KnowledgeResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut index = Self::default();
        for (key, value) in pairs {
            index.insert(key, value)?;
        }
        Ok(index)
    }

    pub fn exists_on_disk(path: &Path) -> bool {
        path.exists()
    }

    /// Load the persisted index if present, otherwise build it from the
    /// source dump and persist it before returning.
    pub fn open_or_build(index_path: &Path, source_path: &Path) -> KnowledgeResult<Self> {
        if Self::exists_on_disk(index_path) {
            return Self::load(index_path);
        }

        if !source_path.exists() {
            return Err(KnowledgeError::MissingSource {
                index: index_path.to_path_buf(),
                source_path: source_path.to_path_buf(),
            });
        }

        let index = Self::build(source_path)?;
        index.persist(index_path)?;
        Ok(index)
    }

    /// Write the index to disk. The artifact appears atomically: it is written
    /// to a sibling temporary file and renamed into place.
    pub fn persist(&self, path: &Path) -> KnowledgeResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| KnowledgeError::io(parent, e))?;
        }

        let (buffer, spans) = self.arena.parts();
        let persisted = PersistedIndexRef {
            version: PERSISTED_FORMAT_VERSION,
            buffer,
            spans,
            forward: sorted_lists(&self.forward),
            reverse: sorted_lists(&self.reverse),
        };

        let tmp_path = temporary_sibling(path);
        let file = File::create(&tmp_path).map_err(|e| KnowledgeError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &persisted).map_err(|e| KnowledgeError::Corrupt {
            path: tmp_path.clone(),
            message: e.to_string(),
        })?;
        let file = writer
            .into_inner()
            .map_err(|e| KnowledgeError::io(&tmp_path, e.into_error()))?;
        file.sync_all().map_err(|e| KnowledgeError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, path).map_err(|e| KnowledgeError::io(path, e))?;

        info!("Index persisted to: {}", path.display());
        Ok(())
    }

    /// Load a persisted index fully into memory.
    pub fn load(path: &Path) -> KnowledgeResult<Self> {
        let start = Instant::now();
        let file = File::open(path).map_err(|e| KnowledgeError::io(path, e))?;
        let persisted: PersistedIndex = bincode::deserialize_from(BufReader::new(file))
            .map_err(|e| KnowledgeError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if persisted.version != PERSISTED_FORMAT_VERSION {
            return Err(KnowledgeError::Corrupt {
                path: path.to_path_buf(),
                message: format!("unsupported format version {}", persisted.version),
            });
        }

        let arena = StringArena::from_parts(persisted.buffer, persisted.spans).ok_or_else(|| {
            KnowledgeError::Corrupt {
                path: path.to_path_buf(),
                message: "string table spans out of bounds".to_string(),
            }
        })?;

        let mut index = Self {
            arena,
            ..Self::default()
        };
        let strings = index.arena.len();
        let in_range = |sym: &Sym| (sym.raw() as usize) < strings;
        for (key, values) in persisted.forward.iter().chain(&persisted.reverse) {
            if !in_range(key) || !values.iter().all(in_range) {
                return Err(KnowledgeError::Corrupt {
                    path: path.to_path_buf(),
                    message: "handle out of range".to_string(),
                });
            }
        }

        index.pairs = persisted.forward.iter().map(|(_, values)| values.len()).sum();
        let reverse_pairs: usize = persisted.reverse.iter().map(|(_, keys)| keys.len()).sum();
        if reverse_pairs != index.pairs {
            return Err(KnowledgeError::Corrupt {
                path: path.to_path_buf(),
                message: format!("{} forward pairs but {} reverse pairs", index.pairs, reverse_pairs),
            });
        }
        index.forward = persisted.forward.into_iter().collect();
        index.reverse = persisted.reverse.into_iter().collect();

        debug!(
            "Index loaded from {} in {:.2}s: {}",
            path.display(),
            start.elapsed().as_secs_f64(),
            index.stats()
        );
        Ok(index)
    }

    /// All values stored for an exact key, in source order. Empty if absent.
    pub fn retrieve_values(&self, key: &str) -> Vec<&str> {
        self.lookup(&self.forward, key)
    }

    /// All keys whose value set contains `value`, in the order their pairs
    /// were inserted. The first entry is the first key seen with `value`.
    pub fn retrieve_keys(&self, value: &str) -> Vec<&str> {
        self.lookup(&self.reverse, value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.arena
            .get(key)
            .is_some_and(|sym| self.forward.get(&sym).is_some_and(|v| !v.is_empty()))
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            keys: self.forward.values().filter(|v| !v.is_empty()).count(),
            values: self.reverse.len(),
            pairs: self.pairs,
            strings: self.arena.len(),
            arena_bytes: self.arena.byte_size(),
        }
    }

    fn lookup(&self, map: &HashMap<Sym, Vec<Sym>>, needle: &str) -> Vec<&str> {
        let Some(sym) = self.arena.get(needle) else {
            return Vec::new();
        };
        map.get(&sym)
            .map(|syms| syms.iter().map(|s| self.arena.resolve(*s)).collect())
            .unwrap_or_default()
    }

    /// Returns false when the pair was already present.
    fn insert(&mut self, key: &str, value: &str) -> KnowledgeResult<bool> {
        let key = self.arena.intern(key)?;
        let value = self.arena.intern(value)?;

        // A pair is new in the reverse map iff it is new in the (short) forward list.
        let values = self.forward.entry(key).or_default();
        if values.contains(&value) {
            return Ok(false);
        }
        values.push(value);
        self.reverse.entry(value).or_default().push(key);
        self.pairs += 1;
        Ok(true)
    }
}

/// Lists ordered by their head handle so the persisted bytes are stable.
/// Each list keeps its own insertion order.
fn sorted_lists(map: &HashMap<Sym, Vec<Sym>>) -> Vec<(Sym, &[Sym])> {
    let mut lists: Vec<(Sym, &[Sym])> = map.iter().map(|(head, list)| (*head, list.as_slice())).collect();
    lists.sort_unstable_by_key(|(head, _)| *head);
    lists
}

fn parse_record(line: &[u8]) -> Option<(&str, &str)> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = line.split('\t');
    let key = fields.next()?;
    let value = fields.next()?;
    if fields.next().is_some() || key.is_empty() || value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}
