//! Canonical, location-independent hashing of the configuration document.
//!
//! The build cache treats configuration keys as dependencies. For that to
//! work, two logically identical configurations must hash identically no
//! matter where the project is checked out, and a key that only says *where*
//! artifacts land (rather than *what* they contain) must never perturb the
//! hash. Keys are therefore canonicalized (sorted table keys, fixed scalar
//! encodings) and filtered through an explicit volatile-key deny-list before
//! hashing.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tessera_common::ContentHash;
use toml::Value;

/// Dotted config paths excluded from hashing by default.
///
/// `build.out_dir` and `cache.dir` describe where artifacts are written,
/// never what is rendered into them. `cache.volatile` is the user's own
/// extension of this list; hashing it would make editing the deny-list
/// invalidate the whole site.
pub const DEFAULT_VOLATILE_KEYS: &[&str] = &["build.out_dir", "cache.dir", "cache.volatile"];

/// Hashes TOML configuration documents into stable content hashes.
///
/// Produces a whole-document hash plus per-key hashes for the top-level
/// keys and their immediate children (e.g. `site` and `site.title`), so a
/// cache entry can depend on a whole table or on a single leaf. Deeper
/// paths hash as part of their parent.
#[derive(Debug, Clone)]
pub struct ConfigHasher {
    volatile: BTreeSet<String>,
}

impl ConfigHasher {
    /// Creates a hasher with the default volatile-key deny-list.
    pub fn new() -> Self {
        Self::with_additional(std::iter::empty::<String>())
    }

    /// Creates a hasher with the default deny-list plus additional dotted
    /// paths (typically from `[cache] volatile` in `tessera.toml`).
    pub fn with_additional<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut volatile: BTreeSet<String> =
            DEFAULT_VOLATILE_KEYS.iter().map(|k| k.to_string()).collect();
        volatile.extend(extra.into_iter().map(Into::into));
        Self { volatile }
    }

    /// Returns `true` if the given dotted path is excluded from hashing.
    pub fn is_volatile(&self, dotted_path: &str) -> bool {
        self.volatile.contains(dotted_path)
    }

    /// Hashes the entire document after volatile-key stripping.
    pub fn hash_document(&self, doc: &Value) -> ContentHash {
        let mut buf = Vec::new();
        self.canonicalize(doc, "", &mut buf);
        ContentHash::from_bytes(&buf)
    }

    /// Hashes each top-level key and each immediate child of a top-level
    /// table, keyed by dotted path.
    ///
    /// Volatile paths are omitted entirely. The result is what the build
    /// cache stores between builds and diffs to find changed config keys.
    pub fn key_hashes(&self, doc: &Value) -> BTreeMap<String, ContentHash> {
        let mut out = BTreeMap::new();
        let Value::Table(table) = doc else {
            return out;
        };
        for (key, value) in table {
            if self.is_volatile(key) {
                continue;
            }
            out.insert(key.clone(), self.hash_subtree(value, key));
            if let Value::Table(children) = value {
                for (child_key, child_value) in children {
                    let path = format!("{key}.{child_key}");
                    if self.is_volatile(&path) {
                        continue;
                    }
                    out.insert(path.clone(), self.hash_subtree(child_value, &path));
                }
            }
        }
        out
    }

    fn hash_subtree(&self, value: &Value, path: &str) -> ContentHash {
        let mut buf = Vec::new();
        self.canonicalize(value, path, &mut buf);
        ContentHash::from_bytes(&buf)
    }

    /// Appends a canonical byte encoding of `value` to `out`.
    ///
    /// Tables encode their entries in sorted key order regardless of document
    /// order; arrays keep document order; every scalar gets a type tag so
    /// `"1"` and `1` never collide. Volatile children are skipped.
    fn canonicalize(&self, value: &Value, path: &str, out: &mut Vec<u8>) {
        match value {
            Value::String(s) => {
                out.push(b's');
                push_bytes(out, s.as_bytes());
            }
            Value::Integer(i) => {
                out.push(b'i');
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(x) => {
                out.push(b'f');
                out.extend_from_slice(&x.to_bits().to_le_bytes());
            }
            Value::Boolean(b) => {
                out.push(b'b');
                out.push(u8::from(*b));
            }
            Value::Datetime(dt) => {
                out.push(b'd');
                push_bytes(out, dt.to_string().as_bytes());
            }
            Value::Array(items) => {
                out.push(b'a');
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    self.canonicalize(item, path, out);
                }
            }
            Value::Table(table) => {
                let mut keys: Vec<&String> = table
                    .keys()
                    .filter(|k| !self.is_volatile(&child_path(path, k)))
                    .collect();
                keys.sort();

                out.push(b't');
                out.extend_from_slice(&(keys.len() as u64).to_le_bytes());
                for key in keys {
                    push_bytes(out, key.as_bytes());
                    self.canonicalize(&table[key.as_str()], &child_path(path, key), out);
                }
            }
        }
    }
}

impl Default for ConfigHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}
