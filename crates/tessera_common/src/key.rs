//! Typed identity keys for build inputs and outputs.
//!
//! Inputs and outputs are named by tagged unions rather than strings, so the
//! invalidation engine is forced by the compiler to handle every kind of
//! dependency, and so a config key can never be confused with a file path.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The identity of one build input that outputs may depend on.
///
/// The variant is also the edge kind in the dependency graph: a source file,
/// a logical configuration key (dotted path into `tessera.toml`), or a
/// template file. Templates are fingerprinted like any other file but kept a
/// distinct kind so cascade reporting can tell them apart.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DependencyKey {
    /// A source content file, by path relative to the project root.
    File(PathBuf),
    /// A configuration key, as a dotted path such as `site.title`.
    Config(String),
    /// A template file, by path relative to the project root.
    Template(PathBuf),
}

impl DependencyKey {
    /// Creates a file dependency key.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        DependencyKey::File(path.into())
    }

    /// Creates a configuration-key dependency key.
    pub fn config(key: impl Into<String>) -> Self {
        DependencyKey::Config(key.into())
    }

    /// Creates a template dependency key.
    pub fn template(path: impl Into<PathBuf>) -> Self {
        DependencyKey::Template(path.into())
    }

    /// Returns the path for file and template keys, `None` for config keys.
    pub fn path(&self) -> Option<&Path> {
        match self {
            DependencyKey::File(p) | DependencyKey::Template(p) => Some(p),
            DependencyKey::Config(_) => None,
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::File(p) => write!(f, "file:{}", p.display()),
            DependencyKey::Config(k) => write!(f, "config:{k}"),
            DependencyKey::Template(p) => write!(f, "template:{}", p.display()),
        }
    }
}

/// The identity of one build output (a dependent artifact).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OutputKey {
    /// A rendered page, identified by its source path relative to the
    /// content directory.
    Page(PathBuf),
    /// A derived index artifact, identified by a logical name.
    Index(String),
}

impl OutputKey {
    /// Creates a page output key.
    pub fn page(path: impl Into<PathBuf>) -> Self {
        OutputKey::Page(path.into())
    }

    /// Creates an index output key.
    pub fn index(name: impl Into<String>) -> Self {
        OutputKey::Index(name.into())
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKey::Page(p) => write!(f, "page:{}", p.display()),
            OutputKey::Index(n) => write!(f, "index:{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn display_formats() {
        assert_eq!(
            DependencyKey::file("posts/a.md").to_string(),
            "file:posts/a.md"
        );
        assert_eq!(
            DependencyKey::config("site.title").to_string(),
            "config:site.title"
        );
        assert_eq!(
            DependencyKey::template("templates/page.html").to_string(),
            "template:templates/page.html"
        );
        assert_eq!(OutputKey::page("posts/a.md").to_string(), "page:posts/a.md");
        assert_eq!(OutputKey::index("pages").to_string(), "index:pages");
    }

    #[test]
    fn file_and_template_with_same_path_differ() {
        let file = DependencyKey::file("shared.html");
        let template = DependencyKey::template("shared.html");
        assert_ne!(file, template);

        let mut set = HashSet::new();
        set.insert(file);
        set.insert(template);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn path_accessor() {
        assert_eq!(
            DependencyKey::file("a.md").path(),
            Some(Path::new("a.md"))
        );
        assert_eq!(
            DependencyKey::template("t.html").path(),
            Some(Path::new("t.html"))
        );
        assert_eq!(DependencyKey::config("site").path(), None);
    }

    #[test]
    fn ordering_is_stable() {
        let mut keys = vec![
            DependencyKey::template("b.html"),
            DependencyKey::config("site"),
            DependencyKey::file("a.md"),
        ];
        keys.sort();
        let first = keys.remove(0);
        assert!(matches!(first, DependencyKey::File(_)));
    }

    #[test]
    fn serde_roundtrip() {
        let keys = vec![
            DependencyKey::file("posts/a.md"),
            DependencyKey::config("extra.author"),
            DependencyKey::template("templates/page.html"),
        ];
        let json = serde_json::to_string(&keys).unwrap();
        let back: Vec<DependencyKey> = serde_json::from_str(&json).unwrap();
        assert_eq!(keys, back);

        let out = OutputKey::index("pages");
        let json = serde_json::to_string(&out).unwrap();
        let back: OutputKey = serde_json::from_str(&json).unwrap();
        assert_eq!(out, back);
    }
}
