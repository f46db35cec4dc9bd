//! Shared pipeline helpers for CLI commands.
//!
//! Contains project root resolution, content and template discovery, and the
//! producer seams the build orchestrator feeds the cache through: a content
//! parser that splits front matter from the body, and a renderer that
//! substitutes page fields into a template. Both are deliberately minimal;
//! the cache engine only ever sees the bytes they produce.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_cache::ProducerVersion;
use tessera_common::DependencyKey;
use tessera_config::SiteConfig;

use crate::GlobalArgs;

/// Errors from reading and parsing content during a build.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A source file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A page referenced a template that does not exist.
    #[error("template '{name}' not found in {dir}")]
    MissingTemplate {
        /// The template file name the page asked for.
        name: String,
        /// The template directory that was searched.
        dir: PathBuf,
    },
}

/// Walks up from `start` looking for the nearest directory containing
/// `tessera.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(tessera_config::loader::CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find tessera.toml in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir →
/// itself). Otherwise walks up from the current directory looking for
/// `tessera.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else {
            Ok(p)
        }
    } else {
        find_project_root(&std::env::current_dir()?)
    }
}

/// Discovers content files in the given directory (recursive).
///
/// Returns paths for files with recognized content extensions (`.md`,
/// `.markdown`), sorted by path.
pub fn discover_content_files(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    walk_dir(dir, &["md", "markdown"], &mut files)?;
    files.sort();
    Ok(files)
}

/// Discovers template files in the given directory (recursive).
///
/// Returns paths for `.html` files, sorted by path.
pub fn discover_template_files(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    walk_dir(dir, &["html"], &mut files)?;
    files.sort();
    Ok(files)
}

/// Recursively walks a directory collecting files with the given extensions.
fn walk_dir(
    dir: &Path,
    extensions: &[&str],
    files: &mut Vec<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, extensions, files)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e))
        {
            files.push(path);
        }
    }
    Ok(())
}

/// Maps a content source path to its rendered output path.
///
/// `content/posts/a.md` under out dir `public` becomes `public/posts/a.html`.
/// Paths outside the content dir keep their full relative shape.
pub fn page_output_path(source: &Path, content_dir: &Path, out_dir: &Path) -> PathBuf {
    let rel = source.strip_prefix(content_dir).unwrap_or(source);
    let mut out = out_dir.join(rel);
    out.set_extension("html");
    out
}

/// Structured content produced by parsing one source file.
///
/// This is what gets wrapped as an opaque cache entry payload; the cache
/// never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedContent {
    /// Page title, from front matter, the first heading, or the file stem.
    pub title: String,
    /// Template file name requested in front matter, if any.
    pub template: Option<String>,
    /// Whether the page is marked as a draft.
    pub draft: bool,
    /// The page body with front matter removed.
    pub body: String,
}

impl ParsedContent {
    /// Serializes for storage as a cache entry payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .unwrap_or_default()
    }

    /// Deserializes a cache entry payload. `None` on any problem, which
    /// callers treat as a cache miss.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .ok()
            .map(|(content, _)| content)
    }
}

/// Turns a source file into structured content, tagged with the version of
/// the parsing logic so upgrades invalidate stale entries.
pub trait ContentParser: Sync {
    /// The producer version recorded on entries this parser writes.
    fn version(&self) -> ProducerVersion;

    /// Parses one source file.
    fn parse(&self, path: &Path) -> Result<ParsedContent, PipelineError>;
}

/// Turns parsed content plus a template into output bytes.
pub trait PageRenderer: Sync {
    /// The producer version recorded on entries this renderer writes.
    fn version(&self) -> ProducerVersion;

    /// The config keys the renderer reads, recorded as dependencies of
    /// every page it renders.
    fn config_dependencies(&self) -> Vec<DependencyKey>;

    /// Renders one page.
    fn render(&self, page: &ParsedContent, template: &str, config: &SiteConfig) -> Vec<u8>;
}

/// The built-in parser: an optional `---`-fenced front matter block of
/// `key: value` lines, followed by the body.
pub struct FrontMatterParser;

impl ContentParser for FrontMatterParser {
    fn version(&self) -> ProducerVersion {
        ProducerVersion::new("front-matter-parser", 1)
    }

    fn parse(&self, path: &Path) -> Result<ParsedContent, PipelineError> {
        let source = std::fs::read_to_string(path).map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut title = None;
        let mut template = None;
        let mut draft = false;

        let body = match split_front_matter(&source) {
            Some((front, body)) => {
                for line in front.lines() {
                    let Some((key, value)) = line.split_once(':') else {
                        continue;
                    };
                    match key.trim() {
                        "title" => title = Some(value.trim().to_string()),
                        "template" => template = Some(value.trim().to_string()),
                        "draft" => draft = value.trim() == "true",
                        _ => {}
                    }
                }
                body.to_string()
            }
            None => source,
        };

        let title = title
            .or_else(|| first_heading(&body))
            .unwrap_or_else(|| file_stem(path));

        Ok(ParsedContent {
            title,
            template,
            draft,
            body,
        })
    }
}

/// Splits `---`-fenced front matter from the body, if present.
fn split_front_matter(source: &str) -> Option<(&str, &str)> {
    let rest = source.strip_prefix("---\n").or_else(|| source.strip_prefix("---\r\n"))?;
    let end = rest.find("\n---")?;
    let front = &rest[..end];
    let body = rest[end + 4..].trim_start_matches(['\r', '\n']);
    Some((front, body))
}

/// Returns the text of the first `# ` heading in the body, if any.
fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
}

/// Falls back to the file stem as a title.
fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

/// The built-in renderer: substitutes page and site fields into `{{ ... }}`
/// placeholders. A stand-in for a real template engine, which is outside
/// this tool's scope.
pub struct SubstitutionRenderer;

impl PageRenderer for SubstitutionRenderer {
    fn version(&self) -> ProducerVersion {
        ProducerVersion::new("substitution-renderer", 1)
    }

    fn config_dependencies(&self) -> Vec<DependencyKey> {
        vec![
            DependencyKey::config("site.title"),
            DependencyKey::config("site.base_url"),
        ]
    }

    fn render(&self, page: &ParsedContent, template: &str, config: &SiteConfig) -> Vec<u8> {
        template
            .replace("{{ title }}", &page.title)
            .replace("{{ content }}", &page.body)
            .replace("{{ site.title }}", &config.site.title)
            .replace("{{ site.base_url }}", &config.site.base_url)
            .into_bytes()
    }
}
