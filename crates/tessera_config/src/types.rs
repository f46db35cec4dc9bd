//! Configuration types deserialized from `tessera.toml`.

use serde::Deserialize;

/// The top-level project configuration parsed from `tessera.toml`.
///
/// Contains site metadata, build directory settings, cache settings, and a
/// free-form `[extra]` table whose values are exposed to templates.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Core site metadata (title, base URL, language).
    pub site: SiteMeta,
    /// Build directory settings.
    #[serde(default)]
    pub build: BuildSettings,
    /// Cache location and volatile-key settings.
    #[serde(default)]
    pub cache: CacheSettings,
    /// Free-form values exposed to templates as `extra.*`.
    #[serde(default)]
    pub extra: toml::Table,
}

/// Core site metadata required in every `tessera.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteMeta {
    /// The site title.
    pub title: String,
    /// The base URL the site will be served from.
    #[serde(default)]
    pub base_url: String,
    /// BCP-47 language tag for the site.
    #[serde(default = "default_language")]
    pub language: String,
    /// A brief description of the site.
    #[serde(default)]
    pub description: String,
}

/// Directory layout and build behavior settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    /// Directory containing source content files, relative to the project root.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,
    /// Directory containing template files, relative to the project root.
    #[serde(default = "default_template_dir")]
    pub template_dir: String,
    /// Directory rendered output is written to, relative to the project root.
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
    /// Whether pages marked as drafts are rendered.
    #[serde(default)]
    pub drafts: bool,
}

/// Build cache location and volatile-key settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Directory the build cache is persisted to, relative to the project root.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    /// Additional dotted config paths excluded from configuration hashing,
    /// on top of [`DEFAULT_VOLATILE_KEYS`](crate::DEFAULT_VOLATILE_KEYS).
    #[serde(default)]
    pub volatile: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_content_dir() -> String {
    "content".to_string()
}

fn default_template_dir() -> String {
    "templates".to_string()
}

fn default_out_dir() -> String {
    "public".to_string()
}

fn default_cache_dir() -> String {
    ".tessera-cache".to_string()
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            template_dir: default_template_dir(),
            out_dir: default_out_dir(),
            drafts: false,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            volatile: Vec::new(),
        }
    }
}
