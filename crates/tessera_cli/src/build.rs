//! `tessera build` — incremental site build.
//!
//! Orchestrates one build against the persisted cache:
//! 1. Load the cache and hash the configuration
//! 2. Discover content and templates, detect changes
//! 3. Compute the rebuild set
//! 4. Render the rebuild set on a worker pool (workers read the immutable
//!    cache snapshot and write only to worker-local buffers)
//! 5. Commit: merge buffers, flush deferred fingerprints, persist

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tessera_cache::{
    BuildCache, EntryKey, InvalidationEngine, ProducerVersion, ValidationContext, WarningSink,
    WorkerBuffer,
};
use tessera_common::{DependencyKey, OutputKey};
use tessera_config::{ConfigHasher, SiteConfig};

use crate::pipeline::{
    discover_content_files, discover_template_files, page_output_path, resolve_project_root,
    ContentParser, FrontMatterParser, PageRenderer, ParsedContent, PipelineError,
    SubstitutionRenderer,
};
use crate::{BuildArgs, GlobalArgs};

/// Template file name used when a page's front matter names none.
const DEFAULT_TEMPLATE: &str = "page.html";

/// Template file name that, when present, produces the site index page.
const INDEX_TEMPLATE: &str = "index.html";

/// Logical name of the derived page index artifact.
const PAGE_INDEX: &str = "pages";

/// Runs the `tessera build` command.
///
/// Returns exit code 0 on success, 1 if any page failed to render. Cache
/// problems never fail the build; they are reported as warnings.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    // All cache keys are project-relative paths, so the persisted cache
    // stays valid when the checkout moves.
    std::env::set_current_dir(&project_dir)?;

    let config = tessera_config::load_config(Path::new("."))?;
    let raw = tessera_config::load_raw_document(Path::new("."))?;
    let hasher = ConfigHasher::with_additional(config.cache.volatile.iter().cloned());
    let current_config = hasher.key_hashes(&raw);

    if !global.quiet {
        eprintln!("  Building {}", config.site.title);
    }

    let warnings = WarningSink::new();
    let cache_dir = PathBuf::from(&config.cache.dir);
    let mut cache = if args.full {
        BuildCache::fresh(&cache_dir)
    } else {
        BuildCache::load_or_create(&cache_dir, &warnings)
    };

    let parser = FrontMatterParser;
    let renderer = SubstitutionRenderer;
    let index_producer = ProducerVersion::new("page-index", 1);
    let swept = cache.sweep_stale_producers(&[
        parser.version(),
        renderer.version(),
        index_producer.clone(),
    ]);
    if swept > 0 && global.verbose {
        eprintln!("     Swept {swept} stale cache entries");
    }

    let content_dir = PathBuf::from(&config.build.content_dir);
    let template_dir = PathBuf::from(&config.build.template_dir);
    let out_dir = PathBuf::from(&config.build.out_dir);

    let content_files = if content_dir.is_dir() {
        discover_content_files(&content_dir)?
    } else {
        Vec::new()
    };
    if content_files.is_empty() {
        eprintln!("error: no content files found in {}", content_dir.display());
        return Ok(1);
    }
    let template_files = if template_dir.is_dir() {
        discover_template_files(&template_dir)?
    } else {
        Vec::new()
    };

    // Templates are preloaded once; workers only do in-memory lookups.
    let mut templates: HashMap<String, (PathBuf, String)> = HashMap::new();
    for path in &template_files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let source = std::fs::read_to_string(path)?;
        templates.insert(name, (path.clone(), source));
    }

    let changes = cache.detect_changes(&content_files, &template_files, &current_config, &warnings);
    let changed_inputs = changes.changed_inputs();
    if !global.quiet && cache.epoch().get() > 0 {
        let summary = InvalidationEngine::summarize(&changed_inputs);
        eprintln!(
            "   Changed {} files, {} templates, {} config keys ({} deleted)",
            summary.files,
            summary.templates,
            summary.config_keys,
            changes.deleted_files.len()
        );
    }

    let mut rebuild = cache.compute_rebuild_set(&changed_inputs);
    let ctx = cache.validation_context(&current_config, &warnings);

    // First builds, new pages, and producer bumps all surface the same
    // way: the render entry misses under the current producer version.
    for path in &content_files {
        let key = EntryKey::new(path.display().to_string(), renderer.version());
        if cache.entries().get(&key, &ctx).is_none() {
            rebuild.insert(OutputKey::page(path.clone()));
        }
    }

    let mut rebuild_pages: Vec<PathBuf> = rebuild
        .iter()
        .filter_map(|output| match output {
            OutputKey::Page(path) if content_files.contains(path) => Some(path.clone()),
            _ => None,
        })
        .collect();
    rebuild_pages.sort();

    let job = RenderJob {
        cache: &cache,
        ctx,
        config: &config,
        templates: &templates,
        parser: &parser,
        renderer: &renderer,
        content_dir: &content_dir,
        template_dir: &template_dir,
        out_dir: &out_dir,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.unwrap_or(0))
        .build()?;
    let outcomes: Vec<PageOutcome> = pool.install(|| {
        rebuild_pages
            .par_iter()
            .map(|path| job.render_page(path))
            .collect()
    });

    let mut buffers = Vec::new();
    let mut titles: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut rendered = 0usize;
    let mut failures = 0usize;
    for outcome in outcomes {
        match outcome.result {
            Ok(Some(title)) => {
                rendered += 1;
                titles.insert(outcome.path, title);
            }
            Ok(None) => {} // draft, skipped
            Err(e) => {
                failures += 1;
                eprintln!("error: {e}");
            }
        }
        buffers.push(outcome.buffer);
    }

    // Reused pages: restore missing output files from the cache and pick
    // up their titles for the index.
    let mut reused = 0usize;
    for path in &content_files {
        if rebuild_pages.binary_search(path).is_ok() {
            continue;
        }
        let render_key = EntryKey::new(path.display().to_string(), renderer.version());
        let Some(bytes) = cache.entries().get(&render_key, &ctx) else {
            continue;
        };
        if bytes.is_empty() {
            continue; // cached draft, nothing was written
        }
        titles.insert(path.clone(), cached_title(&cache, &ctx, &parser, path));
        let out_path = page_output_path(path, &content_dir, &out_dir);
        if !out_path.exists() {
            if let Err(e) = write_output(&out_path, bytes) {
                failures += 1;
                eprintln!("error: failed to write {}: {e}", out_path.display());
                continue;
            }
        }
        reused += 1;
    }

    // The derived index depends on every page, so it rebuilds when any
    // page appears, changes, or disappears.
    let index_output = OutputKey::index(PAGE_INDEX);
    let index_key = EntryKey::new(PAGE_INDEX, index_producer.clone());
    let mut index_built = false;
    if let Some((tpl_path, tpl_source)) = templates.get(INDEX_TEMPLATE) {
        let due =
            rebuild.contains(&index_output) || cache.entries().get(&index_key, &ctx).is_none();
        if due && failures == 0 {
            let mut buffer = WorkerBuffer::new();
            let html = render_index(tpl_source, &config, &titles, &content_dir);
            let out_path = out_dir.join(INDEX_TEMPLATE);
            if let Err(e) = write_output(&out_path, html.as_bytes()) {
                failures += 1;
                eprintln!("error: failed to write {}: {e}", out_path.display());
            } else {
                let mut dependencies: Vec<DependencyKey> =
                    content_files.iter().map(DependencyKey::file).collect();
                dependencies.push(DependencyKey::template(tpl_path));
                dependencies.push(DependencyKey::config("site.title"));
                buffer.put_entry(index_key, html.into_bytes(), dependencies.clone());
                buffer.record_output(
                    index_output,
                    DependencyKey::template(tpl_path),
                    dependencies,
                );
                buffers.push(buffer);
                index_built = true;
            }
        }
    }

    // Every discovered template gets a fresh fingerprint at flush time.
    let mut template_buffer = WorkerBuffer::new();
    for path in &template_files {
        template_buffer.record_file(path);
    }
    buffers.push(template_buffer);

    if failures > 0 {
        // Abort: nothing reaches the persisted cache, so the next build
        // sees exactly the same change set.
        cache.discard_pending();
        for warning in warnings.take_all() {
            eprintln!("warning: {warning}");
        }
        eprintln!("error: {failures} pages failed; cache left unchanged");
        return Ok(1);
    }

    let stats = cache.commit(buffers, current_config, &changes.deleted_files, &warnings);

    for warning in warnings.take_all() {
        eprintln!("warning: {warning}");
    }
    if !global.quiet {
        let index_note = if index_built { ", 1 index" } else { "" };
        eprintln!("  Rendered {rendered} pages ({reused} reused{index_note})");
        eprintln!("     Epoch {}", stats.epoch);
        if global.verbose && !stats.persisted {
            eprintln!("     Cache not persisted; next build starts cold");
        }
    }
    Ok(0)
}

/// Everything a render worker needs, borrowed from the immutable snapshot.
struct RenderJob<'a> {
    cache: &'a BuildCache,
    ctx: ValidationContext<'a>,
    config: &'a SiteConfig,
    templates: &'a HashMap<String, (PathBuf, String)>,
    parser: &'a FrontMatterParser,
    renderer: &'a SubstitutionRenderer,
    content_dir: &'a Path,
    template_dir: &'a Path,
    out_dir: &'a Path,
}

/// What one worker produced for one page.
///
/// `Ok(Some(title))` is a rendered page, `Ok(None)` a skipped draft. The
/// buffer is merged into the cache even on failure paths that staged
/// nothing, which keeps the commit loop uniform.
struct PageOutcome {
    path: PathBuf,
    buffer: WorkerBuffer,
    result: Result<Option<String>, PipelineError>,
}

impl RenderJob<'_> {
    fn render_page(&self, path: &Path) -> PageOutcome {
        let mut buffer = WorkerBuffer::new();
        let source_key = DependencyKey::file(path);
        let parse_key = EntryKey::new(path.display().to_string(), self.parser.version());

        let cached = self
            .cache
            .entries()
            .get(&parse_key, &self.ctx)
            .and_then(ParsedContent::from_bytes);
        let parsed = match cached {
            Some(parsed) => parsed,
            None => match self.parser.parse(path) {
                Ok(parsed) => {
                    buffer.put_entry(parse_key, parsed.to_bytes(), vec![source_key.clone()]);
                    parsed
                }
                Err(e) => return outcome(path, buffer, Err(e)),
            },
        };

        let template_name = parsed
            .template
            .clone()
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        let Some((template_path, template_source)) = self.templates.get(&template_name) else {
            let err = PipelineError::MissingTemplate {
                name: template_name,
                dir: self.template_dir.to_path_buf(),
            };
            return outcome(path, buffer, Err(err));
        };

        let mut dependencies = vec![
            source_key.clone(),
            DependencyKey::template(template_path),
        ];
        dependencies.extend(self.renderer.config_dependencies());
        let render_key = EntryKey::new(path.display().to_string(), self.renderer.version());
        let output = OutputKey::page(path);

        buffer.record_file(path);

        if parsed.draft && !self.config.build.drafts {
            // Cached with an empty payload so an unchanged draft is not
            // re-examined every build; nothing reaches the output dir.
            buffer.put_entry(render_key, Vec::new(), dependencies.clone());
            buffer.record_output(output, source_key, dependencies);
            return outcome(path, buffer, Ok(None));
        }

        let rendered = self.renderer.render(&parsed, template_source, self.config);
        let out_path = page_output_path(path, self.content_dir, self.out_dir);
        if let Err(e) = write_output(&out_path, &rendered) {
            let err = PipelineError::Io {
                path: out_path,
                source: e,
            };
            return outcome(path, buffer, Err(err));
        }

        buffer.put_entry(render_key, rendered, dependencies.clone());
        buffer.record_output(output, source_key, dependencies);
        outcome(path, buffer, Ok(Some(parsed.title)))
    }
}

fn outcome(
    path: &Path,
    buffer: WorkerBuffer,
    result: Result<Option<String>, PipelineError>,
) -> PageOutcome {
    PageOutcome {
        path: path.to_path_buf(),
        buffer,
        result,
    }
}

/// Title for a page that was not rebuilt this build, from its cached parse
/// entry, re-parsing only if the entry cannot be decoded.
fn cached_title(
    cache: &BuildCache,
    ctx: &ValidationContext<'_>,
    parser: &FrontMatterParser,
    path: &Path,
) -> String {
    let parse_key = EntryKey::new(path.display().to_string(), parser.version());
    cache
        .entries()
        .get(&parse_key, ctx)
        .and_then(ParsedContent::from_bytes)
        .map(|parsed| parsed.title)
        .or_else(|| parser.parse(path).ok().map(|parsed| parsed.title))
        .unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string()
        })
}

/// Renders the site index: a link list substituted into the index template.
fn render_index(
    template: &str,
    config: &SiteConfig,
    titles: &BTreeMap<PathBuf, String>,
    content_dir: &Path,
) -> String {
    let items: String = titles
        .iter()
        .map(|(path, title)| {
            let href = page_output_path(path, content_dir, Path::new(""));
            format!("<li><a href=\"{}\">{title}</a></li>\n", href.display())
        })
        .collect();
    template
        .replace("{{ site.title }}", &config.site.title)
        .replace("{{ items }}", &items)
}

/// Writes one output file, creating parent directories as needed.
fn write_output(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_index_substitutes_items() {
        let config =
            tessera_config::load_config_from_str("[site]\ntitle = \"My Site\"\n").unwrap();
        let mut titles = BTreeMap::new();
        titles.insert(PathBuf::from("content/a.md"), "Alpha".to_string());
        titles.insert(PathBuf::from("content/b.md"), "Beta".to_string());

        let html = render_index(
            "<h1>{{ site.title }}</h1><ul>{{ items }}</ul>",
            &config,
            &titles,
            Path::new("content"),
        );
        assert!(html.contains("<h1>My Site</h1>"));
        assert!(html.contains("<a href=\"a.html\">Alpha</a>"));
        assert!(html.contains("<a href=\"b.html\">Beta</a>"));
    }

    #[test]
    fn write_output_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/page.html");
        write_output(&path, b"<html></html>").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"<html></html>");
    }
}
