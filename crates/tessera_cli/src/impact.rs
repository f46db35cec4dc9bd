//! `tessera impact` — read-only cascade query.
//!
//! Reports which outputs a change to the given file, template, or config
//! key would invalidate, using the dependency graph persisted by the last
//! build. Never renders and never mutates the cache.

use std::path::{Path, PathBuf};

use tessera_cache::{BuildCache, WarningSink};
use tessera_common::DependencyKey;

use crate::pipeline::resolve_project_root;
use crate::{GlobalArgs, ImpactArgs, ReportFormat};

/// Runs the `tessera impact` command.
///
/// Returns exit code 0 even when nothing is affected; an empty result is an
/// answer, not an error.
pub fn run(args: &ImpactArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let config = tessera_config::load_config(&project_dir)?;

    let input = match (&args.path, &args.config_key) {
        (None, Some(key)) => DependencyKey::config(key.clone()),
        (Some(path), None) => classify_path(path, &config.build.template_dir),
        (Some(_), Some(_)) => {
            return Err("specify either a path or --config-key, not both".into());
        }
        (None, None) => {
            return Err("specify a path or --config-key to query".into());
        }
    };

    let warnings = WarningSink::new();
    let cache_dir = project_dir.join(&config.cache.dir);
    let cache = BuildCache::load_or_create(&cache_dir, &warnings);
    if cache.epoch().get() == 0 {
        eprintln!("note: no completed build in cache; impact is empty until one runs");
    }

    let affected = cache.affected_by(&input);

    match args.format {
        ReportFormat::Text => {
            if !global.quiet {
                eprintln!("   {} affects {} outputs", input, affected.len());
            }
            for output in &affected {
                println!("{output}");
            }
        }
        ReportFormat::Json => {
            let report = serde_json::json!({
                "input": input.to_string(),
                "affected": affected.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    for warning in warnings.take_all() {
        eprintln!("warning: {warning}");
    }
    Ok(0)
}

/// Treats paths under the template directory as template keys, everything
/// else as file keys. Paths are interpreted relative to the project root,
/// matching how the build records them.
fn classify_path(path: &str, template_dir: &str) -> DependencyKey {
    let rel = PathBuf::from(path);
    if rel.starts_with(Path::new(template_dir)) {
        DependencyKey::template(rel)
    } else {
        DependencyKey::file(rel)
    }
}
