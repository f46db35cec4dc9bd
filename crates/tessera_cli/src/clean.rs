//! `tessera clean` — remove the build cache (and optionally the output).

use crate::pipeline::resolve_project_root;
use crate::{CleanArgs, GlobalArgs};

/// Runs the `tessera clean` command.
///
/// Removing the cache is always safe: the next build is simply a full one.
pub fn run(args: &CleanArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let config = tessera_config::load_config(&project_dir)?;

    let cache_dir = project_dir.join(&config.cache.dir);
    if cache_dir.is_dir() {
        std::fs::remove_dir_all(&cache_dir)?;
        if !global.quiet {
            eprintln!("   Removed {}", cache_dir.display());
        }
    } else if !global.quiet {
        eprintln!("   Nothing to remove at {}", cache_dir.display());
    }

    if args.output {
        let out_dir = project_dir.join(&config.build.out_dir);
        if out_dir.is_dir() {
            std::fs::remove_dir_all(&out_dir)?;
            if !global.quiet {
                eprintln!("   Removed {}", out_dir.display());
            }
        }
    }
    Ok(0)
}
