//! `tessera init` — project scaffolding command.
//!
//! Creates a new Tessera project with the standard layout: `content/`,
//! `templates/`, and a `tessera.toml` configuration file.

use std::fs;
use std::path::{Path, PathBuf};

/// Runs the `tessera init` command.
///
/// If `name` is `Some`, creates a new subdirectory with that name.
/// Otherwise initializes in the current working directory. Returns exit
/// code 0 on success.
pub fn run(name: Option<String>) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = match &name {
        Some(n) => {
            let dir = PathBuf::from(n);
            if dir.exists() {
                return Err(format!("directory '{n}' already exists").into());
            }
            fs::create_dir_all(&dir)?;
            dir
        }
        None => std::env::current_dir()?,
    };

    let project_name = project_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("my-site");

    if project_dir.join("tessera.toml").exists() {
        return Err("tessera.toml already exists here".into());
    }

    eprintln!("  Creating new Tessera site `{project_name}`");

    fs::create_dir_all(project_dir.join("content"))?;
    fs::create_dir_all(project_dir.join("templates"))?;

    write_config(&project_dir, project_name)?;
    write_starter_content(&project_dir)?;
    write_templates(&project_dir)?;

    for created in ["tessera.toml", "content/welcome.md", "templates/page.html"] {
        eprintln!("     Created {}", project_dir.join(created).display());
    }
    Ok(0)
}

fn write_config(root: &Path, name: &str) -> std::io::Result<()> {
    let config = format!(
        r#"[site]
title = "{name}"
base_url = ""

[build]
content_dir = "content"
template_dir = "templates"
out_dir = "public"
"#
    );
    fs::write(root.join("tessera.toml"), config)
}

fn write_starter_content(root: &Path) -> std::io::Result<()> {
    fs::write(
        root.join("content/welcome.md"),
        "---\ntitle: Welcome\n---\n# Welcome\n\nThis page was created by `tessera init`.\n",
    )
}

fn write_templates(root: &Path) -> std::io::Result<()> {
    fs::write(
        root.join("templates/page.html"),
        "<!doctype html>\n<html>\n<head><title>{{ title }} - {{ site.title }}</title></head>\n<body>\n<main>{{ content }}</main>\n</body>\n</html>\n",
    )?;
    fs::write(
        root.join("templates/index.html"),
        "<!doctype html>\n<html>\n<head><title>{{ site.title }}</title></head>\n<body>\n<ul>\n{{ items }}</ul>\n</body>\n</html>\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_scaffolds_a_buildable_project() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("my-site");

        let code = run(Some(project.display().to_string())).unwrap();
        assert_eq!(code, 0);
        assert!(project.join("tessera.toml").exists());
        assert!(project.join("content/welcome.md").exists());
        assert!(project.join("templates/page.html").exists());
        assert!(project.join("templates/index.html").exists());

        let config = tessera_config::load_config(&project).unwrap();
        assert_eq!(config.site.title, "my-site");
    }

    #[test]
    fn init_refuses_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("taken");
        std::fs::create_dir(&taken).unwrap();
        assert!(run(Some(taken.display().to_string())).is_err());
    }
}
