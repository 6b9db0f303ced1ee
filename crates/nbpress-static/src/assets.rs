//! Asset pipeline for stylesheets, scripts and static files.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::builder::BuildError;
use crate::site::write_output;

/// Stylesheet written when the resources provide none.
pub const DEFAULT_STYLESHEET: &str = "styles/main.css";

/// Theme script written alongside the default stylesheet.
pub const DEFAULT_SCRIPT: &str = "scripts/main.js";

/// Assets copied into the output, as root-relative paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticAssets {
    pub styles: Vec<String>,
    pub scripts: Vec<String>,
    /// Files copied from `<resources>/static`
    pub files: usize,
}

/// Asset pipeline utilities.
pub struct AssetPipeline;

impl AssetPipeline {
    /// Default stylesheet.
    pub fn generate_css() -> String {
        DEFAULT_CSS.to_string()
    }

    /// Default theme script.
    pub fn generate_js() -> String {
        DEFAULT_JS.to_string()
    }

    /// Minify CSS using lightningcss.
    pub fn minify_css(css: &str) -> Result<String, String> {
        use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

        let stylesheet = StyleSheet::parse(css, ParserOptions::default())
            .map_err(|e| format!("CSS parse error: {}", e))?;

        let minified = stylesheet
            .to_css(PrinterOptions {
                minify: true,
                ..Default::default()
            })
            .map_err(|e| format!("CSS minify error: {}", e))?;

        Ok(minified.code)
    }

    /// Copy `styles/*.css`, `scripts/*.js` and `static/**` from `resources`.
    ///
    /// A missing resources directory is not an error. When no stylesheet is
    /// found the default stylesheet and theme script are written instead.
    pub fn copy_resources(
        resources: &Path,
        output: &Path,
        minify: bool,
    ) -> Result<StaticAssets, BuildError> {
        let mut assets = StaticAssets::default();

        for source in list_files(&resources.join("styles"), "css") {
            let name = file_name(&source);
            let css = fs::read_to_string(&source)
                .map_err(|e| BuildError::ReadError(format!("{}: {}", source.display(), e)))?;
            let relative = format!("styles/{}", name);
            write_output(&output.join(&relative), &Self::process_css(&css, minify, &source))?;
            assets.styles.push(relative);
        }

        for source in list_files(&resources.join("scripts"), "js") {
            let relative = format!("scripts/{}", file_name(&source));
            copy_file(&source, &output.join(&relative))?;
            assets.scripts.push(relative);
        }

        let static_root = resources.join("static");
        if static_root.is_dir() {
            for entry in WalkDir::new(&static_root)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let relative = entry
                    .path()
                    .strip_prefix(&static_root)
                    .unwrap_or(entry.path());
                copy_file(entry.path(), &output.join("static").join(relative))?;
                assets.files += 1;
            }
        }

        if assets.styles.is_empty() {
            let css = Self::generate_css();
            let css = Self::process_css(&css, minify, Path::new(DEFAULT_STYLESHEET));
            write_output(&output.join(DEFAULT_STYLESHEET), &css)?;
            assets.styles.push(DEFAULT_STYLESHEET.to_string());

            if !assets.scripts.iter().any(|s| s == DEFAULT_SCRIPT) {
                write_output(&output.join(DEFAULT_SCRIPT), &Self::generate_js())?;
                assets.scripts.push(DEFAULT_SCRIPT.to_string());
            }
        }

        tracing::debug!(
            "Copied {} stylesheets, {} scripts, {} static files",
            assets.styles.len(),
            assets.scripts.len(),
            assets.files
        );

        Ok(assets)
    }

    fn process_css(css: &str, minify: bool, source: &Path) -> String {
        if !minify {
            return css.to_string();
        }
        match Self::minify_css(css) {
            Ok(minified) => minified,
            Err(e) => {
                tracing::warn!("{}: {}; copying unminified", source.display(), e);
                css.to_string()
            }
        }
    }
}

/// Files with extension `ext` directly inside `dir`, sorted.
fn list_files(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .collect();
    files.sort();
    files
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn copy_file(source: &Path, dest: &Path) -> Result<(), BuildError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::WriteError(e.to_string()))?;
    }
    fs::copy(source, dest)
        .map(|_| ())
        .map_err(|e| BuildError::WriteError(format!("{}: {}", dest.display(), e)))
}

const DEFAULT_CSS: &str = r#"/* nbpress default theme */

:root {
  --bg: #fdfdfc;
  --fg: #1f2328;
  --muted: #f3f4f6;
  --muted-fg: #57606a;
  --border: #d0d7de;
  --accent: #0969da;
  --code-bg: #f6f8fa;
  --content-width: 860px;
  --radius: 6px;
}

:root[data-theme="dark"] {
  --bg: #0d1117;
  --fg: #e6edf3;
  --muted: #161b22;
  --muted-fg: #8d96a0;
  --border: #30363d;
  --accent: #4493f8;
  --code-bg: #161b22;
}

@media (prefers-color-scheme: dark) {
  :root:not([data-theme="light"]) {
    --bg: #0d1117;
    --fg: #e6edf3;
    --muted: #161b22;
    --muted-fg: #8d96a0;
    --border: #30363d;
    --accent: #4493f8;
    --code-bg: #161b22;
  }

  :root:not([data-theme="light"]) .nb-figure-auto-dark img {
    filter: invert(0.92) hue-rotate(180deg);
  }
}

:root[data-theme="dark"] .nb-figure-auto-dark img {
  filter: invert(0.92) hue-rotate(180deg);
}

* {
  box-sizing: border-box;
}

body {
  margin: 0;
  font-family: system-ui, -apple-system, "Segoe UI", sans-serif;
  background: var(--bg);
  color: var(--fg);
  line-height: 1.6;
}

a {
  color: var(--accent);
}

/* Header */
.site-header {
  display: flex;
  align-items: center;
  gap: 1.5rem;
  padding: 0.75rem 1.5rem;
  border-bottom: 1px solid var(--border);
  position: sticky;
  top: 0;
  background: var(--bg);
  z-index: 10;
}

.site-title {
  font-weight: 700;
  font-size: 1.2rem;
  color: var(--fg);
  text-decoration: none;
}

.site-nav {
  display: flex;
  flex-wrap: wrap;
  gap: 1rem;
  flex: 1;
}

.site-nav a {
  color: var(--muted-fg);
  text-decoration: none;
}

.site-nav a.active,
.site-nav a:hover {
  color: var(--fg);
}

.theme-toggle {
  border: 1px solid var(--border);
  background: var(--muted);
  color: var(--fg);
  border-radius: var(--radius);
  padding: 0.25rem 0.6rem;
  cursor: pointer;
}

.site-main {
  max-width: var(--content-width);
  margin: 0 auto;
  padding: 2rem 1.5rem;
}

.site-footer {
  text-align: center;
  color: var(--muted-fg);
  padding: 2rem;
  font-size: 0.875rem;
}

/* Cards */
.post-grid {
  display: grid;
  grid-template-columns: repeat(auto-fill, minmax(240px, 1fr));
  gap: 1.25rem;
}

.post-card {
  display: block;
  border: 1px solid var(--border);
  border-radius: var(--radius);
  overflow: hidden;
  color: var(--fg);
  text-decoration: none;
  background: var(--muted);
}

.post-card img {
  width: 100%;
  aspect-ratio: 16 / 9;
  object-fit: cover;
  display: block;
}

.post-card h3,
.post-card p,
.post-card .post-category {
  margin: 0.5rem 0.75rem;
}

.post-category {
  display: block;
  font-size: 0.75rem;
  text-transform: uppercase;
  color: var(--muted-fg);
}

.category-list .count {
  color: var(--muted-fg);
  font-size: 0.875rem;
}

/* Notebook pages */
.notebook-cover {
  max-width: 100%;
  border-radius: var(--radius);
}

.nb-nav {
  border: 1px solid var(--border);
  border-radius: var(--radius);
  padding: 0.75rem 1rem;
  margin-bottom: 2rem;
  background: var(--muted);
}

.nb-nav h2 {
  font-size: 0.8rem;
  text-transform: uppercase;
  letter-spacing: 0.05em;
  margin: 0 0 0.5rem;
  color: var(--muted-fg);
}

.nb-nav ul {
  list-style: none;
  padding-left: 1rem;
  margin: 0;
}

.nb-nav > ul {
  padding-left: 0;
}

.nb-cell {
  margin-bottom: 1.25rem;
}

.anchor-link {
  margin-left: 0.4rem;
  opacity: 0;
  text-decoration: none;
}

h1:hover .anchor-link,
h2:hover .anchor-link,
h3:hover .anchor-link,
h4:hover .anchor-link {
  opacity: 0.6;
}

pre,
code {
  font-family: ui-monospace, "SFMono-Regular", Menlo, monospace;
  font-size: 0.875rem;
}

.nb-input pre,
pre.nb-output {
  background: var(--code-bg);
  border: 1px solid var(--border);
  border-radius: var(--radius);
  padding: 0.75rem 1rem;
  overflow-x: auto;
}

pre.nb-stderr,
pre.nb-error {
  border-left: 3px solid #cf222e;
}

.nb-outputs {
  margin-top: 0.5rem;
}

.nb-figure {
  margin: 0.5rem 0;
}

.nb-figure img,
.nb-image {
  max-width: 100%;
  height: auto;
}

.nb-html {
  overflow-x: auto;
}

.nb-html table {
  border-collapse: collapse;
  font-size: 0.875rem;
}

.nb-html th,
.nb-html td {
  border: 1px solid var(--border);
  padding: 0.25rem 0.5rem;
}

.nb-latex {
  overflow-x: auto;
}
"#;

const DEFAULT_JS: &str = r#"// nbpress theme toggle
(function() {
  'use strict';

  const root = document.documentElement;
  const stored = localStorage.getItem('nbpress-theme');
  const prefersDark = window.matchMedia('(prefers-color-scheme: dark)');

  function currentTheme() {
    return root.dataset.theme || (prefersDark.matches ? 'dark' : 'light');
  }

  // Explicit dark variants follow the page theme rather than the OS setting
  function syncFigures() {
    const dark = currentTheme() === 'dark';
    document.querySelectorAll('img[data-dark-src]').forEach(img => {
      if (!img.dataset.lightSrc) img.dataset.lightSrc = img.getAttribute('src');
      img.setAttribute('src', dark ? img.dataset.darkSrc : img.dataset.lightSrc);
      const source = img.parentElement && img.parentElement.querySelector('source');
      if (source && root.dataset.theme) {
        source.setAttribute('media', dark ? 'all' : 'not all');
      }
    });
  }

  if (stored === 'dark' || stored === 'light') {
    root.dataset.theme = stored;
  }

  const toggle = document.querySelector('.theme-toggle');
  if (toggle) {
    toggle.addEventListener('click', () => {
      const next = currentTheme() === 'dark' ? 'light' : 'dark';
      root.dataset.theme = next;
      localStorage.setItem('nbpress-theme', next);
      syncFigures();
    });
  }

  prefersDark.addEventListener('change', syncFigures);
  syncFigures();
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_css_styles_figure_variants() {
        let css = AssetPipeline::generate_css();
        assert!(css.contains(".nb-figure-auto-dark img"));
        assert!(css.contains("prefers-color-scheme: dark"));
        assert!(css.contains(".nb-nav"));
    }

    #[test]
    fn default_js_toggles_theme() {
        let js = AssetPipeline::generate_js();
        assert!(js.contains("theme-toggle"));
        assert!(js.contains("data-dark-src"));
    }

    #[test]
    fn minifies_css() {
        let css = r#"
.button {
    background-color: blue;
    padding: 10px;
}
        "#;

        let minified = AssetPipeline::minify_css(css).unwrap();

        assert!(!minified.contains('\n'));
        assert!(minified.contains(".button"));
    }

    #[test]
    fn default_css_minifies() {
        assert!(AssetPipeline::minify_css(DEFAULT_CSS).is_ok());
    }

    #[test]
    fn writes_defaults_without_resources() {
        let temp = tempdir().unwrap();
        let out = temp.path().join("build");

        let assets =
            AssetPipeline::copy_resources(&temp.path().join("missing"), &out, false).unwrap();

        assert_eq!(assets.styles, vec![DEFAULT_STYLESHEET.to_string()]);
        assert_eq!(assets.scripts, vec![DEFAULT_SCRIPT.to_string()]);
        assert_eq!(
            fs::read_to_string(out.join(DEFAULT_STYLESHEET)).unwrap(),
            DEFAULT_CSS
        );
    }

    #[test]
    fn copies_resources() {
        let temp = tempdir().unwrap();
        let resources = temp.path().join("resources");
        let out = temp.path().join("build");
        fs::create_dir_all(resources.join("styles")).unwrap();
        fs::create_dir_all(resources.join("scripts")).unwrap();
        fs::create_dir_all(resources.join("static/fonts")).unwrap();
        fs::write(resources.join("styles/site.css"), ".a {\n  color: red;\n}\n").unwrap();
        fs::write(resources.join("styles/notes.txt"), "ignored").unwrap();
        fs::write(resources.join("scripts/app.js"), "console.log(1);").unwrap();
        fs::write(resources.join("static/fonts/x.woff2"), b"font").unwrap();
        fs::write(resources.join("static/logo.svg"), "<svg/>").unwrap();

        let assets = AssetPipeline::copy_resources(&resources, &out, true).unwrap();

        assert_eq!(assets.styles, vec!["styles/site.css".to_string()]);
        assert_eq!(assets.scripts, vec!["scripts/app.js".to_string()]);
        assert_eq!(assets.files, 2);
        assert!(!out.join(DEFAULT_STYLESHEET).exists());
        assert!(out.join("static/fonts/x.woff2").exists());
        assert!(!fs::read_to_string(out.join("styles/site.css"))
            .unwrap()
            .contains('\n'));
    }

    #[test]
    fn invalid_css_is_copied_unminified() {
        let temp = tempdir().unwrap();
        let resources = temp.path().join("resources");
        let out = temp.path().join("build");
        fs::create_dir_all(resources.join("styles")).unwrap();
        fs::write(resources.join("styles/broken.css"), ".a { color: red; ").unwrap();

        AssetPipeline::copy_resources(&resources, &out, true).unwrap();

        assert!(out.join("styles/broken.css").exists());
    }
}
