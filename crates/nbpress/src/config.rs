//! Site configuration file (site.toml).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use nbpress_server::watch::DEFAULT_EXTENSIONS;
use nbpress_static::{BuildConfig, FeaturePolicy, RenderOptions, SiteInfo, StaticPages};
use serde::Deserialize;
use serde_json::Value;

/// Configuration file structure. Every field has a default, so a missing
/// file and an empty file behave the same.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub site: SiteSection,
    pub paths: PathsSection,
    pub build: BuildSection,
    pub render: RenderSection,
    pub watch: WatchSection,

    /// Passed to about.html
    pub about: Option<Value>,
    pub publications: Vec<Value>,
    pub projects: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SiteSection {
    pub title: String,
    pub author: String,
    pub description: String,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            title: "My Notebooks".to_string(),
            author: String::new(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub notebooks: PathBuf,
    pub resources: PathBuf,
    pub output: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            notebooks: PathBuf::from("notebooks"),
            resources: PathBuf::from("resources"),
            output: PathBuf::from("build"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub minify: bool,
    pub clean: bool,
    pub featured_per_category: usize,
    pub featured_total: usize,
}

impl Default for BuildSection {
    fn default() -> Self {
        let policy = FeaturePolicy::default();
        Self {
            minify: true,
            clean: false,
            featured_per_category: policy.per_category,
            featured_total: policy.total,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub front_matter: bool,
    pub navigation: bool,
    pub theme_variants: bool,
    pub hide_settings_cell: bool,
}

impl Default for RenderSection {
    fn default() -> Self {
        let options = RenderOptions::default();
        Self {
            front_matter: options.front_matter,
            navigation: options.navigation,
            theme_variants: options.theme_variants,
            hide_settings_cell: options.hide_settings_cell,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    pub interval_ms: u64,
    pub extensions: Vec<String>,
    pub host: String,
    pub port: u16,

    /// Wake on filesystem events instead of waiting out the interval
    pub notify: bool,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            host: "127.0.0.1".to_string(),
            port: 35729,
            notify: true,
        }
    }
}

impl WatchSection {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Load configuration from `path` if it exists.
/// Returns an error if the config file exists but is malformed.
pub fn load(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        tracing::debug!("No {} found, using defaults", path.display());
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

impl ConfigFile {
    /// Build settings with relative paths resolved against `base`, the
    /// directory holding the config file.
    pub fn build_config(&self, base: &Path) -> BuildConfig {
        BuildConfig {
            notebooks_dir: base.join(&self.paths.notebooks),
            resources_dir: base.join(&self.paths.resources),
            output_dir: base.join(&self.paths.output),
            minify: self.build.minify,
            clean: self.build.clean,
            site: SiteInfo {
                title: self.site.title.clone(),
                author: self.site.author.clone(),
                description: self.site.description.clone(),
            },
            render: RenderOptions {
                front_matter: self.render.front_matter,
                navigation: self.render.navigation,
                theme_variants: self.render.theme_variants,
                hide_settings_cell: self.render.hide_settings_cell,
            },
            featured: FeaturePolicy {
                per_category: self.build.featured_per_category,
                total: self.build.featured_total,
            },
            pages: StaticPages {
                about: self
                    .about
                    .clone()
                    .unwrap_or_else(|| Value::Object(Default::default())),
                publications: self.publications.clone(),
                projects: self.projects.clone(),
            },
            reload_script: None,
        }
    }
}

/// Directory that relative config paths are resolved against.
pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_uses_defaults() {
        let temp = tempdir().unwrap();
        let config = load(&temp.path().join("site.toml")).unwrap();

        assert_eq!(config.site.title, "My Notebooks");
        assert_eq!(config.paths.output, PathBuf::from("build"));
        assert!(config.build.minify);
        assert_eq!(config.build.featured_per_category, 2);
        assert_eq!(config.build.featured_total, 6);
        assert_eq!(config.watch.port, 35729);
        assert!(config.watch.extensions.iter().any(|e| e == "ipynb"));
        // site.toml is read once per session, so it is not watched
        assert!(!config.watch.extensions.iter().any(|e| e == "toml"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("site.toml");
        fs::write(&path, "[site\ntitle = ").unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn reads_sections_and_pages() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("site.toml");
        fs::write(
            &path,
            r#"
[site]
title = "Field Notes"
author = "A. Writer"

[paths]
output = "public"

[build]
minify = false
featured_total = 3

[render]
navigation = false

[watch]
interval_ms = 250
port = 4000

[about]
bio = "Hello"

[[publications]]
title = "Paper One"
year = 2023

[[projects]]
name = "Tool"
"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        let build = config.build_config(temp.path());

        assert_eq!(build.site.title, "Field Notes");
        assert_eq!(build.site.author, "A. Writer");
        assert_eq!(build.output_dir, temp.path().join("public"));
        assert_eq!(build.notebooks_dir, temp.path().join("notebooks"));
        assert!(!build.minify);
        assert_eq!(build.featured.total, 3);
        assert_eq!(build.featured.per_category, 2);
        assert!(!build.render.navigation);
        assert!(build.render.front_matter);
        assert_eq!(build.pages.about["bio"], "Hello");
        assert_eq!(build.pages.publications[0]["year"], 2023);
        assert_eq!(build.pages.projects[0]["name"], "Tool");
        assert_eq!(config.watch.interval(), Duration::from_millis(250));
        assert_eq!(config.watch.port, 4000);
        assert_eq!(config.watch.host, "127.0.0.1");
    }

    #[test]
    fn base_dir_of_bare_file_is_cwd() {
        assert_eq!(base_dir(Path::new("site.toml")), PathBuf::from("."));
        assert_eq!(base_dir(Path::new("blog/site.toml")), PathBuf::from("blog"));
    }
}
