//! Single-run site builder.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use nbpress_notebook::Notebook;

use crate::assets::AssetPipeline;
use crate::relocate::AssetRelocator;
use crate::render::{NotebookRenderer, RenderOptions};
use crate::scanner::{scan_notebooks, Category, NotebookCatalog};
use crate::site::{
    category_link, write_output, FeaturePolicy, PostEntry, SiteAssembler, SiteIndex, StaticPages,
    SITE_PAGES,
};
use crate::templates::{
    link_prefix, CategoryLink, RenderContext, SiteChrome, SiteInfo, TemplateEngine,
};

/// Configuration for building a site.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Notebook source directory
    pub notebooks_dir: PathBuf,

    /// Templates, styles, scripts and static files
    pub resources_dir: PathBuf,

    /// Output directory
    pub output_dir: PathBuf,

    /// Minify CSS output
    pub minify: bool,

    /// Empty the output directory before building
    pub clean: bool,

    pub site: SiteInfo,
    pub render: RenderOptions,
    pub featured: FeaturePolicy,
    pub pages: StaticPages,

    /// Live-reload client URL injected into every page
    pub reload_script: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            notebooks_dir: PathBuf::from("notebooks"),
            resources_dir: PathBuf::from("resources"),
            output_dir: PathBuf::from("build"),
            minify: true,
            clean: false,
            site: SiteInfo {
                title: "My Notebooks".to_string(),
                ..Default::default()
            },
            render: RenderOptions::default(),
            featured: FeaturePolicy::default(),
            pages: StaticPages::default(),
            reload_script: None,
        }
    }
}

/// Result of a build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// HTML pages written
    pub pages: usize,

    /// Notebooks rendered
    pub notebooks: usize,

    /// Notebooks that failed and were left out
    pub skipped: usize,

    /// Assets relocated out of notebook directories
    pub assets: usize,

    /// Total build time in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,
}

/// Errors that can occur during build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Notebook directory not found: {0}")]
    SourceNotFound(String),

    #[error("Cannot prepare output directory {path}: {message}")]
    OutputRoot { path: String, message: String },

    #[error("Failed to read: {0}")]
    ReadError(String),

    #[error("Failed to parse notebook: {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to render template: {0}")]
    TemplateError(String),

    #[error("Failed to write output: {0}")]
    WriteError(String),

    #[error("{path} would overwrite the generated page {page}")]
    PageConflict { path: String, page: String },
}

/// Builds the whole site from a notebook tree.
pub struct SiteBuilder {
    config: BuildConfig,
    renderer: NotebookRenderer,
}

impl SiteBuilder {
    pub fn new(config: BuildConfig) -> Self {
        let renderer = NotebookRenderer::new(config.render);
        Self { config, renderer }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build the site.
    ///
    /// Only a missing notebook root or an unusable output directory fail the
    /// build; a notebook that cannot be read or rendered is logged and left
    /// out.
    pub fn build(&self) -> Result<BuildReport, BuildError> {
        let start = Instant::now();
        let output = &self.config.output_dir;

        // Setup failures must not touch the previous output
        let catalog = scan_notebooks(&self.config.notebooks_dir, std::slice::from_ref(output))?;
        let total: usize = catalog.values().map(Vec::len).sum();
        tracing::info!("Found {} notebooks in {} categories", total, catalog.len());

        self.prepare_output()?;

        let assets =
            AssetPipeline::copy_resources(&self.config.resources_dir, output, self.config.minify)?;

        let templates = TemplateEngine::new(Some(&self.config.resources_dir.join("templates")));
        let chrome = SiteChrome {
            site: self.config.site.clone(),
            styles: assets.styles,
            scripts: assets.scripts,
            reload_script: self.config.reload_script.clone(),
            categories: catalog
                .iter()
                .map(|(category, paths)| category_link(category, paths.len()))
                .collect(),
        };

        let mut pass = NotebookPass {
            builder: self,
            templates: &templates,
            chrome: &chrome,
            relocator: AssetRelocator::new(output),
            reserved: reserved_pages(&catalog),
        };

        let mut index = SiteIndex::new();
        let mut notebooks = 0;
        let mut skipped = 0;

        for (category, paths) in &catalog {
            index.add_category(category.clone());
            let link = category_link(category, paths.len());

            for path in paths {
                match pass.build_notebook(path, category, &link) {
                    Ok(entry) => {
                        notebooks += 1;
                        if let Some(entry) = entry {
                            index.insert(category.clone(), entry);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", path.display(), e);
                        skipped += 1;
                    }
                }
            }
        }

        let relocated = pass.relocator.relocated_count();

        let site_pages = SiteAssembler::new(&templates, &chrome, output, self.config.featured)
            .assemble(&index, &self.config.pages)?;

        let duration = start.elapsed();

        Ok(BuildReport {
            pages: notebooks + site_pages,
            notebooks,
            skipped,
            assets: relocated,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            output_dir: output.clone(),
        })
    }

    fn prepare_output(&self) -> Result<(), BuildError> {
        let output = &self.config.output_dir;
        let root_error = |e: std::io::Error| BuildError::OutputRoot {
            path: output.display().to_string(),
            message: e.to_string(),
        };

        if self.config.clean && output.is_dir() {
            if contains(output, &self.config.notebooks_dir) {
                tracing::warn!(
                    "Not cleaning {}: it contains the notebook directory",
                    output.display()
                );
            } else {
                fs::remove_dir_all(output).map_err(root_error)?;
            }
        }

        fs::create_dir_all(output).map_err(root_error)
    }
}

/// `outer` is `inner` or one of its ancestors.
fn contains(outer: &Path, inner: &Path) -> bool {
    match (outer.canonicalize(), inner.canonicalize()) {
        (Ok(outer), Ok(inner)) => inner.starts_with(outer),
        _ => false,
    }
}

/// Pages the site assembler writes; a notebook may not take their place.
fn reserved_pages(catalog: &NotebookCatalog) -> BTreeSet<String> {
    SITE_PAGES
        .iter()
        .map(|page| page.to_string())
        .chain(catalog.keys().map(Category::index_page))
        .collect()
}

/// Per-build state shared by every notebook.
struct NotebookPass<'a> {
    builder: &'a SiteBuilder,
    templates: &'a TemplateEngine,
    chrome: &'a SiteChrome,
    relocator: AssetRelocator,
    reserved: BTreeSet<String>,
}

impl NotebookPass<'_> {
    /// Render one notebook page. Returns its index entry when it has front
    /// matter.
    fn build_notebook(
        &mut self,
        path: &Path,
        category: &Category,
        link: &CategoryLink,
    ) -> Result<Option<PostEntry>, BuildError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let page_path = category.page_url(&stem);
        if self.reserved.contains(&page_path) {
            return Err(BuildError::PageConflict {
                path: path.display().to_string(),
                page: page_path,
            });
        }

        let source = fs::read_to_string(path)
            .map_err(|e| BuildError::ReadError(format!("{}: {}", path.display(), e)))?;

        let notebook = Notebook::from_json(&source).map_err(|e| BuildError::ParseError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let renderer = &self.builder.renderer;
        let mut front_matter = match renderer.extract_front_matter(&notebook) {
            Ok(front_matter) => front_matter,
            Err(e) => {
                tracing::warn!("{}: {}; page will not be indexed", path.display(), e);
                None
            }
        };

        let base_dir = path.parent().unwrap_or(Path::new(""));
        let prefix = link_prefix(category.depth());

        if let Some(front_matter) = front_matter.as_mut() {
            self.relocator
                .relocate_settings_image(&mut front_matter.settings, base_dir);
        }

        let relocator = &mut self.relocator;
        let rendered = renderer.render(&notebook, front_matter.as_ref(), &stem, &mut |text: &str| {
            relocator.rewrite_text(text, base_dir, &prefix)
        });

        let active_page = category.index_page();
        let ctx = RenderContext::new(self.chrome, &page_path, &active_page);
        let html = renderer
            .to_html(
                self.templates,
                &ctx,
                &rendered,
                front_matter.as_ref().map(|fm| &fm.settings),
                Some(link),
            )
            .map_err(|e| BuildError::TemplateError(format!("{}: {}", path.display(), e)))?;

        write_output(&self.builder.config.output_dir.join(&page_path), &html)?;
        tracing::debug!("Rendered {} -> {}", path.display(), page_path);

        Ok(front_matter.map(|fm| PostEntry {
            title: rendered.title,
            category_name: category.name(),
            url: page_path,
            image: fm.settings.image().to_string(),
            settings: fm.settings,
            source: path.to_path_buf(),
        }))
    }
}
