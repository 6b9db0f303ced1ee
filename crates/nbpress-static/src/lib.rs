//! Static site generator for notebook blogs.
//!
//! Turns a directory tree of executed notebooks into a themed HTML site:
//! notebooks are grouped by directory into categories, rendered with their
//! images relocated into a content-addressed `static/` directory, and indexed
//! for the homepage and category listings.

pub mod assets;
pub mod builder;
pub mod relocate;
pub mod render;
pub mod scanner;
pub mod site;
pub mod templates;

pub use builder::{BuildConfig, BuildError, BuildReport, SiteBuilder};
pub use relocate::{AssetRelocator, RelocateError};
pub use render::{NotebookRenderer, RenderOptions, RenderedNotebook};
pub use scanner::{scan_notebooks, Category, NotebookCatalog};
pub use site::{select_featured, FeaturePolicy, PostEntry, SiteAssembler, SiteIndex, StaticPages};
pub use templates::{RenderContext, SiteChrome, SiteInfo, TemplateEngine};
