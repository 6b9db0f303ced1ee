//! Notebook parsing for nbpress.
//!
//! This crate reads nbformat v4 notebooks, extracts the `POST_SETTINGS`
//! front matter from the leading code cell without evaluating it, and renders
//! markdown cells with stable heading anchors for the navigation menu.

pub mod frontmatter;
pub mod literal;
pub mod markdown;
pub mod notebook;

pub use frontmatter::{extract_front_matter, FrontMatter, FrontMatterError, PostSettings};
pub use literal::{parse_literal, LiteralError};
pub use markdown::{
    build_toc, escape_html, render_markdown, slugify, AnchorSet, Heading, RenderedMarkdown,
    TocNode,
};
pub use notebook::{Cell, MimeBundle, Notebook, NotebookError, Output};
