//! Notebook to HTML rendering.
//!
//! One renderer with independently switchable passes: front-matter
//! extraction, heading navigation, light/dark figure variants and the final
//! template wrap. Each pass works on derived fragments; the notebook itself is
//! never modified.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use nbpress_notebook::{
    build_toc, escape_html, extract_front_matter, render_markdown, AnchorSet, Cell, FrontMatter,
    FrontMatterError, Heading, MimeBundle, Notebook, Output, PostSettings, TocNode,
};

use crate::scanner::title_case;
use crate::templates::{CategoryLink, RenderContext, TemplateEngine};

/// Template used for notebook pages.
pub const NOTEBOOK_TEMPLATE: &str = "notebook.html";

/// Representation preference for rich outputs, best first.
const MIME_PRIORITY: &[&str] = &[
    "text/html",
    "image/svg+xml",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "text/markdown",
    "text/latex",
    "text/plain",
];

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// Which rendering passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Parse `POST_SETTINGS` from the first code cell
    pub front_matter: bool,
    /// Anchor headings and prepend a navigation menu
    pub navigation: bool,
    /// Wrap figures for light/dark display
    pub theme_variants: bool,
    /// Leave the settings cell out of the page
    pub hide_settings_cell: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            front_matter: true,
            navigation: true,
            theme_variants: true,
            hide_settings_cell: true,
        }
    }
}

/// A notebook rendered to HTML fragments.
#[derive(Debug, Clone)]
pub struct RenderedNotebook {
    pub title: String,
    /// Content units in page order; the navigation menu comes first
    pub units: Vec<String>,
    pub toc: Vec<TocNode>,
}

impl RenderedNotebook {
    pub fn content(&self) -> String {
        self.units.concat()
    }
}

#[derive(Serialize)]
struct NotebookPage<'a> {
    title: &'a str,
    content: String,
    toc: &'a [TocNode],
    settings: Option<&'a PostSettings>,
    category: Option<&'a CategoryLink>,
}

/// Renders notebooks to page HTML.
#[derive(Debug, Clone, Default)]
pub struct NotebookRenderer {
    options: RenderOptions,
}

impl NotebookRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    /// Front matter of the notebook, or `None` when the pass is disabled.
    pub fn extract_front_matter(
        &self,
        notebook: &Notebook,
    ) -> Result<Option<FrontMatter>, FrontMatterError> {
        if !self.options.front_matter {
            return Ok(None);
        }
        extract_front_matter(notebook)
    }

    /// Render every cell.
    ///
    /// `rewrite_assets` is applied to markdown sources before rendering so
    /// image references can be relocated; `stem` supplies the title when the
    /// notebook has no front matter.
    pub fn render(
        &self,
        notebook: &Notebook,
        front_matter: Option<&FrontMatter>,
        stem: &str,
        rewrite_assets: &mut dyn FnMut(&str) -> String,
    ) -> RenderedNotebook {
        let hidden = front_matter
            .filter(|_| self.options.hide_settings_cell)
            .map(|fm| fm.cell_index);
        let language = notebook.language();

        let mut anchors = AnchorSet::new();
        let mut headings = Vec::new();
        let mut units = Vec::new();

        for (index, cell) in notebook.cells.iter().enumerate() {
            if Some(index) == hidden {
                continue;
            }

            match cell {
                Cell::Markdown { source, .. } => {
                    let source = rewrite_assets(source);
                    let anchors = self.options.navigation.then_some(&mut anchors);
                    let rendered = render_markdown(&source, anchors);
                    headings.extend(rendered.headings);
                    units.push(format!(
                        "<div class=\"nb-cell nb-markdown-cell\">\n{}</div>\n",
                        rendered.html
                    ));
                }
                Cell::Code {
                    source, outputs, ..
                } => {
                    if source.trim().is_empty() && outputs.is_empty() {
                        continue;
                    }
                    units.push(self.render_code_cell(source, outputs, language));
                }
                Cell::Raw { source, metadata } => {
                    let format = metadata.get("format").and_then(|f| f.as_str());
                    if format == Some("text/html") {
                        units.push(format!("<div class=\"nb-cell nb-raw-cell\">{}</div>\n", source));
                    }
                }
            }
        }

        let toc = if self.options.navigation {
            self.inject_navigation(&mut units, &headings)
        } else {
            Vec::new()
        };

        let title = match front_matter {
            Some(fm) if !fm.settings.title().is_empty() => fm.settings.title().to_string(),
            _ => title_case(stem),
        };

        RenderedNotebook { title, units, toc }
    }

    /// Build the table of contents and prepend it as the first content unit.
    ///
    /// Nothing is inserted when the notebook has no headings.
    pub fn inject_navigation(&self, units: &mut Vec<String>, headings: &[Heading]) -> Vec<TocNode> {
        let toc = build_toc(headings);
        if !toc.is_empty() {
            let mut nav = String::from("<nav id=\"nb-nav-menu\" class=\"nb-nav\">\n<h2>Contents</h2>\n");
            write_toc(&mut nav, &toc);
            nav.push_str("</nav>\n");
            units.insert(0, nav);
        }
        toc
    }

    /// Render outputs, pairing light figures with an explicit dark variant.
    ///
    /// A PNG/JPEG figure followed by an output tagged `{"theme": "dark"}`
    /// becomes one `<picture>` with a dark-scheme source. A figure without a
    /// dark partner is marked for CSS inversion. The light bytes always stay
    /// in the `<img>` fallback.
    pub fn render_theme_variants(&self, outputs: &[Output]) -> Vec<String> {
        let mut rendered = Vec::with_capacity(outputs.len());
        let mut i = 0;

        while i < outputs.len() {
            let output = &outputs[i];
            match themeable_image(output) {
                Some(light) if output.theme() != Some("dark") => {
                    let dark = outputs
                        .get(i + 1)
                        .filter(|next| next.theme() == Some("dark"))
                        .and_then(themeable_image);
                    if dark.is_some() {
                        i += 1;
                    }
                    rendered.push(picture(&light, dark.as_ref()));
                }
                _ => rendered.push(render_output(output)),
            }
            i += 1;
        }

        rendered
    }

    /// Wrap a rendered notebook in the page template.
    pub fn to_html(
        &self,
        templates: &TemplateEngine,
        ctx: &RenderContext<'_>,
        rendered: &RenderedNotebook,
        settings: Option<&PostSettings>,
        category: Option<&CategoryLink>,
    ) -> Result<String, minijinja::Error> {
        let page = NotebookPage {
            title: &rendered.title,
            content: rendered.content(),
            toc: &rendered.toc,
            settings,
            category,
        };
        templates.render_page(NOTEBOOK_TEMPLATE, ctx, &page)
    }

    fn render_code_cell(&self, source: &str, outputs: &[Output], language: &str) -> String {
        let mut html = String::from("<div class=\"nb-cell nb-code-cell\">\n");

        if !source.trim().is_empty() {
            let _ = write!(
                html,
                "<div class=\"nb-input\"><pre><code class=\"language-{}\">{}</code></pre></div>\n",
                escape_html(language),
                escape_html(source.trim_end())
            );
        }

        let rendered = if self.options.theme_variants {
            self.render_theme_variants(outputs)
        } else {
            outputs.iter().map(render_output).collect()
        };

        if !rendered.is_empty() {
            html.push_str("<div class=\"nb-outputs\">\n");
            for output in rendered {
                html.push_str(&output);
            }
            html.push_str("</div>\n");
        }

        html.push_str("</div>\n");
        html
    }
}

fn write_toc(out: &mut String, nodes: &[TocNode]) {
    out.push_str("<ul>\n");
    for node in nodes {
        let _ = write!(
            out,
            "<li class=\"nb-nav-level-{}\"><a href=\"#{}\">{}</a>",
            node.level,
            escape_html(&node.id),
            escape_html(&node.title)
        );
        if !node.children.is_empty() {
            out.push('\n');
            write_toc(out, &node.children);
        }
        out.push_str("</li>\n");
    }
    out.push_str("</ul>\n");
}

fn preferred_mime(data: &MimeBundle) -> Option<&'static str> {
    MIME_PRIORITY.iter().copied().find(|mime| data.contains(mime))
}

/// A PNG/JPEG figure as `(mime, base64 payload)`.
fn themeable_image(output: &Output) -> Option<(&'static str, String)> {
    let data = output.data()?;
    match preferred_mime(data)? {
        mime @ ("image/png" | "image/jpeg") => data.text(mime).map(|payload| (mime, payload)),
        _ => None,
    }
}

fn data_uri(mime: &str, payload: &str) -> String {
    let compact: String = payload.split_whitespace().collect();
    format!("data:{};base64,{}", mime, compact)
}

fn picture(light: &(&str, String), dark: Option<&(&str, String)>) -> String {
    let light_src = data_uri(light.0, &light.1);
    match dark {
        Some((mime, payload)) => {
            let dark_src = data_uri(mime, payload);
            format!(
                "<figure class=\"nb-output nb-figure\"><picture>\
                 <source media=\"(prefers-color-scheme: dark)\" srcset=\"{dark}\">\
                 <img src=\"{light}\" data-dark-src=\"{dark}\" alt=\"\">\
                 </picture></figure>\n",
                dark = dark_src,
                light = light_src
            )
        }
        None => format!(
            "<figure class=\"nb-output nb-figure nb-figure-auto-dark\"><picture>\
             <img src=\"{}\" alt=\"\"></picture></figure>\n",
            light_src
        ),
    }
}

/// Render one output without theme handling.
fn render_output(output: &Output) -> String {
    match output {
        Output::Stream { name, text } => format!(
            "<pre class=\"nb-output nb-stream nb-{}\">{}</pre>\n",
            escape_html(name),
            escape_html(&strip_ansi(text))
        ),
        Output::Error {
            ename,
            evalue,
            traceback,
        } => {
            let text = if traceback.is_empty() {
                format!("{}: {}", ename, evalue)
            } else {
                traceback.join("\n")
            };
            format!(
                "<pre class=\"nb-output nb-error\">{}</pre>\n",
                escape_html(&strip_ansi(&text))
            )
        }
        Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => {
            render_bundle(data)
        }
    }
}

fn render_bundle(data: &MimeBundle) -> String {
    let Some(mime) = preferred_mime(data) else {
        return String::new();
    };
    let Some(text) = data.text(mime) else {
        return String::new();
    };

    match mime {
        "text/html" => format!("<div class=\"nb-output nb-html\">{}</div>\n", text),
        "image/svg+xml" => format!("<div class=\"nb-output nb-svg\">{}</div>\n", text),
        "text/markdown" => format!(
            "<div class=\"nb-output nb-markdown\">{}</div>\n",
            render_markdown(&text, None).html
        ),
        "text/latex" => format!(
            "<div class=\"nb-output nb-latex\">{}</div>\n",
            escape_html(&text)
        ),
        "text/plain" => format!(
            "<pre class=\"nb-output nb-text\">{}</pre>\n",
            escape_html(&strip_ansi(&text))
        ),
        image => format!(
            "<img class=\"nb-output nb-image\" src=\"{}\" alt=\"\">\n",
            data_uri(image, &text)
        ),
    }
}

/// Remove terminal color codes from tracebacks and streams.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}
