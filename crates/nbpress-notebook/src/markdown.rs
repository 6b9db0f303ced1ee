//! Markdown cell rendering with heading anchors.

use std::collections::HashMap;
use std::sync::LazyLock;

use pulldown_cmark::{html, CowStr, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use regex::Regex;
use serde::Serialize;

/// A heading found in a markdown cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heading {
    /// Heading text
    pub title: String,
    /// Anchor ID
    pub id: String,
    /// Heading level (1-6)
    pub level: u8,
}

/// A table of contents node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TocNode {
    pub title: String,
    pub id: String,
    pub level: u8,
    pub children: Vec<TocNode>,
}

/// Rendered markdown cell.
#[derive(Debug, Clone, Default)]
pub struct RenderedMarkdown {
    pub html: String,
    pub headings: Vec<Heading>,
}

/// Anchor ids already used on a page.
///
/// Generated ids that collide get a numeric suffix; custom ids are kept
/// verbatim even when they collide.
#[derive(Debug, Default)]
pub struct AnchorSet {
    seen: HashMap<String, usize>,
}

impl AnchorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a custom id.
    pub fn claim(&mut self, id: &str) {
        self.seen.entry(id.to_string()).or_insert(0);
    }

    /// Return `base`, or `base-N` for the first unused N.
    pub fn unique(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "section" } else { base };

        if !self.seen.contains_key(base) {
            self.seen.insert(base.to_string(), 0);
            return base.to_string();
        }

        let mut n = self.seen.get(base).copied().unwrap_or(0);
        loop {
            n += 1;
            let candidate = format!("{}-{}", base, n);
            if !self.seen.contains_key(&candidate) {
                self.seen.insert(base.to_string(), n);
                self.seen.insert(candidate.clone(), 0);
                return candidate;
            }
        }
    }
}

struct PendingHeading<'a> {
    level: HeadingLevel,
    id: Option<CowStr<'a>>,
    classes: Vec<CowStr<'a>>,
    attrs: Vec<(CowStr<'a>, Option<CowStr<'a>>)>,
    inner: Vec<Event<'a>>,
    text: String,
    /// Id from an inline `<a id="...">` marker
    marker: Option<String>,
    /// The marker's `</a>` is still to come
    marker_open: bool,
}

static ANCHOR_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<a\s+(?:[^>]*?\s)?(?:id|name)\s*=\s*["']([^"']+)["'][^>]*>$"#).unwrap()
});

fn options() -> Options {
    Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_HEADING_ATTRIBUTES
        | Options::ENABLE_MATH
}

/// Render a markdown cell to HTML.
///
/// When `anchors` is given, every heading receives an id: a custom
/// `{#id}` attribute or an inline `<a id="...">` marker is preserved,
/// otherwise one is derived from the
/// heading text with [`slugify`]. Headings inside fenced code are plain
/// code and never become anchors.
pub fn render_markdown(source: &str, mut anchors: Option<&mut AnchorSet>) -> RenderedMarkdown {
    let mut events = Vec::new();
    let mut headings = Vec::new();
    let mut pending: Option<PendingHeading> = None;

    for event in Parser::new_ext(source, options()) {
        match event {
            Event::Start(Tag::Heading {
                level,
                id,
                classes,
                attrs,
            }) if anchors.is_some() => {
                pending = Some(PendingHeading {
                    level,
                    id,
                    classes,
                    attrs,
                    inner: Vec::new(),
                    text: String::new(),
                    marker: None,
                    marker_open: false,
                });
            }

            Event::End(TagEnd::Heading(_)) if pending.is_some() => {
                let (Some(heading), Some(anchors)) = (pending.take(), anchors.as_mut()) else {
                    continue;
                };

                let title = heading.text.trim().to_string();
                let custom = heading.id.map(|id| id.to_string()).or(heading.marker);
                let id = match custom {
                    Some(custom) => {
                        anchors.claim(&custom);
                        custom
                    }
                    None => anchors.unique(&slugify(&title)),
                };

                headings.push(Heading {
                    title,
                    id: id.clone(),
                    level: heading.level as u8,
                });

                let link = format!(
                    r##"<a class="anchor-link" href="#{}">¶</a>"##,
                    escape_html(&id)
                );
                events.push(Event::Start(Tag::Heading {
                    level: heading.level,
                    id: Some(CowStr::from(id)),
                    classes: heading.classes,
                    attrs: heading.attrs,
                }));
                events.extend(heading.inner);
                events.push(Event::InlineHtml(link.into()));
                events.push(Event::End(TagEnd::Heading(heading.level)));
            }

            other => match pending.as_mut() {
                Some(heading) => {
                    // The marker's id moves onto the heading element
                    if let Event::InlineHtml(html) = &other {
                        let html = html.trim();
                        if heading.marker_open && html == "</a>" {
                            heading.marker_open = false;
                            continue;
                        }
                        if heading.marker.is_none() {
                            if let Some(caps) = ANCHOR_MARKER.captures(html) {
                                heading.marker = Some(caps[1].to_string());
                                heading.marker_open = true;
                                continue;
                            }
                        }
                    }
                    heading.marker_open = false;
                    if let Event::Text(t) | Event::Code(t) | Event::InlineMath(t) = &other {
                        heading.text.push_str(t);
                    }
                    heading.inner.push(math_to_html(other));
                }
                None => events.push(math_to_html(other)),
            },
        }
    }

    let mut html_output = String::new();
    html::push_html(&mut html_output, events.into_iter());

    RenderedMarkdown {
        html: html_output,
        headings,
    }
}

/// Emit math with MathJax delimiters so the page script can typeset it.
fn math_to_html(event: Event<'_>) -> Event<'_> {
    match event {
        Event::InlineMath(math) => {
            Event::InlineHtml(format!("\\({}\\)", escape_html(&math)).into())
        }
        Event::DisplayMath(math) => {
            Event::InlineHtml(format!("\\[{}\\]", escape_html(&math)).into())
        }
        other => other,
    }
}

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());

/// Convert heading text to an anchor id.
///
/// Lowercases, strips non-word characters and collapses runs of whitespace
/// and hyphens into a single hyphen.
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    SEPARATORS
        .replace_all(stripped.trim(), "-")
        .trim_matches('-')
        .to_string()
}

/// Nest flat headings into a tree by level.
pub fn build_toc(headings: &[Heading]) -> Vec<TocNode> {
    fn attach(stack: &mut [TocNode], roots: &mut Vec<TocNode>, node: TocNode) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    let mut roots = Vec::new();
    let mut stack: Vec<TocNode> = Vec::new();

    for heading in headings {
        while stack.last().is_some_and(|top| top.level >= heading.level) {
            if let Some(done) = stack.pop() {
                attach(&mut stack, &mut roots, done);
            }
        }
        stack.push(TocNode {
            title: heading.title.clone(),
            id: heading.id.clone(),
            level: heading.level,
            children: Vec::new(),
        });
    }

    while let Some(done) = stack.pop() {
        attach(&mut stack, &mut roots, done);
    }

    roots
}

/// Escape text for use in HTML content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn heading(title: &str, id: &str, level: u8) -> Heading {
        Heading {
            title: title.to_string(),
            id: id.to_string(),
            level,
        }
    }

    #[test]
    fn generates_anchor_from_heading_text() {
        let mut anchors = AnchorSet::new();
        let out = render_markdown("## My Section\n\ntext", Some(&mut anchors));

        assert_eq!(out.headings, vec![heading("My Section", "my-section", 2)]);
        assert!(out.html.contains(r#"<h2 id="my-section">"#));
        assert!(out.html.contains(r##"href="#my-section""##));
    }

    #[test]
    fn preserves_custom_anchor() {
        let mut anchors = AnchorSet::new();
        let out = render_markdown("## My Section {#custom-Id}\n", Some(&mut anchors));

        assert_eq!(out.headings, vec![heading("My Section", "custom-Id", 2)]);
        assert!(out.html.contains(r#"id="custom-Id""#));
    }

    #[test]
    fn preserves_inline_anchor_marker() {
        let mut anchors = AnchorSet::new();
        let out = render_markdown(
            "## My Section <a id=\"custom-id\"></a>\n### Next <a name='other'></a>\n",
            Some(&mut anchors),
        );

        assert_eq!(
            out.headings,
            vec![heading("My Section", "custom-id", 2), heading("Next", "other", 3)]
        );
        assert!(out.html.contains(r#"<h2 id="custom-id">"#));
        assert!(!out.html.contains(r#"<a id="custom-id">"#));
        assert!(!out.html.contains("my-section"));
    }

    #[test]
    fn skips_headings_in_fenced_code() {
        let mut anchors = AnchorSet::new();
        let out = render_markdown("```python\n# not a heading\n```\n# Real\n", Some(&mut anchors));

        assert_eq!(out.headings, vec![heading("Real", "real", 1)]);
    }

    #[test]
    fn deduplicates_generated_anchors() {
        let mut anchors = AnchorSet::new();
        let first = render_markdown("# Results", Some(&mut anchors));
        let second = render_markdown("# Results\n## Results", Some(&mut anchors));

        assert_eq!(first.headings[0].id, "results");
        assert_eq!(second.headings[0].id, "results-1");
        assert_eq!(second.headings[1].id, "results-2");
    }

    #[test]
    fn without_anchors_headings_are_untouched() {
        let out = render_markdown("# Title", None);

        assert!(out.headings.is_empty());
        assert!(out.html.contains("<h1>Title</h1>"));
    }

    #[test]
    fn renders_math_with_mathjax_delimiters() {
        let out = render_markdown("Energy $E = mc^2$ and $a_b < c$", None);

        assert!(out.html.contains(r"\(E = mc^2\)"));
        assert!(out.html.contains(r"\(a_b &lt; c\)"));
    }

    #[test]
    fn slugify_works() {
        assert_eq!(slugify("My Section"), "my-section");
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Multiple   Spaces  "), "multiple-spaces");
        assert_eq!(slugify("Step 1 - Load data"), "step-1-load-data");
        assert_eq!(slugify("snake_case name"), "snake_case-name");
    }

    #[test]
    fn builds_nested_toc() {
        let toc = build_toc(&[
            heading("Intro", "intro", 1),
            heading("Setup", "setup", 2),
            heading("Details", "details", 3),
            heading("Usage", "usage", 2),
            heading("Appendix", "appendix", 1),
        ]);

        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].children.len(), 2);
        assert_eq!(toc[0].children[0].children[0].id, "details");
        assert_eq!(toc[0].children[1].id, "usage");
        assert!(toc[1].children.is_empty());
    }
}
