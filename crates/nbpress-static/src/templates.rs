//! Page templates.
//!
//! Templates are looked up in `<resources>/templates/` first and fall back to
//! the defaults embedded below. Link helpers read the `root_prefix` of the
//! page being rendered, so the same template produces correct relative links
//! at any output depth.

use std::path::Path;

use minijinja::{context, Environment, State, UndefinedBehavior, Value};
use serde::Serialize;

use nbpress_notebook::escape_html;

/// Site-wide values from the `[site]` config table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteInfo {
    pub title: String,
    pub author: String,
    pub description: String,
}

/// A category link for the site header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryLink {
    pub name: String,
    /// Root-relative URL of the category page
    pub url: String,
    pub count: usize,
}

/// Values shared by every page of one build.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteChrome {
    pub site: SiteInfo,
    /// Root-relative stylesheet paths
    pub styles: Vec<String>,
    /// Root-relative script paths
    pub scripts: Vec<String>,
    /// Absolute URL of the live-reload client, in watch mode
    pub reload_script: Option<String>,
    pub categories: Vec<CategoryLink>,
}

/// Per-render context.
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext<'a> {
    #[serde(flatten)]
    pub chrome: &'a SiteChrome,
    /// Directory levels between the page and the output root
    pub depth: usize,
    /// `../` repeated `depth` times
    pub root_prefix: String,
    /// Root-relative path of the page being rendered
    pub page_path: &'a str,
    /// Navigation key highlighted in the header
    pub active_page: &'a str,
}

impl<'a> RenderContext<'a> {
    pub fn new(chrome: &'a SiteChrome, page_path: &'a str, active_page: &'a str) -> Self {
        let depth = depth_of(page_path);
        Self {
            chrome,
            depth,
            root_prefix: link_prefix(depth),
            page_path,
            active_page,
        }
    }
}

/// Number of directories above a root-relative output path.
pub fn depth_of(page_path: &str) -> usize {
    page_path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .count()
        .saturating_sub(1)
}

/// Relative prefix from a page at `depth` back to the output root.
pub fn link_prefix(depth: usize) -> String {
    "../".repeat(depth)
}

/// Template engine using minijinja.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine, preferring templates found in `template_dir`.
    pub fn new(template_dir: Option<&Path>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);

        let overrides = template_dir
            .filter(|dir| dir.is_dir())
            .map(|dir| minijinja::path_loader(dir.to_path_buf()));

        env.set_loader(move |name| {
            if let Some(load) = &overrides {
                if let Some(source) = load(name)? {
                    return Ok(Some(source));
                }
            }
            Ok(default_template(name).map(str::to_string))
        });

        env.add_function("url_for_static", url_for_static);
        env.add_function("url_for_page", url_for_page);

        Self { env }
    }

    /// Render `template` with the page values merged over the render context.
    pub fn render_page<S: Serialize>(
        &self,
        template: &str,
        ctx: &RenderContext<'_>,
        page: &S,
    ) -> Result<String, minijinja::Error> {
        let tmpl = self.env.get_template(template)?;
        tmpl.render(context! {
            ..Value::from_serialize(page),
            ..Value::from_serialize(ctx)
        })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

fn root_prefix(state: &State) -> String {
    state
        .lookup("root_prefix")
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Absolute paths, fragments and anything with a URL scheme.
fn is_external(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('#') {
        return true;
    }
    path.split_once(':').is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

/// `static/abc.png` -> `../../static/abc.png` on a depth-2 page.
fn url_for_static(state: &State, path: String) -> Value {
    if is_external(&path) {
        return Value::from_safe_string(escape_html(&path));
    }
    Value::from_safe_string(escape_html(&format!("{}{}", root_prefix(state), path)))
}

/// Link to another page by its root-relative path.
fn url_for_page(state: &State, path: String) -> Value {
    if path.is_empty() {
        return url_for_static(state, "index.html".to_string());
    }
    url_for_static(state, path)
}

/// Embedded default template by name.
pub fn default_template(name: &str) -> Option<&'static str> {
    match name {
        "base.html" => Some(BASE_TEMPLATE),
        "notebook.html" => Some(NOTEBOOK_TEMPLATE),
        "homepage.html" => Some(HOMEPAGE_TEMPLATE),
        "category.html" => Some(CATEGORY_TEMPLATE),
        "about.html" => Some(ABOUT_TEMPLATE),
        "publications.html" => Some(PUBLICATIONS_TEMPLATE),
        "portfolio.html" => Some(PORTFOLIO_TEMPLATE),
        _ => None,
    }
}

const BASE_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{% block title %}{{ title }} - {{ site.title }}{% endblock %}</title>
  {% if site.description %}<meta name="description" content="{{ site.description }}">
  {% endif %}{% for style in styles %}<link rel="stylesheet" href="{{ url_for_static(style) }}">
  {% endfor %}<script>
    window.MathJax = { tex: { inlineMath: [['\\(', '\\)']], displayMath: [['\\[', '\\]']] } };
  </script>
  <script defer src="https://cdn.jsdelivr.net/npm/mathjax@3/es5/tex-mml-chtml.js"></script>
</head>
<body>
  <header class="site-header">
    <a class="site-title" href="{{ url_for_page('index.html') }}">{{ site.title }}</a>
    <nav class="site-nav">
      <a href="{{ url_for_page('index.html') }}"{% if active_page == "home" %} class="active"{% endif %}>Home</a>
      {% for category in categories %}<a href="{{ url_for_page(category.url) }}"{% if active_page == category.url %} class="active"{% endif %}>{{ category.name }}</a>
      {% endfor %}<a href="{{ url_for_page('about.html') }}"{% if active_page == "about" %} class="active"{% endif %}>About</a>
      <a href="{{ url_for_page('publications.html') }}"{% if active_page == "publications" %} class="active"{% endif %}>Publications</a>
      <a href="{{ url_for_page('portfolio.html') }}"{% if active_page == "portfolio" %} class="active"{% endif %}>Portfolio</a>
    </nav>
    <button class="theme-toggle" type="button" aria-label="Toggle dark mode">&#9680;</button>
  </header>
  <main class="site-main">
    {% block content %}{% endblock %}
  </main>
  <footer class="site-footer">
    {% if site.author %}&copy; {{ site.author }}{% endif %}
  </footer>
  {% for script in scripts %}<script src="{{ url_for_static(script) }}"></script>
  {% endfor %}{% if reload_script %}<script src="{{ url_for_static(reload_script) }}"></script>
  {% endif %}
</body>
</html>
"##;

const NOTEBOOK_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block content %}
<article class="notebook">
  <header class="notebook-header">
    <h1 class="notebook-title">{{ title }}</h1>
    {% if category %}<a class="notebook-category" href="{{ url_for_page(category.url) }}">{{ category.name }}</a>{% endif %}
    {% if settings and settings.image %}<img class="notebook-cover" src="{{ url_for_static(settings.image) }}" alt="">{% endif %}
  </header>
  <div class="notebook-content">
    {{ content | safe }}
  </div>
</article>
{% endblock %}
"##;

const HOMEPAGE_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block title %}{{ site.title }}{% endblock %}
{% block content %}
<section class="intro">
  <h1>{{ site.title }}</h1>
  {% if site.description %}<p>{{ site.description }}</p>{% endif %}
</section>
{% if featured %}
<section class="featured">
  <h2>Featured</h2>
  <div class="post-grid">
  {% for post in featured %}
    <a class="post-card" href="{{ url_for_page(post.url) }}">
      {% if post.image %}<img src="{{ url_for_static(post.image) }}" alt="">{% endif %}
      <span class="post-category">{{ post.category_name }}</span>
      <h3>{{ post.title }}</h3>
    </a>
  {% endfor %}
  </div>
</section>
{% endif %}
{% if summary %}
<section class="categories">
  <h2>Categories</h2>
  <ul class="category-list">
  {% for category in summary %}
    <li><a href="{{ url_for_page(category.url) }}">{{ category.name }}</a> <span class="count">{{ category.count }}</span></li>
  {% endfor %}
  </ul>
</section>
{% endif %}
{% endblock %}
"##;

const CATEGORY_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block content %}
<section class="category">
  <h1>{{ title }}</h1>
  <div class="post-grid">
  {% for post in posts %}
    <a class="post-card" href="{{ url_for_page(post.url) }}">
      {% if post.image %}<img src="{{ url_for_static(post.image) }}" alt="">{% endif %}
      <h3>{{ post.title }}</h3>
    </a>
  {% else %}
    <p class="empty">No posts yet.</p>
  {% endfor %}
  </div>
</section>
{% endblock %}
"##;

const ABOUT_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block content %}
<section class="about">
  <h1>{{ about.title or "About" }}</h1>
  {% if about.image %}<img class="about-image" src="{{ url_for_static(about.image) }}" alt="">{% endif %}
  {% for paragraph in about.paragraphs %}<p>{{ paragraph }}</p>
  {% endfor %}{% if about.links %}<ul class="about-links">
  {% for link in about.links %}<li><a href="{{ url_for_page(link.url) }}">{{ link.label }}</a></li>
  {% endfor %}</ul>{% endif %}
</section>
{% endblock %}
"##;

const PUBLICATIONS_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block content %}
<section class="publications">
  <h1>Publications</h1>
  <ol class="publication-list">
  {% for publication in publications %}
    <li>
      {% if publication.url %}<a href="{{ url_for_page(publication.url) }}">{{ publication.title }}</a>{% else %}{{ publication.title }}{% endif %}
      {% if publication.authors %}<span class="authors">{{ publication.authors }}</span>{% endif %}
      {% if publication.venue %}<span class="venue">{{ publication.venue }}</span>{% endif %}
      {% if publication.year %}<span class="year">{{ publication.year }}</span>{% endif %}
    </li>
  {% endfor %}
  </ol>
</section>
{% endblock %}
"##;

const PORTFOLIO_TEMPLATE: &str = r##"{% extends "base.html" %}
{% block content %}
<section class="portfolio">
  <h1>Portfolio</h1>
  <div class="post-grid">
  {% for project in projects %}
    <div class="post-card">
      {% if project.image %}<img src="{{ url_for_static(project.image) }}" alt="">{% endif %}
      <h3>{% if project.url %}<a href="{{ url_for_page(project.url) }}">{{ project.title }}</a>{% else %}{{ project.title }}{% endif %}</h3>
      {% if project.description %}<p>{{ project.description }}</p>{% endif %}
    </div>
  {% endfor %}
  </div>
</section>
{% endblock %}
"##;
