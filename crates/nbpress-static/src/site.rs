//! Site-level pages built from the aggregated post index.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use nbpress_notebook::PostSettings;

use crate::builder::BuildError;
use crate::scanner::Category;
use crate::templates::{CategoryLink, RenderContext, SiteChrome, TemplateEngine};

/// Machine-readable post index written next to the homepage.
pub const POSTS_INDEX: &str = "posts.json";

/// Root-level pages written for every site.
pub const SITE_PAGES: &[&str] = &["index.html", "about.html", "publications.html", "portfolio.html"];

/// A post that made it into the site index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostEntry {
    pub title: String,
    /// Display name of the post's category directory
    pub category_name: String,
    /// Root-relative page URL
    pub url: String,
    /// Root-relative cover image, or an external URL
    pub image: String,
    pub settings: PostSettings,
    #[serde(skip)]
    pub source: PathBuf,
}

/// Posts grouped by category, each group ordered by source path.
///
/// Rebuilt from scratch on every build.
#[derive(Debug, Default)]
pub struct SiteIndex {
    categories: BTreeMap<Category, Vec<PostEntry>>,
}

impl SiteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure `category` is listed, even with no indexed posts.
    pub fn add_category(&mut self, category: Category) {
        self.categories.entry(category).or_default();
    }

    pub fn insert(&mut self, category: Category, entry: PostEntry) {
        let posts = self.categories.entry(category).or_default();
        let at = posts.partition_point(|p| p.source <= entry.source);
        posts.insert(at, entry);
    }

    pub fn categories(&self) -> impl Iterator<Item = (&Category, &[PostEntry])> {
        self.categories
            .iter()
            .map(|(category, posts)| (category, posts.as_slice()))
    }

    /// All posts, category by category.
    pub fn posts(&self) -> impl Iterator<Item = &PostEntry> {
        self.categories.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Header links for every category.
    pub fn links(&self) -> Vec<CategoryLink> {
        self.categories()
            .map(|(category, posts)| category_link(category, posts.len()))
            .collect()
    }
}

pub fn category_link(category: &Category, count: usize) -> CategoryLink {
    CategoryLink {
        name: category.name(),
        url: category.index_page(),
        count,
    }
}

/// Limits for the homepage's featured section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeaturePolicy {
    pub per_category: usize,
    pub total: usize,
}

impl Default for FeaturePolicy {
    fn default() -> Self {
        Self {
            per_category: 2,
            total: 6,
        }
    }
}

/// Featured posts: the first `per_category` posts of each category, walking
/// categories in order, until `total` posts are chosen.
pub fn select_featured(index: &SiteIndex, policy: FeaturePolicy) -> Vec<&PostEntry> {
    index
        .categories()
        .flat_map(|(_, posts)| posts.iter().take(policy.per_category))
        .take(policy.total)
        .collect()
}

/// Free-form data for the static pages, taken from the site config.
#[derive(Debug, Clone, Default)]
pub struct StaticPages {
    pub about: Value,
    pub publications: Vec<Value>,
    pub projects: Vec<Value>,
}

#[derive(Serialize)]
struct Homepage<'a> {
    title: &'a str,
    featured: Vec<&'a PostEntry>,
    summary: Vec<CategoryLink>,
}

#[derive(Serialize)]
struct CategoryPage<'a> {
    title: String,
    category: CategoryLink,
    posts: &'a [PostEntry],
}

/// Writes the homepage, category pages, static pages and post index.
pub struct SiteAssembler<'a> {
    templates: &'a TemplateEngine,
    chrome: &'a SiteChrome,
    output: &'a Path,
    policy: FeaturePolicy,
}

impl<'a> SiteAssembler<'a> {
    pub fn new(
        templates: &'a TemplateEngine,
        chrome: &'a SiteChrome,
        output: &'a Path,
        policy: FeaturePolicy,
    ) -> Self {
        Self {
            templates,
            chrome,
            output,
            policy,
        }
    }

    /// Write every site-level page. Returns the number of HTML pages written.
    pub fn assemble(&self, index: &SiteIndex, pages: &StaticPages) -> Result<usize, BuildError> {
        let mut written = 0;

        let homepage = Homepage {
            title: &self.chrome.site.title,
            featured: select_featured(index, self.policy),
            summary: index.links(),
        };
        self.write_page("index.html", "homepage.html", "home", &homepage)?;
        written += 1;

        for (category, posts) in index.categories() {
            let link = category_link(category, posts.len());
            let path = category.index_page();
            let page = CategoryPage {
                title: link.name.clone(),
                category: link,
                posts,
            };
            self.write_page(&path, "category.html", &path, &page)?;
            written += 1;
        }

        let about = serde_json::json!({ "title": "About", "about": pages.about });
        self.write_page("about.html", "about.html", "about", &about)?;

        let publications = serde_json::json!({
            "title": "Publications",
            "publications": pages.publications,
        });
        self.write_page("publications.html", "publications.html", "publications", &publications)?;

        let portfolio = serde_json::json!({ "title": "Portfolio", "projects": pages.projects });
        self.write_page("portfolio.html", "portfolio.html", "portfolio", &portfolio)?;
        written += 3;

        self.write_posts_index(index)?;

        tracing::debug!("Assembled {} site pages", written);
        Ok(written)
    }

    fn write_page<S: Serialize>(
        &self,
        page_path: &str,
        template: &str,
        active_page: &str,
        page: &S,
    ) -> Result<(), BuildError> {
        let ctx = RenderContext::new(self.chrome, page_path, active_page);
        let html = self
            .templates
            .render_page(template, &ctx, page)
            .map_err(|e| BuildError::TemplateError(format!("{}: {}", template, e)))?;

        write_output(&self.output.join(page_path), &html)
    }

    fn write_posts_index(&self, index: &SiteIndex) -> Result<(), BuildError> {
        let posts: Vec<&PostEntry> = index.posts().collect();
        let json = serde_json::to_string_pretty(&posts)
            .map_err(|e| BuildError::WriteError(e.to_string()))?;
        write_output(&self.output.join(POSTS_INDEX), &json)
    }
}

/// Write a generated file, creating parent directories.
pub fn write_output(path: &Path, contents: &str) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::WriteError(e.to_string()))?;
    }
    fs::write(path, contents)
        .map_err(|e| BuildError::WriteError(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbpress_notebook::frontmatter::parse_settings;
    use tempfile::tempdir;

    fn entry(category: &str, stem: &str) -> PostEntry {
        let settings = parse_settings(&format!(
            "POST_SETTINGS = {{'title': '{stem}', 'category': '{category}', 'image': 'static/{stem}.png', 'tags': ['x']}}"
        ))
        .unwrap()
        .unwrap();
        let category = Category::new(category);
        PostEntry {
            title: stem.to_string(),
            category_name: category.name(),
            url: category.page_url(stem),
            image: format!("static/{}.png", stem),
            settings,
            source: PathBuf::from(format!("notebooks/{}/{}.ipynb", category.url_path(), stem)),
        }
    }

    fn populated(categories: &[&str], per: usize) -> SiteIndex {
        let mut index = SiteIndex::new();
        for category in categories {
            // Insert in reverse to exercise path ordering.
            for i in (0..per).rev() {
                index.insert(Category::new(*category), entry(category, &format!("post{}", i)));
            }
        }
        index
    }

    #[test]
    fn featured_respects_caps() {
        let index = populated(&["e", "a", "d", "b", "c"], 3);

        let featured = select_featured(&index, FeaturePolicy::default());

        assert_eq!(featured.len(), 6);
        let urls: Vec<&str> = featured.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "a/post0.html",
                "a/post1.html",
                "b/post0.html",
                "b/post1.html",
                "c/post0.html",
                "c/post1.html",
            ]
        );
    }

    #[test]
    fn featured_with_few_posts() {
        let index = populated(&["a", "b"], 1);
        let featured = select_featured(
            &index,
            FeaturePolicy {
                per_category: 2,
                total: 6,
            },
        );
        assert_eq!(featured.len(), 2);
    }

    #[test]
    fn index_orders_by_path() {
        let index = populated(&["ml"], 3);
        let titles: Vec<&str> = index.posts().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["post0", "post1", "post2"]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn assembles_site_pages() {
        let temp = tempdir().unwrap();
        let out = temp.path();
        let mut index = populated(&["ml", "graphics/shaders"], 2);
        index.add_category(Category::uncategorized());
        let templates = TemplateEngine::default();
        let chrome = SiteChrome {
            styles: vec!["styles/main.css".to_string()],
            categories: index.links(),
            ..Default::default()
        };
        let pages = StaticPages {
            about: serde_json::json!({ "paragraphs": ["Hello there"] }),
            publications: vec![serde_json::json!({ "title": "A Paper", "year": 2024 })],
            projects: vec![serde_json::json!({ "title": "Tool", "description": "Does things" })],
        };

        let written = SiteAssembler::new(&templates, &chrome, out, FeaturePolicy::default())
            .assemble(&index, &pages)
            .unwrap();

        assert_eq!(written, 1 + 3 + 3);
        let home = fs::read_to_string(out.join("index.html")).unwrap();
        assert!(home.contains(r#"href="ml/post0.html""#));
        assert!(home.contains(r#"src="static/post0.png""#));

        let nested = fs::read_to_string(out.join("graphics/shaders/index.html")).unwrap();
        assert!(nested.contains(r#"href="../../styles/main.css""#));
        assert!(nested.contains(r#"href="../../graphics/shaders/post1.html""#));
        assert!(nested.contains("Shaders</h1>"));

        assert!(out.join("uncategorized.html").exists());
        assert!(fs::read_to_string(out.join("about.html")).unwrap().contains("Hello there"));
        assert!(fs::read_to_string(out.join("publications.html")).unwrap().contains("A Paper"));
        assert!(fs::read_to_string(out.join("portfolio.html")).unwrap().contains("Does things"));

        let posts: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(out.join(POSTS_INDEX)).unwrap()).unwrap();
        assert_eq!(posts.len(), 4);
        assert_eq!(posts[0]["url"], "graphics/shaders/post0.html");
        assert_eq!(posts[0]["settings"]["tags"][0], "x");
    }
}
