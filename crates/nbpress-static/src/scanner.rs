//! Notebook discovery.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::builder::BuildError;

/// Notebook file extension.
pub const NOTEBOOK_EXTENSION: &str = "ipynb";

/// Notebooks grouped by category, each list sorted by path.
pub type NotebookCatalog = BTreeMap<Category, Vec<PathBuf>>;

/// A category: the notebook's directory relative to the notebook root.
///
/// The root directory itself is the uncategorized category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Category(PathBuf);

impl Category {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn uncategorized() -> Self {
        Self(PathBuf::new())
    }

    pub fn is_uncategorized(&self) -> bool {
        self.0.as_os_str().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Number of directory levels below the output root.
    pub fn depth(&self) -> usize {
        self.0
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .count()
    }

    /// Forward-slash path used in URLs (empty for uncategorized).
    pub fn url_path(&self) -> String {
        self.0
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Display name.
    pub fn name(&self) -> String {
        if self.is_uncategorized() {
            "Uncategorized".to_string()
        } else {
            title_case(&self.url_path().replace('/', " / "))
        }
    }

    /// Root-relative path of the category listing page.
    pub fn index_page(&self) -> String {
        if self.is_uncategorized() {
            "uncategorized.html".to_string()
        } else {
            format!("{}/index.html", self.url_path())
        }
    }

    /// Root-relative path of a notebook page in this category.
    pub fn page_url(&self, stem: &str) -> String {
        if self.is_uncategorized() {
            format!("{}.html", stem)
        } else {
            format!("{}/{}.html", self.url_path(), stem)
        }
    }
}

/// Find all notebooks under `root`, grouped by category.
///
/// Hidden entries (`.git`, `.ipynb_checkpoints`, ...) and the `exclude`
/// directories are never descended into, so a build output placed inside the
/// notebook root is not picked up again.
pub fn scan_notebooks(root: &Path, exclude: &[PathBuf]) -> Result<NotebookCatalog, BuildError> {
    if !root.is_dir() {
        return Err(BuildError::SourceNotFound(root.display().to_string()));
    }

    let excluded: Vec<PathBuf> = exclude
        .iter()
        .filter_map(|path| path.canonicalize().ok())
        .collect();

    let mut catalog = NotebookCatalog::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !(is_hidden(entry) || is_excluded(entry, &excluded)));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext != NOTEBOOK_EXTENSION {
            continue;
        }

        let relative = path
            .parent()
            .and_then(|parent| parent.strip_prefix(root).ok())
            .unwrap_or(Path::new(""))
            .to_path_buf();

        catalog
            .entry(Category::new(relative))
            .or_default()
            .push(path.to_path_buf());
    }

    for paths in catalog.values_mut() {
        paths.sort();
    }

    Ok(catalog)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

fn is_excluded(entry: &DirEntry, excluded: &[PathBuf]) -> bool {
    if excluded.is_empty() || !entry.file_type().is_dir() {
        return false;
    }
    entry
        .path()
        .canonicalize()
        .is_ok_and(|path| excluded.contains(&path))
}

/// `deep_learning` -> `Deep Learning`.
pub fn title_case(text: &str) -> String {
    text.replace(['_', '-'], " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "{}").unwrap();
    }

    #[test]
    fn groups_notebooks_by_directory() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("notebooks");

        touch(&root.join("intro.ipynb"));
        touch(&root.join("ml/b.ipynb"));
        touch(&root.join("ml/a.ipynb"));
        touch(&root.join("ml/notes.md"));
        touch(&root.join("graphics/shaders/water.ipynb"));

        let catalog = scan_notebooks(&root, &[]).unwrap();

        let categories: BTreeSet<String> = catalog.keys().map(Category::url_path).collect();
        let expected: BTreeSet<String> = ["", "ml", "graphics/shaders"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(categories, expected);

        let ml = &catalog[&Category::new("ml")];
        assert_eq!(ml, &vec![root.join("ml/a.ipynb"), root.join("ml/b.ipynb")]);
        assert_eq!(catalog[&Category::uncategorized()].len(), 1);
    }

    #[test]
    fn skips_hidden_and_output_directories() {
        let temp = tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let output = root.join("build");

        touch(&root.join("posts/keep.ipynb"));
        touch(&root.join("posts/.ipynb_checkpoints/keep-checkpoint.ipynb"));
        touch(&root.join(".git/objects/x.ipynb"));
        touch(&output.join("posts/copied.ipynb"));

        let catalog = scan_notebooks(&root, &[output]).unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog[&Category::new("posts")],
            vec![root.join("posts/keep.ipynb")]
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempdir().unwrap();
        let result = scan_notebooks(&temp.path().join("missing"), &[]);

        assert!(matches!(result, Err(BuildError::SourceNotFound(_))));
    }

    #[test]
    fn category_paths() {
        let root = Category::uncategorized();
        assert_eq!(root.depth(), 0);
        assert_eq!(root.name(), "Uncategorized");
        assert_eq!(root.index_page(), "uncategorized.html");
        assert_eq!(root.page_url("intro"), "intro.html");

        let nested = Category::new(Path::new("deep_learning").join("vision"));
        assert_eq!(nested.depth(), 2);
        assert_eq!(nested.url_path(), "deep_learning/vision");
        assert_eq!(nested.name(), "Deep Learning / Vision");
        assert_eq!(nested.index_page(), "deep_learning/vision/index.html");
        assert_eq!(nested.page_url("cnn"), "deep_learning/vision/cnn.html");
    }

    #[test]
    fn title_cases_names() {
        assert_eq!(title_case("my_first-post"), "My First Post");
        assert_eq!(title_case("ML"), "Ml");
    }
}
