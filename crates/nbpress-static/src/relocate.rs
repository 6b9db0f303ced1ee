//! Asset relocation.
//!
//! Images referenced from markdown cells (`![alt](path)` or
//! `<img src="path">`) and from the `image` settings field are copied into
//! `<output>/static/` under a name derived from the blake3 hash of their
//! bytes, and the references are rewritten to point at the copy. Identical
//! files share one destination and repeated builds reproduce the same names.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use nbpress_notebook::PostSettings;

/// Output subdirectory holding relocated assets.
pub const STATIC_DIR: &str = "static";

/// Hex characters of the content hash kept in destination names.
const HASH_LEN: usize = 16;

/// Schemes that are never treated as local files.
const SKIPPED_SCHEMES: &[&str] = &["http", "https", "ftp", "data", "attachment", "mailto"];

static MARKDOWN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[(?P<alt>[^\]]*)\]\((?P<url><[^>]+>|[^)\s]+)(?P<rest>[^)]*)\)").unwrap()
});

static HTML_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<pre><img\s+[^>]*?src=)(?P<q>["'])(?P<url>[^"']*)["']"#).unwrap()
});

/// Errors that can occur while relocating an asset.
#[derive(Debug, thiserror::Error)]
pub enum RelocateError {
    #[error("Asset not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to copy asset {path}: {message}")]
    Copy { path: PathBuf, message: String },
}

/// Copies referenced assets into the output tree, at most once per source.
#[derive(Debug)]
pub struct AssetRelocator {
    static_dir: PathBuf,
    relocated: HashMap<PathBuf, String>,
}

impl AssetRelocator {
    /// Create a relocator writing into `<output_root>/static`.
    pub fn new(output_root: &Path) -> Self {
        Self {
            static_dir: output_root.join(STATIC_DIR),
            relocated: HashMap::new(),
        }
    }

    /// Number of distinct source files relocated so far.
    pub fn relocated_count(&self) -> usize {
        self.relocated.len()
    }

    /// Relocate one reference.
    ///
    /// Returns the root-relative destination (`static/<hash>.<ext>`), or
    /// `None` for remote and inline references.
    pub fn relocate(
        &mut self,
        reference: &str,
        base_dir: &Path,
    ) -> Result<Option<String>, RelocateError> {
        let Some(source) = resolve_reference(reference, base_dir) else {
            return Ok(None);
        };

        if !source.is_file() {
            return Err(RelocateError::Missing(source));
        }

        let key = source.canonicalize().unwrap_or_else(|_| source.clone());
        if let Some(existing) = self.relocated.get(&key) {
            return Ok(Some(existing.clone()));
        }

        let copy_error = |e: std::io::Error| RelocateError::Copy {
            path: source.clone(),
            message: e.to_string(),
        };

        let bytes = fs::read(&source).map_err(copy_error)?;
        let hash = blake3::hash(&bytes).to_hex();
        let name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", &hash[..HASH_LEN], ext.to_lowercase()),
            None => hash[..HASH_LEN].to_string(),
        };

        let dest = self.static_dir.join(&name);
        if !dest.exists() {
            fs::create_dir_all(&self.static_dir).map_err(copy_error)?;
            fs::write(&dest, &bytes).map_err(copy_error)?;
            tracing::debug!("Copied asset {} -> {}", source.display(), dest.display());
        }

        let relative = format!("{}/{}", STATIC_DIR, name);
        self.relocated.insert(key, relative.clone());
        Ok(Some(relative))
    }

    /// Rewrite every image reference in `text`.
    ///
    /// `prefix` is the `../` chain from the page being rendered to the output
    /// root. References that cannot be resolved are left untouched, and so is
    /// everything inside fenced code blocks.
    pub fn rewrite_text(&mut self, text: &str, base_dir: &Path, prefix: &str) -> String {
        split_fences(text)
            .into_iter()
            .map(|(fenced, segment)| {
                if fenced {
                    segment.to_string()
                } else {
                    self.rewrite_segment(segment, base_dir, prefix)
                }
            })
            .collect()
    }

    fn rewrite_segment(&mut self, text: &str, base_dir: &Path, prefix: &str) -> String {
        let markdown = MARKDOWN_IMAGE.replace_all(text, |caps: &Captures| {
            let url = caps["url"].trim_start_matches('<').trim_end_matches('>');
            match self.relocate_logged(url, base_dir) {
                Some(dest) => format!("![{}]({}{}{})", &caps["alt"], prefix, dest, &caps["rest"]),
                None => caps[0].to_string(),
            }
        });

        HTML_IMAGE
            .replace_all(&markdown, |caps: &Captures| match self.relocate_logged(&caps["url"], base_dir) {
                Some(dest) => format!("{}{q}{}{}{q}", &caps["pre"], prefix, dest, q = &caps["q"]),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Relocate the settings `image` and store the root-relative result.
    pub fn relocate_settings_image(&mut self, settings: &mut PostSettings, base_dir: &Path) {
        let image = settings.image().to_string();
        if image.is_empty() {
            return;
        }
        if let Some(dest) = self.relocate_logged(&image, base_dir) {
            settings.set_image(dest);
        }
    }

    fn relocate_logged(&mut self, reference: &str, base_dir: &Path) -> Option<String> {
        match self.relocate(reference, base_dir) {
            Ok(dest) => dest,
            Err(e) => {
                tracing::warn!("{} (referenced as '{}')", e, reference);
                None
            }
        }
    }
}

/// Split `text` into `(fenced, segment)` runs that concatenate back to it.
///
/// A fence is a line of at least three backticks or tildes indented by at
/// most three spaces; it closes on a line of the same character at least as
/// long. An unclosed fence runs to the end.
fn split_fences(text: &str) -> Vec<(bool, &str)> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    let mut open: Option<(char, usize)> = None;

    for line in text.split_inclusive('\n') {
        let marker = fence_marker(line);
        match (open, marker) {
            (None, Some(fence)) => {
                if offset > start {
                    segments.push((false, &text[start..offset]));
                }
                start = offset;
                open = Some(fence);
            }
            (Some((ch, len)), Some((close_ch, close_len)))
                if close_ch == ch && close_len >= len && line.trim()[close_len..].trim().is_empty() =>
            {
                let end = offset + line.len();
                segments.push((true, &text[start..end]));
                start = end;
                open = None;
            }
            _ => {}
        }
        offset += line.len();
    }

    if start < text.len() {
        segments.push((open.is_some(), &text[start..]));
    }
    segments
}

fn fence_marker(line: &str) -> Option<(char, usize)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let ch = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = rest.chars().take_while(|c| *c == ch).count();
    (len >= 3).then_some((ch, len))
}

/// All image references in `text`, in order of appearance.
pub fn extract_references(text: &str) -> Vec<String> {
    let markdown = MARKDOWN_IMAGE.captures_iter(text).map(|caps| {
        caps["url"]
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string()
    });
    let html = HTML_IMAGE
        .captures_iter(text)
        .map(|caps| caps["url"].to_string());
    markdown.chain(html).collect()
}

/// Resolve a reference to a local path, or `None` when it is not local.
fn resolve_reference(reference: &str, base_dir: &Path) -> Option<PathBuf> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    if let Some((scheme, _)) = trimmed.split_once(':') {
        let is_scheme = scheme.len() > 1
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if is_scheme
            && (SKIPPED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str())
                || trimmed[scheme.len()..].starts_with("://"))
        {
            return None;
        }
    }

    let without_query = trimmed
        .split(['?', '#'])
        .next()
        .unwrap_or(trimmed);
    let decoded = urlencoding::decode(without_query)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| without_query.to_string());

    let path = PathBuf::from(decoded);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(base_dir.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let temp = tempdir().unwrap();
        let notebook_dir = temp.path().join("notebooks/ml");
        let output = temp.path().join("build");
        fs::create_dir_all(notebook_dir.join("img")).unwrap();
        fs::write(notebook_dir.join("img/plot.png"), b"png-bytes").unwrap();
        fs::write(notebook_dir.join("copy.png"), b"png-bytes").unwrap();
        fs::write(notebook_dir.join("other.JPG"), b"jpg-bytes").unwrap();
        (temp, notebook_dir, output)
    }

    #[test]
    fn extracts_markdown_and_html_references() {
        let refs = extract_references(
            r#"![plot](img/plot.png "Plot") and <img alt="x" src='other.JPG' width="3">
               ![remote](https://example.com/a.png)"#,
        );

        assert_eq!(
            refs,
            vec!["img/plot.png", "https://example.com/a.png", "other.JPG"]
        );
    }

    #[test]
    fn rewrites_references_to_content_addressed_copies() {
        let (_temp, dir, output) = setup();
        let mut relocator = AssetRelocator::new(&output);

        let text = "![plot](img/plot.png \"Plot\")\n<img src=\"other.JPG\" width=\"3\">";
        let rewritten = relocator.rewrite_text(text, &dir, "../");

        let hash = blake3::hash(b"png-bytes").to_hex();
        let png = format!("static/{}.png", &hash[..HASH_LEN]);
        assert!(rewritten.contains(&format!("![plot](../{} \"Plot\")", png)));
        assert!(rewritten.contains("<img src=\"../static/"));
        assert!(rewritten.contains(".jpg\" width=\"3\">"));
        assert!(output.join(&png).exists());
        assert!(!rewritten.contains("img/plot.png"));
    }

    #[test]
    fn fenced_code_is_left_alone() {
        let (_temp, dir, output) = setup();
        let mut relocator = AssetRelocator::new(&output);

        let text = "Before ![a](img/plot.png)\n\n```markdown\n![example](img/plot.png)\n```\n~~~~\n<img src=\"other.JPG\">\n~~~~\nAfter ![b](img/plot.png)";
        let rewritten = relocator.rewrite_text(text, &dir, "");

        assert!(rewritten.contains("```markdown\n![example](img/plot.png)\n```\n"));
        assert!(rewritten.contains("~~~~\n<img src=\"other.JPG\">\n~~~~\n"));
        assert!(rewritten.starts_with("Before ![a](static/"));
        assert!(rewritten.contains("After ![b](static/"));
        assert_eq!(relocator.relocated_count(), 1);
    }

    #[test]
    fn fence_splitting_preserves_text() {
        let text = "a\n   ```py\nx\n``\n```\nb\n    ```\n~~~\nopen";
        let segments = split_fences(text);

        assert_eq!(segments.iter().map(|(_, s)| *s).collect::<String>(), text);
        assert_eq!(
            segments,
            vec![
                (false, "a\n"),
                (true, "   ```py\nx\n``\n```\n"),
                (false, "b\n    ```\n"),
                (true, "~~~\nopen"),
            ]
        );
    }

    #[test]
    fn identical_content_shares_a_destination() {
        let (_temp, dir, output) = setup();
        let mut relocator = AssetRelocator::new(&output);

        let a = relocator.relocate("img/plot.png", &dir).unwrap().unwrap();
        let b = relocator.relocate("copy.png", &dir).unwrap().unwrap();
        let c = relocator.relocate("other.JPG", &dir).unwrap().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(relocator.relocated_count(), 3);
        assert_eq!(fs::read_dir(output.join(STATIC_DIR)).unwrap().count(), 2);
    }

    #[test]
    fn destinations_are_stable_across_runs() {
        let (_temp, dir, output) = setup();

        let first = AssetRelocator::new(&output)
            .relocate("img/plot.png", &dir)
            .unwrap();
        let second = AssetRelocator::new(&output)
            .relocate("img/plot.png", &dir)
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn leaves_missing_and_remote_references_untouched() {
        let (_temp, dir, output) = setup();
        let mut relocator = AssetRelocator::new(&output);

        let text = "![a](missing.png) ![b](https://x.org/b.png) ![c](data:image/png;base64,AAA)";
        assert_eq!(relocator.rewrite_text(text, &dir, ""), text);

        assert!(matches!(
            relocator.relocate("missing.png", &dir),
            Err(RelocateError::Missing(_))
        ));
        assert_eq!(relocator.relocate("attachment:image.png", &dir).unwrap(), None);
    }

    #[test]
    fn decodes_and_strips_query() {
        let (_temp, dir, output) = setup();
        fs::write(dir.join("my plot.png"), b"spaced").unwrap();
        let mut relocator = AssetRelocator::new(&output);

        let dest = relocator.relocate("my%20plot.png?v=2#top", &dir).unwrap();
        assert!(dest.is_some());
    }

    #[test]
    fn relocates_settings_image() {
        let (_temp, dir, output) = setup();
        let mut relocator = AssetRelocator::new(&output);
        let mut settings = nbpress_notebook::frontmatter::parse_settings(
            "POST_SETTINGS = {'title': 't', 'category': 'c', 'image': 'img/plot.png'}",
        )
        .unwrap()
        .unwrap();

        relocator.relocate_settings_image(&mut settings, &dir);

        assert!(settings.image().starts_with("static/"));
        assert!(settings.image().ends_with(".png"));
    }
}
