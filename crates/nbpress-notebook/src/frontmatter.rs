//! Front-matter extraction from a notebook's leading code cell.
//!
//! Posts declare their settings as a literal assignment:
//!
//! ```python
//! POST_SETTINGS = {
//!     "category": "ml",
//!     "title": "Demo",
//!     "image": "cover.png",
//! }
//! ```
//!
//! The block is located with a brace-balance scan and parsed with the
//! restricted literal grammar in [`crate::literal`].

use serde::Serialize;
use serde_json::{Map, Value};

use crate::literal::{parse_literal, LiteralError};
use crate::notebook::Notebook;

/// Name of the settings assignment.
pub const SETTINGS_NAME: &str = "POST_SETTINGS";

/// Keys every post must define.
pub const REQUIRED_KEYS: [&str; 3] = ["title", "category", "image"];

/// Settings extracted from a notebook.
///
/// `title`, `category` and `image` are guaranteed to be strings; any other
/// key is passed through to the page templates untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PostSettings(Map<String, Value>);

impl PostSettings {
    /// Validate a parsed mapping.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, FrontMatterError> {
        for key in REQUIRED_KEYS {
            match map.get(key) {
                Some(Value::String(_)) => {}
                Some(_) => return Err(FrontMatterError::InvalidKey(key)),
                None => return Err(FrontMatterError::MissingKey(key)),
            }
        }
        Ok(Self(map))
    }

    pub fn title(&self) -> &str {
        self.str_value("title")
    }

    pub fn category(&self) -> &str {
        self.str_value("category")
    }

    pub fn image(&self) -> &str {
        self.str_value("image")
    }

    /// Replace the image reference (after asset relocation).
    pub fn set_image(&mut self, image: impl Into<String>) {
        self.0.insert("image".to_string(), Value::String(image.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn str_value(&self, key: &str) -> &str {
        self.0.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

/// Settings plus the index of the cell that declared them.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontMatter {
    pub settings: PostSettings,
    pub cell_index: usize,
}

/// Errors that can occur when extracting front matter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrontMatterError {
    #[error("Unclosed POST_SETTINGS block - missing closing brace")]
    Unclosed,

    #[error("POST_SETTINGS must be assigned a dictionary literal")]
    NotAMapping,

    #[error("Invalid POST_SETTINGS literal: {0}")]
    Syntax(#[from] LiteralError),

    #[error("POST_SETTINGS is missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("POST_SETTINGS key '{0}' must be a string")]
    InvalidKey(&'static str),
}

/// Extract front matter from the notebook's first code cell.
///
/// Returns `Ok(None)` when the cell does not declare settings.
pub fn extract_front_matter(notebook: &Notebook) -> Result<Option<FrontMatter>, FrontMatterError> {
    let Some((cell_index, cell)) = notebook.first_code_cell() else {
        return Ok(None);
    };

    match parse_settings(cell.source())? {
        Some(settings) => Ok(Some(FrontMatter {
            settings,
            cell_index,
        })),
        None => Ok(None),
    }
}

/// Parse the settings declared in a code cell's source.
pub fn parse_settings(source: &str) -> Result<Option<PostSettings>, FrontMatterError> {
    let Some(block) = settings_block(source)? else {
        return Ok(None);
    };

    match parse_literal(block)? {
        Value::Object(map) => PostSettings::from_map(map).map(Some),
        _ => Err(FrontMatterError::NotAMapping),
    }
}

/// Locate the `{ ... }` text assigned to [`SETTINGS_NAME`].
fn settings_block(source: &str) -> Result<Option<&str>, FrontMatterError> {
    let Some(value_start) = assignment_value_start(source) else {
        return Ok(None);
    };

    let value = &source[value_start..];
    let offset = value.len() - value.trim_start().len();
    let value = &value[offset..];

    if !value.starts_with('{') {
        return Err(FrontMatterError::NotAMapping);
    }

    let end = balanced_end(value).ok_or(FrontMatterError::Unclosed)?;
    Ok(Some(&value[..end]))
}

/// Byte offset just past the `=` of a line-leading `POST_SETTINGS =`.
fn assignment_value_start(source: &str) -> Option<usize> {
    let mut line_start = 0;
    for line in source.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        if let Some(rest) = line.trim_start().strip_prefix(SETTINGS_NAME) {
            let after_name = rest.trim_start();
            // `POST_SETTINGS == x` is a comparison, not an assignment.
            if after_name.starts_with('=') && !after_name.starts_with("==") {
                let eq = line_start + indent + SETTINGS_NAME.len() + (rest.len() - after_name.len());
                return Some(eq + 1);
            }
        }
        line_start += line.len();
    }
    None
}

/// Length of the brace-balanced prefix of `text` (which starts with `{`).
///
/// Braces inside string literals and comments are ignored.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut chars = text.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            '#' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' | '\'' => {
                let triple = text[i + 1..].starts_with(&format!("{0}{0}", c));
                if triple {
                    chars.next();
                    chars.next();
                }
                let mut run = 0;
                loop {
                    let (_, next) = chars.next()?;
                    match next {
                        '\\' => {
                            chars.next();
                            run = 0;
                        }
                        q if q == c => {
                            run += 1;
                            if !triple || run == 3 {
                                break;
                            }
                        }
                        _ => run = 0,
                    }
                }
            }
            _ => {}
        }
    }

    None
}
