//! Notebook document model (nbformat v4).

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// A parsed notebook.
///
/// Notebooks are read-only inputs: rendering derives new fragments from the
/// cells and never writes back into the document.
#[derive(Debug, Clone, Deserialize)]
pub struct Notebook {
    /// Ordered cells
    pub cells: Vec<Cell>,

    /// Notebook-level metadata (kernelspec, language_info, ...)
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Major format version
    pub nbformat: u32,

    /// Minor format version
    #[serde(default)]
    pub nbformat_minor: u32,
}

/// A single notebook cell.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Markdown {
        #[serde(deserialize_with = "multiline")]
        source: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Code {
        #[serde(deserialize_with = "multiline")]
        source: String,
        #[serde(default)]
        outputs: Vec<Output>,
        #[serde(default)]
        execution_count: Option<u32>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Raw {
        #[serde(deserialize_with = "multiline")]
        source: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
}

impl Cell {
    /// Cell source text.
    pub fn source(&self) -> &str {
        match self {
            Cell::Markdown { source, .. } | Cell::Code { source, .. } | Cell::Raw { source, .. } => {
                source
            }
        }
    }

    /// Cell metadata.
    pub fn metadata(&self) -> &Map<String, Value> {
        match self {
            Cell::Markdown { metadata, .. }
            | Cell::Code { metadata, .. }
            | Cell::Raw { metadata, .. } => metadata,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, Cell::Code { .. })
    }
}

/// An output attached to a code cell.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        #[serde(deserialize_with = "multiline")]
        text: String,
    },
    DisplayData {
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default)]
        execution_count: Option<u32>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// MIME bundle for rich outputs.
    pub fn data(&self) -> Option<&MimeBundle> {
        match self {
            Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Theme tag attached to the output metadata (`{"theme": "dark"}`).
    pub fn theme(&self) -> Option<&str> {
        match self {
            Output::DisplayData { metadata, .. } | Output::ExecuteResult { metadata, .. } => {
                metadata.get("theme").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// The raster image carried by this output, if any.
    pub fn raster_image(&self) -> Option<(&'static str, String)> {
        let data = self.data()?;
        RASTER_MIME_TYPES
            .iter()
            .find_map(|mime| data.text(mime).map(|payload| (*mime, payload)))
    }
}

/// Raster formats notebooks embed as base64 payloads.
pub const RASTER_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// A MIME-type keyed output bundle.
///
/// Text payloads may be stored either as a single string or as a list of
/// lines; [`MimeBundle::text`] joins both forms.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct MimeBundle(BTreeMap<String, Value>);

impl MimeBundle {
    /// Text payload for a MIME type.
    pub fn text(&self, mime: &str) -> Option<String> {
        match self.0.get(mime)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(lines) => Some(
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .concat(),
            ),
            other if mime.ends_with("json") => Some(other.to_string()),
            _ => None,
        }
    }

    pub fn contains(&self, mime: &str) -> bool {
        self.0.contains_key(mime)
    }

    pub fn mime_types(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Errors that can occur when reading a notebook.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("Not a valid notebook: {0}")]
    InvalidNotebook(String),

    #[error("Unsupported notebook format version {0} (expected 4)")]
    UnsupportedVersion(u32),
}

impl Notebook {
    /// Parse a notebook from its JSON text.
    pub fn from_json(source: &str) -> Result<Self, NotebookError> {
        let notebook: Notebook = serde_json::from_str(source)
            .map_err(|e| NotebookError::InvalidNotebook(e.to_string()))?;

        if notebook.nbformat != 4 {
            return Err(NotebookError::UnsupportedVersion(notebook.nbformat));
        }

        Ok(notebook)
    }

    /// Kernel language, used for code highlighting classes.
    pub fn language(&self) -> &str {
        self.metadata
            .get("language_info")
            .and_then(|info| info.get("name"))
            .or_else(|| {
                self.metadata
                    .get("kernelspec")
                    .and_then(|spec| spec.get("language"))
            })
            .and_then(Value::as_str)
            .unwrap_or("python")
    }

    /// The first code cell and its index.
    pub fn first_code_cell(&self) -> Option<(usize, &Cell)> {
        self.cells.iter().enumerate().find(|(_, cell)| cell.is_code())
    }
}

/// Deserialize a notebook multiline string (`"text"` or `["line\n", ...]`).
fn multiline<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Multiline {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Multiline::deserialize(deserializer)? {
        Multiline::One(text) => text,
        Multiline::Many(lines) => lines.concat(),
    })
}
