//! Trac wiki markup to GitHub-Flavored Markdown.
//!
//! [`WikiConverter::convert`] is a total function: malformed constructs are
//! left for the next stage untouched and nothing ever fails. Stages run in
//! a fixed order and most of them are order-sensitive (links before
//! CamelCase, bold-italic before bold before italic, ...). Code blocks are
//! protected for the whole pipeline.
//!
//! Running the converter on its own output is not a no-op: generated
//! Markdown such as `**x**` or `[Foo Bar](...)` is not stable under a
//! second pass.

mod blocks;
mod code_blocks;
mod inline;
mod moinmoin;
mod table;

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use blocks::{convert_breaks, convert_headers, convert_rules, remove_macros};
pub use code_blocks::{
    CodeBlock, ProtectedDocument, extract_code_blocks, protect_code_blocks, restore_code_blocks,
};
pub use inline::{convert_emphasis, convert_links, convert_wiki_links, remove_escape_markers};
pub use moinmoin::convert_moinmoin;
pub use table::{TableCell, convert_tables};

pub const DEFAULT_WIKI_BASE_URI: &str = "https://github.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Trac,
    #[serde(alias = "moin")]
    MoinMoin,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trac => "trac",
            Self::MoinMoin => "moinmoin",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trac" => Ok(Self::Trac),
            "moinmoin" | "moin" => Ok(Self::MoinMoin),
            other => bail!("unknown markup dialect `{other}` (expected `trac` or `moinmoin`)"),
        }
    }
}

/// Trac-to-GFM converter. The base URI is used for CamelCase page links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiConverter {
    base_uri: String,
}

impl Default for WikiConverter {
    fn default() -> Self {
        Self::new(DEFAULT_WIKI_BASE_URI)
    }
}

impl WikiConverter {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn convert(&self, input: &str) -> String {
        let normalized = normalize_line_endings(input);
        let protected = protect_code_blocks(&normalized);

        let text = convert_headers(&protected.text);
        let text = convert_breaks(&text);
        let text = convert_rules(&text);
        let text = remove_macros(&text);
        let text = convert_links(&text);
        let text = convert_emphasis(&text);
        let text = convert_tables(&text);
        let text = convert_wiki_links(&text, &self.base_uri);
        let text = remove_escape_markers(&text);

        let output = protected.restore(&text);
        debug!(
            input_bytes = input.len(),
            output_bytes = output.len(),
            code_blocks = protected.blocks.len(),
            "converted trac markup"
        );
        output
    }
}

pub fn convert_markup(dialect: Dialect, converter: &WikiConverter, input: &str) -> String {
    match dialect {
        Dialect::Trac => converter.convert(input),
        Dialect::MoinMoin => convert_moinmoin(&normalize_line_endings(input)),
    }
}

pub fn normalize_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}
