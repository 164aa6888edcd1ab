//! Code-block protection.
//!
//! `{{{ ... }}}` spans are lifted out of the document before any rewrite
//! stage runs and replaced by positional placeholders (`%1$s`, `%2$s`, ...).
//! Literal `%` characters in the surrounding text are doubled so they can
//! never be mistaken for a placeholder; [`ProtectedDocument::restore`]
//! undoes both substitutions.

use std::sync::LazyLock;

use regex::Regex;

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{\{(?:[ \t\n]*#!(\w+)[^\n]*\n)?(.*?)\}\}\}").expect("valid code block regex")
});

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%[0-9]+\$s").expect("valid placeholder regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
}

impl CodeBlock {
    /// Render as a GFM fenced block. The code is emitted byte-for-byte.
    pub fn to_fenced(&self) -> String {
        let language = self.language.as_deref().unwrap_or("");
        let mut fenced = String::with_capacity(self.code.len() + language.len() + 8);
        fenced.push_str("```");
        fenced.push_str(language);
        fenced.push('\n');
        fenced.push_str(&self.code);
        if !self.code.is_empty() && !self.code.ends_with('\n') {
            fenced.push('\n');
        }
        fenced.push_str("```");
        fenced
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedDocument {
    pub text: String,
    pub blocks: Vec<CodeBlock>,
}

impl ProtectedDocument {
    pub fn restore(&self, text: &str) -> String {
        restore_code_blocks(text, &self.blocks)
    }
}

/// Collect every code block in order of appearance without modifying the input.
pub fn extract_code_blocks(input: &str) -> Vec<CodeBlock> {
    CODE_BLOCK_RE
        .captures_iter(input)
        .map(|captures| CodeBlock {
            language: captures.get(1).map(|m| m.as_str().to_string()),
            code: captures
                .get(2)
                .map_or("", |m| m.as_str())
                .trim_start_matches('\n')
                .to_string(),
        })
        .collect()
}

/// Replace every code block with a positional placeholder and escape `%`
/// in the remaining text.
pub fn protect_code_blocks(input: &str) -> ProtectedDocument {
    let mut text = String::with_capacity(input.len() + 16);
    let mut cursor = 0usize;
    let mut ordinal = 0usize;

    for found in CODE_BLOCK_RE.find_iter(input) {
        escape_percent_into(&mut text, &input[cursor..found.start()]);
        ordinal += 1;
        text.push_str(&placeholder(ordinal));
        cursor = found.end();
    }
    escape_percent_into(&mut text, &input[cursor..]);

    ProtectedDocument {
        text,
        blocks: extract_code_blocks(input),
    }
}

/// Resolve placeholders against `blocks` and unescape `%%`.
///
/// A placeholder whose ordinal has no recorded block is left as-is.
pub fn restore_code_blocks(text: &str, blocks: &[CodeBlock]) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(index) = rest.find('%') {
        output.push_str(&rest[..index]);
        let tail = &rest[index..];

        if tail.starts_with("%%") {
            output.push('%');
            rest = &tail[2..];
            continue;
        }
        if let Some((ordinal, consumed)) = parse_placeholder(tail)
            && let Some(block) = ordinal.checked_sub(1).and_then(|i| blocks.get(i))
        {
            output.push_str(&block.to_fenced());
            rest = &tail[consumed..];
            continue;
        }
        output.push('%');
        rest = &tail[1..];
    }
    output.push_str(rest);
    output
}

/// Placeholders contained in a span that a stage is about to delete.
///
/// Stages that drop text call this so enclosed code blocks still survive.
pub fn retained_placeholders(removed: &str) -> String {
    PLACEHOLDER_RE
        .find_iter(removed)
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Character count of protected text as it will read after restoration
/// (an escaped `%%` counts once).
pub fn visible_len(text: &str) -> usize {
    text.chars().count() - text.matches("%%").count()
}

fn placeholder(ordinal: usize) -> String {
    format!("%{ordinal}$s")
}

fn parse_placeholder(tail: &str) -> Option<(usize, usize)> {
    let digits = tail[1..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 || !tail[1 + digits..].starts_with("$s") {
        return None;
    }
    let ordinal = tail[1..1 + digits].parse::<usize>().ok()?;
    Some((ordinal, 1 + digits + 2))
}

fn escape_percent_into(output: &mut String, text: &str) {
    for ch in text.chars() {
        if ch == '%' {
            output.push_str("%%");
        } else {
            output.push(ch);
        }
    }
}
