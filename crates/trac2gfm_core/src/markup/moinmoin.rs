//! MoinMoin pages only get their code fences translated; all other markup
//! passes through untouched.

use std::sync::LazyLock;

use regex::Regex;

static OPEN_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\{(?:\s*#!(\w+))?").expect("valid fence regex"));
static CLOSE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\}\}\}").expect("valid fence regex"));

pub fn convert_moinmoin(text: &str) -> String {
    let text = OPEN_FENCE_RE.replace_all(text, "```${1}");
    CLOSE_FENCE_RE.replace_all(&text, "```").into_owned()
}
