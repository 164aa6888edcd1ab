use std::sync::LazyLock;

use regex::{Captures, Regex};

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]*)\]").expect("valid link regex"));

static BOLD_ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'''''(.*?)'''''").expect("valid emphasis regex"));
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'''(.*?)'''").expect("valid emphasis regex"));
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"''(.*?)''").expect("valid emphasis regex"));
// The `regex` crate has no look-behind: the character before the opening
// `//` is captured and re-emitted so `scheme://` never opens a span.
static SLASH_ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^:])//(.*?[^:])//").expect("valid emphasis regex"));

// Alternation order matters: existing Markdown links and bare URLs are
// matched first so CamelCase words inside them are left alone.
static WIKI_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\[[^\]\n]*\]\([^)\n]*\))|(https?://[^\s<>()]+)|(!?)((?:[A-Z][a-z]+){2,})")
        .expect("valid wiki link regex")
});

static ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\b").expect("valid escape regex"));

const WIKI_PREFIX: &str = "wiki:";

/// Rewrite `[target label]` and bare `[target]` references.
pub fn convert_links(text: &str) -> String {
    LINK_RE
        .replace_all(text, |captures: &Captures| {
            let inner = captures[1].trim();
            if inner.is_empty() {
                return captures[0].to_string();
            }
            render_link(inner)
        })
        .into_owned()
}

fn render_link(inner: &str) -> String {
    let (target, label) = match inner.split_once(char::is_whitespace) {
        Some((target, label)) => (target, label.trim()),
        None => (inner, ""),
    };

    if !label.is_empty() {
        return format!("[{label}]({target})");
    }
    if let Some(page) = target.strip_prefix(WIKI_PREFIX) {
        return format!("[{page}]({target})");
    }
    if target.bytes().all(|byte| byte.is_ascii_digit()) {
        return format!("SVN commit r{target}");
    }
    target.to_string()
}

/// Quote and slash emphasis, most specific delimiter first.
pub fn convert_emphasis(text: &str) -> String {
    let text = BOLD_ITALIC_RE.replace_all(text, "**_${1}_**");
    let text = BOLD_RE.replace_all(&text, "**${1}**");
    let text = ITALIC_RE.replace_all(&text, "*${1}*");
    SLASH_ITALIC_RE.replace_all(&text, "${1}*${2}*").into_owned()
}

/// Link bare CamelCase words to `<base_uri>/wiki/<Word>` unless they carry
/// the `!` escape marker.
pub fn convert_wiki_links(text: &str, base_uri: &str) -> String {
    let base_uri = base_uri.trim_end_matches('/');
    WIKI_LINK_RE
        .replace_all(text, |captures: &Captures| {
            let Some(word) = captures.get(4) else {
                return captures[0].to_string();
            };
            if captures.get(3).is_some_and(|marker| !marker.is_empty()) {
                return captures[0].to_string();
            }
            let word = word.as_str();
            format!("[{}]({base_uri}/wiki/{word})", split_camel_case(word))
        })
        .into_owned()
}

fn split_camel_case(word: &str) -> String {
    let mut label = String::with_capacity(word.len() + 4);
    for (index, ch) in word.char_indices() {
        if index > 0 && ch.is_ascii_uppercase() {
            label.push(' ');
        }
        label.push(ch);
    }
    label.trim().to_string()
}

/// Drop `!` escape markers that precede a word.
pub fn remove_escape_markers(text: &str) -> String {
    ESCAPE_RE.replace_all(text, "").into_owned()
}
