use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::code_blocks::{retained_placeholders, visible_len};

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(=+)[ \t]*([^=\s][^\n]*?)[ \t]*=+[ \t]*(?:#[\w-]+[ \t]*)?$")
        .expect("valid header regex")
});

// End-of-line form must run before the inline form.
static BREAK_EOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)[ \t]*\[\[[ \t]*br[ \t]*\]\][ \t]*$").expect("valid line break regex")
});
static BREAK_INLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[ \t]*\[\[[ \t]*br[ \t]*\]\][ \t]*").expect("valid line break regex")
});

static RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*-{4,}([^\n]*)$").expect("valid rule regex"));

static MACRO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[.*?\]\]\s*").expect("valid macro regex"));

/// `= Title =` becomes a setext H1, `== Title ==` a setext H2, deeper
/// levels become ATX headers.
pub fn convert_headers(text: &str) -> String {
    HEADER_RE
        .replace_all(text, |captures: &Captures| {
            let level = captures[1].len();
            render_header(level, captures[2].trim())
        })
        .into_owned()
}

fn render_header(level: usize, title: &str) -> String {
    match level {
        1 => format!("{title}\n{}", "=".repeat(visible_len(title))),
        2 => format!("{title}\n{}", "-".repeat(visible_len(title))),
        _ => format!("{} {title}", "#".repeat(level)),
    }
}

/// `[[BR]]` becomes a Markdown hard break.
pub fn convert_breaks(text: &str) -> String {
    let text = BREAK_EOL_RE.replace_all(text, "  ");
    BREAK_INLINE_RE.replace_all(&text, "  \n").into_owned()
}

/// A line of four or more dashes becomes `* * *`; anything after the
/// dashes is dropped.
pub fn convert_rules(text: &str) -> String {
    RULE_RE
        .replace_all(text, |captures: &Captures| {
            let kept = retained_placeholders(&captures[1]);
            if kept.is_empty() {
                "* * *".to_string()
            } else {
                format!("* * *\n{kept}")
            }
        })
        .into_owned()
}

/// Drop `[[Macro(...)]]` directives together with trailing whitespace.
pub fn remove_macros(text: &str) -> String {
    MACRO_RE
        .replace_all(text, |captures: &Captures| retained_placeholders(&captures[0]))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{convert_breaks, convert_headers, convert_rules, remove_macros};

    #[rstest]
    #[case("= Title =", "Title\n=====")]
    #[case("== Title ==", "Title\n-----")]
    #[case("=== Title ===", "### Title")]
    #[case("==== Deep ====", "#### Deep")]
    #[case("==   Padded title   ==  ", "Padded title\n------------")]
    #[case("== Uneven =", "Uneven\n------")]
    #[case("== Anchored == #install", "Anchored\n--------")]
    #[case("= 100%% sure =", "100%% sure\n=========")]
    fn headers_map_levels(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(convert_headers(input), expected);
    }

    #[test]
    fn headers_only_match_whole_lines() {
        let input = "intro\n== Setup ==\nbody = value =\n";
        assert_eq!(
            convert_headers(input),
            "intro\nSetup\n-----\nbody = value =\n"
        );
    }

    #[test]
    fn lone_equals_run_is_not_a_header() {
        assert_eq!(convert_headers("===="), "====");
    }

    #[test]
    fn break_at_end_of_line_becomes_trailing_spaces() {
        assert_eq!(convert_breaks("first [[BR]]\nsecond"), "first  \nsecond");
    }

    #[test]
    fn inline_break_starts_a_new_line() {
        assert_eq!(convert_breaks("one[[br]]two"), "one  \ntwo");
    }

    #[rstest]
    #[case("----", "* * *")]
    #[case("above\n-------- trailing\nbelow", "above\n* * *\nbelow")]
    #[case("---", "---")]
    fn rules_replace_dash_lines(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(convert_rules(input), expected);
    }

    #[test]
    fn rule_keeps_code_placeholder_from_dropped_tail() {
        assert_eq!(convert_rules("---- %1$s"), "* * *\n%1$s");
    }

    #[test]
    fn macros_and_trailing_whitespace_are_removed() {
        assert_eq!(
            remove_macros("[[PageOutline]]\n\nText [[Image(a.png)]] here"),
            "Text here"
        );
    }

    #[test]
    fn macro_removal_preserves_enclosed_placeholders() {
        assert_eq!(remove_macros("a [[Include(%1$s)]] b"), "a %1$sb");
    }
}
