//! `||cell||cell||` tables.
//!
//! Trac tables tolerate ragged rows, so they are emitted as HTML rather
//! than GFM pipe tables. Cell text is HTML-escaped; Markdown characters
//! inside cells are left alone.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^[ \t]*\|\|[^\n]*(?:\n|\z))+").expect("valid table regex")
});

const CELL_SEPARATOR: &str = "||";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCell {
    pub text: String,
    pub is_header: bool,
}

/// Replace every run of `||`-prefixed lines with an HTML table.
pub fn convert_tables(text: &str) -> String {
    TABLE_RE
        .replace_all(text, |captures: &Captures| {
            let block = &captures[0];
            let mut html = render_table(&parse_rows(block));
            if block.ends_with('\n') {
                html.push('\n');
            }
            html
        })
        .into_owned()
}

pub fn parse_rows(block: &str) -> Vec<Vec<TableCell>> {
    block
        .trim()
        .lines()
        .map(|line| {
            line.trim_matches(|ch: char| matches!(ch, ' ' | '\t' | '|'))
                .split(CELL_SEPARATOR)
                .map(parse_cell)
                .collect()
        })
        .collect()
}

fn parse_cell(raw: &str) -> TableCell {
    let trimmed = raw.trim();
    // `||= Heading =||` marks a header cell.
    if trimmed.len() >= 2 && trimmed.starts_with('=') && trimmed.ends_with('=') {
        return TableCell {
            text: trimmed.trim_matches('=').trim().to_string(),
            is_header: true,
        };
    }
    TableCell {
        text: trimmed.to_string(),
        is_header: false,
    }
}

pub fn render_table(rows: &[Vec<TableCell>]) -> String {
    let mut html = String::from("<table>\n");
    for row in rows {
        html.push_str("  <tr>\n");
        for cell in row {
            let tag = if cell.is_header { "th" } else { "td" };
            html.push_str(&format!(
                "    <{tag}>{}</{tag}>\n",
                html_escape::encode_text(&cell.text)
            ));
        }
        html.push_str("  </tr>\n");
    }
    html.push_str("</table>");
    html
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{TableCell, convert_tables, parse_rows};

    #[test]
    fn two_by_two_table_becomes_html() {
        assert_eq!(
            convert_tables("||a||b||\n||c||d||"),
            "<table>\n  <tr>\n    <td>a</td>\n    <td>b</td>\n  </tr>\n  <tr>\n    <td>c</td>\n    <td>d</td>\n  </tr>\n</table>"
        );
    }

    #[test]
    fn surrounding_text_and_trailing_newline_are_kept() {
        let output = convert_tables("before\n||x||\nafter");
        assert_eq!(
            output,
            "before\n<table>\n  <tr>\n    <td>x</td>\n  </tr>\n</table>\nafter"
        );
    }

    #[test]
    fn cells_are_trimmed_and_escaped() {
        let output = convert_tables("|| a < b ||  R&D ||\n");
        assert!(output.contains("<td>a &lt; b</td>"));
        assert!(output.contains("<td>R&amp;D</td>"));
    }

    #[test]
    fn ragged_rows_keep_their_own_cell_counts() {
        let rows = parse_rows("||a||b||c||\n||d||\n");
        assert_eq!(rows[0].len(), 3);
        assert_eq!(rows[1].len(), 1);
    }

    #[test]
    fn header_cells_render_as_th() {
        let rows = parse_rows("||= Name =||= Value =||\n||x||1||");
        assert_eq!(
            rows[0][0],
            TableCell {
                text: "Name".to_string(),
                is_header: true,
            }
        );
        let output = convert_tables("||= Name =||\n||x||");
        assert!(output.contains("<th>Name</th>"));
        assert!(output.contains("<td>x</td>"));
    }

    #[test]
    fn indented_rows_are_part_of_the_table() {
        let output = convert_tables("  ||a||\n  ||b||\n");
        assert_eq!(output.matches("<tr>").count(), 2);
    }

    #[test]
    fn separate_runs_become_separate_tables() {
        let output = convert_tables("||a||\n\ntext\n||b||\n");
        assert_eq!(output.matches("<table>").count(), 2);
    }

    #[test]
    fn lines_without_leading_separator_are_untouched() {
        assert_eq!(convert_tables("a || b"), "a || b");
    }
}
