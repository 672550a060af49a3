//! Line diffs for failed stdout comparisons.

use similar::{ChangeTag, TextDiff};

const SEPARATOR: &str = " | ";

fn clip(line: &str, width: usize) -> String {
    if line.chars().count() <= width {
        return line.to_string();
    }
    let mut clipped: String = line.chars().take(width.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

fn cell(marker: char, line: Option<&str>, width: usize) -> String {
    match line {
        Some(line) => format!("{} {}", marker, clip(line, width)),
        None => String::new(),
    }
}

/// Two-column diff: expected on the left, actual on the right. Removed
/// lines are marked `-`, added lines `+`; a removed and an added line that
/// replace each other share a row. `width` is the text width of a column.
pub fn side_by_side(expected: &str, actual: &str, width: usize) -> String {
    let diff = TextDiff::from_lines(expected, actual);
    let column = width + 2;
    let mut rows = vec![format!("{:<column$}{}{}", "  expected", SEPARATOR, "  actual")];
    let mut removed: Vec<String> = Vec::new();
    let mut added: Vec<String> = Vec::new();

    let flush = |rows: &mut Vec<String>, removed: &mut Vec<String>, added: &mut Vec<String>| {
        for idx in 0..removed.len().max(added.len()) {
            let left = cell('-', removed.get(idx).map(String::as_str), width);
            let right = cell('+', added.get(idx).map(String::as_str), width);
            rows.push(format!("{:<column$}{}{}", left, SEPARATOR, right).trim_end().to_string());
        }
        removed.clear();
        added.clear();
    };

    for change in diff.iter_all_changes() {
        let line = change.value().trim_end_matches(['\r', '\n']).to_string();
        match change.tag() {
            ChangeTag::Delete => removed.push(line),
            ChangeTag::Insert => added.push(line),
            ChangeTag::Equal => {
                flush(&mut rows, &mut removed, &mut added);
                let text = cell(' ', Some(&line), width);
                rows.push(format!("{:<column$}{}{}", text, SEPARATOR, text).trim_end().to_string());
            }
        }
    }
    flush(&mut rows, &mut removed, &mut added);

    rows.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_line_shares_a_row() {
        let rendered = side_by_side("Hello\nWorld\n", "Hello\nworld\n", 10);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "  Hello      |   Hello");
        assert_eq!(lines[2], "- World      | + world");
    }

    #[test]
    fn test_extra_blank_line_is_shown() {
        let rendered = side_by_side("Hello\nWorld", "Hello\n\nWorld", 10);
        assert!(rendered.lines().any(|line| line.trim_end() == "             | +"));
    }

    #[test]
    fn test_missing_line_leaves_right_column_empty() {
        let rendered = side_by_side("a\nb\n", "a\n", 4);
        assert_eq!(rendered.lines().last(), Some("- b    |"));
    }

    #[test]
    fn test_long_lines_are_clipped() {
        let rendered = side_by_side("abcdefghijkl", "x", 8);
        assert!(rendered.contains("- abcde..."));
    }
}
