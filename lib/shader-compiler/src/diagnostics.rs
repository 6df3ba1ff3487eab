use regex::Regex;

/// If `message` names a source line number, appends that line from `source`
/// to aid debugging of post-include combined sources. Recognizes the
/// two line-number shapes backend compilers commonly emit: `:<line>:` and
/// `line <line>`.
pub fn annotate_with_source_line(message: &str, source: &str) -> String {
    let line_number = find_line_number(message);
    match line_number {
        Some(line_number) => match source.lines().nth(line_number.saturating_sub(1)) {
            Some(line) => format!("{message}\n  --> source line {line_number}: {line}"),
            None => message.to_string(),
        },
        None => message.to_string(),
    }
}

fn find_line_number(message: &str) -> Option<usize> {
    let colon_form = Regex::new(r":(\d+):\d*").unwrap();
    if let Some(captures) = colon_form.captures(message) {
        if let Ok(n) = captures[1].parse::<usize>() {
            return Some(n);
        }
    }
    let word_form = Regex::new(r"(?i)\bline\s+(\d+)\b").unwrap();
    if let Some(captures) = word_form.captures(message) {
        if let Ok(n) = captures[1].parse::<usize>() {
            return Some(n);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_source_line_from_colon_form() {
        let source = "void main() {\n  oops\n}\n";
        let annotated = annotate_with_source_line("error: foo.glsl:2:3: unknown identifier", source);
        assert!(annotated.contains("oops"));
    }

    #[test]
    fn appends_source_line_from_word_form() {
        let source = "void main() {\n  oops\n}\n";
        let annotated = annotate_with_source_line("error at line 2: unknown identifier", source);
        assert!(annotated.contains("oops"));
    }

    #[test]
    fn leaves_message_untouched_without_line_number() {
        let source = "void main() {}\n";
        let annotated = annotate_with_source_line("generic failure", source);
        assert_eq!(annotated, "generic failure");
    }
}
