//! Cleanup for text arriving from the terminal, mostly bracketed pastes.

/// Normalizes pasted or typed text: tabs become four spaces, `\r\n` and lone
/// `\r` become `\n`, other control characters are dropped.
pub fn sanitize_text_input(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\t' => sanitized.push_str("    "),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                sanitized.push('\n');
            }
            '\n' => sanitized.push(c),
            _ if !c.is_control() => sanitized.push(c),
            _ => {}
        }
    }

    sanitized
}

/// Folds a multi-line paste onto one prompt line. Blank lines are dropped
/// and the remaining lines are joined with single spaces.
pub fn single_line(text: &str) -> String {
    sanitize_text_input(text)
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
