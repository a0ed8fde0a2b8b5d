use std::time::Instant;

pub mod circuit_breaker;
pub mod logging;
pub mod retry;

/// First `max_chars` characters of `text` on one line, with an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let single_line = text.replace(['\r', '\n'], " ");
    let trimmed = single_line.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_keeps_short_text() {
        assert_eq!(preview("  BEGIN:VEVENT  ", 20), "BEGIN:VEVENT");
    }

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        assert_eq!(preview("Grüße aus Köln", 5), "Grüße…");
        assert_eq!(preview("line one\r\nline two", 100), "line one  line two");
    }
}
