// Output formatting: terminal display of extracted key phrases.

use colored::Colorize;

use crate::keywords::service::{Extraction, INSUFFICIENT_INPUT_MESSAGE};

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Unlike byte slicing (`&text[..120]`), this respects UTF-8 character boundaries
/// and will never panic on Cyrillic or other multi-byte text.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

/// Print an extraction result as a numbered list.
pub fn display_extraction(extraction: &Extraction) {
    match extraction {
        Extraction::Keywords(keywords) => {
            println!("\n{}", format!("=== Key phrases ({}) ===", keywords.len()).bold());
            for (i, keyword) in keywords.iter().enumerate() {
                println!("  {:>2}. {}", i + 1, keyword.green());
            }
        }
        Extraction::Insufficient => {
            println!("{}", INSUFFICIENT_INPUT_MESSAGE.yellow());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_short_text_unchanged() {
        assert_eq!(truncate_chars("кабель", 10), "кабель");
    }

    #[test]
    fn test_truncate_chars_cyrillic_boundary() {
        assert_eq!(truncate_chars("патентный поиск", 9), "патентный...");
    }
}
