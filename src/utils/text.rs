//! Text normalisation applied before any pattern matching

use unicode_normalization::UnicodeNormalization;

/// Canonical composition (NFC)
pub fn normalize(text: &str) -> String {
    text.nfc().collect()
}

/// Joins extracted lines with single spaces, dropping blank ones
pub fn join_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_composes() {
        let decomposed = "Jose\u{301} Mu\u{308}ller";
        assert_eq!(normalize(decomposed), "Jos\u{e9} M\u{fc}ller");
    }

    #[test]
    fn test_join_lines() {
        assert_eq!(join_lines("Jane Doe\n\nUniversity of Oslo  \n"), "Jane Doe University of Oslo");
        assert_eq!(join_lines(""), "");
    }
}
