//! Per-category match patterns
//! Author: kartik4091
//! Created: 2025-06-05

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::types::Category;

const INSTITUTION_KEYWORDS: &str = "University|Institute|College|Academy|Center|Centre|School|\
    Laboratory|Laboratories|Foundation|Organization|Corporation|Society|Group|Association|Lab|\
    Department|Dept|Division|Campus|Faculty";

/// A capitalised word, optionally ending in an abbreviation dot
const CAPITALISED: &str = r"\p{Lu}[\p{L}\p{N}'&-]*\.?";

/// One compiled pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    pub regex: Regex,
    /// Hits must start and end on a word boundary
    pub whole_word: bool,
}

/// Patterns that find one category's plaintext on a page
#[derive(Debug, Clone)]
pub struct PatternSet {
    category: Category,
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Builds the set for `category` from its decrypted field value
    pub fn for_category(category: Category, plaintext: &str) -> Result<Self> {
        let value = plaintext.trim();
        if value.is_empty() {
            return Err(Error::ValidationError(format!(
                "{} is empty, nothing to locate",
                category
            )));
        }

        let patterns = match category {
            Category::Email => vec![literal(value, true)?],
            Category::Authors => author_names(value)
                .map(whole_word)
                .collect::<Result<Vec<_>>>()?,
            Category::Institution => vec![literal(value, false)?, institution_structure()?],
        };

        if patterns.is_empty() {
            return Err(Error::ValidationError(format!("{} has no usable names", category)));
        }
        Ok(Self { category, patterns })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }
}

/// Trimmed, non-empty names of a comma-joined author list
pub fn author_names(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|name| !name.is_empty())
}

fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| Error::ValidationError(format!("invalid pattern: {}", e)))
}

fn literal(value: &str, case_insensitive: bool) -> Result<Pattern> {
    Ok(Pattern {
        regex: compile(&regex::escape(value), case_insensitive)?,
        whole_word: false,
    })
}

fn whole_word(name: &str) -> Result<Pattern> {
    Ok(Pattern {
        regex: compile(&format!(r"\b{}\b", regex::escape(name)), true)?,
        whole_word: true,
    })
}

/// "University of X", "X Institute of Technology", "X Lab"
fn institution_structure() -> Result<Pattern> {
    let words = format!(r"{w}(?:\s+{w}){{0,4}}", w = CAPITALISED);
    let tail = format!(r"(?:\s+of(?:\s+the)?\s+{})?", words);
    let pattern = format!(
        r"\b(?:(?:{kw})\s+of(?:\s+the)?\s+{words}|{words}\s+(?:{kw})\b{tail})",
        kw = INSTITUTION_KEYWORDS,
        words = words,
        tail = tail,
    );
    Ok(Pattern { regex: compile(&pattern, false)?, whole_word: false })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(set: &PatternSet, text: &str) -> Vec<String> {
        set.patterns()
            .iter()
            .flat_map(|p| p.regex.find_iter(text).map(|m| m.as_str().to_string()))
            .collect()
    }

    #[test]
    fn test_email_is_literal_and_case_insensitive() {
        let set = PatternSet::for_category(Category::Email, "jane.doe@uni.edu").unwrap();
        assert_eq!(matches(&set, "Contact JANE.DOE@UNI.EDU now"), vec!["JANE.DOE@UNI.EDU"]);
        assert!(matches(&set, "janexdoe@uni.edu").is_empty());
    }

    #[test]
    fn test_author_names_match_whole_words() {
        let set = PatternSet::for_category(Category::Authors, "Jane Doe, John Roe,  ").unwrap();
        assert_eq!(set.patterns().len(), 2);
        assert_eq!(matches(&set, "by jane doe and John Roe"), vec!["jane doe", "John Roe"]);
        assert!(matches(&set, "Jane Doelittle").is_empty());
        assert!(set.patterns().iter().all(|p| p.whole_word));
    }

    #[test]
    fn test_institution_structure() {
        let set = PatternSet::for_category(Category::Institution, "MIT CSAIL").unwrap();
        let found = matches(&set, "We thank the University of Oslo and Bell Labs.");
        assert!(found.contains(&"University of Oslo".to_string()));

        let found = matches(&set, "Work done at Massachusetts Institute of Technology and MIT CSAIL");
        assert!(found.contains(&"MIT CSAIL".to_string()));
        assert!(found.contains(&"Massachusetts Institute of Technology".to_string()));
    }

    #[test]
    fn test_empty_values_are_rejected() {
        assert!(PatternSet::for_category(Category::Email, "  ").is_err());
        assert!(PatternSet::for_category(Category::Authors, " , ,").is_err());
    }
}
