//! Reviewer-facing masks for anonymised fields

use crate::redaction::author_names;

fn initial(value: &str) -> String {
    match value.trim().chars().next() {
        Some(first) => format!("{}***", first),
        None => String::new(),
    }
}

/// `Jane Doe, John Roe` becomes `J***, J***`
pub fn mask_authors(authors: &str) -> String {
    author_names(authors).map(initial).collect::<Vec<_>>().join(", ")
}

/// `jane@cs.uni.edu` becomes `j***@***.edu`
pub fn mask_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((user, domain)) => {
            let extension = domain.rsplit('.').next().unwrap_or_default();
            format!("{}@***.{}", initial(user), extension)
        }
        None => initial(email),
    }
}

pub fn mask_institution(institution: &str) -> String {
    initial(institution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks() {
        assert_eq!(mask_authors("Jane Doe, John Roe"), "J***, J***");
        assert_eq!(mask_authors(" , "), "");
        assert_eq!(mask_email("jane@cs.uni.edu"), "j***@***.edu");
        assert_eq!(mask_email("nobody"), "n***");
        assert_eq!(mask_institution("  Írta Labs"), "Í***");
        assert_eq!(mask_institution(""), "");
    }
}
