use crate::core::{DbError, Result};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;

lazy_static::lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid");
    static ref RESERVED_WORDS: HashSet<&'static str> = [
        "AND", "AS", "BY", "CHECK", "CREATE", "DEFAULT", "DELETE", "DROP", "FOREIGN", "FROM",
        "GROUP", "HAVING", "INDEX", "INSERT", "INTO", "JOIN", "KEY", "LIMIT", "NOT", "NULL", "ON",
        "OR", "ORDER", "PRIMARY", "REFERENCES", "SELECT", "SET", "TABLE", "UNIQUE", "UPDATE",
        "USER", "VALUES", "WHERE",
    ]
    .into_iter()
    .collect();
}

/// Rejects names that cannot be used verbatim as a table or column identifier.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(DbError::ConfigurationError(format!(
            "Invalid {} name '{}': expected letters, digits and '_' not starting with a digit",
            kind, name
        )))
    }
}

/// Name of the physical column holding the foreign key for an owning field.
///
/// Format: `<field>_id`
pub fn foreign_key_column(owning_field: &str) -> String {
    format!("{}_id", owning_field)
}

/// Renders `name` for SQL text, double-quoting it when it is a reserved word.
pub fn quote_identifier(name: &str) -> Cow<'_, str> {
    if RESERVED_WORDS.contains(name.to_ascii_uppercase().as_str()) {
        Cow::Owned(format!("\"{}\"", name))
    } else {
        Cow::Borrowed(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("table", "student").is_ok());
        assert!(validate_identifier("field", "_id_card2").is_ok());
        assert!(validate_identifier("field", "2fast").is_err());
        assert!(validate_identifier("field", "id card").is_err());
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", "student; DROP").is_err());
    }

    #[test]
    fn test_foreign_key_column_name() {
        assert_eq!(foreign_key_column("id_card"), "id_card_id");
    }

    #[test]
    fn test_reserved_words_are_quoted() {
        assert_eq!(quote_identifier("group"), "\"group\"");
        assert_eq!(quote_identifier("Order"), "\"Order\"");
        assert_eq!(quote_identifier("date_of_birth"), "date_of_birth");
        assert_eq!(quote_identifier("student"), "student");
    }
}
