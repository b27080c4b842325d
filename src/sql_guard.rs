//! Restriction of `/query` to single read-only statements.
//!
//! A statement passes only if it starts with `SELECT` (any case) and contains
//! no second statement, no comment and no write/DDL keyword. The checks are
//! lexical: a forbidden word inside a string literal is still rejected.

use thiserror::Error;

/// Whole-word keywords that never appear in an accepted query.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "GRANT",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryRejection {
    #[error("sql is required")]
    Missing,

    #[error("Only SELECT queries are allowed")]
    NotSelect,

    #[error("Only a single statement is allowed")]
    MultipleStatements,

    #[error("SQL comments are not allowed")]
    Comment,

    #[error("Query contains forbidden keyword: {0}")]
    ForbiddenKeyword(&'static str),
}

/// Check `sql` and return it trimmed if it may be forwarded.
pub fn validate_select(sql: &str) -> Result<&str, QueryRejection> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(QueryRejection::Missing);
    }

    let upper = trimmed.to_ascii_uppercase();
    let first_word: String = upper
        .chars()
        .take_while(|c| is_word_char(*c))
        .collect();
    if first_word != "SELECT" {
        return Err(QueryRejection::NotSelect);
    }

    if upper.contains("--") || upper.contains("/*") {
        return Err(QueryRejection::Comment);
    }

    if let Some(pos) = upper.find(';') {
        if !upper[pos + 1..].trim().is_empty() {
            return Err(QueryRejection::MultipleStatements);
        }
    }

    for word in upper.split(|c: char| !is_word_char(c)) {
        if let Some(keyword) = FORBIDDEN_KEYWORDS.iter().find(|k| **k == word) {
            return Err(QueryRejection::ForbiddenKeyword(*keyword));
        }
    }

    Ok(trimmed)
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_accepts_select_any_case() {
        assert_eq!(
            validate_select("select * from customers"),
            Ok("select * from customers")
        );
        assert!(validate_select("  SELECT count(*) FROM alerts  ").is_ok());
        assert!(validate_select("Select\n  id\nFROM t").is_ok());
        assert!(validate_select("SELECT 1;").is_ok());
        assert!(validate_select("SELECT 1 ;  ").is_ok());
    }

    #[test]
    fn test_rejects_non_select() {
        assert_eq!(
            validate_select("DELETE FROM x"),
            Err(QueryRejection::NotSelect)
        );
        assert_eq!(
            validate_select("WITH t AS (SELECT 1) SELECT * FROM t"),
            Err(QueryRejection::NotSelect)
        );
        assert_eq!(
            validate_select("SELECTED FROM x"),
            Err(QueryRejection::NotSelect)
        );
        assert_eq!(validate_select("   "), Err(QueryRejection::Missing));
    }

    #[test]
    fn test_rejects_statement_chaining() {
        assert_eq!(
            validate_select("SELECT 1; SELECT 2"),
            Err(QueryRejection::MultipleStatements)
        );
        assert_eq!(
            validate_select("SELECT 1;DROP TABLE x"),
            Err(QueryRejection::MultipleStatements)
        );
    }

    #[test]
    fn test_rejects_comments() {
        assert_eq!(
            validate_select("SELECT 1 -- ; DROP TABLE x"),
            Err(QueryRejection::Comment)
        );
        assert_eq!(
            validate_select("SELECT /* hidden */ 1"),
            Err(QueryRejection::Comment)
        );
    }

    #[test]
    fn test_forbidden_keywords_are_whole_words() {
        assert!(validate_select("SELECT created_at, updated_by FROM customers").is_ok());
        assert!(validate_select("SELECT dropped FROM stats").is_ok());
        assert_eq!(
            validate_select("SELECT * FROM t WHERE id IN (DELETE FROM t RETURNING id)"),
            Err(QueryRejection::ForbiddenKeyword("DELETE"))
        );
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            QueryRejection::NotSelect.to_string(),
            "Only SELECT queries are allowed"
        );
        assert_eq!(
            QueryRejection::ForbiddenKeyword("DROP").to_string(),
            "Query contains forbidden keyword: DROP"
        );
    }
}
