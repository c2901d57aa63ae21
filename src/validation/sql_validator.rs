use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::TranslationError;

const AGGREGATE_FUNCTIONS: &[&str] = &["SUM", "AVG", "COUNT", "MIN", "MAX"];

/// Clause-level structure of a SQL query, read from its tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlShape {
    pub select_star: bool,
    pub has_where: bool,
    pub has_group_by: bool,
    pub has_order_by: bool,
    pub has_limit: bool,
    pub has_aggregate: bool,
}

/// SQL validation service for ensuring produced queries are safe and valid
pub struct SqlValidator;

impl SqlValidator {
    /// Validate SQL query and ensure it's a SELECT statement
    pub fn validate_select_only(sql: &str) -> Result<String, TranslationError> {
        let dialect = PostgreSqlDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(sql)
            .map_err(|e| TranslationError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        let ast = parser
            .parse_statements()
            .map_err(|e| TranslationError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        if ast.is_empty() {
            return Err(TranslationError::InvalidSql("Empty SQL query".to_string()));
        }

        for stmt in ast {
            match stmt {
                Statement::Query(_) => {}
                Statement::Insert { .. } => {
                    return Err(TranslationError::InvalidSql(
                        "INSERT statements are not allowed. Only SELECT queries are permitted.".to_string(),
                    ));
                }
                Statement::Update { .. } => {
                    return Err(TranslationError::InvalidSql(
                        "UPDATE statements are not allowed. Only SELECT queries are permitted.".to_string(),
                    ));
                }
                Statement::Delete { .. } => {
                    return Err(TranslationError::InvalidSql(
                        "DELETE statements are not allowed. Only SELECT queries are permitted.".to_string(),
                    ));
                }
                Statement::Drop { .. } => {
                    return Err(TranslationError::InvalidSql(
                        "DROP statements are not allowed. Only SELECT queries are permitted.".to_string(),
                    ));
                }
                other => {
                    return Err(TranslationError::InvalidSql(format!(
                        "Only SELECT queries are permitted. Found: {}",
                        other
                    )));
                }
            }
        }

        Ok(sql.to_string())
    }

    /// Report which clauses a query uses.
    ///
    /// Works on the token stream, so identifiers such as `order_total` or
    /// `"limit"` and comments mentioning `WHERE` are not mistaken for clauses.
    pub fn inspect(sql: &str) -> Result<SqlShape, TranslationError> {
        let dialect = PostgreSqlDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize()
            .map_err(|e| TranslationError::InvalidSql(format!("SQL tokenizing error: {}", e)))?;

        // Keywords as uppercase strings, punctuation kept, whitespace and comments dropped
        let significant: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect();

        let keyword_at = |idx: usize| -> Option<String> {
            match significant.get(idx) {
                Some(Token::Word(word)) if word.quote_style.is_none() => {
                    Some(word.value.to_uppercase())
                }
                _ => None,
            }
        };

        let mut shape = SqlShape::default();
        for idx in 0..significant.len() {
            let Some(keyword) = keyword_at(idx) else {
                continue;
            };
            let next = keyword_at(idx + 1);
            match keyword.as_str() {
                "SELECT" => {
                    let mut first = idx + 1;
                    if next.as_deref() == Some("DISTINCT") {
                        first += 1;
                    }
                    if matches!(significant.get(first), Some(Token::Mul)) {
                        shape.select_star = true;
                    }
                }
                "WHERE" => shape.has_where = true,
                "GROUP" if next.as_deref() == Some("BY") => shape.has_group_by = true,
                "ORDER" if next.as_deref() == Some("BY") => shape.has_order_by = true,
                "LIMIT" => shape.has_limit = true,
                name if AGGREGATE_FUNCTIONS.contains(&name) => {
                    if matches!(significant.get(idx + 1), Some(Token::LParen)) {
                        shape.has_aggregate = true;
                    }
                }
                _ => {}
            }
        }

        Ok(shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        assert!(SqlValidator::validate_select_only("SELECT * FROM sales").is_ok());
        assert!(SqlValidator::validate_select_only(
            "SELECT region, SUM(actual_sales) AS actual_sales FROM sales GROUP BY region"
        )
        .is_ok());

        assert!(SqlValidator::validate_select_only("INSERT INTO sales VALUES (1)").is_err());
        assert!(SqlValidator::validate_select_only("UPDATE sales SET region = 'x'").is_err());
        assert!(SqlValidator::validate_select_only("DELETE FROM sales").is_err());
        assert!(matches!(
            SqlValidator::validate_select_only("SELEC * FROM sales"),
            Err(TranslationError::InvalidSql(_))
        ));
    }

    #[test]
    fn test_inspect_clauses() {
        let shape = SqlValidator::inspect(
            "SELECT region, SUM(actual_sales) AS actual_sales FROM sales GROUP BY region ORDER BY actual_sales DESC LIMIT 5",
        )
        .unwrap();
        assert!(!shape.select_star);
        assert!(!shape.has_where);
        assert!(shape.has_group_by);
        assert!(shape.has_order_by);
        assert!(shape.has_limit);
        assert!(shape.has_aggregate);
    }

    #[test]
    fn test_inspect_ignores_identifiers_and_comments() {
        let shape = SqlValidator::inspect(
            "SELECT * FROM order_limits /* WHERE LIMIT */ WHERE \"limit\" > 1 AND summary = 'GROUP BY'",
        )
        .unwrap();
        assert!(shape.select_star);
        assert!(shape.has_where);
        assert!(!shape.has_limit);
        assert!(!shape.has_group_by);
        assert!(!shape.has_aggregate);
    }
}
