//! Statement construction from field mappings.

use crate::{DataError, DataResult};
use serde_json::{Map, Value};

/// Field name to value mapping used by insert and update.
pub type FieldMap = Map<String, Value>;

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Statement text with `?` placeholders.
    pub sql: String,
    /// Values bound to the placeholders, in order.
    pub params: Vec<Value>,
}

impl Statement {
    /// `INSERT INTO table (a, b) VALUES (?, ?)`
    pub fn insert(table: &str, fields: &FieldMap) -> DataResult<Self> {
        check_identifier(table)?;
        if fields.is_empty() {
            return Err(DataError::EmptyPayload {
                operation: "insert",
                table: table.to_string(),
            });
        }

        let mut columns = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            check_identifier(name)?;
            columns.push(name.as_str());
            params.push(value.clone());
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(Self {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders
            ),
            params,
        })
    }

    /// `UPDATE table SET a = ?, b = ? WHERE id = ?`
    pub fn update(table: &str, id: i64, fields: &FieldMap) -> DataResult<Self> {
        check_identifier(table)?;
        if fields.is_empty() {
            return Err(DataError::EmptyPayload {
                operation: "update",
                table: table.to_string(),
            });
        }

        let mut assignments = String::new();
        let mut params = Vec::with_capacity(fields.len() + 1);
        for (name, value) in fields {
            check_identifier(name)?;
            assignments.push_str(name);
            assignments.push_str(" = ?, ");
            params.push(value.clone());
        }
        let assignments = assignments.trim_end_matches(", ");
        params.push(Value::from(id));

        Ok(Self {
            sql: format!("UPDATE {} SET {} WHERE id = ?", table, assignments),
            params,
        })
    }

    /// `DELETE FROM table WHERE id = ?`
    pub fn delete(table: &str, id: i64) -> DataResult<Self> {
        check_identifier(table)?;
        Ok(Self {
            sql: format!("DELETE FROM {} WHERE id = ?", table),
            params: vec![Value::from(id)],
        })
    }
}

/// Split a script into statements: one per non-blank line, `--` comments
/// skipped, a trailing `;` dropped.
pub fn script_statements(script: &str) -> impl Iterator<Item = &str> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--"))
        .map(|line| line.trim_end_matches(';').trim_end())
        .filter(|line| !line.is_empty())
}

fn check_identifier(name: &str) -> DataResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(DataError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_insert_statement() {
        let stmt = Statement::insert("orders", &fields(json!({"amount": 42, "note": "x"}))).unwrap();
        assert_eq!(stmt.sql, "INSERT INTO orders (amount, note) VALUES (?, ?)");
        assert_eq!(stmt.params, vec![json!(42), json!("x")]);
    }

    #[test]
    fn test_update_single_field() {
        let stmt = Statement::update("orders", 7, &fields(json!({"amount": 1}))).unwrap();
        assert_eq!(stmt.sql, "UPDATE orders SET amount = ? WHERE id = ?");
        assert_eq!(stmt.params, vec![json!(1), json!(7)]);
    }

    #[test]
    fn test_update_multiple_fields() {
        let stmt = Statement::update("orders", 7, &fields(json!({"amount": 1, "note": "n"}))).unwrap();
        assert_eq!(stmt.sql, "UPDATE orders SET amount = ?, note = ? WHERE id = ?");
        assert_eq!(stmt.params.len(), 3);
    }

    #[test]
    fn test_empty_payload() {
        let err = Statement::insert("orders", &FieldMap::new()).unwrap_err();
        assert!(err.is_empty_payload());
        let err = Statement::update("orders", 1, &FieldMap::new()).unwrap_err();
        assert!(err.is_empty_payload());
    }

    #[test]
    fn test_rejects_injection_in_identifiers() {
        assert!(matches!(
            Statement::delete("orders; DROP TABLE x", 1),
            Err(DataError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            Statement::insert("orders", &fields(json!({"a b": 1}))),
            Err(DataError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_script_statements() {
        let script = "-- schema\nCREATE TABLE orders (id INTEGER);\n\n  INSERT INTO orders (id) VALUES (1);  \n;\n";
        let statements: Vec<&str> = script_statements(script).collect();
        assert_eq!(
            statements,
            vec!["CREATE TABLE orders (id INTEGER)", "INSERT INTO orders (id) VALUES (1)"]
        );
    }
}
