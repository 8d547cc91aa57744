// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Each Change is one reversible storage operation. A transaction buffers
// them; commit applies them in order and reverts the applied prefix if one
// fails, rollback simply drops them.
//
// ============================================================================

use crate::core::{Row, Value};
use crate::mapping::naming::quote_identifier;
use crate::storage::TableSchema;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a new row under an already allocated primary key
    InsertRow { table: String, id: i64, row: Row },

    /// Delete an existing row; `old_row` restores it on undo
    DeleteRow { table: String, id: i64, old_row: Row },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Change::InsertRow { id, .. } | Change::DeleteRow { id, .. } => *id,
        }
    }

    /// The change that reverses this one.
    pub fn inverse(&self) -> Change {
        match self {
            Change::InsertRow { table, id, row } => Change::DeleteRow {
                table: table.clone(),
                id: *id,
                old_row: row.clone(),
            },
            Change::DeleteRow { table, id, old_row } => Change::InsertRow {
                table: table.clone(),
                id: *id,
                row: old_row.clone(),
            },
        }
    }

    /// SQL equivalent of the change, for statement echo.
    pub fn to_sql(&self, schema: &TableSchema) -> String {
        match self {
            Change::InsertRow { table, row, .. } => {
                let columns: Vec<_> = schema
                    .schema()
                    .columns()
                    .iter()
                    .map(|c| quote_identifier(&c.name))
                    .collect();
                let values: Vec<String> = row.iter().map(Value::to_sql_literal).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_identifier(table),
                    columns.join(", "),
                    values.join(", ")
                )
            }
            Change::DeleteRow { table, id, .. } => {
                let pk = schema
                    .schema()
                    .primary_key_index()
                    .map(|idx| schema.schema().columns()[idx].name.as_str())
                    .unwrap_or("id");
                format!(
                    "DELETE FROM {} WHERE {} = {}",
                    quote_identifier(table),
                    quote_identifier(pk),
                    id
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType};

    fn schema() -> TableSchema {
        TableSchema::new(
            "id_card",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("active", DataType::Boolean),
            ],
        )
    }

    #[test]
    fn test_inverse_round_trip() {
        let insert = Change::InsertRow {
            table: "id_card".into(),
            id: 7,
            row: vec![Value::Integer(7), Value::Boolean(true)],
        };
        let undo = insert.inverse();
        assert!(matches!(undo, Change::DeleteRow { id: 7, .. }));
        assert_eq!(undo.inverse(), insert);
        assert_eq!(undo.table_name(), "id_card");
    }

    #[test]
    fn test_to_sql() {
        let insert = Change::InsertRow {
            table: "id_card".into(),
            id: 1,
            row: vec![Value::Integer(1), Value::Boolean(true)],
        };
        assert_eq!(
            insert.to_sql(&schema()),
            "INSERT INTO id_card (id, active) VALUES (1, true)"
        );
        assert_eq!(
            insert.inverse().to_sql(&schema()),
            "DELETE FROM id_card WHERE id = 1"
        );
    }
}
