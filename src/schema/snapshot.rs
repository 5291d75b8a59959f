//! Immutable, point-in-time description of a scope's schema shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnShape {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableShape {
    pub name: String,
    pub columns: Vec<ColumnShape>,
    /// Planner estimate (`pg_class.reltuples`), not an exact count.
    pub estimated_rows: i64,
}

impl TableShape {
    pub fn new(name: impl Into<String>, estimated_rows: i64) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            estimated_rows,
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.columns.push(ColumnShape {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        });
        self
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }
}

/// Tables and columns visible under one dataset scope.
///
/// Fields are private so a snapshot cannot change after construction; a
/// refresh builds a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    dataset_id: i64,
    dataset_name: String,
    schema_name: String,
    tables: Vec<TableShape>,
    captured_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(
        dataset_id: i64,
        dataset_name: impl Into<String>,
        schema_name: impl Into<String>,
        tables: Vec<TableShape>,
    ) -> Self {
        Self {
            dataset_id,
            dataset_name: dataset_name.into(),
            schema_name: schema_name.into(),
            tables,
            captured_at: Utc::now(),
        }
    }

    pub fn dataset_id(&self) -> i64 {
        self.dataset_id
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset_name
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn tables(&self) -> &[TableShape] {
        &self.tables
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableShape> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table).map(|t| t.has_column(column)).unwrap_or(false)
    }

    /// Schema text injected into the generation prompt.
    pub fn render_for_prompt(&self) -> String {
        if self.tables.is_empty() {
            return format!("Schema '{}' has no tables.", self.schema_name);
        }

        let mut out = vec![format!("Database Schema: {}", self.schema_name)];
        out.push("=".repeat(60));

        for table in &self.tables {
            out.push(format!(
                "\nTable: {}.{} (~{} rows)",
                self.schema_name, table.name, table.estimated_rows
            ));
            out.push("-".repeat(60));
            for col in &table.columns {
                let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
                out.push(format!("  - {}: {} ({})", col.name, col.data_type, nullable));
            }
        }

        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(
            1,
            "Sales Analytics",
            "sales_data",
            vec![
                TableShape::new("products", 120)
                    .with_column("product_id", "integer")
                    .with_column("name", "text"),
                TableShape::new("sales", 50_000).with_column("amount", "numeric"),
            ],
        )
    }

    #[test]
    fn test_lookup() {
        let snap = snapshot();
        assert!(snap.table("products").is_some());
        assert!(snap.table("customers").is_none());
        assert!(snap.has_column("sales", "amount"));
        assert!(!snap.has_column("sales", "name"));
    }

    #[test]
    fn test_render_for_prompt_qualifies_tables() {
        let text = snapshot().render_for_prompt();
        assert!(text.contains("Table: sales_data.products (~120 rows)"));
        assert!(text.contains("  - amount: numeric (NULL)"));
    }

    #[test]
    fn test_render_empty_schema() {
        let snap = SchemaSnapshot::new(2, "Empty", "empty_schema", vec![]);
        assert_eq!(snap.render_for_prompt(), "Schema 'empty_schema' has no tables.");
    }
}
