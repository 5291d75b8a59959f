//! Dataset scope and caller context handed in by the authorization boundary.
//!
//! The gateway never derives permissions itself; it only enforces the scope it
//! is given.

use serde::{Deserialize, Serialize};

/// Schema plus permitted tables a request is authorized against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetScope {
    pub dataset_id: i64,
    pub dataset_name: String,
    pub schema_name: String,
    pub permitted_tables: Vec<String>,
}

impl DatasetScope {
    pub fn new(
        dataset_id: i64,
        dataset_name: impl Into<String>,
        schema_name: impl Into<String>,
        permitted_tables: Vec<String>,
    ) -> Self {
        Self {
            dataset_id,
            dataset_name: dataset_name.into(),
            schema_name: schema_name.into(),
            permitted_tables,
        }
    }

    /// Key for the schema snapshot cache; one entry per dataset and schema.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.dataset_id, self.schema_name)
    }

    pub fn permits(&self, table: &str) -> bool {
        self.permitted_tables.iter().any(|t| t == table)
    }
}

/// The already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: i64,
    pub role: String,
}

impl UserContext {
    pub fn new(user_id: i64, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permits_is_exact() {
        let scope = DatasetScope::new(
            1,
            "Sales Analytics",
            "sales_data",
            vec!["products".to_string(), "sales".to_string()],
        );
        assert!(scope.permits("products"));
        assert!(!scope.permits("customers"));
        assert_eq!(scope.cache_key(), "1:sales_data");
    }
}
