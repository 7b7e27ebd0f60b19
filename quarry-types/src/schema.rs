use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Tables and columns of one connection. Derived on demand, never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableSchema>,
}

impl SchemaDescription {
    pub fn render(&self) -> String {
        if self.tables.is_empty() {
            return "Database schema: (no tables)".to_string();
        }
        let mut out = String::from("Database schema:");
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    if c.data_type.is_empty() {
                        c.name.clone()
                    } else {
                        format!("{} {}", c.name, c.data_type)
                    }
                })
                .collect();
            out.push_str(&format!("\n- {}({})", table.name, columns.join(", ")));
        }
        out
    }
}
