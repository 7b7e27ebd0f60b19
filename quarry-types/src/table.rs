use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column added to every planner step result, holding the sub-question that
/// produced the row.
pub const SOURCE_TAG_COLUMN: &str = "source_question";

/// Tabular query result. Cells are JSON values so results from any executor
/// can be carried without a fixed schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn preview(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Set `name` to `value` on every row, adding the column if needed.
    pub fn with_tag_column(mut self, name: &str, value: &str) -> Table {
        let tag = Value::String(value.to_string());
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = tag.clone();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(tag.clone());
                }
            }
        }
        self
    }

    pub fn without_column(&self, name: &str) -> Table {
        let Some(idx) = self.column_index(name) else {
            return self.clone();
        };
        let mut columns = self.columns.clone();
        columns.remove(idx);
        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut r = r.clone();
                r.remove(idx);
                r
            })
            .collect();
        Table { columns, rows }
    }

    /// Row-wise union. Columns are the union of all inputs in first-seen
    /// order; cells a table does not have are null.
    ///
    /// Columns are matched by name and occurrence, so a table with two `id`
    /// columns keeps both: the second becomes `id_2` in the output.
    pub fn concat<'a, I>(tables: I) -> Table
    where
        I: IntoIterator<Item = &'a Table>,
    {
        let tables: Vec<&Table> = tables.into_iter().collect();

        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<(&str, usize), usize> = HashMap::new();
        let mut mappings: Vec<Vec<usize>> = Vec::with_capacity(tables.len());
        for table in &tables {
            let mut seen: HashMap<&str, usize> = HashMap::new();
            let mut mapping = Vec::with_capacity(table.columns.len());
            for col in &table.columns {
                let occurrence = seen.entry(col.as_str()).or_insert(0);
                let key = (col.as_str(), *occurrence);
                *occurrence += 1;
                let pos = *positions.entry(key).or_insert_with(|| {
                    columns.push(occurrence_label(key.0, key.1));
                    columns.len() - 1
                });
                mapping.push(pos);
            }
            mappings.push(mapping);
        }

        let mut rows = Vec::with_capacity(tables.iter().map(|t| t.len()).sum());
        for (table, mapping) in tables.iter().zip(&mappings) {
            for row in &table.rows {
                let mut out = vec![Value::Null; columns.len()];
                for (cell, &pos) in row.iter().zip(mapping) {
                    out[pos] = cell.clone();
                }
                rows.push(out);
            }
        }

        Table { columns, rows }
    }

    pub fn render_markdown(&self) -> String {
        if self.columns.is_empty() {
            return "(no columns)".to_string();
        }
        let mut out = String::new();
        out.push_str(&markdown_row(self.columns.iter().map(|c| escape_cell(c))));
        out.push_str(&markdown_row(self.columns.iter().map(|_| "---".to_string())));
        for row in &self.rows {
            out.push_str(&markdown_row(row.iter().map(render_cell)));
        }
        if self.rows.is_empty() {
            out.push_str("(no rows)\n");
        }
        out
    }
}

fn occurrence_label(name: &str, occurrence: usize) -> String {
    match occurrence {
        0 => name.to_string(),
        n => format!("{name}_{}", n + 1),
    }
}

fn markdown_row(cells: impl Iterator<Item = String>) -> String {
    let cells: Vec<String> = cells.collect();
    format!("| {} |\n", cells.join(" | "))
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => escape_cell(s),
        other => escape_cell(&other.to_string()),
    }
}

fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn concat_unions_columns_and_pads_nulls() {
        let a = table(&["region", "orders"], vec![vec![json!("north"), json!(2)]]);
        let b = table(&["revenue", "region"], vec![vec![json!(9.5), json!("south")]]);

        let combined = Table::concat([&a, &b]);
        assert_eq!(combined.columns, vec!["region", "orders", "revenue"]);
        assert_eq!(
            combined.rows,
            vec![
                vec![json!("north"), json!(2), Value::Null],
                vec![json!("south"), Value::Null, json!(9.5)],
            ]
        );
    }

    #[test]
    fn tagging_then_stripping_restores_columns() {
        let t = table(&["n"], vec![vec![json!(1)], vec![json!(2)]]);
        let tagged = t.clone().with_tag_column(SOURCE_TAG_COLUMN, "How many?");
        assert_eq!(
            tagged.column(SOURCE_TAG_COLUMN).unwrap(),
            vec![&json!("How many?"), &json!("How many?")]
        );
        assert_eq!(tagged.without_column(SOURCE_TAG_COLUMN), t);
    }

    #[test]
    fn preview_and_markdown() {
        let t = table(
            &["name", "note"],
            vec![
                vec![json!("a|b"), Value::Null],
                vec![json!("c"), json!(3)],
                vec![json!("d"), json!(true)],
            ],
        );
        let md = t.preview(2).render_markdown();
        assert_eq!(md, "| name | note |\n| --- | --- |\n| a\\|b |  |\n| c | 3 |\n");
        assert!(Table::new(vec!["x".into()]).render_markdown().contains("(no rows)"));
    }

    #[test]
    fn concat_keeps_repeated_column_names_apart() {
        let joined = table(&["id", "id"], vec![vec![json!(1), json!(2)]]);
        let single = Table::concat([&joined]);
        assert_eq!(single.columns, vec!["id", "id_2"]);
        assert_eq!(single.rows, vec![vec![json!(1), json!(2)]]);

        let other = table(&["id", "name", "id"], vec![vec![json!(7), json!("x"), json!(8)]]);
        let combined = Table::concat([&joined, &other]);
        assert_eq!(combined.columns, vec!["id", "id_2", "name"]);
        assert_eq!(
            combined.rows,
            vec![
                vec![json!(1), json!(2), Value::Null],
                vec![json!(7), json!(8), json!("x")],
            ]
        );
    }
}
