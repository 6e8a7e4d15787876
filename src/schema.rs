use crate::error::Error;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

#[derive(Deserialize, Debug)]
struct TableSchemaConfig {
    #[serde(default = "default_version")]
    version: u32,
    schema: Vec<FieldConfig>,
}

#[derive(Deserialize, Debug)]
struct FieldConfig {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
}

fn default_version() -> u32 {
    1
}

/// Loads `<schema_dir>/<table>.json` and converts it into an Arrow schema.
pub fn load_table_schema(schema_dir: &Path, table: &str) -> Result<SchemaRef, Error> {
    let path = schema_dir.join(format!("{}.json", table));
    let content = fs::read_to_string(&path).map_err(|e| Error::SchemaConfig {
        table: table.to_string(),
        message: format!("cannot read {}: {}", path.display(), e),
    })?;

    parse_table_schema(table, &content)
}

pub fn parse_table_schema(table: &str, content: &str) -> Result<SchemaRef, Error> {
    let invalid = |message: String| Error::SchemaConfig {
        table: table.to_string(),
        message,
    };

    let config: TableSchemaConfig =
        serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;

    if config.schema.is_empty() {
        return Err(invalid("schema has no fields".to_string()));
    }

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(config.schema.len());

    for field in &config.schema {
        if !seen.insert(field.name.as_str()) {
            return Err(invalid(format!("duplicate field '{}'", field.name)));
        }

        let data_type = match field.field_type.to_ascii_uppercase().as_str() {
            "STRING" => DataType::Utf8,
            "INTEGER" | "INT64" => DataType::Int64,
            "FLOAT" | "FLOAT64" | "NUMERIC" => DataType::Float64,
            "BOOLEAN" | "BOOL" => DataType::Boolean,
            other => {
                return Err(invalid(format!(
                    "unsupported type '{}' for field '{}'",
                    other, field.name
                )))
            }
        };

        let nullable = match field.mode.as_deref().map(str::to_ascii_uppercase).as_deref() {
            None | Some("NULLABLE") => true,
            Some("REQUIRED") => false,
            Some(other) => {
                return Err(invalid(format!(
                    "unsupported mode '{}' for field '{}'",
                    other, field.name
                )))
            }
        };

        fields.push(Field::new(&field.name, data_type, nullable));
    }

    let metadata = [("version".to_string(), config.version.to_string())].into();

    Ok(Arc::new(Schema::new_with_metadata(fields, metadata)))
}
