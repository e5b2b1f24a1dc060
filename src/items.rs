//! Input items, per-row results, and their JSON stream formats.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Key of the metadata object appended to every result row
pub const RESULT_METADATA_KEY: &str = "_mssql";

/// Error type for reading and writing item streams
#[derive(Debug)]
pub enum SerializationError {
    JsonError(serde_json::Error),
    IoError(std::io::Error),
    InvalidItem { line: usize, reason: String },
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::JsonError(err)
    }
}

impl From<std::io::Error> for SerializationError {
    fn from(err: std::io::Error) -> Self {
        SerializationError::IoError(err)
    }
}

impl std::fmt::Display for SerializationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializationError::JsonError(e) => write!(f, "JSON error: {}", e),
            SerializationError::IoError(e) => write!(f, "IO error: {}", e),
            SerializationError::InvalidItem { line, reason } => {
                write!(f, "Invalid item at {}: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for SerializationError {}

/// One row of input: its JSON fields and an optional binary payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputItem {
    pub json: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<Value>,
}

impl InputItem {
    pub fn new(json: Value) -> Self {
        Self { json, binary: None }
    }

    /// Accept either `{"json": {...}, "binary": ...}` or a bare JSON object
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("expected a JSON object".to_string());
        };

        let wrapped = matches!(map.get("json"), Some(Value::Object(_)))
            && map.keys().all(|k| k == "json" || k == "binary");

        if wrapped {
            let json = map.remove("json").unwrap_or(Value::Object(Map::new()));
            let binary = map.remove("binary").filter(|b| !b.is_null());
            Ok(Self { json, binary })
        } else {
            Ok(Self::new(Value::Object(map)))
        }
    }
}

/// Output row: the input fields plus the insert's metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowResult {
    pub json: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<Value>,
}

impl RowResult {
    /// Merge an insert's affected-row count onto its input item
    pub fn from_item(item: &InputItem, rows_affected: u64) -> Self {
        let mut fields = match &item.json {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        fields.insert(
            RESULT_METADATA_KEY.to_string(),
            json!({ "rowsAffected": rows_affected }),
        );

        Self {
            json: Value::Object(fields),
            binary: item.binary.clone(),
        }
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.json
            .get(RESULT_METADATA_KEY)
            .and_then(|m| m.get("rowsAffected"))
            .and_then(Value::as_u64)
    }
}

/// Read items from a JSON array or from NDJSON (blank lines skipped)
pub fn read_items<R: Read>(mut reader: R) -> Result<Vec<InputItem>, SerializationError> {
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;

    if contents.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(&contents)?;
        return values
            .into_iter()
            .enumerate()
            .map(|(idx, v)| {
                InputItem::from_value(v).map_err(|reason| SerializationError::InvalidItem {
                    line: idx + 1,
                    reason,
                })
            })
            .collect();
    }

    let mut items = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)?;
        let item = InputItem::from_value(value).map_err(|reason| {
            SerializationError::InvalidItem {
                line: line_num + 1,
                reason,
            }
        })?;
        items.push(item);
    }
    Ok(items)
}

/// Streams row results as NDJSON, one result per line
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Append one result line
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), SerializationError> {
        let json = serde_json::to_string(value)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    pub fn write_all<T: Serialize>(&mut self, values: &[T]) -> Result<(), SerializationError> {
        for value in values {
            self.write(value)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SerializationError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes row results as one JSON array, comma-separating as it goes
pub struct JsonArrayWriter<W: Write> {
    writer: W,
    first: bool,
}

impl<W: Write> JsonArrayWriter<W> {
    /// The opening `[` is written immediately
    pub fn new(mut writer: W) -> Result<Self, SerializationError> {
        write!(writer, "[")?;
        Ok(Self {
            writer,
            first: true,
        })
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), SerializationError> {
        if !self.first {
            write!(self.writer, ",")?;
        }
        self.first = false;

        let json = serde_json::to_string(value)?;
        write!(self.writer, "{}", json)?;
        Ok(())
    }

    /// Close the array and flush; an empty run yields `[]`
    pub fn finish(mut self) -> Result<(), SerializationError> {
        write!(self.writer, "]")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ndjson_items() {
        let input = concat!(
            "{\"name\": \"Ada\"}\n",
            "\n",
            "{\"json\": {\"name\": \"Grace\"}, \"binary\": {\"file\": \"x\"}}\n",
        );
        let items = read_items(input.as_bytes()).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].json, json!({"name": "Ada"}));
        assert_eq!(items[0].binary, None);
        assert_eq!(items[1].json, json!({"name": "Grace"}));
        assert_eq!(items[1].binary, Some(json!({"file": "x"})));
    }

    #[test]
    fn test_read_json_array_items() {
        let input = "[{\"a\": 1}, {\"a\": 2}]";
        let items = read_items(input.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].json, json!({"a": 2}));
    }

    #[test]
    fn test_object_with_json_field_and_other_keys_is_bare() {
        let item = InputItem::from_value(json!({"json": {"a": 1}, "id": 5})).unwrap();
        assert_eq!(item.json, json!({"json": {"a": 1}, "id": 5}));
    }

    #[test]
    fn test_read_rejects_non_objects() {
        match read_items("{\"a\": 1}\n42\n".as_bytes()) {
            Err(SerializationError::InvalidItem { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected InvalidItem, got {:?}", other),
        }
    }

    #[test]
    fn test_row_result_appends_metadata() {
        let item = InputItem {
            json: json!({"first": "Ada", "age": 36}),
            binary: Some(json!({"data": "aGk="})),
        };

        let result = RowResult::from_item(&item, 1);

        assert_eq!(
            result.json,
            json!({"first": "Ada", "age": 36, "_mssql": {"rowsAffected": 1}})
        );
        assert_eq!(result.binary, item.binary);
        assert_eq!(result.rows_affected(), Some(1));

        let keys: Vec<&String> = result.json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["first", "age", "_mssql"]);
    }

    #[test]
    fn test_ndjson_writer() {
        let mut buf = Vec::new();
        let mut writer = NdjsonWriter::new(&mut buf);

        let rows = vec![
            RowResult::from_item(&InputItem::new(json!({"name": "Alice"})), 1),
            RowResult::from_item(&InputItem::new(json!({"name": "Bob"})), 1),
        ];
        writer.write_all(&rows).unwrap();
        writer.flush().unwrap();

        let output = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Alice"));
        assert!(lines[1].contains("Bob"));
        assert!(!lines[0].contains("binary"));
    }

    #[test]
    fn test_json_array_writer() {
        let mut buf = Vec::new();
        let mut writer = JsonArrayWriter::new(&mut buf).unwrap();

        writer.write(&json!({"name": "Alice"})).unwrap();
        writer.write(&json!({"name": "Bob"})).unwrap();
        writer.finish().unwrap();

        let output = String::from_utf8(buf).unwrap();

        assert!(output.starts_with('['));
        assert!(output.ends_with(']'));
        assert!(output.contains("Alice"));
        assert!(output.contains("Bob"));
    }
}
