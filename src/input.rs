use serde_json::Value;

use crate::bulk_writer::Record;
use crate::error::JobError;

/// One record per non-blank NDJSON line. With `id_field`, a string or number
/// field of that name becomes the document id.
pub fn records_from_ndjson(text: &str, id_field: Option<&str>) -> Result<Vec<Record>, JobError> {
    let mut records = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(id_field) = id_field else {
            records.push(Record::new(line));
            continue;
        };

        let document: Value = serde_json::from_str(line).map_err(|e| JobError::InputRecord {
            line: number + 1,
            reason: e.to_string(),
        })?;
        let id = match document.get(id_field) {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        };
        records.push(match id {
            Some(id) => Record::with_id(&id, line),
            None => Record::new(line),
        });
    }
    Ok(records)
}
