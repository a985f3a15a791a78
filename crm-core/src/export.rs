use crate::error::CrmError;
use serde::Serialize;

/// Render records as CSV.
///
/// The header is the union of the records' top-level keys, in first-seen
/// order. Arrays are joined with `;`, nulls and missing keys are empty,
/// nested objects are written as JSON.
pub fn to_csv<R: Serialize>(records: &[R]) -> Result<String, CrmError> {
    let rows = records
        .iter()
        .map(|record| match serde_json::to_value(record)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(CrmError::Export(format!("expected an object, got {other}"))),
        })
        .collect::<Result<Vec<_>, CrmError>>()?;

    let mut header: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !header.contains(key) {
                header.push(key.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    if !header.is_empty() {
        writer.write_record(&header).map_err(export_error)?;
    }
    for row in &rows {
        let cells: Vec<String> = header
            .iter()
            .map(|key| row.get(key).map(cell).unwrap_or_default())
            .collect();
        writer.write_record(&cells).map_err(export_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| CrmError::Export(err.to_string()))?;
    String::from_utf8(bytes).map_err(|err| CrmError::Export(err.to_string()))
}

fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(";"),
        other => other.to_string(),
    }
}

fn export_error(err: csv::Error) -> CrmError {
    CrmError::Export(err.to_string())
}
