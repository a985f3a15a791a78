use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// `{success, data}` wrapper used by some backend endpoints. Others return
/// the payload bare; [`normalize`] accepts both.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("envelope reported success without data")]
    MissingData,
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub fn normalize<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, EnvelopeError> {
    let Some(success) = value.get("success").and_then(serde_json::Value::as_bool) else {
        return Ok(serde_json::from_value(value)?);
    };

    if !success {
        let message = value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        return Err(EnvelopeError::Rejected(message));
    }

    match value.get("data") {
        Some(data) if !data.is_null() => Ok(serde_json::from_value(data.clone())?),
        _ => Err(EnvelopeError::MissingData),
    }
}

/// Pull a human readable message out of an error body, enveloped or not.
pub fn error_message(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_successful_envelope() {
        let value = serde_json::json!({"success": true, "data": [1, 2, 3]});
        let out: Vec<u32> = normalize(value).expect("normalize");
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn passes_raw_arrays_through() {
        let value = serde_json::json!([{"id": "a"}, {"id": "b"}]);
        let out: Vec<serde_json::Value> = normalize(value).expect("normalize");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn failed_envelope_surfaces_message() {
        let value = serde_json::json!({"success": false, "error": "owner not found"});
        let err = normalize::<Vec<u32>>(value).expect_err("should fail");
        assert!(matches!(err, EnvelopeError::Rejected(ref m) if m == "owner not found"));
    }

    #[test]
    fn success_without_data_is_an_error() {
        let value = serde_json::json!({"success": true});
        assert!(matches!(
            normalize::<Vec<u32>>(value),
            Err(EnvelopeError::MissingData)
        ));
    }
}
