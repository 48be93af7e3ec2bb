use serde_json::Value;

use crate::error::ResultsError;

/// Converts between an in-memory item and the bytes stored in a file
pub trait Serializer: Send + Sync {
    /// In-memory representation
    type Item: Send;

    /// Encode an item
    fn serialize(&self, item: &Self::Item) -> Result<Vec<u8>, ResultsError>;

    /// Decode an item
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Item, ResultsError>;
}

/// UTF-8 text files
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSerializer;

impl Serializer for TextSerializer {
    type Item = String;

    fn serialize(&self, item: &String) -> Result<Vec<u8>, ResultsError> {
        Ok(item.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String, ResultsError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ResultsError::Serialization(format!("File is not valid UTF-8: {}", e)))
    }
}

/// JSON files
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    /// Indent the written JSON
    pub pretty: bool,
}

impl Serializer for JsonSerializer {
    type Item = Value;

    fn serialize(&self, item: &Value) -> Result<Vec<u8>, ResultsError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(item)?
        } else {
            serde_json::to_vec(item)?
        };
        Ok(bytes)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value, ResultsError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Opaque binary files such as images and HDF5 archives
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer for BytesSerializer {
    type Item = Vec<u8>;

    fn serialize(&self, item: &Vec<u8>) -> Result<Vec<u8>, ResultsError> {
        Ok(item.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, ResultsError> {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_rejects_invalid_utf8() {
        let err = TextSerializer.deserialize(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.error_code(), "ERR_RESULTS_SERIALIZATION");
    }

    #[test]
    fn test_json_pretty_output() {
        let bytes = JsonSerializer { pretty: true }.serialize(&json!({"a": 1})).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains('\n'));
    }
}
