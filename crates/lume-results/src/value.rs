//! Values stored as flow inputs and outputs.
//!
//! Arrays and data frames are encoded as JSON objects carrying a
//! `__lume_type__` marker so they come back out of a store with their type.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResultsError;

const TYPE_MARKER: &str = "__lume_type__";

/// Named input or output values of a result
pub type ValueMap = IndexMap<String, ResultValue>;

/// N-dimensional array stored in row-major order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    /// Element type, e.g. `float64`
    pub dtype: String,
    /// Dimension sizes
    pub shape: Vec<usize>,
    /// Flattened elements
    pub data: Vec<Value>,
}

impl NdArray {
    /// Create an array, checking the element count against the shape
    pub fn new(
        dtype: impl Into<String>,
        shape: Vec<usize>,
        data: Vec<Value>,
    ) -> Result<Self, ResultsError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ResultsError::InvalidDocument(format!(
                "array of shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            dtype: dtype.into(),
            shape,
            data,
        })
    }

    /// One-dimensional float array
    pub fn from_f64(values: &[f64]) -> Self {
        Self {
            dtype: "float64".to_string(),
            shape: vec![values.len()],
            data: values.iter().map(|v| Value::from(*v)).collect(),
        }
    }

    /// One-dimensional integer array
    pub fn from_i64(values: &[i64]) -> Self {
        Self {
            dtype: "int64".to_string(),
            shape: vec![values.len()],
            data: values.iter().map(|v| Value::from(*v)).collect(),
        }
    }
}

/// Column-oriented table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    /// Column name to column values, in column order
    pub columns: IndexMap<String, Vec<Value>>,
}

impl DataFrame {
    /// Create an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    /// Number of rows, taken from the first column
    pub fn len(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    /// Whether the frame has no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Columns are encoded as a list so their order survives JSON objects
#[derive(Debug, Serialize, Deserialize)]
struct EncodedColumn {
    name: String,
    values: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct EncodedFrame {
    columns: Vec<EncodedColumn>,
}

/// A stored input or output value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ResultValue {
    /// Array value
    NdArray(NdArray),
    /// Table value
    DataFrame(DataFrame),
    /// Any other JSON value
    Json(Value),
}

impl ResultValue {
    /// Encoded JSON form, as written to a store
    pub fn to_json(&self) -> Value {
        Value::from(self.clone())
    }
}

fn tagged(tag: &str, body: Value) -> Value {
    match body {
        Value::Object(mut fields) => {
            fields.insert(TYPE_MARKER.to_string(), Value::String(tag.to_string()));
            Value::Object(fields)
        }
        other => other,
    }
}

impl From<ResultValue> for Value {
    fn from(value: ResultValue) -> Self {
        match value {
            ResultValue::NdArray(array) => tagged(
                "ndarray",
                serde_json::json!({ "dtype": array.dtype, "shape": array.shape, "data": array.data }),
            ),
            ResultValue::DataFrame(frame) => {
                let columns: Vec<EncodedColumn> = frame
                    .columns
                    .into_iter()
                    .map(|(name, values)| EncodedColumn { name, values })
                    .collect();
                tagged("dataframe", serde_json::json!({ "columns": columns }))
            }
            ResultValue::Json(value) => value,
        }
    }
}

impl TryFrom<Value> for ResultValue {
    type Error = ResultsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let tag = value
            .as_object()
            .and_then(|fields| fields.get(TYPE_MARKER))
            .and_then(Value::as_str)
            .map(str::to_string);

        match tag.as_deref() {
            None => Ok(ResultValue::Json(value)),
            Some("ndarray") => {
                let array: NdArray = serde_json::from_value(value)?;
                NdArray::new(array.dtype, array.shape, array.data).map(ResultValue::NdArray)
            }
            Some("dataframe") => {
                let frame: EncodedFrame = serde_json::from_value(value)?;
                Ok(ResultValue::DataFrame(DataFrame {
                    columns: frame
                        .columns
                        .into_iter()
                        .map(|column| (column.name, column.values))
                        .collect(),
                }))
            }
            Some(other) => Err(ResultsError::InvalidDocument(format!(
                "unknown value type {}",
                other
            ))),
        }
    }
}

impl From<NdArray> for ResultValue {
    fn from(array: NdArray) -> Self {
        ResultValue::NdArray(array)
    }
}

impl From<DataFrame> for ResultValue {
    fn from(frame: DataFrame) -> Self {
        ResultValue::DataFrame(frame)
    }
}

impl From<f64> for ResultValue {
    fn from(value: f64) -> Self {
        ResultValue::Json(Value::from(value))
    }
}

impl From<&str> for ResultValue {
    fn from(value: &str) -> Self {
        ResultValue::Json(Value::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_encoding_is_tagged() {
        let encoded = ResultValue::from(NdArray::from_i64(&[1, 2, 3])).to_json();
        assert_eq!(encoded["__lume_type__"], "ndarray");
        assert_eq!(encoded["shape"], json!([3]));

        let decoded: ResultValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, ResultValue::NdArray(NdArray::from_i64(&[1, 2, 3])));
    }

    #[test]
    fn test_dataframe_keeps_column_order() {
        let frame = DataFrame::new()
            .with_column("y", vec![json!(1), json!(2)])
            .with_column("x", vec![json!(0), json!(1)]);
        let text = serde_json::to_string(&ResultValue::from(frame.clone())).unwrap();
        let decoded: ResultValue = serde_json::from_str(&text).unwrap();

        match decoded {
            ResultValue::DataFrame(decoded) => {
                assert_eq!(decoded.columns.keys().collect::<Vec<_>>(), vec!["y", "x"]);
                assert_eq!(decoded.len(), 2);
            }
            other => panic!("Expected DataFrame, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_values_pass_through() {
        let decoded: ResultValue = serde_json::from_value(json!({"a": 1})).unwrap();
        assert_eq!(decoded, ResultValue::Json(json!({"a": 1})));
    }

    #[test]
    fn test_try_from_decodes_tagged_values() {
        let encoded = ResultValue::from(NdArray::from_f64(&[0.5, 1.5])).to_json();
        assert_eq!(
            ResultValue::try_from(encoded).unwrap(),
            ResultValue::NdArray(NdArray::from_f64(&[0.5, 1.5]))
        );
        assert_eq!(
            ResultValue::try_from(json!(1.5)).unwrap(),
            ResultValue::Json(json!(1.5))
        );
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = NdArray::new("int64", vec![2, 2], vec![json!(1)]).unwrap_err();
        assert_eq!(err.error_code(), "ERR_RESULTS_INVALID_DOCUMENT");

        let bad = json!({"__lume_type__": "ndarray", "dtype": "int64", "shape": [2], "data": [1]});
        assert!(serde_json::from_value::<ResultValue>(bad).is_err());
    }
}
