use crate::error::{SiltError, SiltResult};
use crate::utils::scalar::Value;

/// Column types supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int,
    Text,
    Float,
}

impl DataType {
    pub fn parse(s: &str) -> SiltResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INT" => Ok(DataType::Int),
            "TEXT" => Ok(DataType::Text),
            "FLOAT" => Ok(DataType::Float),
            other => Err(SiltError::Schema(format!("unknown column type '{other}'"))),
        }
    }

    /// Strict coercion used by INSERT and UPDATE: the raw rendering of the
    /// incoming value must parse as this type.
    pub fn coerce(&self, value: &Value) -> SiltResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let raw = value.to_string();
        match self {
            DataType::Int => raw.parse::<i32>().map(Value::Int).map_err(|_| {
                SiltError::Type(format!("cannot coerce '{raw}' to INT"))
            }),
            DataType::Float => raw.parse::<f64>().map(Value::Float).map_err(|_| {
                SiltError::Type(format!("cannot coerce '{raw}' to FLOAT"))
            }),
            DataType::Text => Ok(Value::Text(raw)),
        }
    }

    /// Lenient decode used when reading stored rows: a field that no longer
    /// matches its column type degrades to text instead of failing the scan.
    pub fn decode_field(&self, raw: &str) -> Value {
        if raw == "None" {
            return Value::Null;
        }
        match self {
            DataType::Int => raw
                .parse::<i32>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(raw.to_string())),
            DataType::Float => raw
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(raw.to_string())),
            DataType::Text => Value::Text(raw.to_string()),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Int => write!(f, "INT"),
            DataType::Text => write!(f, "TEXT"),
            DataType::Float => write!(f, "FLOAT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        ColumnDef {
            name: name.into(),
            data_type,
        }
    }
}
