use crate::error::Result;
use crate::indexing::{ArrayData, DType, Indexer, LazilyIndexedArray};
use crate::store::GribDataStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An attribute value attached to a variable or to the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
    Array(Vec<AttributeValue>),
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Boolean(b) => write!(f, "{}", b),
            AttributeValue::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            AttributeValue::Null => write!(f, "null"),
        }
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// The data reference held by a variable: either a plain in-memory array
/// (coordinate axes built from header metadata) or a lazy view that reads
/// through the store on demand (decoded GRIB fields).
#[derive(Debug, Clone)]
pub enum VariableData {
    Eager(ArrayData),
    Lazy(LazilyIndexedArray),
}

/// A named array with dimension names, attributes, and encoding metadata.
#[derive(Debug, Clone)]
pub struct Variable {
    pub dimensions: Vec<String>,
    pub data: VariableData,
    pub attributes: Attributes,
    pub encoding: Attributes,
}

impl Variable {
    pub fn shape(&self) -> Vec<usize> {
        match &self.data {
            VariableData::Eager(arr) => arr.shape.clone(),
            VariableData::Lazy(lazy) => lazy.shape(),
        }
    }

    pub fn dtype(&self) -> DType {
        match &self.data {
            VariableData::Eager(arr) => arr.dtype,
            VariableData::Lazy(lazy) => lazy.dtype(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Whether values are read through the store on access.
    pub fn is_lazy(&self) -> bool {
        matches!(self.data, VariableData::Lazy(_))
    }

    /// Applies an outer-indexing expression, reading through the store if
    /// the data is lazy.
    pub fn get(&self, key: &[Indexer]) -> Result<ArrayData> {
        match &self.data {
            VariableData::Eager(arr) => arr.index(key),
            VariableData::Lazy(lazy) => lazy.get(key),
        }
    }

    /// Materializes all values.
    pub fn values(&self) -> Result<ArrayData> {
        match &self.data {
            VariableData::Eager(arr) => Ok(arr.clone()),
            VariableData::Lazy(lazy) => lazy.read(),
        }
    }
}

/// Dataset-level encoding derived by the store at open time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetEncoding {
    /// Names of unlimited (record) dimensions, the ones `get_dimensions`
    /// reports with a `None` size.
    pub unlimited_dims: BTreeSet<String>,
    pub source: String,
}

/// The final aggregate handed back by `open_dataset`: variables, global
/// attributes, coordinate names, encoding, and the open store for later
/// explicit closing.
#[derive(Debug)]
pub struct Dataset {
    pub variables: BTreeMap<String, Variable>,
    pub attributes: Attributes,
    pub coord_names: BTreeSet<String>,
    pub encoding: DatasetEncoding,
    pub(crate) file_handle: Option<GribDataStore>,
}

impl Dataset {
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Variables that are not coordinates.
    pub fn data_vars(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.variables
            .iter()
            .filter(|(name, _)| !self.coord_names.contains(*name))
    }

    pub fn coords(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.variables
            .iter()
            .filter(|(name, _)| self.coord_names.contains(*name))
    }

    /// Dimension name to size, `None` for unlimited dimensions, as reported
    /// by the store this dataset was opened from.
    pub fn dimensions(&self) -> BTreeMap<String, Option<u64>> {
        match &self.file_handle {
            Some(store) => store.get_dimensions(),
            None => BTreeMap::new(),
        }
    }

    /// Closes the underlying file handle. Lazy variables error on any
    /// subsequent read; eager data stays available.
    pub fn close(&mut self) {
        if let Some(store) = self.file_handle.take() {
            store.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.file_handle.is_none()
    }
}
