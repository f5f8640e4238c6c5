use geo::MultiPolygon;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// An identifier as it arrived from a source, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawIdentifier {
    Text(String),
    Integer(i64),
}

impl From<&str> for RawIdentifier {
    fn from(s: &str) -> Self {
        RawIdentifier::Text(s.to_string())
    }
}

impl From<i64> for RawIdentifier {
    fn from(n: i64) -> Self {
        RawIdentifier::Integer(n)
    }
}

impl fmt::Display for RawIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawIdentifier::Text(s) => write!(f, "{:?}", s),
            RawIdentifier::Integer(n) => write!(f, "{}", n),
        }
    }
}

/// Fixed-width tract key. Only the normalizer constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CanonicalId(pub(crate) String);

impl CanonicalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Parses a CSV cell. Empty cells and `NaN` are nulls.
    pub fn parse(cell: &str) -> Option<AttributeValue> {
        let cell = cell.trim();
        if cell.is_empty() {
            return None;
        }
        match cell.parse::<f64>() {
            Ok(n) if n.is_nan() => None,
            Ok(n) => Some(AttributeValue::Number(n)),
            Err(_) => Some(AttributeValue::Text(cell.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Text(_) => None,
        }
    }
}

pub type Attributes = BTreeMap<String, Option<AttributeValue>>;

/// A polygon record straight from geometry ingestion.
#[derive(Debug, Clone)]
pub struct RawTract {
    pub id: RawIdentifier,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct TractRecord {
    pub id: CanonicalId,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Debug, Clone)]
pub struct AttributeRecord {
    pub id: RawIdentifier,
    pub values: Attributes,
}

/// Attribute rows plus the ordered column names they were read with.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    pub columns: Vec<String>,
    pub rows: Vec<AttributeRecord>,
}

/// A tract after the left join. Unmatched tracts carry every known column
/// set to `None`.
#[derive(Debug, Clone)]
pub struct JoinedTract {
    pub id: CanonicalId,
    pub geometry: MultiPolygon<f64>,
    pub matched: bool,
    pub attributes: Attributes,
}

impl JoinedTract {
    pub fn value(&self, column: &str) -> Option<&AttributeValue> {
        self.attributes.get(column).and_then(|v| v.as_ref())
    }

    /// Numeric value of `column`, or `None` when missing or non-numeric.
    pub fn metric(&self, column: &str) -> Option<f64> {
        self.value(column).and_then(AttributeValue::as_f64)
    }
}
