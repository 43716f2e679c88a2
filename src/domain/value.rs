//! Typed answer values and the data types declared by form bindings.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use itertools::Itertools;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.3f";
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Bind-declared data type of a node. Codes are part of the snapshot format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Untyped.
    #[default]
    Null,
    Text,
    Integer,
    Decimal,
    Date,
    Time,
    DateTime,
    Choice,
    ChoiceList,
    Boolean,
    GeoPoint,
    Barcode,
    Binary,
    Long,
    GeoShape,
    GeoTrace,
}

impl DataType {
    pub fn code(self) -> i32 {
        match self {
            DataType::Null => 0,
            DataType::Text => 1,
            DataType::Integer => 2,
            DataType::Decimal => 3,
            DataType::Date => 4,
            DataType::Time => 5,
            DataType::DateTime => 6,
            DataType::Choice => 7,
            DataType::ChoiceList => 8,
            DataType::Boolean => 9,
            DataType::GeoPoint => 10,
            DataType::Barcode => 11,
            DataType::Binary => 12,
            DataType::Long => 13,
            DataType::GeoShape => 14,
            DataType::GeoTrace => 15,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => DataType::Null,
            1 => DataType::Text,
            2 => DataType::Integer,
            3 => DataType::Decimal,
            4 => DataType::Date,
            5 => DataType::Time,
            6 => DataType::DateTime,
            7 => DataType::Choice,
            8 => DataType::ChoiceList,
            9 => DataType::Boolean,
            10 => DataType::GeoPoint,
            11 => DataType::Barcode,
            12 => DataType::Binary,
            13 => DataType::Long,
            14 => DataType::GeoShape,
            15 => DataType::GeoTrace,
            _ => return None,
        })
    }

    /// Text and untyped binds take incoming values verbatim during populate.
    pub fn is_textual(self) -> bool {
        matches!(self, DataType::Null | DataType::Text)
    }

    /// The value variant a node of this type holds, `None` when the type has
    /// no itemset-compatible representation.
    pub fn value_kind(self) -> Option<ValueKind> {
        Some(match self {
            DataType::Null | DataType::Text | DataType::Barcode | DataType::Binary => {
                ValueKind::Text
            }
            DataType::Integer => ValueKind::Integer,
            DataType::Long => ValueKind::Long,
            DataType::Decimal => ValueKind::Decimal,
            DataType::Boolean => ValueKind::Boolean,
            DataType::Date => ValueKind::Date,
            DataType::Time => ValueKind::Time,
            DataType::DateTime => ValueKind::DateTime,
            DataType::Choice => ValueKind::SelectOne,
            DataType::ChoiceList => ValueKind::SelectMulti,
            DataType::GeoPoint => ValueKind::GeoPoint,
            DataType::GeoShape | DataType::GeoTrace => return None,
        })
    }
}

/// Discriminant of [`AnswerValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Integer,
    Long,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
    SelectOne,
    SelectMulti,
    GeoPoint,
    Uncast,
}

/// A chosen item of a select question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selection {
    pub value: String,
    /// Position in the choice list, when known.
    pub index: Option<i32>,
}

impl Selection {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            index: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
}

/// A typed answer stored on a leaf node.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    Text(String),
    Integer(i32),
    Long(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    SelectOne(Selection),
    SelectMulti(Vec<Selection>),
    GeoPoint(GeoPoint),
    /// Raw text whose type has not been decided yet (attribute values,
    /// freshly restored data).
    Uncast(String),
}

impl AnswerValue {
    pub fn text(value: impl Into<String>) -> Self {
        AnswerValue::Text(value.into())
    }

    pub fn uncast(value: impl Into<String>) -> Self {
        AnswerValue::Uncast(value.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            AnswerValue::Text(_) => ValueKind::Text,
            AnswerValue::Integer(_) => ValueKind::Integer,
            AnswerValue::Long(_) => ValueKind::Long,
            AnswerValue::Decimal(_) => ValueKind::Decimal,
            AnswerValue::Boolean(_) => ValueKind::Boolean,
            AnswerValue::Date(_) => ValueKind::Date,
            AnswerValue::Time(_) => ValueKind::Time,
            AnswerValue::DateTime(_) => ValueKind::DateTime,
            AnswerValue::SelectOne(_) => ValueKind::SelectOne,
            AnswerValue::SelectMulti(_) => ValueKind::SelectMulti,
            AnswerValue::GeoPoint(_) => ValueKind::GeoPoint,
            AnswerValue::Uncast(_) => ValueKind::Uncast,
        }
    }

    pub fn is_selection(&self) -> bool {
        matches!(self, AnswerValue::SelectOne(_) | AnswerValue::SelectMulti(_))
    }

    /// Serializes the value the way it appears in instance XML.
    pub fn to_xml_text(&self) -> String {
        match self {
            AnswerValue::Text(s) | AnswerValue::Uncast(s) => s.clone(),
            AnswerValue::Integer(n) => n.to_string(),
            AnswerValue::Long(n) => n.to_string(),
            AnswerValue::Decimal(d) => d.to_string(),
            AnswerValue::Boolean(b) => b.to_string(),
            AnswerValue::Date(d) => d.format(DATE_FORMAT).to_string(),
            AnswerValue::Time(t) => t.format(TIME_FORMAT).to_string(),
            AnswerValue::DateTime(dt) => dt.format(DATE_TIME_FORMAT).to_string(),
            AnswerValue::SelectOne(s) => s.value.clone(),
            AnswerValue::SelectMulti(items) => items.iter().map(|s| &s.value).join(" "),
            AnswerValue::GeoPoint(p) => format!(
                "{} {} {} {}",
                p.latitude, p.longitude, p.altitude, p.accuracy
            ),
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml_text())
    }
}

/// Validation rule attached by a bind. Stored and copied, never evaluated here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub expression: String,
    pub message: Option<String>,
}

impl Constraint {
    pub fn new(expression: impl Into<String>, message: Option<&str>) -> Self {
        Self {
            expression: expression.into(),
            message: message.map(str::to_string),
        }
    }
}
