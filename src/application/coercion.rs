//! Default answer resolution: instance-XML text into typed values.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::trace;

use crate::domain::value::{DATE_FORMAT, DATE_TIME_FORMAT, TIME_FORMAT};
use crate::domain::{
    AnswerResolver, AnswerValue, CoercionError, DataType, GeoPoint, Selection, TreeReference,
    ValueKind,
};

/// Parses text the way it appears in instance XML. Blank text resolves to
/// no answer for every non-text type.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlAnswerResolver;

impl AnswerResolver for XmlAnswerResolver {
    fn resolve(
        &self,
        text: &str,
        data_type: DataType,
        reference: Option<&TreeReference>,
    ) -> Result<Option<AnswerValue>, CoercionError> {
        if let Some(reference) = reference {
            trace!("resolve: '{}' as {:?} for {}", text, data_type, reference);
        }
        let trimmed = text.trim();
        let fail = |reason: &str| CoercionError::Unparseable {
            text: text.to_string(),
            data_type,
            reason: reason.to_string(),
        };

        // geoshape and geotrace have no typed form and stay text
        if data_type.value_kind().map_or(true, |kind| kind == ValueKind::Text) {
            return Ok(Some(AnswerValue::text(text)));
        }
        if trimmed.is_empty() {
            return Ok(None);
        }

        let value = match data_type {
            DataType::Integer => AnswerValue::Integer(
                trimmed.parse().map_err(|e: std::num::ParseIntError| fail(&e.to_string()))?,
            ),
            DataType::Long => AnswerValue::Long(
                trimmed.parse().map_err(|e: std::num::ParseIntError| fail(&e.to_string()))?,
            ),
            DataType::Decimal => AnswerValue::Decimal(
                trimmed.parse().map_err(|e: std::num::ParseFloatError| fail(&e.to_string()))?,
            ),
            DataType::Boolean => AnswerValue::Boolean(match trimmed {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(fail("expected true, false, 1 or 0")),
            }),
            DataType::Date => AnswerValue::Date(parse_date(trimmed).ok_or_else(|| fail("expected YYYY-MM-DD"))?),
            DataType::Time => AnswerValue::Time(parse_time(trimmed).ok_or_else(|| fail("expected HH:MM[:SS[.fff]]"))?),
            DataType::DateTime => AnswerValue::DateTime(
                parse_date_time(trimmed).ok_or_else(|| fail("expected YYYY-MM-DDTHH:MM:SS[.fff]"))?,
            ),
            DataType::Choice => AnswerValue::SelectOne(Selection::new(trimmed)),
            DataType::ChoiceList => {
                AnswerValue::SelectMulti(trimmed.split_whitespace().map(Selection::new).collect())
            }
            DataType::GeoPoint => AnswerValue::GeoPoint(parse_geo_point(trimmed).map_err(|r| fail(&r))?),
            DataType::Null
            | DataType::Text
            | DataType::Barcode
            | DataType::Binary
            | DataType::GeoShape
            | DataType::GeoTrace => AnswerValue::text(text),
        };
        Ok(Some(value))
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .or_else(|| text.split_once('T').and_then(|(d, _)| NaiveDate::parse_from_str(d, DATE_FORMAT).ok()))
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    [TIME_FORMAT, "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
}

fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    [DATE_TIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// `lat lon [alt [accuracy]]`
fn parse_geo_point(text: &str) -> Result<GeoPoint, String> {
    let parts = text
        .split_whitespace()
        .map(|p| p.parse::<f64>().map_err(|e| format!("'{}': {}", p, e)))
        .collect::<Result<Vec<_>, _>>()?;
    if !(2..=4).contains(&parts.len()) {
        return Err(format!("expected 2 to 4 coordinates, got {}", parts.len()));
    }
    Ok(GeoPoint {
        latitude: parts[0],
        longitude: parts[1],
        altitude: parts.get(2).copied().unwrap_or(0.0),
        accuracy: parts.get(3).copied().unwrap_or(0.0),
    })
}
