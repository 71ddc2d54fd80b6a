// src/fetch/payload.rs

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{IngestError, Result};

/// Top level of the demand API response. Only `included` is read.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub included: Vec<IncludedSeries>,
}

#[derive(Debug, Deserialize)]
pub struct IncludedSeries {
    pub attributes: SeriesAttributes,
}

#[derive(Debug, Deserialize)]
pub struct SeriesAttributes {
    pub values: Vec<SeriesPoint>,
}

/// `{ "value": 25432.1, "datetime": "2024-02-19T03:00:00.000+01:00" }`
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SeriesPoint {
    pub value: f64,
    pub datetime: String,
}

/// The three positionally aligned series returned for one day.
#[derive(Clone, Debug, PartialEq)]
pub struct DayFetch {
    pub day: NaiveDate,
    pub actual: Vec<SeriesPoint>,
    pub planned: Vec<SeriesPoint>,
    pub forecast: Vec<SeriesPoint>,
}

impl DayFetch {
    /// Take the first three series as actual, planned and forecast demand and
    /// require them to be the same length.
    pub fn from_envelope(day: NaiveDate, envelope: Envelope) -> Result<Self> {
        let found = envelope.included.len();
        let mut series = envelope.included.into_iter().map(|s| s.attributes.values);
        let (Some(actual), Some(planned), Some(forecast)) =
            (series.next(), series.next(), series.next())
        else {
            return Err(IngestError::MalformedPayload {
                day,
                reason: format!("expected 3 demand series, found {found}"),
            });
        };

        if actual.len() != planned.len() || actual.len() != forecast.len() {
            return Err(IngestError::FetchMismatch {
                day,
                reason: format!(
                    "series lengths differ: actual={}, planned={}, forecast={}",
                    actual.len(),
                    planned.len(),
                    forecast.len()
                ),
            });
        }

        Ok(Self {
            day,
            actual,
            planned,
            forecast,
        })
    }

    pub fn len(&self) -> usize {
        self.actual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actual.is_empty()
    }
}

/// Decode a response body for `day`.
pub fn parse_payload(day: NaiveDate, body: &str) -> Result<DayFetch> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| IngestError::MalformedPayload {
            day,
            reason: e.to_string(),
        })?;
    DayFetch::from_envelope(day, envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 19).unwrap()
    }

    const SAMPLE: &str = r#"{
      "data": { "type": "Demanda", "id": "dem1" },
      "included": [
        { "type": "Demanda real", "id": "1293",
          "attributes": { "title": "Demanda real", "last-update": "2024-02-20T00:10:00.000+01:00",
            "values": [
              { "value": 25101.5, "percentage": 1, "datetime": "2024-02-19T01:00:00.000+01:00" },
              { "value": 24010.0, "percentage": 1, "datetime": "2024-02-19T02:00:00.000+01:00" }
            ] } },
        { "type": "Demanda programada", "id": "545",
          "attributes": { "title": "Demanda programada",
            "values": [
              { "value": 25200.0, "percentage": 1, "datetime": "2024-02-19T01:00:00.000+01:00" },
              { "value": 24100.0, "percentage": 1, "datetime": "2024-02-19T02:00:00.000+01:00" }
            ] } },
        { "type": "Demanda prevista", "id": "544",
          "attributes": { "title": "Demanda prevista",
            "values": [
              { "value": 25000.0, "percentage": 1, "datetime": "2024-02-19T01:00:00.000+01:00" },
              { "value": 23900.0, "percentage": 1, "datetime": "2024-02-19T02:00:00.000+01:00" }
            ] } }
      ]
    }"#;

    #[test]
    fn parses_three_series_by_position() {
        let fetch = parse_payload(day(), SAMPLE).unwrap();
        assert_eq!(fetch.len(), 2);
        assert_eq!(fetch.actual[0].value, 25101.5);
        assert_eq!(fetch.planned[1].value, 24100.0);
        assert_eq!(fetch.forecast[1].datetime, "2024-02-19T02:00:00.000+01:00");
    }

    #[test]
    fn missing_series_is_malformed() {
        let body = r#"{ "included": [
            { "type": "Demanda real", "attributes": { "values": [] } },
            { "type": "Demanda programada", "attributes": { "values": [] } }
        ] }"#;
        assert!(matches!(
            parse_payload(day(), body),
            Err(IngestError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn non_json_and_wrong_shape_are_malformed() {
        for body in ["<html>rate limited</html>", r#"{ "data": {} }"#, r#"{ "included": [ { "attributes": { "values": [ { "value": "n/a", "datetime": "x" } ] } } ] }"#] {
            assert!(matches!(
                parse_payload(day(), body),
                Err(IngestError::MalformedPayload { .. })
            ));
        }
    }

    #[test]
    fn uneven_lengths_are_a_mismatch() {
        let body = r#"{ "included": [
            { "attributes": { "values": [ { "value": 1.0, "datetime": "2024-02-19T01:00:00.000+01:00" } ] } },
            { "attributes": { "values": [ { "value": 2.0, "datetime": "2024-02-19T01:00:00.000+01:00" } ] } },
            { "attributes": { "values": [] } }
        ] }"#;
        let err = parse_payload(day(), body).unwrap_err();
        assert!(matches!(err, IngestError::FetchMismatch { .. }), "{err}");
    }
}
