//! Compact Event Decoder
//!
//! Turns the `data` array of a COMPACT `FEED_DATA` frame into typed market
//! events using the field order negotiated for the session.
//!
//! # Format
//!
//! ```text
//! ["Quote", ["Quote","SPY",100.5,100.7,"NaN",50], "Trade", ["Trade","SPY",100.6,1200,10]]
//! ```
//!
//! Elements alternate `eventType, fieldArray`. A field array whose length is
//! a multiple of the schema length carries several events back to back.
//!
//! # Numeric values
//!
//! - `null` or a missing field is absent
//! - the string `"NaN"` (any case) is absent
//! - finite numbers and numeric strings pass through
//! - infinities (including `"Infinity"`) are an error for that event
//!
//! Errors are scoped to one event; decoding always continues with the next
//! pair.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::domain::market::{
    CandleEvent, EventKind, MarketEvent, QuoteEvent, SummaryEvent, TradeEvent,
};

// =============================================================================
// Event Schema
// =============================================================================

/// Negotiated field order per event type name.
///
/// This is per-session state: it starts as the requested order and is
/// replaced by whatever the server confirms in `FEED_CONFIG`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSchema {
    fields: BTreeMap<String, Vec<String>>,
}

impl EventSchema {
    /// Empty schema (every event type unknown).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Field order requested by default for the supported event types.
    #[must_use]
    pub fn default_fields() -> Self {
        let mut schema = Self::new();
        schema.insert(
            EventKind::Trade.as_str(),
            ["eventType", "eventSymbol", "price", "dayVolume", "size"],
        );
        schema.insert(
            EventKind::Quote.as_str(),
            [
                "eventType",
                "eventSymbol",
                "bidPrice",
                "askPrice",
                "bidSize",
                "askSize",
            ],
        );
        schema.insert(
            EventKind::Summary.as_str(),
            [
                "eventType",
                "eventSymbol",
                "dayOpenPrice",
                "dayHighPrice",
                "dayLowPrice",
                "prevDayClosePrice",
            ],
        );
        schema.insert(
            EventKind::Candle.as_str(),
            [
                "eventType",
                "eventSymbol",
                "time",
                "open",
                "high",
                "low",
                "close",
                "volume",
                "dayVolume",
            ],
        );
        schema
    }

    /// Set the field order for an event type.
    pub fn insert<I, S>(&mut self, event_type: &str, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.insert(
            event_type.to_string(),
            fields.into_iter().map(Into::into).collect(),
        );
    }

    /// Field order for an event type, if negotiated.
    #[must_use]
    pub fn fields(&self, event_type: &str) -> Option<&[String]> {
        self.fields.get(event_type).map(Vec::as_slice)
    }

    /// Replace the field order of every event type the server listed.
    pub fn apply_config(&mut self, event_fields: &HashMap<String, Vec<String>>) {
        for (event_type, fields) in event_fields {
            self.fields.insert(event_type.clone(), fields.clone());
        }
    }

    /// Field map as sent in `FEED_SETUP`.
    #[must_use]
    pub fn to_accept_fields(&self) -> BTreeMap<String, Vec<String>> {
        self.fields.clone()
    }

    /// Number of event types with a field order.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if no event type is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Malformed compact event. Scoped to a single event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The element in the type position is not a string.
    #[error("element {index} is not an event type name")]
    InvalidEventType {
        /// Position in the data array.
        index: usize,
    },

    /// The element after a type name is not an array.
    #[error("{event_type} fields are not an array")]
    FieldsNotArray {
        /// Event type name.
        event_type: String,
    },

    /// A type name has no following field array.
    #[error("{event_type} at element {index} has no field array")]
    MissingFields {
        /// Event type name.
        event_type: String,
        /// Position in the data array.
        index: usize,
    },

    /// Field array length does not match the schema.
    #[error("{event_type} has {actual} fields, expected a multiple of {expected}")]
    FieldCountMismatch {
        /// Event type name.
        event_type: String,
        /// Schema length.
        expected: usize,
        /// Field array length.
        actual: usize,
    },

    /// `eventSymbol` (or `symbol`) is missing, empty or not a string.
    #[error("{event_type} has no event symbol")]
    MissingSymbol {
        /// Event type name.
        event_type: String,
    },

    /// A numeric field holds a non-numeric value.
    #[error("{event_type} field {field} is not numeric")]
    InvalidNumber {
        /// Event type name.
        event_type: String,
        /// Field name.
        field: String,
    },
}

// =============================================================================
// Decoder
// =============================================================================

/// Result of decoding one `FEED_DATA` payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    /// Successfully decoded events, in wire order.
    pub events: Vec<MarketEvent>,
    /// Per-event failures.
    pub errors: Vec<DecodeError>,
    /// Pairs skipped because their event type has no schema.
    pub skipped: usize,
}

/// Decode a compact `FEED_DATA` payload.
#[must_use]
pub fn decode(schema: &EventSchema, data: &[Value]) -> DecodedBatch {
    let mut batch = DecodedBatch::default();

    for (pair_index, pair) in data.chunks(2).enumerate() {
        let index = pair_index * 2;
        let Some(event_type) = pair[0].as_str() else {
            batch.errors.push(DecodeError::InvalidEventType { index });
            continue;
        };

        let (Some(fields), Some(kind)) = (schema.fields(event_type), EventKind::from_name(event_type))
        else {
            tracing::trace!(event_type, "Skipping unregistered event type");
            batch.skipped += 1;
            continue;
        };

        let Some(values) = pair.get(1) else {
            batch.errors.push(DecodeError::MissingFields {
                event_type: event_type.to_string(),
                index,
            });
            continue;
        };

        let Some(values) = values.as_array() else {
            batch.errors.push(DecodeError::FieldsNotArray {
                event_type: event_type.to_string(),
            });
            continue;
        };

        if fields.is_empty() || values.is_empty() || values.len() % fields.len() != 0 {
            batch.errors.push(DecodeError::FieldCountMismatch {
                event_type: event_type.to_string(),
                expected: fields.len(),
                actual: values.len(),
            });
            continue;
        }

        for record in values.chunks(fields.len()) {
            match decode_record(kind, fields, record) {
                Ok(event) => batch.events.push(event),
                Err(err) => batch.errors.push(err),
            }
        }
    }

    batch
}

/// Field names that carry the event symbol.
const SYMBOL_FIELDS: [&str; 2] = ["eventSymbol", "symbol"];

/// Positional view over one event's values.
struct Record<'a> {
    kind: EventKind,
    fields: &'a [String],
    values: &'a [Value],
}

impl Record<'_> {
    fn value(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .position(|name| name == field)
            .and_then(|index| self.values.get(index))
    }

    fn symbol(&self) -> Result<String, DecodeError> {
        SYMBOL_FIELDS
            .iter()
            .find_map(|field| self.value(field))
            .and_then(Value::as_str)
            .filter(|symbol| !symbol.is_empty())
            .map(str::to_string)
            .ok_or_else(|| DecodeError::MissingSymbol {
                event_type: self.kind.as_str().to_string(),
            })
    }

    fn number(&self, field: &str) -> Result<Option<f64>, DecodeError> {
        let invalid = || DecodeError::InvalidNumber {
            event_type: self.kind.as_str().to_string(),
            field: field.to_string(),
        };

        let value = match self.value(field) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(number)) => number.as_f64().ok_or_else(invalid)?,
            Some(Value::String(text)) if text.eq_ignore_ascii_case("nan") => return Ok(None),
            Some(Value::String(text)) => text.parse::<f64>().map_err(|_| invalid())?,
            Some(_) => return Err(invalid()),
        };

        if value.is_finite() {
            Ok(Some(value))
        } else {
            Err(invalid())
        }
    }

    fn millis(&self, field: &str) -> Result<Option<i64>, DecodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let millis = self.number(field)?.map(|value| value as i64);
        Ok(millis)
    }
}

fn decode_record(
    kind: EventKind,
    fields: &[String],
    values: &[Value],
) -> Result<MarketEvent, DecodeError> {
    let record = Record {
        kind,
        fields,
        values,
    };
    let symbol = record.symbol()?;

    let event = match kind {
        EventKind::Quote => MarketEvent::Quote(QuoteEvent {
            symbol,
            bid_price: record.number("bidPrice")?,
            ask_price: record.number("askPrice")?,
            bid_size: record.number("bidSize")?,
            ask_size: record.number("askSize")?,
        }),
        EventKind::Trade => MarketEvent::Trade(TradeEvent {
            symbol,
            price: record.number("price")?,
            size: record.number("size")?,
            day_volume: record.number("dayVolume")?,
        }),
        EventKind::Summary => MarketEvent::Summary(SummaryEvent {
            symbol,
            day_open_price: record.number("dayOpenPrice")?,
            day_high_price: record.number("dayHighPrice")?,
            day_low_price: record.number("dayLowPrice")?,
            prev_day_close_price: record.number("prevDayClosePrice")?,
        }),
        EventKind::Candle => MarketEvent::Candle(CandleEvent {
            symbol,
            time: record.millis("time")?,
            open: record.number("open")?,
            high: record.number("high")?,
            low: record.number("low")?,
            close: record.number("close")?,
            volume: record.number("volume")?,
            day_volume: record.number("dayVolume")?,
        }),
    };

    Ok(event)
}
