//! Serde adapters for BSON-specific encodings of core scalar types.
//!
//! The target store is BSON-typed: money must land as `Decimal128` (never a
//! binary float) and timestamps as BSON datetimes in UTC. The `bson` crate
//! ships a chrono helper for the non-optional datetime case
//! (`bson::serde_helpers::chrono_datetime_as_bson_datetime`); the optional
//! datetime and the `rust_decimal` bridge live here.

/// Serializes a `rust_decimal::Decimal` as a BSON `Decimal128`.
///
/// Usage: `#[serde(with = "tillsync_core::bson_serde::decimal128")]`.
pub mod decimal128 {
    use std::str::FromStr;

    use bson::Decimal128;
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Encode the decimal through its canonical string form.
    ///
    /// # Errors
    /// Fails if the value does not fit `Decimal128` (it always does for
    /// `rust_decimal`'s 96-bit mantissa range).
    pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let raw = Decimal128::from_str(&value.to_string()).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }

    /// Decode a `Decimal128` back into a `rust_decimal::Decimal`.
    ///
    /// # Errors
    /// Fails on `Decimal128` values outside the `rust_decimal` range
    /// (NaN, infinities, more than 28 fractional digits).
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Decimal128::deserialize(deserializer)?;
        Decimal::from_str(&raw.to_string()).map_err(serde::de::Error::custom)
    }
}

/// Serializes an `Option<chrono::DateTime<Utc>>` as a BSON datetime or null.
///
/// A nullable source timestamp is always materialized as an explicit BSON
/// null so downstream queries see a uniform field shape.
pub mod datetime_option {
    use bson::DateTime as BsonDateTime;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// # Errors
    /// Propagates serializer failures only.
    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => BsonDateTime::from_chrono(*ts).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    /// # Errors
    /// Propagates deserializer failures only.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<BsonDateTime>::deserialize(deserializer)?;
        Ok(raw.map(BsonDateTime::to_chrono))
    }
}

#[cfg(test)]
mod tests {
    use bson::Bson;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct MoneyDoc {
        #[serde(with = "super::decimal128")]
        amount: Decimal,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct StampDoc {
        #[serde(with = "super::datetime_option")]
        seen_at: Option<DateTime<Utc>>,
    }

    #[test]
    fn decimal_lands_as_decimal128() {
        let doc = bson::to_document(&MoneyDoc {
            amount: Decimal::new(1999, 2),
        })
        .unwrap();

        match doc.get("amount") {
            Some(Bson::Decimal128(raw)) => assert_eq!(raw.to_string(), "19.99"),
            other => panic!("expected Decimal128, got {other:?}"),
        }
    }

    #[test]
    fn decimal_round_trips_through_document() {
        let original = MoneyDoc {
            amount: Decimal::new(-1_234_567, 3),
        };
        let doc = bson::to_document(&original).unwrap();
        let restored: MoneyDoc = bson::from_document(doc).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn some_datetime_lands_as_bson_datetime() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let doc = bson::to_document(&StampDoc { seen_at: Some(ts) }).unwrap();

        match doc.get("seen_at") {
            Some(Bson::DateTime(raw)) => assert_eq!(raw.to_chrono(), ts),
            other => panic!("expected DateTime, got {other:?}"),
        }
    }

    #[test]
    fn none_datetime_lands_as_explicit_null() {
        let doc = bson::to_document(&StampDoc { seen_at: None }).unwrap();
        assert_eq!(doc.get("seen_at"), Some(&Bson::Null));

        let restored: StampDoc = bson::from_document(doc).unwrap();
        assert_eq!(restored.seen_at, None);
    }

    proptest! {
        #[test]
        fn decimal_round_trips_for_arbitrary_scales(
            mantissa in -1_000_000_000_000i64..1_000_000_000_000i64,
            scale in 0u32..12,
        ) {
            let original = MoneyDoc { amount: Decimal::new(mantissa, scale) };
            let doc = bson::to_document(&original).unwrap();
            let restored: MoneyDoc = bson::from_document(doc).unwrap();
            prop_assert_eq!(restored.amount, original.amount);
        }
    }
}
