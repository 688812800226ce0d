//! Human-readable durations (`"2m"`, `"1h30m"`).
//!
//! Integers are read as nanoseconds, the encoding of Go duration fields in
//! configs written for the original daemon.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Text(String),
    Nanos(u64),
}

pub(crate) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*value))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Text(s) => humantime::parse_duration(&s).map_err(serde::de::Error::custom),
        Repr::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
    }
}
