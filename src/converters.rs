//! Row converters.
//!
//! A converter turns the tab-separated fields of one `COPY` text row into
//! application-level [`Value`]s. Converters are pure and never fail on
//! data; anything that does not match a rule falls through as text.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::error::Result;

/// The `COPY` text representation of SQL NULL.
pub const NULL_FIELD: &str = "\\N";

const TIMESTAMP_TZ_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
];

const TIMESTAMP_NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// An IPv4 or IPv6 network in CIDR notation, as produced by the
/// PostgreSQL `cidr`/`inet` types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrNetwork {
    pub addr: IpAddr,
    pub prefix: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidNetwork;

impl fmt::Display for InvalidNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a CIDR network")
    }
}

impl std::error::Error for InvalidNetwork {}

impl FromStr for CidrNetwork {
    type Err = InvalidNetwork;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = s.split_once('/').ok_or(InvalidNetwork)?;
        let addr: IpAddr = addr.parse().map_err(|_| InvalidNetwork)?;
        let prefix: u8 = prefix.parse().map_err(|_| InvalidNetwork)?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(InvalidNetwork);
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for CidrNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// A single converted column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Decimal(f64),
    Address(IpAddr),
    Network(CidrNetwork),
    Uuid(Uuid),
    Timestamp(DateTime<FixedOffset>),
    Text(String),
}

impl Value {
    /// Encode the value back to its `COPY` text representation.
    pub fn encode(&self) -> String {
        match self {
            Value::Null => NULL_FIELD.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Address(v) => v.to_string(),
            Value::Network(v) => v.to_string(),
            Value::Uuid(v) => v.to_string(),
            Value::Timestamp(v) => v.format("%Y-%m-%d %H:%M:%S%:z").to_string(),
            Value::Text(v) => v.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Option<&str>> for Value {
    fn from(v: Option<&str>) -> Self {
        match v {
            None => Value::Null,
            Some(s) => Value::Text(s.to_string()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<IpAddr> for Value {
    fn from(v: IpAddr) -> Self {
        Value::Address(v)
    }
}

impl From<CidrNetwork> for Value {
    fn from(v: CidrNetwork) -> Self {
        Value::Network(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(v)
    }
}

/// Converts the string fields of one row into [`Value`]s.
pub trait Converter {
    fn convert(&self, fields: &[&str]) -> Result<Vec<Value>>;
}

/// Maps `\N` to [`Value::Null`] and leaves every other field a string.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConverter;

impl Converter for DefaultConverter {
    fn convert(&self, fields: &[&str]) -> Result<Vec<Value>> {
        Ok(fields
            .iter()
            .map(|f| {
                if *f == NULL_FIELD {
                    Value::Null
                } else {
                    Value::Text(f.to_string())
                }
            })
            .collect())
    }
}

/// Returns every field as an unmodified string, `\N` included.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpConverter;

impl Converter for NoOpConverter {
    fn convert(&self, fields: &[&str]) -> Result<Vec<Value>> {
        Ok(fields.iter().map(|f| Value::Text(f.to_string())).collect())
    }
}

/// Best-effort typed conversion: null, integer, IP address, IP network,
/// UUID, timestamp, decimal, and finally raw text. The first successful
/// parse wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmartConverter;

impl Converter for SmartConverter {
    fn convert(&self, fields: &[&str]) -> Result<Vec<Value>> {
        Ok(fields.iter().map(|f| convert_field(f)).collect())
    }
}

fn convert_field(field: &str) -> Value {
    if field == NULL_FIELD {
        return Value::Null;
    }
    if is_integer(field) {
        if let Ok(v) = field.parse::<i64>() {
            return Value::Int(v);
        }
    }
    if let Ok(addr) = field.parse::<IpAddr>() {
        return Value::Address(addr);
    }
    if let Ok(net) = field.parse::<CidrNetwork>() {
        return Value::Network(net);
    }
    if let Ok(v) = Uuid::parse_str(field) {
        return Value::Uuid(v);
    }
    if let Some(ts) = parse_timestamp(field) {
        return Value::Timestamp(ts);
    }
    if is_decimal(field) {
        if let Ok(v) = field.parse::<f64>() {
            return Value::Decimal(v);
        }
    }
    Value::Text(field.to_string())
}

fn is_integer(field: &str) -> bool {
    let digits = field.strip_prefix('-').unwrap_or(field);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn is_decimal(field: &str) -> bool {
    let trimmed = field.trim_matches('-');
    let digits = trimmed.replacen('.', "", 1);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_timestamp(field: &str) -> Option<DateTime<FixedOffset>> {
    for format in TIMESTAMP_TZ_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(field, format) {
            return Some(ts);
        }
    }
    for format in TIMESTAMP_NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(field, format) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(field, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(naive.and_utc().fixed_offset());
    }
    None
}
