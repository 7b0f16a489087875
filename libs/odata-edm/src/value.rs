//! Runtime values flowing through a query: literals, property values and records.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeDelta, Utc};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub type_name: Arc<str>,
    /// Member name; comma separated for combined flags.
    pub member: Arc<str>,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Decimal(BigDecimal),
    String(String),
    Guid(Uuid),
    DateTimeOffset(DateTime<Utc>),
    Date(NaiveDate),
    TimeOfDay(NaiveTime),
    Duration(TimeDelta),
    Enum(EnumValue),
    Record(Arc<Record>),
    Collection(Arc<[Value]>),
}

impl Value {
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Guid(_) => "guid",
            Value::DateTimeOffset(_) => "datetimeoffset",
            Value::Date(_) => "date",
            Value::TimeOfDay(_) => "timeofday",
            Value::Duration(_) => "duration",
            Value::Enum(_) => "enum",
            Value::Record(_) => "record",
            Value::Collection(_) => "collection",
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_record(&self) -> Option<&Arc<Record>> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_collection(&self) -> Option<&[Value]> {
        match self {
            Value::Collection(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) if d.is_integer() => d.to_i64(),
            Value::Enum(e) => Some(e.value),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Value::Int(i) => Some(BigDecimal::from(*i)),
            Value::Decimal(d) => Some(d.clone()),
            Value::Double(d) => BigDecimal::try_from(*d).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_) | Value::Decimal(_))
    }

    /// Ordering between two non-null values of comparable kinds.
    ///
    /// Numeric operands are promoted (`Int -> Decimal -> Double`). Returns `None`
    /// when either side is null or the kinds cannot be compared.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value as V;
        match (self, other) {
            (V::Int(a), V::Int(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                if matches!(a, V::Double(_)) || matches!(b, V::Double(_)) {
                    a.as_f64()?.partial_cmp(&b.as_f64()?)
                } else {
                    Some(a.as_decimal()?.cmp(&b.as_decimal()?))
                }
            }
            (V::Bool(a), V::Bool(b)) => Some(a.cmp(b)),
            (V::String(a), V::String(b)) => Some(a.cmp(b)),
            (V::Guid(a), V::Guid(b)) => Some(a.cmp(b)),
            (V::DateTimeOffset(a), V::DateTimeOffset(b)) => Some(a.cmp(b)),
            (V::Date(a), V::Date(b)) => Some(a.cmp(b)),
            (V::TimeOfDay(a), V::TimeOfDay(b)) => Some(a.cmp(b)),
            (V::Duration(a), V::Duration(b)) => Some(a.cmp(b)),
            (V::Enum(a), V::Enum(b)) if a.type_name == b.type_name => Some(a.value.cmp(&b.value)),
            _ => None,
        }
    }

    /// `eq` semantics: null equals null, null never equals a value.
    #[must_use]
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Collection(a), Value::Collection(b)) => a == b,
            (a, b) => a.compare(b) == Some(Ordering::Equal),
        }
    }

    /// Total order used for sorting: nulls first, incomparable values tie.
    #[must_use]
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Render the value as an OData URI literal.
    #[must_use]
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "null".to_owned(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => format_double(*d),
            Value::Decimal(d) => {
                let s = d.to_string();
                if s.contains(['e', 'E']) {
                    format!("{s}m")
                } else {
                    s
                }
            }
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Guid(g) => g.hyphenated().to_string(),
            Value::DateTimeOffset(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::TimeOfDay(t) => t.format("%H:%M:%S%.f").to_string(),
            Value::Duration(d) => format!("duration'{}'", format_duration(*d)),
            Value::Enum(e) => format!("{}'{}'", e.type_name, e.member),
            Value::Record(_) | Value::Collection(_) => self.to_json().to_string(),
        }
    }

    /// JSON rendering used when handing results to a serializer.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map_or_else(|| J::String(format_double(*d)), J::Number),
            Value::Decimal(d) => d
                .to_string()
                .parse::<serde_json::Number>()
                .map_or_else(|_| J::String(d.to_string()), J::Number),
            Value::String(s) => J::String(s.clone()),
            Value::Guid(g) => J::String(g.hyphenated().to_string()),
            Value::DateTimeOffset(dt) => {
                J::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Date(d) => J::String(d.format("%Y-%m-%d").to_string()),
            Value::TimeOfDay(t) => J::String(t.format("%H:%M:%S%.f").to_string()),
            Value::Duration(d) => J::String(format_duration(*d)),
            Value::Enum(e) => J::String(e.member.to_string()),
            Value::Record(r) => J::Object(
                r.properties()
                    .map(|(k, v)| (k.to_owned(), v.to_json()))
                    .collect(),
            ),
            Value::Collection(items) => J::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NaN".to_owned();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_owned();
    }
    let mut buf = ryu::Buffer::new();
    let s = buf.format_finite(d);
    if s.contains(['e', 'E']) {
        s.to_owned()
    } else {
        format!("{s}d")
    }
}

/// ISO 8601 rendering of a duration (`P1DT2H3M4.5S`).
#[must_use]
pub fn format_duration(d: TimeDelta) -> String {
    let negative = d < TimeDelta::zero();
    let d = if negative { -d } else { d };
    let total = d.num_seconds();
    let nanos = d.subsec_nanos();
    let (days, rem) = (total.div_euclid(86_400), total.rem_euclid(86_400));
    let (hours, rem) = (rem.div_euclid(3_600), rem.rem_euclid(3_600));
    let (minutes, seconds) = (rem.div_euclid(60), rem.rem_euclid(60));

    let sign = if negative { "-" } else { "" };
    let date = if days > 0 { format!("{days}D") } else { String::new() };
    if hours == 0 && minutes == 0 && seconds == 0 && nanos == 0 && days > 0 {
        return format!("{sign}P{date}");
    }
    let hours = if hours > 0 { format!("{hours}H") } else { String::new() };
    let minutes_text = if minutes > 0 { format!("{minutes}M") } else { String::new() };
    let seconds = if nanos > 0 {
        let frac = format!("{nanos:09}");
        format!("{seconds}.{}S", frac.trim_end_matches('0'))
    } else if seconds > 0 || (hours.is_empty() && minutes == 0) {
        format!("{seconds}S")
    } else {
        String::new()
    };
    format!("{sign}P{date}T{hours}{minutes_text}{seconds}")
}

/// Parse an ISO 8601 day-time duration (`[-]P[nD][T[nH][nM][n[.f]S]]`).
#[must_use]
pub fn parse_duration(s: &str) -> Option<TimeDelta> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s),
    };
    let rest = rest.strip_prefix(['P', 'p'])?;
    let (date_part, time_part) = match rest.find(['T', 't']) {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };

    let mut total = TimeDelta::zero();
    if !date_part.is_empty() {
        let days = date_part.strip_suffix(['D', 'd'])?.parse::<i64>().ok()?;
        total += TimeDelta::try_days(days)?;
    }
    if let Some(mut t) = time_part {
        if t.is_empty() {
            return None;
        }
        while !t.is_empty() {
            let end = t.find(|c: char| c.is_ascii_alphabetic())?;
            let (num, unit) = (&t[..end], t[end..].chars().next()?);
            t = &t[end + 1..];
            match unit.to_ascii_uppercase() {
                'H' => total += TimeDelta::try_hours(num.parse().ok()?)?,
                'M' => total += TimeDelta::try_minutes(num.parse().ok()?)?,
                'S' => {
                    let (whole, frac) = num.split_once('.').unwrap_or((num, ""));
                    total += TimeDelta::try_seconds(whole.parse().ok()?)?;
                    if !frac.is_empty() {
                        let digits: String = frac.chars().chain("000000000".chars()).take(9).collect();
                        total += TimeDelta::nanoseconds(digits.parse().ok()?);
                    }
                }
                _ => return None,
            }
        }
    } else if date_part.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total })
}

macro_rules! value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v.into())
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Double,
    BigDecimal => Decimal,
    String => String,
    Uuid => Guid,
    DateTime<Utc> => DateTimeOffset,
    NaiveDate => Date,
    NaiveTime => TimeOfDay,
    TimeDelta => Duration,
    EnumValue => Enum,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(Arc::new(r))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Collection(items.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A structured instance: qualified type name plus named property values.
///
/// Dynamic properties of open types live next to declared ones.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    type_name: Arc<str>,
    properties: BTreeMap<Arc<str>, Value>,
}

impl Record {
    #[must_use]
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn type_name_arc(&self) -> &Arc<str> {
        &self.type_name
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (&**k, v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn numeric_promotion_in_compare() {
        let dec = Value::Decimal(BigDecimal::from_str("2.5").unwrap());
        assert_eq!(Value::Int(2).compare(&dec), Some(Ordering::Less));
        assert_eq!(Value::Double(2.5).compare(&dec), Some(Ordering::Equal));
        assert_eq!(Value::Int(3).compare(&Value::Int(3)), Some(Ordering::Equal));
        assert_eq!(Value::Int(3).compare(&Value::from("3")), None);
    }

    #[test]
    fn null_semantics() {
        assert!(Value::Null.equals(&Value::Null));
        assert!(!Value::Null.equals(&Value::Int(1)));
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Less);
        assert_eq!(Value::Int(1).sort_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn literals() {
        assert_eq!(Value::from("O'Neil").to_literal(), "'O''Neil'");
        assert_eq!(Value::Double(1.5).to_literal(), "1.5d");
        assert_eq!(Value::Double(f64::INFINITY).to_literal(), "INF");
        assert_eq!(Value::Int(-4).to_literal(), "-4");
        let e = EnumValue {
            type_name: "Ns.Color".into(),
            member: "Red".into(),
            value: 1,
        };
        assert_eq!(Value::Enum(e).to_literal(), "Ns.Color'Red'");
    }

    #[test]
    fn duration_round_trip() {
        for text in ["PT0S", "P1DT2H3M4S", "PT1.5S", "-PT10M", "P2D"] {
            let d = parse_duration(text).unwrap();
            assert_eq!(format_duration(d), text, "{text}");
        }
        assert!(parse_duration("P").is_none());
        assert!(parse_duration("PT").is_none());
        assert!(parse_duration("1H").is_none());
    }

    #[test]
    fn record_builder() {
        let r = Record::new("Ns.Customer")
            .with("Id", 1)
            .with("Name", "Ann")
            .with("Nick", Option::<String>::None);
        assert_eq!(r.type_name(), "Ns.Customer");
        assert_eq!(r.get("Id"), Some(&Value::Int(1)));
        assert_eq!(r.get("Nick"), Some(&Value::Null));
        assert!(r.get("Missing").is_none());
        assert_eq!(r.len(), 3);
    }
}
