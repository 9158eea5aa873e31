//! Pure data transformers applied to request bodies before serialization and
//! to response data after decoding.
//!
//! A [`TransformerPipeline`] runs its stages left to right; each stage gets
//! the previous stage's output.
//!
//! ```
//! use fetch_service::{transform, TransformerPipeline};
//! use serde_json::json;
//!
//! let pipeline = TransformerPipeline::new()
//!     .map(transform::remove_empty)
//!     .map(transform::camel_to_snake);
//!
//! let out = pipeline.apply(json!({"userName": "kit", "nickName": ""})).unwrap();
//! assert_eq!(out, json!({"user_name": "kit"}));
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Number, Value};

use crate::{Error, Result};

type Stage = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Ordered list of unary transforms.
#[derive(Clone, Default)]
pub struct TransformerPipeline {
    stages: Vec<Stage>,
}

impl fmt::Debug for TransformerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl TransformerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an infallible stage.
    pub fn map(self, stage: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.try_map(move |value| Ok(stage(value)))
    }

    /// Appends a stage that may reject the value.
    pub fn try_map(mut self, stage: impl Fn(Value) -> Result<Value> + Send + Sync + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Appends every stage of `other`.
    pub fn then(mut self, other: TransformerPipeline) -> Self {
        self.stages.extend(other.stages);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn apply(&self, value: Value) -> Result<Value> {
        self.stages.iter().try_fold(value, |value, stage| stage(value))
    }
}

/// Renames object keys from `camelCase` to `snake_case`, top level only.
pub fn camel_to_snake(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (camel_key_to_snake(&key), value))
                .collect(),
        ),
        other => other,
    }
}

/// Renames object keys from `snake_case` to `camelCase`, recursively.
pub fn snake_to_camel(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (snake_key_to_camel(&key), snake_to_camel(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(snake_to_camel).collect()),
        other => other,
    }
}

/// Drops `null` and empty-string entries from objects and arrays.
pub fn remove_empty(value: Value) -> Value {
    let keep = |value: &Value| !matches!(value, Value::Null) && value.as_str() != Some("");
    match value {
        Value::Object(map) => Value::Object(map.into_iter().filter(|(_, v)| keep(v)).collect()),
        Value::Array(items) => Value::Array(items.into_iter().filter(keep).collect()),
        other => other,
    }
}

/// Wraps non-array values in a one-element array.
pub fn wrap_array(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items),
        other => Value::Array(vec![other]),
    }
}

/// Flattens one level of nested arrays.
pub fn flatten_array(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .flat_map(|item| match item {
                    Value::Array(inner) => inner,
                    other => vec![other],
                })
                .collect(),
        ),
        other => other,
    }
}

/// Parses string values as JSON, leaving unparsable strings untouched.
pub fn parse_json_string(value: Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}

/// Returns `value[field]` when present, the value itself otherwise.
pub fn extract_field(field: impl Into<String>) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    let field = field.into();
    move |value| match value {
        Value::Object(mut map) => match map.remove(&field) {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Replaces `null` values (the value itself, or object entries) recursively.
pub fn replace_nulls(replacement: Value) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| replace_nulls_with(value, &replacement)
}

/// Rejects values for which `check` returns false.
pub fn validate(
    check: impl Fn(&Value) -> bool + Send + Sync + 'static,
) -> impl Fn(Value) -> Result<Value> + Send + Sync + 'static {
    move |value| {
        if check(&value) {
            Ok(value)
        } else {
            Err(Error::build("data validation failed"))
        }
    }
}

/// Fields [`parse_date`] converts in the presets.
pub const DATE_FIELDS: &[&str] = &["created_at", "updated_at", "date"];

/// Single-field check used by [`validate_fields`].
pub type FieldRule = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Fails with the server's `message` (or `"API Error"`) when the payload is
/// an object carrying an `error` key.
pub fn handle_error(value: Value) -> Result<Value> {
    match &value {
        Value::Object(map) if map.contains_key("error") => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .filter(|message| !message.is_empty())
                .unwrap_or("API Error");
            Err(Error::decode(message))
        }
        _ => Ok(value),
    }
}

/// Normalizes the two common paging envelopes to
/// `{"items": [...], "pagination": {...}}`:
///
/// - `{"data", "pagination"}` is renamed as is;
/// - `{"items", "total"}` gets `page` (default 1) and `pageSize`
///   (`pageSize`, then `per_page`, default 10).
///
/// Anything else passes through.
pub fn extract_pagination(value: Value) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        other => return other,
    };
    if map.contains_key("data") && map.contains_key("pagination") {
        let items = map.remove("data").unwrap_or_default();
        let pagination = map.remove("pagination").unwrap_or_default();
        return json!({"items": items, "pagination": pagination});
    }
    if map.contains_key("items") && map.contains_key("total") {
        let page = truthy_or(map.get("page"), json!(1));
        let page_size = map
            .get("pageSize")
            .filter(|size| is_truthy(size))
            .or_else(|| map.get("per_page").filter(|size| is_truthy(size)))
            .cloned()
            .unwrap_or(json!(10));
        let items = map.remove("items").unwrap_or_default();
        let total = map.remove("total").unwrap_or_default();
        return json!({
            "items": items,
            "pagination": {"total": total, "page": page, "pageSize": page_size},
        });
    }
    Value::Object(map)
}

/// Converts RFC 3339 / ISO 8601 strings in `fields` to Unix epoch
/// milliseconds. Arrays are converted item by item; strings that are not
/// dates are left as they are. A timestamp without an offset is read as UTC.
pub fn parse_date<I, S>(fields: I) -> impl Fn(Value) -> Value + Send + Sync + 'static
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let fields = field_list(fields);
    move |value| {
        convert_fields(value, &fields, &|field: Value| match field {
            Value::String(text) => match parse_timestamp_millis(&text) {
                Some(millis) => Value::from(millis),
                None => Value::String(text),
            },
            other => other,
        })
    }
}

/// Converts numeric strings in `fields` to numbers. A blank string becomes 0.
pub fn parse_numbers<I, S>(fields: I) -> impl Fn(Value) -> Value + Send + Sync + 'static
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let fields = field_list(fields);
    move |value| {
        convert_fields(value, &fields, &|field: Value| match field {
            Value::String(text) => parse_number(&text).unwrap_or(Value::String(text)),
            other => other,
        })
    }
}

/// Converts `fields` to booleans: `"true"` (any case) and `"1"` are true,
/// other strings false; numbers are true unless zero.
pub fn parse_booleans<I, S>(fields: I) -> impl Fn(Value) -> Value + Send + Sync + 'static
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let fields = field_list(fields);
    move |value| {
        convert_fields(value, &fields, &|field: Value| match field {
            Value::String(text) => Value::Bool(text.eq_ignore_ascii_case("true") || text == "1"),
            Value::Number(number) => Value::Bool(number.as_f64() != Some(0.0)),
            other => other,
        })
    }
}

/// Replaces a `null` payload with `default`.
pub fn with_default(default: Value) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| match value {
        Value::Null => default.clone(),
        other => other,
    }
}

/// Runs `pipeline` only for values matching `condition`.
pub fn conditional(
    condition: impl Fn(&Value) -> bool + Send + Sync + 'static,
    pipeline: TransformerPipeline,
) -> impl Fn(Value) -> Result<Value> + Send + Sync + 'static {
    move |value| {
        if condition(&value) {
            pipeline.apply(value)
        } else {
            Ok(value)
        }
    }
}

/// Maps every item of an array payload.
pub fn map_items(f: impl Fn(Value) -> Value + Send + Sync + 'static) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| match value {
        Value::Array(items) => Value::Array(items.into_iter().map(&f).collect()),
        other => other,
    }
}

/// Keeps the items of an array payload matching `predicate`.
pub fn filter_items(
    predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| match value {
        Value::Array(items) => Value::Array(items.into_iter().filter(|item| predicate(item)).collect()),
        other => other,
    }
}

/// Stable sort of an array payload.
pub fn sort_by(
    compare: impl Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| match value {
        Value::Array(mut items) => {
            items.sort_by(|a, b| compare(a, b));
            Value::Array(items)
        }
        other => other,
    }
}

/// First `count` items of an array payload.
pub fn limit(count: usize) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| match value {
        Value::Array(mut items) => {
            items.truncate(count);
            Value::Array(items)
        }
        other => other,
    }
}

/// Drops the first `count` items of an array payload.
pub fn skip(count: usize) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| match value {
        Value::Array(items) => Value::Array(items.into_iter().skip(count).collect()),
        other => other,
    }
}

/// Renames top-level keys of an object payload; unmapped keys are kept.
pub fn field_mapper<I, K, V>(renames: I) -> impl Fn(Value) -> Value + Send + Sync + 'static
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let renames: HashMap<String, String> = renames
        .into_iter()
        .map(|(from, to)| (from.into(), to.into()))
        .collect();
    move |value| match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| match renames.get(&key) {
                    Some(renamed) => (renamed.clone(), value),
                    None => (key, value),
                })
                .collect(),
        ),
        other => other,
    }
}

/// Checks each present field of an object payload against its rule.
pub fn validate_fields<I, S>(rules: I) -> impl Fn(Value) -> Result<Value> + Send + Sync + 'static
where
    I: IntoIterator<Item = (S, FieldRule)>,
    S: Into<String>,
{
    let rules: Vec<(String, FieldRule)> = rules.into_iter().map(|(field, rule)| (field.into(), rule)).collect();
    move |value| {
        if let Value::Object(map) = &value {
            for (field, rule) in &rules {
                if map.get(field).is_some_and(|field_value| !rule(field_value)) {
                    return Err(Error::build(format!("validation failed for field: {field}")));
                }
            }
        }
        Ok(value)
    }
}

/// Error check, camelCase keys and date parsing for a typical JSON API reply.
pub fn standardize_api_response() -> TransformerPipeline {
    TransformerPipeline::new()
        .try_map(handle_error)
        .map(parse_date(DATE_FIELDS))
        .map(snake_to_camel)
}

/// Paging envelope normalization with dates parsed in every item.
pub fn paginated_list() -> TransformerPipeline {
    let dates = parse_date(["created_at", "updated_at"]);
    TransformerPipeline::new()
        .map(extract_pagination)
        .map(move |value| match value {
            Value::Object(mut map) => {
                if let Some(items) = map.get_mut("items") {
                    *items = dates(items.take());
                }
                Value::Object(map)
            }
            other => other,
        })
        .map(snake_to_camel)
}

fn field_list<I, S>(fields: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields.into_iter().map(|field| field.as_ref().to_owned()).collect()
}

fn convert_fields(value: Value, fields: &[String], convert: &dyn Fn(Value) -> Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| convert_fields(item, fields, convert))
                .collect(),
        ),
        Value::Object(mut map) => {
            for field in fields {
                if let Some(slot) = map.get_mut(field) {
                    *slot = convert(slot.take());
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn truthy_or(value: Option<&Value>, fallback: Value) -> Value {
    value.filter(|value| is_truthy(value)).cloned().unwrap_or(fallback)
}

fn parse_number(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(Value::from(0));
    }
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Some(Value::from(integer));
    }
    // `f64::from_str` also takes "inf" and "NaN"; `from_f64` rejects both.
    let float = trimmed.parse::<f64>().ok()?;
    Number::from_f64(float).map(Value::Number)
}

/// `YYYY-MM-DD`, optionally followed by `THH:MM[:SS[.fff]]` and `Z` or
/// `±HH:MM`.
fn parse_timestamp_millis(text: &str) -> Option<i64> {
    let year = digits(text.get(0..4)?)?;
    let month = digits(text.get(5..7)?)?;
    let day = digits(text.get(8..10)?)?;
    if text.get(4..5)? != "-" || text.get(7..8)? != "-" {
        return None;
    }
    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return None;
    }
    let date_millis = days_from_civil(year, month, day) * 86_400_000;
    let rest = text.get(10..)?;
    if rest.is_empty() {
        return Some(date_millis);
    }

    let rest = rest.strip_prefix(['T', 't', ' '])?;
    let hour = digits(rest.get(0..2)?)?;
    if rest.get(2..3)? != ":" {
        return None;
    }
    let minute = digits(rest.get(3..5)?)?;
    let mut rest = rest.get(5..)?;
    let mut second = 0;
    if let Some(tail) = rest.strip_prefix(':') {
        second = digits(tail.get(0..2)?)?;
        rest = tail.get(2..)?;
    }
    let mut fraction = 0;
    if let Some(tail) = rest.strip_prefix('.') {
        let len = tail.bytes().take_while(u8::is_ascii_digit).count();
        if len == 0 {
            return None;
        }
        fraction = tail
            .bytes()
            .take(len)
            .chain(std::iter::repeat(b'0'))
            .take(3)
            .fold(0, |acc, byte| acc * 10 + i64::from(byte - b'0'));
        rest = tail.get(len..)?;
    }
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let offset_minutes = match rest {
        "" | "Z" | "z" => 0,
        _ => {
            let sign = match rest.get(0..1)? {
                "+" => 1,
                "-" => -1,
                _ => return None,
            };
            let offset = rest.get(1..)?;
            let (hours, minutes) = match offset.len() {
                5 if offset.get(2..3)? == ":" => (digits(offset.get(0..2)?)?, digits(offset.get(3..5)?)?),
                4 => (digits(offset.get(0..2)?)?, digits(offset.get(2..4)?)?),
                _ => return None,
            };
            sign * (hours * 60 + minutes)
        }
    };

    let time_millis = ((hour * 60 + minute - offset_minutes) * 60 + second) * 1000 + fraction;
    Some(date_millis + time_millis)
}

fn digits(text: &str) -> Option<i64> {
    if text.is_empty() || !text.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn days_in_month(year: i64, month: i64) -> i64 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        _ => 31,
    }
}

/// Days since 1970-01-01 in the proleptic Gregorian calendar.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let year_of_era = year - era * 400;
    let month_index = (month + 9) % 12;
    let day_of_year = (153 * month_index + 2) / 5 + day - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

fn replace_nulls_with(value: Value, replacement: &Value) -> Value {
    match value {
        Value::Null => replacement.clone(),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, replace_nulls_with(value, replacement)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| replace_nulls_with(item, replacement))
                .collect(),
        ),
        other => other,
    }
}

fn camel_key_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn snake_key_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next && ch.is_ascii_lowercase() {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            if upper_next {
                out.push('_');
                upper_next = false;
            }
            out.push(ch);
        }
    }
    if upper_next {
        out.push('_');
    }
    out
}
