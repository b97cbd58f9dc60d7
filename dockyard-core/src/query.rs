//! Query-string building for endpoint options.
//!
//! Each options type implements [`ToQuery`] and states its own field mapping
//! through a [`QueryParams`] builder. The builder carries the rules every
//! mapping shares:
//!
//! - zero values (`false`, `0`, `0.0`, `""`, empty lists, `null`/empty JSON)
//!   are omitted unless added with [`QueryParams::required`];
//! - `true` renders as `1`;
//! - floats render in shortest round-trip form;
//! - nested values are encoded as a single JSON value;
//! - lists repeat the key once per element;
//! - keys are emitted in sorted order.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Ordered query parameters.
///
/// ```rust
/// use dockyard_core::QueryParams;
///
/// let query = QueryParams::new()
///     .flag("all", true)
///     .string("before", "abc")
///     .int("limit", 0);
/// assert_eq!(query.encode(), "all=1&before=abc");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: BTreeMap<String, Vec<String>>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `key=1` when `value` is true.
    #[must_use]
    pub fn flag(self, key: &str, value: bool) -> Self {
        if value { self.push(key, "1") } else { self }
    }

    /// Add a signed integer, omitted when zero.
    #[must_use]
    pub fn int(self, key: &str, value: impl Into<i64>) -> Self {
        match value.into() {
            0 => self,
            n => self.push(key, n.to_string()),
        }
    }

    /// Add an unsigned integer, omitted when zero.
    #[must_use]
    pub fn uint(self, key: &str, value: u64) -> Self {
        if value == 0 { self } else { self.push(key, value.to_string()) }
    }

    /// Add a float, omitted when zero.
    #[must_use]
    pub fn float(self, key: &str, value: impl Into<f64>) -> Self {
        let value = value.into();
        if value == 0.0 { self } else { self.push(key, value.to_string()) }
    }

    /// Add a string, omitted when empty.
    #[must_use]
    pub fn string(self, key: &str, value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        if value.is_empty() { self } else { self.push(key, value) }
    }

    /// Add every non-empty element of a list under the same key.
    #[must_use]
    pub fn list<I>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        values
            .into_iter()
            .fold(self, |query, value| query.string(key, value))
    }

    /// Add a nested value as one JSON-encoded parameter.
    ///
    /// `None`, empty maps and empty sequences are omitted. A value that fails
    /// to serialize is skipped with a warning.
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(self, key: &str, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(json) if matches!(json.as_str(), "null" | "{}" | "[]") => self,
            Ok(json) => self.push(key, json),
            Err(e) => {
                tracing::warn!(key, error = %e, "skipping unserializable query value");
                self
            }
        }
    }

    /// Add a value even when it is a zero value.
    #[must_use]
    pub fn required(self, key: &str, value: impl fmt::Display) -> Self {
        self.push(key, value.to_string())
    }

    /// First value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Check whether no parameter was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Merge another set of parameters into this one.
    #[must_use]
    pub fn extend(mut self, other: QueryParams) -> Self {
        for (key, values) in other.pairs {
            self.pairs.entry(key).or_default().extend(values);
        }
        self
    }

    /// Encode as `application/x-www-form-urlencoded`, keys sorted.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.pairs {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }

    fn push(mut self, key: &str, value: impl Into<String>) -> Self {
        self.pairs
            .entry(key.to_string())
            .or_default()
            .push(value.into());
        self
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Conversion of an options value into query parameters.
///
/// ```rust
/// use dockyard_core::{QueryParams, ToQuery};
///
/// struct ListOptions {
///     all: bool,
///     limit: i32,
/// }
///
/// impl ToQuery for ListOptions {
///     fn to_query(&self) -> QueryParams {
///         QueryParams::new().flag("all", self.all).int("limit", self.limit)
///     }
/// }
///
/// let options = ListOptions { all: true, limit: 5 };
/// assert_eq!(options.to_query().encode(), "all=1&limit=5");
/// ```
pub trait ToQuery {
    /// Build the query parameters for this value.
    fn to_query(&self) -> QueryParams;
}

/// No options: the empty query string.
impl ToQuery for () {
    fn to_query(&self) -> QueryParams {
        QueryParams::new()
    }
}

impl ToQuery for QueryParams {
    fn to_query(&self) -> QueryParams {
        self.clone()
    }
}

impl<T: ToQuery> ToQuery for Option<T> {
    fn to_query(&self) -> QueryParams {
        self.as_ref().map(ToQuery::to_query).unwrap_or_default()
    }
}

impl<T: ToQuery + ?Sized> ToQuery for &T {
    fn to_query(&self) -> QueryParams {
        (**self).to_query()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct ListContainersOptions {
        all: bool,
        since: String,
        before: String,
        filters: HashMap<String, Vec<String>>,
    }

    impl ToQuery for ListContainersOptions {
        fn to_query(&self) -> QueryParams {
            QueryParams::new()
                .flag("all", self.all)
                .string("since", &self.since)
                .string("before", &self.before)
                .json("filters", &self.filters)
        }
    }

    #[derive(Serialize)]
    struct Person {
        #[serde(rename = "Name")]
        name: String,
        age: u32,
    }

    /// Mirrors an options struct with a skipped field, a renamed field and a
    /// nested value.
    #[derive(Default)]
    struct Mixed {
        skipped: i32,
        w: f32,
        x: i32,
        y: f64,
        z: i32,
        person: Option<Person>,
    }

    impl ToQuery for Mixed {
        fn to_query(&self) -> QueryParams {
            let _ = self.skipped;
            QueryParams::new()
                .float("w", self.w)
                .int("x", self.x)
                .float("y", self.y)
                .int("zee", self.z)
                .json("p", &self.person)
        }
    }

    #[test]
    fn test_flags_and_strings() {
        let cases = [
            (
                ListContainersOptions {
                    all: true,
                    ..Default::default()
                },
                "all=1",
            ),
            (
                ListContainersOptions {
                    before: "something".into(),
                    ..Default::default()
                },
                "before=something",
            ),
            (
                ListContainersOptions {
                    before: "something".into(),
                    since: "other".into(),
                    ..Default::default()
                },
                "before=something&since=other",
            ),
        ];

        for (options, expected) in cases {
            assert_eq!(options.to_query().encode(), expected);
            assert_eq!((&options).to_query().encode(), expected);
        }
    }

    #[test]
    fn test_map_is_json_encoded() {
        let mut filters = HashMap::new();
        filters.insert(
            "status".to_string(),
            vec!["paused".to_string(), "running".to_string()],
        );
        let options = ListContainersOptions {
            filters,
            ..Default::default()
        };
        assert_eq!(
            options.to_query().encode(),
            "filters=%7B%22status%22%3A%5B%22paused%22%2C%22running%22%5D%7D"
        );
    }

    #[test]
    fn test_numbers() {
        let plain = Mixed {
            x: 10,
            y: 10.35,
            ..Default::default()
        };
        assert_eq!(plain.to_query().encode(), "x=10&y=10.35");

        let with_f32 = Mixed {
            w: 2.4,
            x: 10,
            y: 10.35,
            ..Default::default()
        };
        let w = f64::from(2.4f32).to_string();
        assert_eq!(with_f32.to_query().encode(), format!("w={w}&x=10&y=10.35"));

        let renamed = Mixed {
            x: 10,
            y: 10.35,
            z: 10,
            ..Default::default()
        };
        assert_eq!(renamed.to_query().encode(), "x=10&y=10.35&zee=10");

        let skipped = Mixed {
            skipped: 10,
            y: 10.35,
            ..Default::default()
        };
        assert_eq!(skipped.to_query().encode(), "y=10.35");
    }

    #[test]
    fn test_nested_value() {
        let options = Mixed {
            person: Some(Person {
                name: "gopher".into(),
                age: 4,
            }),
            ..Default::default()
        };
        let expected: String =
            url::form_urlencoded::byte_serialize(br#"{"Name":"gopher","age":4}"#).collect();
        assert_eq!(options.to_query().encode(), format!("p={expected}"));
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(().to_query().encode(), "");
        assert_eq!(None::<Mixed>.to_query().encode(), "");
        assert_eq!(Mixed::default().to_query().encode(), "");
    }

    #[test]
    fn test_required_and_list() {
        let query = QueryParams::new()
            .required("force", false)
            .list("tag", ["a", "", "b"]);
        assert_eq!(query.encode(), "force=false&tag=a&tag=b");
        assert_eq!(query.get("tag"), Some("a"));
    }

    #[test]
    fn test_extend() {
        let query = QueryParams::new()
            .string("b", "2")
            .extend(QueryParams::new().string("a", "1"));
        assert_eq!(query.to_string(), "a=1&b=2");
    }
}
