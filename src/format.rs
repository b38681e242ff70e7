use std::fmt;

/// The kind of a metric event.
///
/// Each kind maps to the type suffix statsite expects at the end of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// A single value, last-write-wins on the server.
    Gauge,

    /// A delta added to the server-side counter.
    Counter,

    /// A timing sample, aggregated into percentiles on the server.
    Sample,

    /// A raw key/value pair, passed through as-is.
    KeyValue,
}

impl MetricKind {
    /// Wire suffix for this kind.
    pub fn suffix(self) -> &'static str {
        match self {
            MetricKind::Gauge => "g",
            MetricKind::Counter => "c",
            MetricKind::Sample => "ms",
            MetricKind::KeyValue => "kv",
        }
    }
}

/// A name/value pair attached to a metric.
///
/// Only the value ends up on the wire: it is appended to the key as an extra segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Label {
        Label {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single newline-terminated line, ready to be written to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattedLine(Box<str>);

impl FormattedLine {
    pub fn as_str(&self) -> &str { &self.0 }

    pub fn as_bytes(&self) -> &[u8] { self.0.as_bytes() }

    /// Length of the line in bytes, trailing newline included.
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the line has no bytes at all.  Lines built by `format_line` never do.
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for FormattedLine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str(&self.0) }
}

/// Joins the key segments, and any label values, into a single dotted key.
///
/// Colons and spaces would break the line protocol, so both become underscores.  Nothing else
/// is escaped.
pub fn flatten_key<S: AsRef<str>>(parts: &[S], labels: &[Label]) -> String {
    let mut flat = String::new();
    let mut first = true;
    for part in parts {
        push_segment(&mut flat, &mut first, part.as_ref());
    }
    for label in labels {
        push_segment(&mut flat, &mut first, &label.value);
    }
    flat
}

fn push_segment(flat: &mut String, first: &mut bool, segment: &str) {
    if !*first {
        flat.push('.');
    }
    *first = false;
    flat.extend(segment.chars().map(|c| match c {
        ':' | ' ' => '_',
        c => c,
    }));
}

/// Renders a metric event as a wire line.
///
/// Finite values get six decimal places.  Infinities are written as `+Inf` and `-Inf`, and NaN as
/// `NaN`.
pub fn format_line<S: AsRef<str>>(kind: MetricKind, key: &[S], value: f32, labels: &[Label]) -> FormattedLine {
    let flat = flatten_key(key, labels);
    let line = if value.is_nan() {
        format!("{}:NaN|{}\n", flat, kind.suffix())
    } else if value.is_infinite() {
        let sign = if value > 0.0 { '+' } else { '-' };
        format!("{}:{}Inf|{}\n", flat, sign, kind.suffix())
    } else {
        format!("{}:{:.6}|{}\n", flat, value, kind.suffix())
    };
    FormattedLine(line.into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::{flatten_key, format_line, Label, MetricKind};

    #[test]
    fn test_flatten_substitutes_separators() {
        assert_eq!(flatten_key(&["foo bar", "baz:qux"], &[]), "foo_bar.baz_qux");
        assert_eq!(flatten_key(&["a", "b", "c"], &[]), "a.b.c");
    }

    #[test]
    fn test_flatten_appends_label_values() {
        let labels = vec![Label::new("status", "200"), Label::new("method", "GET /")];
        assert_eq!(flatten_key(&["http", "req"], &labels), "http.req.200.GET_/");
    }

    #[test]
    fn test_flatten_no_other_escaping() {
        // Dots inside a segment are left alone, so they collide with the separator.
        assert_eq!(flatten_key(&["a.b", "c|d"], &[]), "a.b.c|d");
        assert_eq!(flatten_key(&["", "a", ""], &[]), ".a.");
        let empty: [&str; 0] = [];
        assert_eq!(flatten_key(&empty, &[]), "");
    }

    #[test]
    fn test_format_per_kind() {
        let gauge = format_line(MetricKind::Gauge, &["a", "b"], 3.5, &[]);
        assert_eq!(gauge.as_str(), "a.b:3.500000|g\n");

        let counter = format_line(MetricKind::Counter, &["req"], 1.0, &[Label::new("code", "200")]);
        assert_eq!(counter.as_str(), "req.200:1.000000|c\n");

        let sample = format_line(MetricKind::Sample, &["db", "query time"], 12.25, &[]);
        assert_eq!(sample.as_str(), "db.query_time:12.250000|ms\n");

        let kv = format_line(MetricKind::KeyValue, &["version"], -2.0, &[]);
        assert_eq!(kv.as_str(), "version:-2.000000|kv\n");
    }

    #[test]
    fn test_format_rounds_to_six_places() {
        let line = format_line(MetricKind::Gauge, &["x"], 0.1, &[]);
        assert_eq!(line.as_str(), "x:0.100000|g\n");

        let line = format_line(MetricKind::Gauge, &["x"], 1234567.0, &[]);
        assert_eq!(line.as_str(), "x:1234567.000000|g\n");
    }

    #[test]
    fn test_format_non_finite() {
        let line = format_line(MetricKind::Gauge, &["x"], f32::INFINITY, &[]);
        assert_eq!(line.as_str(), "x:+Inf|g\n");

        let line = format_line(MetricKind::Sample, &["x"], f32::NEG_INFINITY, &[]);
        assert_eq!(line.as_str(), "x:-Inf|ms\n");

        let line = format_line(MetricKind::Counter, &["x"], f32::NAN, &[]);
        assert_eq!(line.as_str(), "x:NaN|c\n");
    }

    #[test]
    fn test_accepts_owned_segments() {
        let key = vec!["svc".to_owned(), "up".to_owned()];
        let line = format_line(MetricKind::Gauge, &key, 1.0, &[]);
        assert_eq!(line.to_string(), "svc.up:1.000000|g\n");
        assert_eq!(line.len(), line.as_bytes().len());
    }
}
