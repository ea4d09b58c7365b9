use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};

#[cfg(feature = "date")]
use crate::error::{FlatXmlError, Result};

/// Bidirectional conversion of a single column value.
///
/// `to_xml` turns the flat text of a column into the text inserted in the
/// XML document, `to_flat` is the best-effort inverse used when flat lines
/// are regenerated. A missing value (`None`) is always returned unchanged
/// without any parsing or formatting.
///
/// The value produced by `to_xml` is inserted as is, so it must already be
/// valid XML text. Use [`ContentConverter::XmlEscape`] (the default
/// fallback of a [`ConverterTable`]) for untrusted text.
///
/// # Examples
///
/// ```
/// use flatxml::core::converter::{ContentConverter, NumberConverter};
///
/// let number = ContentConverter::Number(NumberConverter::default());
/// assert_eq!(number.to_xml(Some("007")).as_deref(), Some("7"));
/// assert_eq!(number.to_xml(Some("0")).as_deref(), Some(""));
/// assert_eq!(number.to_xml(Some("n/a")).as_deref(), Some("n/a"));
/// assert_eq!(number.to_xml(None), None);
///
/// let escape = ContentConverter::XmlEscape;
/// assert_eq!(escape.to_xml(Some("a<b")).as_deref(), Some("a&lt;b"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentConverter {
    /// Identity in both directions.
    NoConversion,
    /// Trims surrounding whitespace toward XML.
    TextStrip,
    /// Escapes XML markup characters toward XML. Not undone toward flat.
    XmlEscape,
    Number(NumberConverter),
    #[cfg(feature = "date")]
    Date(DateConverter),
}

impl ContentConverter {
    pub fn to_xml(&self, text: Option<&str>) -> Option<String> {
        let text = text?;
        let converted = match self {
            ContentConverter::NoConversion => text.to_string(),
            ContentConverter::TextStrip => text.trim().to_string(),
            ContentConverter::XmlEscape => escape(text).into_owned(),
            ContentConverter::Number(number) => number.to_xml(text),
            #[cfg(feature = "date")]
            ContentConverter::Date(date) => date.to_xml(text),
        };
        Some(converted)
    }

    pub fn to_flat(&self, text: Option<&str>) -> Option<String> {
        let text = text?;
        let converted = match self {
            ContentConverter::NoConversion
            | ContentConverter::TextStrip
            | ContentConverter::XmlEscape
            | ContentConverter::Number(_) => text.to_string(),
            #[cfg(feature = "date")]
            ContentConverter::Date(date) => date.to_flat(text),
        };
        Some(converted)
    }

    /// Checks the converter settings (date patterns).
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        match self {
            #[cfg(feature = "date")]
            ContentConverter::Date(date) => date.validate(),
            _ => Ok(()),
        }
    }
}

/// Integer normalisation: `"007"` becomes `"7"`, zero becomes empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NumberConverter {
    /// Blank text is rendered as an empty string instead of passing through.
    pub blank_to_empty: bool,
    /// A parsed zero is rendered as an empty string.
    pub zero_to_empty: bool,
}

impl Default for NumberConverter {
    fn default() -> Self {
        Self {
            blank_to_empty: true,
            zero_to_empty: true,
        }
    }
}

impl NumberConverter {
    fn to_xml(&self, text: &str) -> String {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return if self.blank_to_empty {
                String::new()
            } else {
                text.to_string()
            };
        }

        match trimmed.parse::<i128>() {
            Ok(0) if self.zero_to_empty => String::new(),
            Ok(value) => value.to_string(),
            Err(_) => text.to_string(),
        }
    }
}

/// Reformats dates from an input pattern to an output pattern.
///
/// Patterns use the `chrono` strftime syntax (`%Y%m%d`, `%d/%m/%Y %H:%M`,
/// ...). A pattern may describe a date-time, a date or a time. Text that does
/// not match is passed through unchanged.
///
/// # Examples
///
/// ```
/// use flatxml::core::converter::DateConverter;
///
/// let date = DateConverter::new("%Y%m%d", "%Y-%m-%d").unwrap();
/// assert_eq!(date.to_xml("20240229"), "2024-02-29");
/// assert_eq!(date.to_flat("2024-02-29"), "20240229");
/// assert_eq!(date.to_xml("someday"), "someday");
/// ```
#[cfg(feature = "date")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateConverter {
    pub input_pattern: String,
    pub output_pattern: String,
    #[serde(default = "default_true")]
    pub blank_to_empty: bool,
}

#[cfg(feature = "date")]
fn default_true() -> bool {
    true
}

#[cfg(feature = "date")]
impl DateConverter {
    /// Creates a date converter, rejecting malformed patterns.
    pub fn new(input_pattern: &str, output_pattern: &str) -> Result<Self> {
        let converter = Self {
            input_pattern: input_pattern.to_string(),
            output_pattern: output_pattern.to_string(),
            blank_to_empty: true,
        };
        converter.validate()?;
        Ok(converter)
    }

    pub fn blank_to_empty(mut self, yes: bool) -> Self {
        self.blank_to_empty = yes;
        self
    }

    pub fn to_xml(&self, text: &str) -> String {
        self.reformat(text, &self.input_pattern, &self.output_pattern)
    }

    pub fn to_flat(&self, text: &str) -> String {
        self.reformat(text, &self.output_pattern, &self.input_pattern)
    }

    fn reformat(&self, text: &str, from: &str, to: &str) -> String {
        if text.trim().is_empty() {
            return if self.blank_to_empty {
                String::new()
            } else {
                text.to_string()
            };
        }

        date::parse(text, from)
            .and_then(|value| date::format(&value, to))
            .unwrap_or_else(|| text.to_string())
    }

    fn validate(&self) -> Result<()> {
        for pattern in [&self.input_pattern, &self.output_pattern] {
            if !date::is_valid_pattern(pattern) {
                return Err(FlatXmlError::Configuration(format!(
                    "invalid date pattern {:?}",
                    pattern
                )));
            }
        }
        Ok(())
    }
}

#[cfg(feature = "date")]
mod date {
    use chrono::format::{Item, StrftimeItems};
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use std::fmt::Write;

    pub(super) fn is_valid_pattern(pattern: &str) -> bool {
        !pattern.is_empty() && StrftimeItems::new(pattern).all(|item| item != Item::Error)
    }

    /// Parses `text` as a date-time, a date or a time, in that order.
    pub(super) fn parse(text: &str, pattern: &str) -> Option<NaiveDateTime> {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(value);
        }
        if let Ok(value) = NaiveDate::parse_from_str(text, pattern) {
            return value.and_hms_opt(0, 0, 0);
        }
        let time = NaiveTime::parse_from_str(text, pattern).ok()?;
        NaiveDate::from_ymd_opt(1970, 1, 1).map(|epoch| epoch.and_time(time))
    }

    /// Formats without panicking on fields a naive value cannot provide.
    pub(super) fn format(value: &NaiveDateTime, pattern: &str) -> Option<String> {
        let mut out = String::new();
        write!(out, "{}", value.format(pattern)).ok()?;
        Some(out)
    }
}

/// Per-column converters plus the fallback applied to unconfigured columns.
///
/// The fallback strips surrounding whitespace when `strip` is set, then
/// escapes XML markup when `escape` is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConverterTable {
    converters: Vec<Option<ContentConverter>>,
    strip: bool,
    escape: bool,
}

impl ConverterTable {
    pub fn new(converters: Vec<Option<ContentConverter>>, strip: bool, escape: bool) -> Self {
        Self {
            converters,
            strip,
            escape,
        }
    }

    /// The converter configured for the 0-based column `index`, if any.
    pub fn converter_for(&self, index: usize) -> Option<&ContentConverter> {
        self.converters.get(index).and_then(Option::as_ref)
    }

    pub fn to_xml(&self, index: usize, text: Option<&str>) -> Option<String> {
        if let Some(converter) = self.converter_for(index) {
            return converter.to_xml(text);
        }

        let text = text?;
        let text = if self.strip { text.trim() } else { text };
        if self.escape {
            Some(escape(text).into_owned())
        } else {
            Some(text.to_string())
        }
    }

    pub fn to_flat(&self, index: usize, text: Option<&str>) -> Option<String> {
        match self.converter_for(index) {
            Some(converter) => converter.to_flat(text),
            None => text.map(str::to_string),
        }
    }

    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        self.converters
            .iter()
            .flatten()
            .try_for_each(ContentConverter::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_propagates_for_every_variant() {
        let converters = vec![
            ContentConverter::NoConversion,
            ContentConverter::TextStrip,
            ContentConverter::XmlEscape,
            ContentConverter::Number(NumberConverter::default()),
        ];
        for converter in converters {
            assert_eq!(converter.to_xml(None), None);
            assert_eq!(converter.to_flat(None), None);
        }
    }

    #[test]
    fn strip_and_identity_are_idempotent() {
        for converter in [ContentConverter::NoConversion, ContentConverter::TextStrip] {
            let once = converter.to_xml(Some("  hello world ")).unwrap();
            let twice = converter.to_xml(Some(&once)).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn strip_is_not_undone() {
        let strip = ContentConverter::TextStrip;
        assert_eq!(strip.to_xml(Some("  ab  ")).unwrap(), "ab");
        assert_eq!(strip.to_flat(Some("  ab  ")).unwrap(), "  ab  ");
    }

    #[test]
    fn escape_is_asymmetric() {
        let escape = ContentConverter::XmlEscape;
        assert_eq!(
            escape.to_xml(Some("<a href=\"x\">&</a>")).unwrap(),
            "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;"
        );
        assert_eq!(escape.to_flat(Some("&amp;")).unwrap(), "&amp;");
    }

    #[test]
    fn number_defaults() {
        let number = ContentConverter::Number(NumberConverter::default());
        assert_eq!(number.to_xml(Some("0")).unwrap(), "");
        assert_eq!(number.to_xml(Some("000")).unwrap(), "");
        assert_eq!(number.to_xml(Some("007")).unwrap(), "7");
        assert_eq!(number.to_xml(Some("  42")).unwrap(), "42");
        assert_eq!(number.to_xml(Some("-0012")).unwrap(), "-12");
        assert_eq!(number.to_xml(Some("12a")).unwrap(), "12a");
        assert_eq!(number.to_xml(Some("   ")).unwrap(), "");
        assert_eq!(number.to_flat(Some("007")).unwrap(), "007");
    }

    #[test]
    fn number_flags_are_independent() {
        let keep_zero = ContentConverter::Number(NumberConverter {
            blank_to_empty: true,
            zero_to_empty: false,
        });
        assert_eq!(keep_zero.to_xml(Some("00")).unwrap(), "0");
        assert_eq!(keep_zero.to_xml(Some("  ")).unwrap(), "");

        let keep_blank = ContentConverter::Number(NumberConverter {
            blank_to_empty: false,
            zero_to_empty: true,
        });
        assert_eq!(keep_blank.to_xml(Some("  ")).unwrap(), "  ");
        assert_eq!(keep_blank.to_xml(Some("0")).unwrap(), "");
    }

    #[cfg(feature = "date")]
    #[test]
    fn date_round_trip_for_matching_text() {
        let date = DateConverter::new("%d%m%Y", "%Y-%m-%d").unwrap();
        for text in ["01012000", "29022024", "31121999"] {
            let xml = date.to_xml(text);
            assert_ne!(xml, text);
            assert_eq!(date.to_flat(&xml), text);
        }
    }

    #[cfg(feature = "date")]
    #[test]
    fn date_handles_times_and_datetimes() {
        let time = DateConverter::new("%H%M", "%H:%M").unwrap();
        assert_eq!(time.to_xml("0930"), "09:30");

        let stamp = DateConverter::new("%Y%m%d%H%M%S", "%Y-%m-%dT%H:%M:%S").unwrap();
        assert_eq!(stamp.to_xml("20240131235959"), "2024-01-31T23:59:59");
    }

    #[cfg(feature = "date")]
    #[test]
    fn date_passthrough_and_blank() {
        let date = DateConverter::new("%Y%m%d", "%d/%m/%Y").unwrap();
        assert_eq!(date.to_xml("20241345"), "20241345");
        assert_eq!(date.to_flat("not a date"), "not a date");
        assert_eq!(date.to_xml("   "), "");

        let keep = date.blank_to_empty(false);
        assert_eq!(keep.to_xml("   "), "   ");
    }

    #[cfg(feature = "date")]
    #[test]
    fn date_rejects_bad_pattern() {
        assert!(DateConverter::new("%Y%Q", "%Y").is_err());
        assert!(DateConverter::new("", "%Y").is_err());
    }

    #[test]
    fn table_uses_column_converter_then_fallback() {
        let table = ConverterTable::new(
            vec![None, Some(ContentConverter::Number(NumberConverter::default()))],
            true,
            true,
        );

        assert_eq!(table.to_xml(0, Some(" a&b ")).unwrap(), "a&amp;b");
        assert_eq!(table.to_xml(1, Some("0042")).unwrap(), "42");
        assert_eq!(table.to_xml(5, Some(" <x> ")).unwrap(), "&lt;x&gt;");
        assert_eq!(table.to_xml(5, None), None);
    }

    #[test]
    fn table_without_fallback_is_identity() {
        let table = ConverterTable::new(Vec::new(), false, false);
        assert_eq!(table.to_xml(0, Some(" a ")).unwrap(), " a ");
        assert_eq!(table.to_flat(0, Some(" a ")).unwrap(), " a ");
    }

    #[test]
    fn converters_deserialize_from_tagged_json() {
        let json = r#"[{"type":"xmlEscape"},null,{"type":"number","zeroToEmpty":false}]"#;
        let converters: Vec<Option<ContentConverter>> = serde_json::from_str(json).unwrap();

        assert_eq!(converters[0], Some(ContentConverter::XmlEscape));
        assert_eq!(converters[1], None);
        assert_eq!(
            converters[2],
            Some(ContentConverter::Number(NumberConverter {
                blank_to_empty: true,
                zero_to_empty: false,
            }))
        );
    }
}
