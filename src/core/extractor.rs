use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{FlatXmlError, Result};

/// The columns of one line, in order. `None` marks a column left unset
/// (line too short, absent in the selected layout, ...).
pub type Columns = Vec<Option<String>>;

/// Extension point for layouts the built-in extractors cannot express.
///
/// # Examples
///
/// ```
/// use flatxml::core::extractor::{ColumnExtractor, Columns, LineExtractor};
/// use flatxml::FlatXmlError;
/// use std::sync::Arc;
///
/// struct KeyValue;
///
/// impl LineExtractor for KeyValue {
///     fn extract(&self, line: &str) -> Result<Option<Columns>, FlatXmlError> {
///         let columns = line
///             .split_once('=')
///             .map(|(k, v)| vec![Some(k.to_string()), Some(v.to_string())])
///             .unwrap_or_else(|| vec![Some(line.to_string())]);
///         Ok(Some(columns))
///     }
/// }
///
/// let extractor = ColumnExtractor::Custom(Arc::new(KeyValue));
/// let columns = extractor.extract("color=blue").unwrap().unwrap();
/// assert_eq!(columns, vec![Some("color".to_string()), Some("blue".to_string())]);
/// ```
pub trait LineExtractor {
    /// Splits a non-empty line into columns.
    fn extract(&self, line: &str) -> Result<Option<Columns>>;
}

/// Fixed-width layout whose tail depends on the value of one column.
///
/// The prefix columns are always cut. The trimmed value of the
/// discriminator column (an index into the prefix) selects the widths of the
/// remaining columns; a negative width marks a column absent from that
/// layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VariableLayout {
    pub discriminator_index: usize,
    pub prefix_widths: Vec<usize>,
    pub suffix_widths_by_value: HashMap<String, Vec<i32>>,
}

impl VariableLayout {
    pub fn new(discriminator_index: usize, prefix_widths: Vec<usize>) -> Self {
        Self {
            discriminator_index,
            prefix_widths,
            suffix_widths_by_value: HashMap::new(),
        }
    }

    /// Registers the suffix widths used when the discriminator equals `value`.
    pub fn suffix(mut self, value: &str, widths: Vec<i32>) -> Self {
        self.suffix_widths_by_value.insert(value.to_string(), widths);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.discriminator_index >= self.prefix_widths.len() {
            return Err(FlatXmlError::Configuration(format!(
                "discriminator index {} is outside the {} prefix columns",
                self.discriminator_index,
                self.prefix_widths.len()
            )));
        }
        Ok(())
    }

    /// Suffix widths for a discriminator value, `None` when unmatched or blank.
    pub fn suffix_widths(&self, value: &str) -> Option<&[i32]> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        self.suffix_widths_by_value.get(value).map(Vec::as_slice)
    }
}

/// Strategy splitting a line into columns.
///
/// Every variant returns `Ok(None)` for an empty line.
#[derive(Clone)]
pub enum ColumnExtractor {
    /// Successive substrings of the configured widths (in characters).
    FixedWidth { widths: Vec<usize> },
    /// Tokens between occurrences of the separator, empty ones included.
    Delimited { separator: String },
    VariableFixedWidth(VariableLayout),
    Custom(Arc<dyn LineExtractor + Send + Sync>),
}

impl fmt::Debug for ColumnExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnExtractor::FixedWidth { widths } => {
                f.debug_struct("FixedWidth").field("widths", widths).finish()
            }
            ColumnExtractor::Delimited { separator } => f
                .debug_struct("Delimited")
                .field("separator", separator)
                .finish(),
            ColumnExtractor::VariableFixedWidth(layout) => {
                f.debug_tuple("VariableFixedWidth").field(layout).finish()
            }
            ColumnExtractor::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl ColumnExtractor {
    /// Checks the extractor settings.
    pub fn validate(&self) -> Result<()> {
        match self {
            ColumnExtractor::Delimited { separator } if separator.is_empty() => Err(
                FlatXmlError::Configuration("delimited layout requires a separator".to_string()),
            ),
            ColumnExtractor::VariableFixedWidth(layout) => layout.validate(),
            _ => Ok(()),
        }
    }

    /// Splits `line` into columns.
    ///
    /// # Errors
    ///
    /// [`FlatXmlError::Layout`] when a variable layout line is too short to
    /// contain its discriminator column, or whatever a custom extractor
    /// returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use flatxml::core::extractor::ColumnExtractor;
    ///
    /// let fixed = ColumnExtractor::FixedWidth { widths: vec![2, 3, 5] };
    /// let columns = fixed.extract("abcdefgh").unwrap().unwrap();
    /// assert_eq!(columns, vec![Some("ab".to_string()), Some("cde".to_string()), None]);
    ///
    /// let delimited = ColumnExtractor::Delimited { separator: ";".to_string() };
    /// let columns = delimited.extract("a;;b;").unwrap().unwrap();
    /// assert_eq!(columns.len(), 4);
    ///
    /// assert!(fixed.extract("").unwrap().is_none());
    /// ```
    pub fn extract(&self, line: &str) -> Result<Option<Columns>> {
        if line.is_empty() {
            return Ok(None);
        }

        match self {
            ColumnExtractor::FixedWidth { widths } => {
                let mut columns = Vec::with_capacity(widths.len());
                cut(line, 0, widths.iter().map(|w| Some(*w)), &mut columns);
                Ok(Some(columns))
            }
            ColumnExtractor::Delimited { separator } => Ok(Some(
                line.split(separator.as_str())
                    .map(|token| Some(token.to_string()))
                    .collect(),
            )),
            ColumnExtractor::VariableFixedWidth(layout) => extract_variable(layout, line).map(Some),
            ColumnExtractor::Custom(extractor) => extractor.extract(line),
        }
    }
}

/// Cuts successive columns from `line` starting at byte offset `start`.
///
/// A `None` width is an absent column: it is pushed unset and consumes
/// nothing. Once a column cannot be filled, it and every following column
/// are pushed unset. Returns the byte offset after the last cut column, or
/// `None` if the line ran out.
fn cut<I>(line: &str, start: usize, widths: I, columns: &mut Columns) -> Option<usize>
where
    I: IntoIterator<Item = Option<usize>>,
{
    let mut position = Some(start);

    for width in widths {
        let (Some(width), Some(from)) = (width, position) else {
            columns.push(None);
            continue;
        };

        match advance(line, from, width) {
            Some(to) => {
                columns.push(Some(line[from..to].to_string()));
                position = Some(to);
            }
            None => {
                debug!(
                    "Line too short for column {} (width {}), leaving remaining columns unset",
                    columns.len() + 1,
                    width
                );
                columns.push(None);
                position = None;
            }
        }
    }

    position
}

/// Byte offset `chars` characters after `from`, if the line is long enough.
fn advance(line: &str, from: usize, chars: usize) -> Option<usize> {
    if chars == 0 {
        return Some(from);
    }
    let rest = &line[from..];
    match rest.char_indices().nth(chars) {
        Some((offset, _)) => Some(from + offset),
        None if rest.chars().count() == chars => Some(line.len()),
        None => None,
    }
}

fn extract_variable(layout: &VariableLayout, line: &str) -> Result<Columns> {
    let mut columns = Vec::with_capacity(layout.prefix_widths.len());
    let end = cut(
        line,
        0,
        layout.prefix_widths.iter().map(|w| Some(*w)),
        &mut columns,
    );

    let discriminator = match columns.get(layout.discriminator_index) {
        Some(Some(value)) => value.clone(),
        _ => {
            error!(
                "Line too short to read discriminator column {}: {:?}",
                layout.discriminator_index + 1,
                line
            );
            return Err(FlatXmlError::Layout(format!(
                "line of {} characters does not reach discriminator column {}",
                line.chars().count(),
                layout.discriminator_index + 1
            )));
        }
    };

    match (layout.suffix_widths(&discriminator), end) {
        (Some(suffix), Some(end)) => {
            let widths = suffix
                .iter()
                .map(|w| usize::try_from(*w).ok())
                .collect::<Vec<_>>();
            cut(line, end, widths, &mut columns);
        }
        (Some(suffix), None) => columns.extend(suffix.iter().map(|_| None)),
        (None, _) => debug!(
            "No layout registered for discriminator value {:?}, suffix columns left unset",
            discriminator
        ),
    }

    Ok(columns)
}
