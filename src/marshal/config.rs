use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::assembler::DocumentOptions;
use crate::core::converter::{ContentConverter, ConverterTable};
use crate::core::extractor::{ColumnExtractor, LineExtractor, VariableLayout};
use crate::error::{FlatXmlError, Result};

/// How lines are split into columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    /// Fixed column widths (`columnWidths`).
    Fixed,
    /// Columns separated by `separator`.
    Delimited,
    /// Fixed-width prefix plus a tail selected by a discriminator column (`variableLayout`).
    Variable,
    /// Caller-supplied [`LineExtractor`].
    VariableCustom,
}

impl FromStr for LayoutKind {
    type Err = FlatXmlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(LayoutKind::Fixed),
            "delimited" => Ok(LayoutKind::Delimited),
            "variable" => Ok(LayoutKind::Variable),
            "variable-custom" => Ok(LayoutKind::VariableCustom),
            other => Err(FlatXmlError::Configuration(format!(
                "unknown layout kind {:?}",
                other
            ))),
        }
    }
}

/// Complete configuration of a [`Marshaler`](crate::marshal::Marshaler).
///
/// Every field has a default, so a configuration can be loaded from a
/// partial JSON document using the camelCase option names.
///
/// # Examples
///
/// ```
/// use flatxml::marshal::{LayoutKind, MarshalerConfig};
///
/// let config = MarshalerConfig::from_json_str(r#"{
///     "layout": "fixed",
///     "columnWidths": [2, 3, 5],
///     "columnNames": ["First", "Second", "Third"],
///     "converters": [null, {"type": "number"}]
/// }"#).unwrap();
///
/// assert_eq!(config.layout, Some(LayoutKind::Fixed));
/// assert_eq!(config.doc_element_name, "DocElement");
/// assert!(config.default_escape);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarshalerConfig {
    /// No layout means every line is rendered verbatim.
    pub layout: Option<LayoutKind>,
    pub column_widths: Vec<usize>,
    pub separator: Option<String>,
    pub variable_layout: Option<VariableLayout>,
    pub column_names: Vec<String>,
    pub names_from_header_line: Option<usize>,
    pub header_line_count: usize,
    pub doc_element_name: String,
    pub line_element_name: String,
    pub column_element_name: String,
    pub namespace: Option<String>,
    pub emit_xml_declaration: bool,
    pub emit_line_numbers: bool,
    pub emit_column_numbers: bool,
    pub emit_raw_line: bool,
    pub columns_as_attributes: bool,
    pub skip_empty_default_named_columns: bool,
    pub skip_any_empty_column: bool,
    pub default_strip: bool,
    pub default_escape: bool,
    /// Encoding of the flat file.
    pub encoding: Option<String>,
    /// Encoding of the XML output, defaults to `encoding`.
    pub output_encoding: Option<String>,
    pub line_terminator: Option<String>,
    pub converters: Vec<Option<ContentConverter>>,
}

impl Default for MarshalerConfig {
    fn default() -> Self {
        let document = DocumentOptions::default();
        Self {
            layout: None,
            column_widths: Vec::new(),
            separator: None,
            variable_layout: None,
            column_names: Vec::new(),
            names_from_header_line: None,
            header_line_count: 0,
            doc_element_name: document.doc_element_name,
            line_element_name: document.line_element_name,
            column_element_name: document.column_element_name,
            namespace: None,
            emit_xml_declaration: document.emit_xml_declaration,
            emit_line_numbers: document.emit_line_numbers,
            emit_column_numbers: document.emit_column_numbers,
            emit_raw_line: document.emit_raw_line,
            columns_as_attributes: false,
            skip_empty_default_named_columns: false,
            skip_any_empty_column: false,
            default_strip: false,
            default_escape: true,
            encoding: None,
            output_encoding: None,
            line_terminator: None,
            converters: Vec::new(),
        }
    }
}

impl MarshalerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub(crate) fn document_options(&self) -> DocumentOptions {
        DocumentOptions {
            doc_element_name: self.doc_element_name.clone(),
            line_element_name: self.line_element_name.clone(),
            column_element_name: self.column_element_name.clone(),
            namespace: self.namespace.clone(),
            emit_xml_declaration: self.emit_xml_declaration,
            emit_line_numbers: self.emit_line_numbers,
            emit_column_numbers: self.emit_column_numbers,
            emit_raw_line: self.emit_raw_line,
            columns_as_attributes: self.columns_as_attributes,
            skip_empty_default_named_columns: self.skip_empty_default_named_columns,
            skip_any_empty_column: self.skip_any_empty_column,
            header_line_count: self.header_line_count,
            names_from_header_line: self.names_from_header_line,
            column_names: self.column_names.clone(),
            output_encoding: self
                .output_encoding
                .clone()
                .or_else(|| self.encoding.clone()),
        }
    }

    pub(crate) fn converter_table(&self) -> ConverterTable {
        ConverterTable::new(
            self.converters.clone(),
            self.default_strip,
            self.default_escape,
        )
    }

    /// Builds the extractor selected by `layout`.
    pub(crate) fn column_extractor(
        &self,
        custom: Option<Arc<dyn LineExtractor + Send + Sync>>,
    ) -> Result<Option<ColumnExtractor>> {
        let Some(layout) = self.layout else {
            return Ok(None);
        };

        let extractor = match layout {
            LayoutKind::Fixed if self.column_widths.is_empty() => {
                return Err(FlatXmlError::Configuration(
                    "fixed layout requires columnWidths".to_string(),
                ));
            }
            LayoutKind::Fixed => ColumnExtractor::FixedWidth {
                widths: self.column_widths.clone(),
            },
            LayoutKind::Delimited => ColumnExtractor::Delimited {
                separator: self.separator.clone().ok_or_else(|| {
                    FlatXmlError::Configuration("delimited layout requires a separator".to_string())
                })?,
            },
            LayoutKind::Variable => ColumnExtractor::VariableFixedWidth(
                self.variable_layout.clone().ok_or_else(|| {
                    FlatXmlError::Configuration(
                        "variable layout requires variableLayout".to_string(),
                    )
                })?,
            ),
            LayoutKind::VariableCustom => ColumnExtractor::Custom(custom.ok_or_else(|| {
                FlatXmlError::Configuration(
                    "variable-custom layout requires a custom extractor".to_string(),
                )
            })?),
        };

        Ok(Some(extractor))
    }

    pub(crate) fn validate_header(&self) -> Result<()> {
        match self.names_from_header_line {
            Some(line) if line == 0 || line > self.header_line_count => {
                Err(FlatXmlError::Configuration(format!(
                    "namesFromHeaderLine {} is outside the {} header lines",
                    line, self.header_line_count
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_kind_parses_known_names() {
        assert_eq!("fixed".parse::<LayoutKind>().unwrap(), LayoutKind::Fixed);
        assert_eq!(" Delimited ".parse::<LayoutKind>().unwrap(), LayoutKind::Delimited);
        assert_eq!(
            "variable-custom".parse::<LayoutKind>().unwrap(),
            LayoutKind::VariableCustom
        );
        assert!(matches!(
            "columnar".parse::<LayoutKind>(),
            Err(FlatXmlError::Configuration(_))
        ));
    }

    #[test]
    fn unknown_layout_in_json_is_rejected() {
        let result = MarshalerConfig::from_json_str(r#"{"layout": "columnar"}"#);
        assert!(matches!(result, Err(FlatXmlError::Json(_))));
    }

    #[test]
    fn empty_json_gives_defaults() {
        let config = MarshalerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, MarshalerConfig::default());
    }

    #[test]
    fn output_encoding_falls_back_to_input_encoding() {
        let config = MarshalerConfig {
            encoding: Some("latin1".to_string()),
            ..MarshalerConfig::default()
        };
        assert_eq!(
            config.document_options().output_encoding.as_deref(),
            Some("latin1")
        );
    }

    #[test]
    fn layouts_require_their_settings() {
        for layout in [
            LayoutKind::Fixed,
            LayoutKind::Delimited,
            LayoutKind::Variable,
            LayoutKind::VariableCustom,
        ] {
            let config = MarshalerConfig {
                layout: Some(layout),
                ..MarshalerConfig::default()
            };
            assert!(matches!(
                config.column_extractor(None),
                Err(FlatXmlError::Configuration(_))
            ));
        }
    }

    #[test]
    fn names_header_line_must_be_a_header_line() {
        let config = MarshalerConfig {
            header_line_count: 1,
            names_from_header_line: Some(2),
            ..MarshalerConfig::default()
        };
        assert!(config.validate_header().is_err());

        let config = MarshalerConfig {
            names_from_header_line: Some(1),
            ..config
        };
        assert!(config.validate_header().is_ok());
    }
}
