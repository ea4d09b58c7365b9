use encoding_rs::Encoding;
use log::{debug, error};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::core::assembler::{DocumentOptions, SourceInfo, StreamingXmlAssembler};
use crate::core::converter::{ContentConverter, ConverterTable};
use crate::core::extractor::{ColumnExtractor, LineExtractor, VariableLayout};
use crate::core::line_source::{LineSource, parse_terminator};
use crate::core::resolve_encoding;
use crate::error::{FlatXmlError, Result};
use crate::marshal::config::{LayoutKind, MarshalerConfig};
use crate::marshal::unmarshaler::Unmarshaler;

/// Converts flat files into XML documents.
///
/// A `Marshaler` is built once from a [`MarshalerConfig`]; every setting is
/// checked at that point so that a misconfiguration is reported before any
/// byte is produced. It can then wrap any number of sources, each one
/// getting its own [`StreamingXmlAssembler`].
///
/// # Examples
///
/// ```
/// use flatxml::marshal::MarshalerBuilder;
/// use std::io::Read;
///
/// let marshaler = MarshalerBuilder::new()
///     .delimited(";")
///     .column_names(&["city", "country"])
///     .emit_column_numbers(false)
///     .build()
///     .unwrap();
///
/// let data = "Boston;United States\nLyon;France";
/// let mut xml = String::new();
/// marshaler
///     .wrap(data.as_bytes(), "/in/cities.csv")
///     .unwrap()
///     .read_to_string(&mut xml)
///     .unwrap();
///
/// assert!(xml.contains("<DocElement name=\"cities.csv\" location=\"/in/cities.csv\">"));
/// assert!(xml.contains("<city>Lyon</city>"));
/// assert!(xml.contains("<country>France</country>"));
/// ```
#[derive(Debug, Clone)]
pub struct Marshaler {
    config: MarshalerConfig,
    input_encoding: &'static Encoding,
    terminator: Option<char>,
    extractor: Option<ColumnExtractor>,
    converters: ConverterTable,
    options: DocumentOptions,
}

impl Marshaler {
    /// Creates a marshaler for a configuration without custom extractor.
    pub fn new(config: MarshalerConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Creates a marshaler whose `variable-custom` layout uses `extractor`.
    pub fn with_custom_extractor(
        config: MarshalerConfig,
        extractor: Arc<dyn LineExtractor + Send + Sync>,
    ) -> Result<Self> {
        Self::build(config, Some(extractor))
    }

    fn build(
        config: MarshalerConfig,
        custom: Option<Arc<dyn LineExtractor + Send + Sync>>,
    ) -> Result<Self> {
        let input_encoding = resolve_encoding(config.encoding.as_deref())?;
        let terminator = parse_terminator(config.line_terminator.as_deref())?;
        config.validate_header()?;
        let extractor = config.column_extractor(custom)?;
        let converters = config.converter_table();
        let options = config.document_options();

        // dry run over an empty source: checks names, encodings and layout
        StreamingXmlAssembler::new(
            LineSource::with_encoding(io::empty(), input_encoding, terminator),
            SourceInfo::default(),
            options.clone(),
            extractor.clone(),
            converters.clone(),
        )?;

        debug!(
            "Marshaler ready (layout: {:?}, input encoding: {})",
            config.layout,
            input_encoding.name()
        );

        Ok(Self {
            config,
            input_encoding,
            terminator,
            extractor,
            converters,
            options,
        })
    }

    pub fn config(&self) -> &MarshalerConfig {
        &self.config
    }

    /// Wraps a flat byte source as a lazy XML byte stream.
    ///
    /// `source_path` only feeds the `name` / `location` root attributes; the
    /// source itself is read from `reader`.
    pub fn wrap<R: Read, P: AsRef<Path>>(
        &self,
        reader: R,
        source_path: P,
    ) -> Result<StreamingXmlAssembler<R>> {
        let lines = LineSource::with_encoding(reader, self.input_encoding, self.terminator);
        StreamingXmlAssembler::new(
            lines,
            SourceInfo::from_path(source_path),
            self.options.clone(),
            self.extractor.clone(),
            self.converters.clone(),
        )
    }

    /// Opens `path` and wraps it.
    pub fn wrap_path<P: AsRef<Path>>(&self, path: P) -> Result<StreamingXmlAssembler<File>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            error!("Failed to open flat file {}: {}", path.display(), e);
            FlatXmlError::Io(e)
        })?;
        self.wrap(file, path)
    }

    /// Copies XML-shaped bytes back to a raw sink unchanged.
    ///
    /// Returns the number of bytes copied.
    pub fn copy<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let copied = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(copied)
    }

    /// Regenerates flat lines from a document produced by this marshaler.
    ///
    /// This is a best-effort inverse: each column goes through its
    /// converter's `to_flat`, then the line is laid out again according to
    /// the configured layout. Returns the number of lines written.
    ///
    /// # Examples
    ///
    /// ```
    /// use flatxml::marshal::MarshalerBuilder;
    /// use std::io::Read;
    ///
    /// let marshaler = MarshalerBuilder::new()
    ///     .fixed_width(&[2, 4])
    ///     .build()
    ///     .unwrap();
    ///
    /// let mut xml = Vec::new();
    /// marshaler
    ///     .wrap("ab1234\ncd5678".as_bytes(), "in.txt")
    ///     .unwrap()
    ///     .read_to_end(&mut xml)
    ///     .unwrap();
    ///
    /// let mut flat = Vec::new();
    /// let lines = marshaler.unmarshal(xml.as_slice(), &mut flat).unwrap();
    ///
    /// assert_eq!(lines, 2);
    /// assert_eq!(String::from_utf8(flat).unwrap(), "ab1234\ncd5678\n");
    /// ```
    pub fn unmarshal<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<u64> {
        Unmarshaler::new(
            self.extractor.as_ref(),
            &self.converters,
            &self.options,
            self.input_encoding,
            self.terminator,
        )
        .run(reader, writer)
    }
}

/// A builder for configuring a [`Marshaler`].
///
/// Starts from [`MarshalerConfig::default`]; each method sets one option.
///
/// # Examples
///
/// ```
/// use flatxml::core::converter::{ContentConverter, NumberConverter};
/// use flatxml::marshal::MarshalerBuilder;
///
/// let marshaler = MarshalerBuilder::new()
///     .fixed_width(&[3, 8])
///     .column_names(&["Id", "Amount"])
///     .converter(1, ContentConverter::Number(NumberConverter::default()))
///     .header_line_count(1)
///     .encoding("iso-8859-1")
///     .build();
///
/// assert!(marshaler.is_ok());
/// ```
#[derive(Default)]
pub struct MarshalerBuilder {
    config: MarshalerConfig,
    custom_extractor: Option<Arc<dyn LineExtractor + Send + Sync>>,
}

impl MarshalerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: MarshalerConfig) -> Self {
        Self {
            config,
            custom_extractor: None,
        }
    }

    /// Fixed-width layout with the given column widths.
    pub fn fixed_width(mut self, widths: &[usize]) -> Self {
        self.config.layout = Some(LayoutKind::Fixed);
        self.config.column_widths = widths.to_vec();
        self
    }

    /// Delimited layout split on `separator`.
    pub fn delimited(mut self, separator: &str) -> Self {
        self.config.layout = Some(LayoutKind::Delimited);
        self.config.separator = Some(separator.to_string());
        self
    }

    /// Variable fixed-width layout.
    pub fn variable_layout(mut self, layout: VariableLayout) -> Self {
        self.config.layout = Some(LayoutKind::Variable);
        self.config.variable_layout = Some(layout);
        self
    }

    /// Custom layout, split by `extractor`.
    pub fn custom_extractor(mut self, extractor: Arc<dyn LineExtractor + Send + Sync>) -> Self {
        self.config.layout = Some(LayoutKind::VariableCustom);
        self.custom_extractor = Some(extractor);
        self
    }

    pub fn layout(mut self, layout: Option<LayoutKind>) -> Self {
        self.config.layout = layout;
        self
    }

    pub fn column_names(mut self, names: &[&str]) -> Self {
        self.config.column_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Takes the column names from the given 1-based header line.
    pub fn names_from_header_line(mut self, line: usize) -> Self {
        self.config.names_from_header_line = Some(line);
        self
    }

    pub fn header_line_count(mut self, count: usize) -> Self {
        self.config.header_line_count = count;
        self
    }

    pub fn doc_element_name(mut self, name: &str) -> Self {
        self.config.doc_element_name = name.to_string();
        self
    }

    pub fn line_element_name(mut self, name: &str) -> Self {
        self.config.line_element_name = name.to_string();
        self
    }

    pub fn column_element_name(mut self, name: &str) -> Self {
        self.config.column_element_name = name.to_string();
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.config.namespace = Some(namespace.to_string());
        self
    }

    pub fn emit_xml_declaration(mut self, yes: bool) -> Self {
        self.config.emit_xml_declaration = yes;
        self
    }

    pub fn emit_line_numbers(mut self, yes: bool) -> Self {
        self.config.emit_line_numbers = yes;
        self
    }

    pub fn emit_column_numbers(mut self, yes: bool) -> Self {
        self.config.emit_column_numbers = yes;
        self
    }

    pub fn emit_raw_line(mut self, yes: bool) -> Self {
        self.config.emit_raw_line = yes;
        self
    }

    pub fn columns_as_attributes(mut self, yes: bool) -> Self {
        self.config.columns_as_attributes = yes;
        self
    }

    pub fn skip_empty_default_named_columns(mut self, yes: bool) -> Self {
        self.config.skip_empty_default_named_columns = yes;
        self
    }

    pub fn skip_any_empty_column(mut self, yes: bool) -> Self {
        self.config.skip_any_empty_column = yes;
        self
    }

    pub fn default_strip(mut self, yes: bool) -> Self {
        self.config.default_strip = yes;
        self
    }

    pub fn default_escape(mut self, yes: bool) -> Self {
        self.config.default_escape = yes;
        self
    }

    pub fn encoding(mut self, encoding: &str) -> Self {
        self.config.encoding = Some(encoding.to_string());
        self
    }

    pub fn output_encoding(mut self, encoding: &str) -> Self {
        self.config.output_encoding = Some(encoding.to_string());
        self
    }

    pub fn line_terminator(mut self, terminator: &str) -> Self {
        self.config.line_terminator = Some(terminator.to_string());
        self
    }

    /// Sets the converter of the 0-based column `index`.
    pub fn converter(mut self, index: usize, converter: ContentConverter) -> Self {
        if self.config.converters.len() <= index {
            self.config.converters.resize(index + 1, None);
        }
        self.config.converters[index] = Some(converter);
        self
    }

    pub fn converters(mut self, converters: Vec<Option<ContentConverter>>) -> Self {
        self.config.converters = converters;
        self
    }

    pub fn build(self) -> Result<Marshaler> {
        Marshaler::build(self.config, self.custom_extractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::Columns;

    struct Halves;

    impl LineExtractor for Halves {
        fn extract(&self, line: &str) -> Result<Option<Columns>> {
            let middle = line.len() / 2;
            Ok(Some(vec![
                Some(line[..middle].to_string()),
                Some(line[middle..].to_string()),
            ]))
        }
    }

    fn to_xml(marshaler: &Marshaler, data: &str) -> String {
        let mut xml = String::new();
        marshaler
            .wrap(data.as_bytes(), "/tmp/source.dat")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn builder_sets_layouts() {
        let marshaler = MarshalerBuilder::new().fixed_width(&[1, 2]).build().unwrap();
        assert_eq!(marshaler.config().layout, Some(LayoutKind::Fixed));
        assert_eq!(marshaler.config().column_widths, vec![1, 2]);

        let marshaler = MarshalerBuilder::new().delimited("|").build().unwrap();
        assert_eq!(marshaler.config().separator.as_deref(), Some("|"));
    }

    #[test]
    fn custom_extractor_is_used() {
        let marshaler = MarshalerBuilder::new()
            .custom_extractor(Arc::new(Halves))
            .emit_column_numbers(false)
            .build()
            .unwrap();
        let xml = to_xml(&marshaler, "abcd");
        assert!(xml.contains("<Col>ab</Col>"));
        assert!(xml.contains("<Col>cd</Col>"));
    }

    #[test]
    fn variable_custom_without_extractor_fails() {
        let result = MarshalerBuilder::new()
            .layout(Some(LayoutKind::VariableCustom))
            .build();
        assert!(matches!(result, Err(FlatXmlError::Configuration(_))));
    }

    #[test]
    fn construction_errors_are_eager() {
        let bad_encoding = MarshalerBuilder::new().encoding("ebcdic-xyz").build();
        assert!(matches!(bad_encoding, Err(FlatXmlError::Encoding(_))));

        let bad_output = MarshalerBuilder::new().output_encoding("nope").build();
        assert!(matches!(bad_output, Err(FlatXmlError::Encoding(_))));

        let bad_terminator = MarshalerBuilder::new().line_terminator("\r\n").build();
        assert!(matches!(bad_terminator, Err(FlatXmlError::Configuration(_))));

        let bad_name = MarshalerBuilder::new().doc_element_name("<doc>").build();
        assert!(matches!(bad_name, Err(FlatXmlError::Configuration(_))));

        let bad_separator = MarshalerBuilder::new().delimited("").build();
        assert!(matches!(bad_separator, Err(FlatXmlError::Configuration(_))));
    }

    #[test]
    fn converter_index_grows_table() {
        let marshaler = MarshalerBuilder::new()
            .delimited(",")
            .converter(2, ContentConverter::TextStrip)
            .build()
            .unwrap();
        assert_eq!(
            marshaler.config().converters,
            vec![None, None, Some(ContentConverter::TextStrip)]
        );
    }

    #[test]
    fn copy_is_a_pass_through() {
        let marshaler = MarshalerBuilder::new().build().unwrap();
        let input = b"<DocElement><Line>x</Line></DocElement>";
        let mut output = Vec::new();
        let copied = marshaler.copy(&input[..], &mut output).unwrap();
        assert_eq!(copied, input.len() as u64);
        assert_eq!(output, input);
    }

    #[test]
    fn custom_terminator_is_applied() {
        let marshaler = MarshalerBuilder::new()
            .line_terminator("#")
            .emit_line_numbers(false)
            .build()
            .unwrap();
        let xml = to_xml(&marshaler, "a\nb#c");
        assert!(xml.contains("<Line>a\nb</Line>"));
        assert!(xml.contains("<Line>c</Line>"));
    }
}
