use encoding_rs::{Encoding, UTF_8};
use log::{debug, error, trace};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event, attributes::Attribute},
    name::QName,
};
use std::borrow::Cow;
use std::collections::HashSet;
use std::io::{self, Read};
use std::path::Path;

use crate::core::converter::ConverterTable;
use crate::core::extractor::ColumnExtractor;
use crate::core::line_source::LineSource;
use crate::core::resolve_encoding;
use crate::error::{FlatXmlError, Result};

const INDENT: &[u8] = b"  ";

/// Position of the assembler in the document.
///
/// States only move forward, in declaration order, and are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Nothing produced yet; the next chunk is the prologue and root tag.
    Initial,
    /// Header lines are rendered as comments.
    Header,
    /// Each remaining line becomes one line element.
    Body,
    /// The next chunk closes the root element.
    Footer,
    /// End of stream.
    Done,
}

/// Identifies the flat file being converted.
///
/// `name` and `location` become attributes of the root element. The
/// surrounding transport uses `output_name` and `location` as message
/// metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub location: String,
}

impl SourceInfo {
    pub fn new(name: &str, location: &str) -> Self {
        Self {
            name: name.to_string(),
            location: location.to_string(),
        }
    }

    /// Derives the name from the last path component.
    ///
    /// # Examples
    ///
    /// ```
    /// use flatxml::core::assembler::SourceInfo;
    ///
    /// let source = SourceInfo::from_path("/data/in/orders.txt");
    /// assert_eq!(source.name, "orders.txt");
    /// assert_eq!(source.location, "/data/in/orders.txt");
    /// assert_eq!(source.output_name(), "orders.xml");
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let location = path.to_string_lossy().into_owned();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| location.clone());
        Self { name, location }
    }

    /// Name of the produced document: the source name with an `xml` extension.
    pub fn output_name(&self) -> String {
        Path::new(&self.name)
            .with_extension("xml")
            .to_string_lossy()
            .into_owned()
    }
}

/// Shape of the produced document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentOptions {
    pub doc_element_name: String,
    pub line_element_name: String,
    /// Element name of columns, also the default name of unnamed columns.
    pub column_element_name: String,
    pub namespace: Option<String>,
    pub emit_xml_declaration: bool,
    pub emit_line_numbers: bool,
    pub emit_column_numbers: bool,
    pub emit_raw_line: bool,
    pub columns_as_attributes: bool,
    /// Skip empty columns that have no configured name.
    pub skip_empty_default_named_columns: bool,
    /// Skip every empty column.
    pub skip_any_empty_column: bool,
    pub header_line_count: usize,
    /// 1-based header line providing the column names.
    pub names_from_header_line: Option<usize>,
    pub column_names: Vec<String>,
    /// Encoding label of the produced bytes (UTF-8 when unset).
    pub output_encoding: Option<String>,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            doc_element_name: "DocElement".to_string(),
            line_element_name: "Line".to_string(),
            column_element_name: "Col".to_string(),
            namespace: None,
            emit_xml_declaration: true,
            emit_line_numbers: true,
            emit_column_numbers: true,
            emit_raw_line: false,
            columns_as_attributes: false,
            skip_empty_default_named_columns: false,
            skip_any_empty_column: false,
            header_line_count: 0,
            names_from_header_line: None,
            column_names: Vec::new(),
            output_encoding: None,
        }
    }
}

/// Pull-based producer of an XML document from a [`LineSource`].
///
/// Each call to [`Iterator::next`] computes exactly one chunk of encoded
/// output: the prologue, one header comment, one line element or the root
/// close tag. Nothing is computed ahead of the consumer, so memory use is
/// bounded by the size of one rendered line whatever the size of the input.
///
/// The assembler also implements [`Read`]: it keeps a single pending chunk
/// and only pulls the next line once that chunk has been fully read.
///
/// Any error is returned once and ends the stream. I/O errors of the
/// underlying reader are passed through unchanged.
///
/// # Examples
///
/// ```
/// use flatxml::core::assembler::{DocumentOptions, SourceInfo, StreamingXmlAssembler};
/// use flatxml::core::converter::ConverterTable;
/// use flatxml::core::extractor::ColumnExtractor;
/// use flatxml::core::line_source::LineSource;
/// use std::io::Read;
///
/// let lines = LineSource::new("ab123\ncd456".as_bytes(), None, None).unwrap();
/// let mut assembler = StreamingXmlAssembler::new(
///     lines,
///     SourceInfo::from_path("/tmp/in.txt"),
///     DocumentOptions::default(),
///     Some(ColumnExtractor::FixedWidth { widths: vec![2, 3] }),
///     ConverterTable::new(Vec::new(), false, true),
/// )
/// .unwrap();
///
/// let mut xml = String::new();
/// assembler.read_to_string(&mut xml).unwrap();
///
/// assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
/// assert!(xml.contains("<Col number=\"2\">456</Col>"));
/// assert!(xml.ends_with("</DocElement>"));
/// ```
pub struct StreamingXmlAssembler<R> {
    lines: LineSource<R>,
    extractor: Option<ColumnExtractor>,
    converters: ConverterTable,
    options: DocumentOptions,
    column_names: Vec<Option<String>>,
    source: SourceInfo,
    output_encoding: &'static Encoding,
    state: State,
    header_lines: usize,
    line_number: u64,
    pending: Vec<u8>,
    cursor: usize,
}

impl<R: Read> StreamingXmlAssembler<R> {
    /// Creates an assembler for one source.
    ///
    /// # Errors
    ///
    /// Fails before producing anything if the output encoding is unknown, an
    /// element name is not a valid XML name, or the extractor / converters
    /// are misconfigured.
    pub fn new(
        lines: LineSource<R>,
        source: SourceInfo,
        options: DocumentOptions,
        extractor: Option<ColumnExtractor>,
        converters: ConverterTable,
    ) -> Result<Self> {
        let output_encoding =
            resolve_encoding(options.output_encoding.as_deref())?.output_encoding();

        for name in [
            &options.doc_element_name,
            &options.line_element_name,
            &options.column_element_name,
        ] {
            if !is_element_name(name) {
                return Err(FlatXmlError::Configuration(format!(
                    "{:?} is not a valid XML element name",
                    name
                )));
            }
        }

        if let Some(extractor) = &extractor {
            extractor.validate()?;
        }
        converters.validate()?;

        let column_names: Vec<Option<String>> = options
            .column_names
            .iter()
            .map(|name| xml_name(name))
            .collect();
        if options.columns_as_attributes {
            check_attribute_names(&column_names, &options)?;
        }

        debug!(
            "Assembler created for {} (layout: {:?}, output encoding: {})",
            source.location,
            extractor,
            output_encoding.name()
        );

        Ok(Self {
            lines,
            extractor,
            converters,
            options,
            column_names,
            source,
            output_encoding,
            state: State::Initial,
            header_lines: 0,
            line_number: 0,
            pending: Vec::new(),
            cursor: 0,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Number of body lines produced so far.
    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn source(&self) -> &SourceInfo {
        &self.source
    }

    pub fn output_encoding(&self) -> &'static Encoding {
        self.output_encoding
    }

    fn transition(&mut self, next: State) {
        debug!("{}: {:?} -> {:?}", self.source.name, self.state, next);
        self.state = next;
    }

    /// Runs one state step. `None` means the step produced no chunk and the
    /// state machine must be stepped again.
    fn step(&mut self) -> Option<Result<Vec<u8>>> {
        match self.state {
            State::Initial => {
                self.transition(State::Header);
                Some(self.render_prologue())
            }
            State::Header => {
                if self.header_lines >= self.options.header_line_count {
                    self.transition(State::Body);
                    return None;
                }
                match self.lines.next() {
                    None => {
                        self.transition(State::Body);
                        None
                    }
                    Some(Err(e)) => Some(Err(e)),
                    Some(Ok(line)) => Some(self.render_header(&line)),
                }
            }
            State::Body => match self.lines.next() {
                None => {
                    self.transition(State::Footer);
                    None
                }
                Some(Err(e)) => Some(Err(e)),
                Some(Ok(line)) => {
                    self.line_number += 1;
                    trace!("{}: line {}", self.source.name, self.line_number);
                    Some(self.render_line(&line))
                }
            },
            State::Footer => {
                self.transition(State::Done);
                Some(self.render_footer())
            }
            State::Done => Some(Ok(Vec::new())),
        }
    }

    fn render_prologue(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());

        if self.options.emit_xml_declaration {
            write(
                &mut writer,
                Event::Decl(BytesDecl::new(
                    "1.0",
                    Some(self.output_encoding.name()),
                    None,
                )),
            )?;
            writer.get_mut().push(b'\n');
        }

        let mut root = BytesStart::new(self.options.doc_element_name.as_str());
        root.push_attribute(("name", self.source.name.as_str()));
        root.push_attribute(("location", self.source.location.as_str()));
        if let Some(namespace) = &self.options.namespace {
            root.push_attribute(("xmlns", namespace.as_str()));
        }
        write(&mut writer, Event::Start(root))?;
        writer.get_mut().push(b'\n');

        self.encode(writer.into_inner())
    }

    fn render_header(&mut self, line: &str) -> Result<Vec<u8>> {
        self.header_lines += 1;
        if self.options.names_from_header_line == Some(self.header_lines) {
            self.capture_column_names(line)?;
        }

        let mut writer = Writer::new(Vec::new());
        writer.get_mut().extend_from_slice(INDENT);
        write(
            &mut writer,
            Event::Comment(BytesText::from_escaped(comment_text(line))),
        )?;
        writer.get_mut().push(b'\n');

        self.encode(writer.into_inner())
    }

    fn capture_column_names(&mut self, line: &str) -> Result<()> {
        let Some(extractor) = &self.extractor else {
            debug!("No layout configured, header line {} ignored for names", self.header_lines);
            return Ok(());
        };

        let names = extractor.extract(line)?.unwrap_or_default();
        self.column_names = names
            .iter()
            .map(|name| name.as_deref().and_then(xml_name))
            .collect();

        debug!(
            "Column names taken from header line {}: {:?}",
            self.header_lines, self.column_names
        );
        Ok(())
    }

    fn render_line(&self, line: &str) -> Result<Vec<u8>> {
        let line_tag = self.options.line_element_name.as_str();
        let mut element = BytesStart::new(line_tag);
        if self.options.emit_line_numbers {
            element.push_attribute(("number", self.line_number.to_string().as_str()));
        }
        if self.options.emit_raw_line {
            element.push_attribute(("raw", line));
        }

        let mut writer = Writer::new(Vec::new());
        writer.get_mut().extend_from_slice(INDENT);

        match &self.extractor {
            None if line.is_empty() => write(&mut writer, Event::Empty(element))?,
            None => {
                write(&mut writer, Event::Start(element))?;
                write(&mut writer, Event::Text(BytesText::new(line)))?;
                write(&mut writer, Event::End(BytesEnd::new(line_tag)))?;
            }
            Some(extractor) => {
                let columns = self.render_columns(extractor.extract(line)?.unwrap_or_default());

                if self.options.columns_as_attributes {
                    for column in &columns {
                        element.push_attribute(Attribute {
                            key: QName(column.name.as_bytes()),
                            value: Cow::Borrowed(column.value.as_bytes()),
                        });
                    }
                    write(&mut writer, Event::Empty(element))?;
                } else if columns.is_empty() {
                    write(&mut writer, Event::Empty(element))?;
                } else {
                    write(&mut writer, Event::Start(element))?;
                    writer.get_mut().push(b'\n');
                    for column in &columns {
                        self.write_column(&mut writer, column)?;
                    }
                    writer.get_mut().extend_from_slice(INDENT);
                    write(&mut writer, Event::End(BytesEnd::new(line_tag)))?;
                }
            }
        }
        writer.get_mut().push(b'\n');

        self.encode(writer.into_inner())
    }

    /// Converts the columns and drops the unset and skipped ones.
    fn render_columns(&self, columns: Vec<Option<String>>) -> Vec<RenderedColumn<'_>> {
        let mut rendered: Vec<RenderedColumn<'_>> = columns
            .iter()
            .enumerate()
            .filter_map(|(index, column)| {
                let value = self.converters.to_xml(index, column.as_deref())?;
                let configured = self.column_names.get(index).and_then(Option::as_deref);

                if value.is_empty()
                    && (self.options.skip_any_empty_column
                        || (self.options.skip_empty_default_named_columns && configured.is_none()))
                {
                    trace!("Skipping empty column {}", index + 1);
                    return None;
                }

                let name = match configured {
                    Some(name) => Cow::Borrowed(name),
                    None if self.options.columns_as_attributes => Cow::Owned(format!(
                        "{}{}",
                        self.options.column_element_name,
                        index + 1
                    )),
                    None => Cow::Borrowed(self.options.column_element_name.as_str()),
                };

                Some(RenderedColumn {
                    number: index + 1,
                    name,
                    value,
                })
            })
            .collect();

        if self.options.columns_as_attributes {
            self.dedupe_attribute_names(&mut rendered);
        }
        rendered
    }

    /// Renames columns whose attribute name is already taken on the line
    /// element: first to `<column element><n>`, then with a `_<k>` suffix.
    fn dedupe_attribute_names(&self, columns: &mut [RenderedColumn<'_>]) {
        let mut used: HashSet<String> = HashSet::new();
        if self.options.emit_line_numbers {
            used.insert("number".to_string());
        }
        if self.options.emit_raw_line {
            used.insert("raw".to_string());
        }

        for column in columns.iter_mut() {
            if used.contains(column.name.as_ref()) || column.name.starts_with("xmlns") {
                let generated = format!("{}{}", self.options.column_element_name, column.number);
                let mut name = generated.clone();
                let mut suffix = 2;
                while used.contains(&name) {
                    name = format!("{}_{}", generated, suffix);
                    suffix += 1;
                }
                trace!(
                    "Attribute {:?} already used on line {}, column {} renamed {:?}",
                    column.name, self.line_number, column.number, name
                );
                column.name = Cow::Owned(name);
            }
            used.insert(column.name.to_string());
        }
    }

    fn write_column(&self, writer: &mut Writer<Vec<u8>>, column: &RenderedColumn<'_>) -> Result<()> {
        writer.get_mut().extend_from_slice(INDENT);
        writer.get_mut().extend_from_slice(INDENT);

        let mut element = BytesStart::new(column.name.as_ref());
        if self.options.emit_column_numbers {
            element.push_attribute(("number", column.number.to_string().as_str()));
        }

        if column.value.is_empty() {
            write(writer, Event::Empty(element))?;
        } else {
            write(writer, Event::Start(element))?;
            write(writer, Event::Text(BytesText::from_escaped(column.value.as_str())))?;
            write(writer, Event::End(BytesEnd::new(column.name.as_ref())))?;
        }
        writer.get_mut().push(b'\n');
        Ok(())
    }

    fn render_footer(&self) -> Result<Vec<u8>> {
        let mut writer = Writer::new(Vec::new());
        write(
            &mut writer,
            Event::End(BytesEnd::new(self.options.doc_element_name.as_str())),
        )?;
        self.encode(writer.into_inner())
    }

    fn encode(&self, xml: Vec<u8>) -> Result<Vec<u8>> {
        if self.output_encoding == UTF_8 {
            return Ok(xml);
        }

        let text = String::from_utf8(xml).map_err(|e| FlatXmlError::Xml(e.to_string()))?;
        let (bytes, _, unmappable) = self.output_encoding.encode(&text);
        if unmappable {
            trace!(
                "Characters not representable in {} written as character references",
                self.output_encoding.name()
            );
        }
        Ok(bytes.into_owned())
    }
}

impl<R: Read> Iterator for StreamingXmlAssembler<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state == State::Done {
                return None;
            }

            match self.step() {
                None => continue,
                Some(Ok(chunk)) => return Some(Ok(chunk)),
                Some(Err(e)) => {
                    error!(
                        "{}: conversion aborted after line {}: {}",
                        self.source.name, self.line_number, e
                    );
                    self.transition(State::Done);
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<R: Read> Read for StreamingXmlAssembler<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.cursor == self.pending.len() {
            match self.next() {
                None => return Ok(0),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(chunk)) => {
                    self.pending = chunk;
                    self.cursor = 0;
                }
            }
        }

        let available = &self.pending[self.cursor..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.cursor += count;
        Ok(count)
    }
}

struct RenderedColumn<'a> {
    number: usize,
    name: Cow<'a, str>,
    value: String,
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| FlatXmlError::Xml(format!("Failed to write XML event: {}", e)))
}

/// Comment body with `--` sequences broken up, padded with spaces.
fn comment_text(line: &str) -> String {
    let mut text = String::with_capacity(line.len() + 2);
    text.push(' ');
    let mut previous = None;
    for c in line.chars() {
        if c == '-' && previous == Some('-') {
            text.push(' ');
        }
        text.push(c);
        previous = Some(c);
    }
    text.push(' ');
    text
}

/// Turns arbitrary text into a usable XML name, `None` when blank.
///
/// Characters outside the XML name ranges become `_`, and a name that
/// cannot start as is gets a leading `_`. Colons are replaced too, so the
/// result never carries a namespace prefix.
pub(crate) fn xml_name(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut name: String = raw
        .chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect();
    if !name.starts_with(is_name_start_char) {
        name.insert(0, '_');
    }
    Some(name)
}

fn is_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_name_start_char(first) => chars.all(is_name_char),
        _ => false,
    }
}

/// XML 1.0 `NameStartChar`, without `:`.
fn is_name_start_char(c: char) -> bool {
    matches!(c,
        'A'..='Z'
        | '_'
        | 'a'..='z'
        | '\u{C0}'..='\u{D6}'
        | '\u{D8}'..='\u{F6}'
        | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}'
        | '\u{37F}'..='\u{1FFF}'
        | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}'
        | '\u{2C00}'..='\u{2FEF}'
        | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}'
        | '\u{FDF0}'..='\u{FFFD}'
        | '\u{10000}'..='\u{EFFFF}')
}

/// XML 1.0 `NameChar`, without `:`.
fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

/// Configured names must not clash with each other or with the line
/// attributes once columns are written as attributes.
fn check_attribute_names(names: &[Option<String>], options: &DocumentOptions) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names.iter().flatten() {
        let reserved = (options.emit_line_numbers && name == "number")
            || (options.emit_raw_line && name == "raw")
            || name.starts_with("xmlns");
        if reserved || !seen.insert(name.as_str()) {
            return Err(FlatXmlError::Configuration(format!(
                "column name {:?} cannot be used as a line attribute",
                name
            )));
        }
    }
    Ok(())
}
