use encoding_rs::{Decoder, Encoding};
use log::{debug, trace};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader as XmlReader;
use std::collections::BTreeMap;
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::str;

use crate::core::assembler::{DocumentOptions, xml_name};
use crate::core::converter::ConverterTable;
use crate::core::extractor::ColumnExtractor;
use crate::core::resolve_encoding;
use crate::error::{FlatXmlError, Result};

/// Writes flat lines back from an XML document produced by the assembler.
///
/// Header comments become header lines and every line element becomes one
/// flat line. Columns are located by their `number` attribute, their name
/// or, failing both, their position.
pub struct Unmarshaler<'a> {
    extractor: Option<&'a ColumnExtractor>,
    converters: &'a ConverterTable,
    options: &'a DocumentOptions,
    encoding: &'static Encoding,
    terminator: String,
    column_names: Vec<Option<String>>,
}

/// Raw (still escaped) content gathered for one line element.
#[derive(Default)]
struct LineContent {
    text: String,
    columns: BTreeMap<usize, String>,
    next_position: usize,
}

impl LineContent {
    fn add_column(&mut self, index: Option<usize>, raw: String) {
        let index = index.unwrap_or(self.next_position);
        self.next_position = index + 1;
        self.columns.insert(index, raw);
    }
}

/// A column element being read.
struct ColumnContent {
    index: Option<usize>,
    raw: String,
}

impl<'a> Unmarshaler<'a> {
    pub fn new(
        extractor: Option<&'a ColumnExtractor>,
        converters: &'a ConverterTable,
        options: &'a DocumentOptions,
        encoding: &'static Encoding,
        terminator: Option<char>,
    ) -> Self {
        Self {
            extractor,
            converters,
            options,
            encoding,
            terminator: terminator.unwrap_or('\n').to_string(),
            column_names: options.column_names.iter().map(|n| xml_name(n)).collect(),
        }
    }

    /// Reads the whole document from `reader` and writes the flat lines.
    ///
    /// Returns the number of lines written.
    pub fn run<R: Read, W: Write>(&self, reader: R, mut writer: W) -> Result<u64> {
        let document_encoding =
            resolve_encoding(self.options.output_encoding.as_deref())?.output_encoding();
        let reader = Utf8Reader::new(reader, document_encoding);
        let mut xml = XmlReader::from_reader(BufReader::new(reader));
        let mut buffer = Vec::with_capacity(1024);
        let line_tag = self.options.line_element_name.as_bytes();

        let mut line: Option<LineContent> = None;
        let mut column: Option<ColumnContent> = None;
        let mut written = 0u64;

        loop {
            buffer.clear();
            let event = xml
                .read_event_into(&mut buffer)
                .map_err(|e| FlatXmlError::Xml(format!("XML parsing error: {}", e)))?;

            match event {
                Event::Comment(ref comment) if line.is_none() => {
                    let text = utf8(comment.as_ref())?;
                    let text = text.strip_prefix(' ').unwrap_or(text);
                    let text = text.strip_suffix(' ').unwrap_or(text);
                    self.write_line(&mut writer, text)?;
                    written += 1;
                }
                Event::Start(ref start) => match line.as_mut() {
                    None if start.local_name().as_ref() == line_tag => {
                        line = Some(self.open_line(start)?);
                    }
                    None => {}
                    Some(_) => {
                        column = Some(ColumnContent {
                            index: self.column_index(start)?,
                            raw: String::new(),
                        });
                    }
                },
                Event::Empty(ref empty) => match line.as_mut() {
                    None if empty.local_name().as_ref() == line_tag => {
                        let content = self.open_line(empty)?;
                        self.write_line(&mut writer, &self.flat_line(content)?)?;
                        written += 1;
                    }
                    None => {}
                    Some(content) => {
                        content.add_column(self.column_index(empty)?, String::new());
                    }
                },
                Event::Text(ref text) => {
                    let raw = utf8(text.as_ref())?;
                    if let Some(column) = column.as_mut() {
                        column.raw.push_str(raw);
                    } else if let Some(content) = line.as_mut() {
                        content.text.push_str(raw);
                    }
                }
                Event::GeneralRef(ref reference) => {
                    let raw = format!("&{};", utf8(reference.as_ref())?);
                    if let Some(column) = column.as_mut() {
                        column.raw.push_str(&raw);
                    } else if let Some(content) = line.as_mut() {
                        content.text.push_str(&raw);
                    }
                }
                Event::CData(ref cdata) => {
                    let raw = quick_xml::escape::escape(utf8(cdata.as_ref())?).into_owned();
                    if let Some(column) = column.as_mut() {
                        column.raw.push_str(&raw);
                    } else if let Some(content) = line.as_mut() {
                        content.text.push_str(&raw);
                    }
                }
                Event::End(ref end) => {
                    if let Some(finished) = column.take() {
                        if let Some(content) = line.as_mut() {
                            content.add_column(finished.index, finished.raw);
                        }
                    } else if line.is_some() && end.local_name().as_ref() == line_tag {
                        if let Some(content) = line.take() {
                            self.write_line(&mut writer, &self.flat_line(content)?)?;
                            written += 1;
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        writer.flush()?;
        debug!("{} flat lines written", written);
        Ok(written)
    }

    /// Collects the column attributes of a line element.
    fn open_line(&self, start: &BytesStart<'_>) -> Result<LineContent> {
        let mut content = LineContent::default();

        for attribute in start.attributes().flatten() {
            let key = utf8(attribute.key.as_ref())?;
            if key == "number" || key == "raw" || key.starts_with("xmlns") {
                continue;
            }
            let index = self.index_for_name(key);
            content.add_column(index, utf8(attribute.value.as_ref())?.to_string());
        }

        Ok(content)
    }

    fn column_index(&self, start: &BytesStart<'_>) -> Result<Option<usize>> {
        for attribute in start.attributes().flatten() {
            if attribute.key.as_ref() == b"number" {
                let number = utf8(attribute.value.as_ref())?;
                if let Ok(number) = number.trim().parse::<usize>() {
                    if number > 0 {
                        return Ok(Some(number - 1));
                    }
                }
            }
        }
        let name = start.local_name();
        Ok(self.index_for_name(utf8(name.as_ref())?))
    }

    /// Index of a column from its configured name or its default `<Col><n>` name.
    fn index_for_name(&self, name: &str) -> Option<usize> {
        if let Some(index) = self
            .column_names
            .iter()
            .position(|configured| configured.as_deref() == Some(name))
        {
            return Some(index);
        }

        name.strip_prefix(self.options.column_element_name.as_str())
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(|n| n - 1)
    }

    fn flat_line(&self, content: LineContent) -> Result<String> {
        if content.columns.is_empty() {
            return unescaped(&content.text);
        }

        let count = content.columns.keys().next_back().map_or(0, |last| last + 1);
        let mut values = Vec::with_capacity(count);
        for index in 0..count {
            let raw = match content.columns.get(&index) {
                Some(raw) => Some(unescaped(raw)?),
                None => None,
            };
            let value = self
                .converters
                .to_flat(index, raw.as_deref())
                .unwrap_or_default();
            values.push(value);
        }

        trace!("Regenerated columns: {:?}", values);

        let line = match self.extractor {
            Some(ColumnExtractor::Delimited { separator }) => values.join(separator),
            Some(ColumnExtractor::FixedWidth { widths }) => {
                let widths: Vec<Option<usize>> = widths.iter().map(|w| Some(*w)).collect();
                lay_out(&values, &widths)
            }
            Some(ColumnExtractor::VariableFixedWidth(layout)) => {
                let mut widths: Vec<Option<usize>> =
                    layout.prefix_widths.iter().map(|w| Some(*w)).collect();
                let suffix = values
                    .get(layout.discriminator_index)
                    .and_then(|value| layout.suffix_widths(value));
                if let Some(suffix) = suffix {
                    widths.extend(suffix.iter().map(|w| usize::try_from(*w).ok()));
                }
                lay_out(&values, &widths)
            }
            Some(ColumnExtractor::Custom(_)) | None => values.concat(),
        };

        Ok(line)
    }

    fn write_line<W: Write>(&self, writer: &mut W, line: &str) -> Result<()> {
        let mut text = String::with_capacity(line.len() + self.terminator.len());
        text.push_str(line);
        text.push_str(&self.terminator);

        let (bytes, _, _) = self.encoding.encode(&text);
        writer.write_all(&bytes)?;
        Ok(())
    }
}

/// Re-encodes a document written in any supported encoding as UTF-8.
struct Utf8Reader<R> {
    reader: R,
    decoder: Decoder,
    input: Vec<u8>,
    output: Vec<u8>,
    position: usize,
    eof: bool,
}

impl<R: Read> Utf8Reader<R> {
    fn new(reader: R, encoding: &'static Encoding) -> Self {
        Self {
            reader,
            decoder: encoding.new_decoder_with_bom_removal(),
            input: vec![0; 8 * 1024],
            output: Vec::new(),
            position: 0,
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let read = loop {
            match self.reader.read(&mut self.input) {
                Ok(read) => break read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        let last = read == 0;

        let needed = self
            .decoder
            .max_utf8_buffer_length(read)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "decoded block too large"))?;
        self.output.resize(needed, 0);
        let (_, _, written, _) =
            self.decoder
                .decode_to_utf8(&self.input[..read], &mut self.output, last);
        self.output.truncate(written);
        self.position = 0;

        if last {
            self.eof = true;
        }
        Ok(())
    }
}

impl<R: Read> Read for Utf8Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position == self.output.len() {
            if self.eof || buf.is_empty() {
                return Ok(0);
            }
            self.fill()?;
        }

        let available = &self.output[self.position..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }
}

/// Pads or truncates each value to its width. `None` widths are absent
/// columns; values past the known widths are appended as is.
fn lay_out(values: &[String], widths: &[Option<usize>]) -> String {
    let mut line = String::new();
    for (index, value) in values.iter().enumerate() {
        match widths.get(index) {
            Some(Some(width)) => {
                let length = value.chars().count();
                if length >= *width {
                    line.extend(value.chars().take(*width));
                } else {
                    line.push_str(value);
                    line.extend(std::iter::repeat_n(' ', width - length));
                }
            }
            Some(None) => {}
            None => line.push_str(value),
        }
    }
    line
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    str::from_utf8(bytes).map_err(|e| FlatXmlError::Xml(format!("Invalid UTF-8 in XML: {}", e)))
}

fn unescaped(raw: &str) -> Result<String> {
    unescape(raw)
        .map(|text| text.into_owned())
        .map_err(|e| FlatXmlError::Xml(format!("Invalid XML escape: {}", e)))
}
