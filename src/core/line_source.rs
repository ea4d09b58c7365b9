use encoding_rs::{CoderResult, Decoder, Encoding};
use log::debug;
use std::io::{ErrorKind, Read};

use crate::core::resolve_encoding;
use crate::error::{FlatXmlError, Result};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A lazy, forward-only sequence of text lines decoded from a byte stream.
///
/// The source reads the underlying stream in fixed-size blocks and decodes
/// them incrementally, so only the current line plus one block of decoded
/// text is ever held in memory. It cannot be restarted: once the stream is
/// exhausted (or has failed) every further call to `next` returns `None`.
///
/// # Line splitting
///
/// - Without a custom terminator, `\n`, `\r\n` and a lone `\r` each end a line.
/// - With a custom terminator, only that character ends a line.
///
/// Text following the last terminator is returned as a final line; a stream
/// ending with a terminator yields no extra empty line.
///
/// # Examples
///
/// ```
/// use flatxml::core::line_source::LineSource;
///
/// let data = "first\r\nsecond\nthird";
/// let lines = LineSource::new(data.as_bytes(), None, None)
///     .unwrap()
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
///
/// assert_eq!(lines, vec!["first", "second", "third"]);
/// ```
///
/// With a custom terminator:
///
/// ```
/// use flatxml::core::line_source::LineSource;
///
/// let data = "a\nb|c|";
/// let lines = LineSource::new(data.as_bytes(), Some("utf-8"), Some("|"))
///     .unwrap()
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
///
/// assert_eq!(lines, vec!["a\nb", "c"]);
/// ```
pub struct LineSource<R> {
    reader: R,
    decoder: Decoder,
    encoding: &'static Encoding,
    buffer: Vec<u8>,
    decoded: String,
    /// Offset in `decoded` up to which no terminator was found.
    scanned: usize,
    terminator: Option<char>,
    eof: bool,
    failed: bool,
}

impl<R: Read> LineSource<R> {
    /// Creates a line source over `reader`.
    ///
    /// # Errors
    ///
    /// - [`FlatXmlError::Encoding`] if `encoding` is not a known label.
    /// - [`FlatXmlError::Configuration`] if `terminator` is not exactly one character.
    pub fn new(reader: R, encoding: Option<&str>, terminator: Option<&str>) -> Result<Self> {
        let encoding = resolve_encoding(encoding)?;
        let terminator = parse_terminator(terminator)?;

        debug!(
            "Line source created (encoding: {}, terminator: {:?})",
            encoding.name(),
            terminator
        );

        Ok(Self::with_encoding(reader, encoding, terminator))
    }

    pub(crate) fn with_encoding(
        reader: R,
        encoding: &'static Encoding,
        terminator: Option<char>,
    ) -> Self {
        Self {
            reader,
            decoder: encoding.new_decoder_with_bom_removal(),
            encoding,
            buffer: vec![0; READ_BUFFER_SIZE],
            decoded: String::new(),
            scanned: 0,
            terminator,
            eof: false,
            failed: false,
        }
    }

    /// The encoding used to decode the stream.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Reads one block from the stream and appends its decoded text.
    fn fill(&mut self) -> Result<()> {
        let read = loop {
            match self.reader.read(&mut self.buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FlatXmlError::Io(e)),
            }
        };

        let last = read == 0;
        let mut input = &self.buffer[..read];
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len() * 3 + 16);
            self.decoded.reserve(needed);

            let (result, consumed, _) =
                self.decoder
                    .decode_to_string(input, &mut self.decoded, last);
            input = &input[consumed..];

            if let CoderResult::InputEmpty = result {
                break;
            }
        }

        if last {
            self.eof = true;
        }
        Ok(())
    }

    /// Returns the byte range `(line_end, next_line_start)` of the first
    /// complete line in the decoded backlog, if any.
    ///
    /// The search resumes where the previous unsuccessful one stopped, so a
    /// line spanning many blocks is scanned once.
    fn line_bounds(&mut self) -> Option<(usize, usize)> {
        let start = self.scanned;
        let (bounds, resume) = match self.terminator {
            Some(t) => match self.decoded[start..].find(t) {
                Some(i) => (Some((start + i, start + i + t.len_utf8())), 0),
                None => (None, self.decoded.len()),
            },
            None => match self.decoded[start..].find(|c| c == '\n' || c == '\r') {
                None => (None, self.decoded.len()),
                Some(i) => {
                    let i = start + i;
                    let bytes = self.decoded.as_bytes();
                    if bytes[i] == b'\n' {
                        (Some((i, i + 1)), 0)
                    } else {
                        match bytes.get(i + 1) {
                            Some(b'\n') => (Some((i, i + 2)), 0),
                            Some(_) => (Some((i, i + 1)), 0),
                            None if self.eof => (Some((i, i + 1)), 0),
                            // a trailing '\r' may be the first half of "\r\n"
                            None => (None, i),
                        }
                    }
                }
            },
        };
        self.scanned = resume;
        bounds
    }
}

impl<R: Read> Iterator for LineSource<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if let Some((end, next_start)) = self.line_bounds() {
                let line = self.decoded[..end].to_string();
                self.decoded.drain(..next_start);
                return Some(Ok(line));
            }

            if self.eof {
                if self.decoded.is_empty() {
                    return None;
                }
                self.scanned = 0;
                return Some(Ok(std::mem::take(&mut self.decoded)));
            }

            if let Err(error) = self.fill() {
                self.failed = true;
                return Some(Err(error));
            }
        }
    }
}

/// Validates a custom line terminator: it must be exactly one character.
pub fn parse_terminator(terminator: Option<&str>) -> Result<Option<char>> {
    let Some(terminator) = terminator else {
        return Ok(None);
    };

    let mut chars = terminator.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Some(c)),
        _ => Err(FlatXmlError::Configuration(format!(
            "line terminator must be a single character, got {:?}",
            terminator
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::time::{Duration, Instant};

    fn collect(data: &[u8], encoding: Option<&str>, terminator: Option<&str>) -> Vec<String> {
        LineSource::new(data, encoding, terminator)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn should_split_on_standard_line_endings() {
        let lines = collect(b"a\nb\r\nc\rd", None, None);
        assert_eq!(lines, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn should_not_yield_trailing_empty_line() {
        assert_eq!(collect(b"a\nb\n", None, None), vec!["a", "b"]);
        assert_eq!(collect(b"a\r", None, None), vec!["a"]);
    }

    #[test]
    fn should_keep_empty_lines_in_the_middle() {
        assert_eq!(collect(b"a\n\nb", None, None), vec!["a", "", "b"]);
    }

    #[test]
    fn should_yield_nothing_for_empty_stream() {
        assert!(collect(b"", None, None).is_empty());
    }

    #[test]
    fn should_only_split_on_custom_terminator() {
        let lines = collect(b"a\r\nb;c;", None, Some(";"));
        assert_eq!(lines, vec!["a\r\nb", "c"]);
    }

    #[test]
    fn should_reject_multi_character_terminator() {
        let result = LineSource::new(&b""[..], None, Some("\r\n"));
        assert!(matches!(result, Err(FlatXmlError::Configuration(_))));

        let result = LineSource::new(&b""[..], None, Some(""));
        assert!(matches!(result, Err(FlatXmlError::Configuration(_))));
    }

    #[test]
    fn should_reject_unknown_encoding() {
        let result = LineSource::new(&b""[..], Some("not-an-encoding"), None);
        assert!(matches!(result, Err(FlatXmlError::Encoding(_))));
    }

    #[test]
    fn should_decode_latin1() {
        let lines = collect(b"caf\xe9\nna\xefve", Some("iso-8859-1"), None);
        assert_eq!(lines, vec!["café", "naïve"]);
    }

    #[test]
    fn should_decode_utf16_with_bom() {
        let mut data = vec![0xFF, 0xFE];
        for unit in "ab\ncd".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(collect(&data, Some("utf-16le"), None), vec!["ab", "cd"]);
    }

    #[test]
    fn should_handle_crlf_split_across_blocks() {
        let mut data = vec![b'x'; READ_BUFFER_SIZE - 1];
        data.extend_from_slice(b"\r\nnext");
        let lines = collect(&data, None, None);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), READ_BUFFER_SIZE - 1);
        assert_eq!(lines[1], "next");
    }

    #[test]
    fn should_handle_lines_longer_than_buffer() {
        let long = "y".repeat(READ_BUFFER_SIZE * 3 + 7);
        let data = format!("{}\nshort", long);
        let lines = collect(data.as_bytes(), None, None);
        assert_eq!(lines, vec![long, "short".to_string()]);
    }

    #[test]
    fn should_split_multi_megabyte_line_in_linear_time() {
        let size = 8 * 1024 * 1024;
        let mut data = vec![b'x'; size];
        data.extend_from_slice(b"\r\nend");

        let started = Instant::now();
        let lines = LineSource::new(&data[..], None, None)
            .unwrap()
            .map(|line| line.unwrap().len())
            .collect::<Vec<_>>();

        assert_eq!(lines, vec![size, 3]);
        assert!(
            started.elapsed() < Duration::from_secs(20),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn should_split_long_line_on_custom_terminator() {
        let long = "z".repeat(READ_BUFFER_SIZE * 64);
        let data = format!("{}|b|", long);
        let lines = collect(data.as_bytes(), None, Some("|"));
        assert_eq!(lines, vec![long, "b".to_string()]);
    }

    #[test]
    fn should_pair_carriage_return_split_across_blocks() {
        let mut data = "c".repeat(READ_BUFFER_SIZE - 1);
        data.push_str("\r\nnext");
        let lines = collect(data.as_bytes(), None, None);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "next");
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "source went away"));
            }
            self.served = true;
            let data = b"partial";
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }
    }

    #[test]
    fn should_propagate_io_error_then_stop() {
        let mut source = LineSource::new(FailingReader { served: false }, None, None).unwrap();

        match source.next() {
            Some(Err(FlatXmlError::Io(e))) => assert_eq!(e.kind(), ErrorKind::BrokenPipe),
            other => panic!("expected I/O error, got {:?}", other.map(|r| r.is_ok())),
        }
        assert!(source.next().is_none());
    }

    #[test]
    fn should_not_be_restartable() {
        let mut source = LineSource::new(Cursor::new("one"), None, None).unwrap();
        assert_eq!(source.next().unwrap().unwrap(), "one");
        assert!(source.next().is_none());
        assert!(source.next().is_none());
    }
}
