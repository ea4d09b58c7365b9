#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # flatxml

 Streaming conversion of fixed-width and delimited flat files into XML.

 A flat file of any size is turned into a well-formed XML document one line
 at a time: the consumer pulls output, and the converter only reads as many
 input lines as needed to produce it. Neither the whole input nor the whole
 output is ever held in memory.

 ## Core Concepts

- **LineSource:** Decodes a byte stream (any supported character encoding) into lines, lazily.
- **ColumnExtractor:** Splits a line into columns: fixed widths, a delimiter, a variable layout selected by a discriminator column, or a custom `LineExtractor`.
- **ContentConverter:** Converts one column value toward XML (and back): strip, escape, number, date.
- **StreamingXmlAssembler:** A state machine producing the document chunk by chunk. It is both an `Iterator` of chunks and a `std::io::Read`.
- **Marshaler:** Builds all of the above from one `MarshalerConfig`.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| date          | Enables the date `ContentConverter` (chrono patterns), on by default |

 ## Getting Started

```rust
# use flatxml::{FlatXmlError, marshal::MarshalerBuilder};
# use std::io::Read;
fn main() -> Result<(), FlatXmlError> {
    let data = "\
ID   NAME      QTY
001  Porsche   356
002  Peugeot   205
";

    let marshaler = MarshalerBuilder::new()
        .fixed_width(&[5, 10, 3])
        .header_line_count(1)
        .names_from_header_line(1)
        .default_strip(true)
        .build()?;

    let mut xml = String::new();
    marshaler
        .wrap(data.as_bytes(), "/data/cars.txt")?
        .read_to_string(&mut xml)?;

    assert!(xml.contains("<NAME number=\"2\">Peugeot</NAME>"));
    assert!(xml.ends_with("</DocElement>"));

    Ok(())
}
```

 ## Output

```xml
<?xml version="1.0" encoding="UTF-8"?>
<DocElement name="cars.txt" location="/data/cars.txt">
  <!-- ID   NAME      QTY -->
  <Line number="1">
    <ID number="1">001</ID>
    <NAME number="2">Porsche</NAME>
    <QTY number="3">356</QTY>
  </Line>
  ...
</DocElement>
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core streaming components: line source, extractors, converters, assembler
pub mod core;

/// Error types
pub mod error;

#[doc(inline)]
pub use error::*;

/// Configuration and facade (flat file to XML and back)
pub mod marshal;
