//! Flat file to XML conversion facade.
//!
//! A [`Marshaler`] bundles a line source, a column extractor, the column
//! converters and the XML assembler behind one configuration value. Its
//! [`Marshaler::wrap`] method turns any byte source into a lazily produced
//! XML byte stream; [`Marshaler::unmarshal`] performs the best-effort
//! reverse conversion.
//!
//! # Examples
//!
//! ## Fixed width file to XML
//!
//! ```
//! use flatxml::marshal::MarshalerBuilder;
//! use std::io::Read;
//!
//! let marshaler = MarshalerBuilder::new()
//!     .fixed_width(&[2, 3, 5])
//!     .column_names(&["First", "Second", "Third"])
//!     .header_line_count(1)
//!     .emit_raw_line(true)
//!     .build()
//!     .unwrap();
//!
//! let data = "-- orders --\nAB123hello\nCD456world\n";
//!
//! let mut xml = String::new();
//! marshaler
//!     .wrap(data.as_bytes(), "/incoming/orders.txt")
//!     .unwrap()
//!     .read_to_string(&mut xml)
//!     .unwrap();
//!
//! // <?xml version="1.0" encoding="UTF-8"?>
//! // <DocElement name="orders.txt" location="/incoming/orders.txt">
//! //   <!-- - - orders - - -->
//! //   <Line number="1" raw="AB123hello">
//! //     <First number="1">AB</First>
//! //     <Second number="2">123</Second>
//! //     <Third number="3">hello</Third>
//! //   </Line>
//! //   ...
//! // </DocElement>
//! assert!(xml.contains("<!-- - - orders - - -->"));
//! assert!(xml.contains("<Line number=\"2\" raw=\"CD456world\">"));
//! assert!(xml.contains("<Third number=\"3\">world</Third>"));
//! ```
//!
//! ## Delimited file with configuration loaded from JSON
//!
//! ```
//! use flatxml::marshal::{Marshaler, MarshalerConfig};
//! use std::io::Read;
//!
//! let config = MarshalerConfig::from_json_str(r#"{
//!     "layout": "delimited",
//!     "separator": "|",
//!     "headerLineCount": 1,
//!     "namesFromHeaderLine": 1,
//!     "columnsAsAttributes": true,
//!     "converters": [{"type": "number"}]
//! }"#).unwrap();
//! let marshaler = Marshaler::new(config).unwrap();
//!
//! let mut xml = String::new();
//! marshaler
//!     .wrap("qty|item\n003|pen".as_bytes(), "stock.psv")
//!     .unwrap()
//!     .read_to_string(&mut xml)
//!     .unwrap();
//!
//! assert!(xml.contains("<Line number=\"1\" qty=\"3\" item=\"pen\"/>"));
//! ```

pub mod config;
pub mod marshaler;
pub mod unmarshaler;

pub use config::{LayoutKind, MarshalerConfig};
pub use marshaler::{Marshaler, MarshalerBuilder};
pub use unmarshaler::Unmarshaler;
