//! Mock versions of a flat byte source, an output sink and a custom line extractor.
use mockall::mock;

use flatxml::core::extractor::{Columns, LineExtractor};
use std::io::{self, Read, Write};

mock! {
    pub Source {}
    impl Read for Source {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    }
}

mock! {
    pub Sink {}
    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
        fn flush(&mut self) -> io::Result<()>;
    }
}

mock! {
    pub Extractor {}
    impl LineExtractor for Extractor {
        fn extract(&self, line: &str) -> flatxml::Result<Option<Columns>>;
    }
}
