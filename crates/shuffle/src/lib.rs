//! Filesystem spool for exchange data: layout, producer-side writer,
//! consumer-side reader and the [`FileSystemExchangeSource`].

pub mod layout;
pub mod reader;
pub mod source;
pub mod writer;

pub use layout::*;
pub use reader::{SpoolReader, reassemble};
pub use source::{FileSystemExchangeSource, open_spooling_data_source};
pub use writer::SpoolWriter;
