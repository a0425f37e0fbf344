//! PDF object model, codecs, cross-reference index, reader and writer

mod dict;
pub mod filter;
pub mod lexer;
mod object;
mod object_stream;
pub mod parser;
mod reader;
mod source;
mod stream;
mod writer;
pub mod xref;

pub use dict::Dictionary;
pub use filter::{FilterParams, FilterRegistry, FilterSpec};
pub use object::{format_number, ObjectId, PDFValue};
pub use object_stream::{ObjectStream, ObjectStreamBuilder};
pub use reader::{PDFReader, ReaderOptions};
pub use source::ByteSource;
pub use stream::{Stream, StreamState};
pub use writer::{PDFWriter, WriterOptions};
pub use xref::{ResolvedLocation, XRefEntry, XRefTable};

use crate::error::PDFResult;

/// Anything that can hand out objects by identity
pub trait ObjectResolver {
    /// Object `id`; free or missing objects are `PDFValue::Null`
    fn resolve(&mut self, id: ObjectId) -> PDFResult<PDFValue>;
}
