//! PDF stream object implementation

use log::trace;
use crate::error::PDFResult;
use super::filter::{FilterRegistry, FilterSpec};
use super::Dictionary;

/// Whether stream bytes still need their filters applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Bytes are plain content; `/Filter` is applied when the stream is written
    Decoded,
    /// Bytes are already encoded with the filters named in `/Filter`
    Encoded,
}

/// PDF stream object
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// Stream dictionary
    pub dict: Dictionary,
    /// Stream bytes, plain or encoded according to `state`
    pub data: Vec<u8>,
    /// Codec state of `data`
    pub state: StreamState,
}

impl Stream {
    /// Create a stream from plain content
    pub fn new(dict: Dictionary, data: Vec<u8>) -> Self {
        Self {
            dict,
            data,
            state: StreamState::Decoded,
        }
    }

    /// Create a stream whose bytes already match its `/Filter` entry
    pub fn encoded(dict: Dictionary, data: Vec<u8>) -> Self {
        Self {
            dict,
            data,
            state: StreamState::Encoded,
        }
    }

    /// Filters named by the stream dictionary
    pub fn filters(&self) -> PDFResult<Vec<FilterSpec>> {
        FilterSpec::from_dict(&self.dict)
    }

    /// Plain content of the stream
    pub fn decoded_data(&self, registry: &FilterRegistry) -> PDFResult<Vec<u8>> {
        match self.state {
            StreamState::Decoded => Ok(self.data.clone()),
            StreamState::Encoded => {
                let filters = self.filters()?;
                trace!("Decoding stream through {} filter(s)", filters.len());
                registry.decode_chain(&filters, &self.data, &self.dict)
            }
        }
    }

    /// Apply the stream filters to plain content and record the encoded length
    pub fn encode(&mut self, registry: &FilterRegistry) -> PDFResult<()> {
        if self.state == StreamState::Decoded {
            let filters = self.filters()?;
            self.data = registry.encode_chain(&filters, &self.data, &self.dict)?;
            self.state = StreamState::Encoded;
        }
        self.dict.set("Length", self.data.len());
        Ok(())
    }

    /// Turn encoded bytes back into plain content and drop the filter entries
    pub fn decode(&mut self, registry: &FilterRegistry) -> PDFResult<()> {
        if self.state == StreamState::Encoded {
            self.data = self.decoded_data(registry)?;
            self.dict.remove("Filter");
            self.dict.remove("DecodeParms");
            self.state = StreamState::Decoded;
        }
        self.dict.set("Length", self.data.len());
        Ok(())
    }

    /// Write the stream with a `/Length` matching the bytes written
    pub fn write_to(&self, output: &mut Vec<u8>) {
        let mut dict = self.dict.clone();
        dict.set("Length", self.data.len());
        dict.write_to(output);
        output.extend_from_slice(b"\nstream\n");
        output.extend_from_slice(&self.data);
        output.extend_from_slice(b"\nendstream");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::PDFValue;
    use pretty_assertions::assert_eq;

    #[test_log::test]
    fn test_encode_then_decode() {
        let registry = FilterRegistry::standard();
        let mut dict = Dictionary::new();
        dict.set(
            "Filter",
            vec![PDFValue::name("AHx"), PDFValue::name("FlateDecode")],
        );
        let content = b"BT /F1 12 Tf (Hello) Tj ET".repeat(20);

        let mut stream = Stream::new(dict, content.clone());
        stream.encode(&registry).unwrap();
        assert_eq!(stream.state, StreamState::Encoded);
        assert_eq!(stream.dict.get_integer("Length"), Some(stream.data.len() as i64));
        // Last filter in the array is applied first on encode
        assert_eq!(stream.data.last(), Some(&b'>'));

        assert_eq!(stream.decoded_data(&registry).unwrap(), content);
        stream.decode(&registry).unwrap();
        assert_eq!(stream.data, content);
        assert!(stream.dict.get("Filter").is_none());
    }

    #[test_log::test]
    fn test_write_sets_length() {
        let stream = Stream::encoded(Dictionary::new(), b"abc".to_vec());
        let mut out = Vec::new();
        stream.write_to(&mut out);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<</Length 3>>\nstream\nabc\nendstream"
        );
    }
}
