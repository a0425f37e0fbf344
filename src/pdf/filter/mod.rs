//! Stream filter chain.
//!
//! Filters are looked up by name in an explicitly constructed [`FilterRegistry`]. The registry is
//! built once and shared read-only (usually through an `Arc`) by every reader and writer that
//! needs it.

mod ascii;
mod bits;
mod ccitt;
mod ccitt_tables;
mod flate;
mod lzw;
mod predictor;
mod run_length;

use std::collections::HashMap;
use log::{debug, trace};
use crate::error::{PDFError, PDFResult};
use super::{Dictionary, PDFValue};

pub use ccitt::CcittParams;
pub use predictor::PredictorParams;

/// Default zlib compression level
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// PDF stream filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    FlateDecode,
    LZWDecode,
    ASCIIHexDecode,
    ASCII85Decode,
    RunLengthDecode,
    CCITTFaxDecode,
    Crypt,
}

impl Filter {
    /// Canonical PDF name
    pub fn name(&self) -> &'static str {
        match self {
            Filter::FlateDecode => "FlateDecode",
            Filter::LZWDecode => "LZWDecode",
            Filter::ASCIIHexDecode => "ASCIIHexDecode",
            Filter::ASCII85Decode => "ASCII85Decode",
            Filter::RunLengthDecode => "RunLengthDecode",
            Filter::CCITTFaxDecode => "CCITTFaxDecode",
            Filter::Crypt => "Crypt",
        }
    }

    /// Decode data using this filter
    pub fn decode(
        &self,
        data: &[u8],
        params: &FilterParams,
        stream_dict: &Dictionary,
    ) -> PDFResult<Vec<u8>> {
        match self {
            Filter::FlateDecode => {
                let inflated = flate::decode(data)?;
                predictor::decode(inflated, &params.predictor)
            }
            Filter::LZWDecode => {
                let expanded = lzw::decode(data, params.early_change);
                predictor::decode(expanded, &params.predictor)
            }
            Filter::ASCIIHexDecode => ascii::decode_hex(data),
            Filter::ASCII85Decode => ascii::decode_85(data),
            Filter::RunLengthDecode => Ok(run_length::decode(data)),
            Filter::CCITTFaxDecode => {
                let ccitt = CcittParams::resolve(params, stream_dict)?;
                ccitt::decode(data, &ccitt)
            }
            Filter::Crypt => Ok(data.to_vec()),
        }
    }

    /// Encode data using this filter
    pub fn encode(
        &self,
        data: &[u8],
        params: &FilterParams,
        stream_dict: &Dictionary,
        compression_level: u32,
    ) -> PDFResult<Vec<u8>> {
        match self {
            Filter::FlateDecode => {
                let predicted = predictor::encode(data, &params.predictor)?;
                flate::encode(&predicted, compression_level)
            }
            Filter::LZWDecode => {
                let predicted = predictor::encode(data, &params.predictor)?;
                Ok(lzw::encode(&predicted, params.early_change))
            }
            Filter::ASCIIHexDecode => Ok(ascii::encode_hex(data)),
            Filter::ASCII85Decode => Ok(ascii::encode_85(data)),
            Filter::RunLengthDecode => Ok(run_length::encode(data)),
            Filter::CCITTFaxDecode => {
                let ccitt = CcittParams::resolve(params, stream_dict)?;
                ccitt::encode(data, &ccitt)
            }
            Filter::Crypt => Ok(data.to_vec()),
        }
    }
}

/// Decode parameters with PDF defaults applied
#[derive(Debug, Clone, PartialEq)]
pub struct FilterParams {
    pub predictor: PredictorParams,
    pub early_change: bool,
    pub k: i64,
    pub columns: Option<usize>,
    pub rows: Option<usize>,
    pub encoded_byte_align: bool,
    pub end_of_line: bool,
    pub end_of_block: bool,
    pub black_is_1: bool,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            predictor: PredictorParams::default(),
            early_change: true,
            k: 0,
            columns: None,
            rows: None,
            encoded_byte_align: false,
            end_of_line: false,
            end_of_block: true,
            black_is_1: false,
        }
    }
}

impl FilterParams {
    /// Read parameters from an optional `/DecodeParms` dictionary
    pub fn from_dict(params: Option<&Dictionary>) -> Self {
        let mut result = Self::default();
        let params = match params {
            Some(p) => p,
            None => return result,
        };

        let positive = |key: &str| {
            params
                .get_integer(key)
                .filter(|v| *v > 0)
                .map(|v| v as usize)
        };

        result.predictor = PredictorParams {
            predictor: params.get_integer("Predictor").unwrap_or(1).clamp(0, 255) as u8,
            colors: positive("Colors").unwrap_or(1),
            bits_per_component: positive("BitsPerComponent").unwrap_or(8),
            columns: positive("Columns").unwrap_or(1),
        };
        result.early_change = params.get_integer("EarlyChange").unwrap_or(1) != 0;
        result.k = params.get_integer("K").unwrap_or(0);
        result.columns = positive("Columns");
        result.rows = positive("Rows");
        result.encoded_byte_align = params.get_bool("EncodedByteAlign").unwrap_or(false);
        result.end_of_line = params.get_bool("EndOfLine").unwrap_or(false);
        result.end_of_block = params.get_bool("EndOfBlock").unwrap_or(true);
        result.black_is_1 = params.get_bool("BlackIs1").unwrap_or(false);
        result
    }
}

/// One `/Filter` entry with its `/DecodeParms`
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub name: Vec<u8>,
    pub params: Option<Dictionary>,
}

impl FilterSpec {
    pub fn new(name: impl AsRef<[u8]>, params: Option<Dictionary>) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            params,
        }
    }

    /// Filters named by a stream dictionary, in decode order
    pub fn from_dict(dict: &Dictionary) -> PDFResult<Vec<FilterSpec>> {
        let names: Vec<Vec<u8>> = match dict.get("Filter") {
            None | Some(PDFValue::Null) => return Ok(Vec::new()),
            Some(PDFValue::Name(name)) => vec![name.clone()],
            Some(PDFValue::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_name().map(<[u8]>::to_vec).ok_or_else(|| {
                        PDFError::invalid_dict_value("Filter", "array entries must be names")
                    })
                })
                .collect::<PDFResult<_>>()?,
            Some(other) => {
                return Err(PDFError::invalid_dict_value(
                    "Filter",
                    format!("expected name or array, found {}", other.type_name()),
                ))
            }
        };

        let params: Vec<Option<Dictionary>> = match dict.get("DecodeParms") {
            Some(PDFValue::Dictionary(d)) => vec![Some(d.clone())],
            Some(PDFValue::Array(items)) => items
                .iter()
                .map(|item| match item {
                    PDFValue::Dictionary(d) => Some(d.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| FilterSpec {
                name,
                params: params.get(i).cloned().flatten(),
            })
            .collect())
    }

    /// Check whether any entry names the Crypt filter
    pub fn names_crypt(filters: &[FilterSpec]) -> bool {
        filters.iter().any(|f| f.name == b"Crypt")
    }
}

/// Immutable name to filter mapping
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    filters: HashMap<&'static [u8], Filter>,
    compression_level: u32,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl FilterRegistry {
    /// Registry with every supported filter and its abbreviations
    pub fn standard() -> Self {
        let entries: [(&'static [u8], Filter); 13] = [
            (b"FlateDecode", Filter::FlateDecode),
            (b"Fl", Filter::FlateDecode),
            (b"LZWDecode", Filter::LZWDecode),
            (b"LZW", Filter::LZWDecode),
            (b"ASCIIHexDecode", Filter::ASCIIHexDecode),
            (b"AHx", Filter::ASCIIHexDecode),
            (b"ASCII85Decode", Filter::ASCII85Decode),
            (b"A85", Filter::ASCII85Decode),
            (b"RunLengthDecode", Filter::RunLengthDecode),
            (b"RL", Filter::RunLengthDecode),
            (b"CCITTFaxDecode", Filter::CCITTFaxDecode),
            (b"CCF", Filter::CCITTFaxDecode),
            (b"Crypt", Filter::Crypt),
        ];

        Self {
            filters: entries.into_iter().collect(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Same registry encoding Flate at `level` (clamped to 0..=9)
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    /// Find a filter by canonical name or alias
    pub fn lookup(&self, name: &[u8]) -> PDFResult<Filter> {
        self.filters
            .get(name)
            .copied()
            .ok_or_else(|| PDFError::UnsupportedFilter(String::from_utf8_lossy(name).into_owned()))
    }

    /// Decode `data` with a single named filter
    pub fn decode(
        &self,
        name: &[u8],
        params: Option<&Dictionary>,
        data: &[u8],
        stream_dict: &Dictionary,
    ) -> PDFResult<Vec<u8>> {
        let filter = self.lookup(name)?;
        trace!("{} decode of {} bytes", filter.name(), data.len());
        filter.decode(data, &FilterParams::from_dict(params), stream_dict)
    }

    /// Encode `data` with a single named filter
    pub fn encode(
        &self,
        name: &[u8],
        params: Option<&Dictionary>,
        data: &[u8],
        stream_dict: &Dictionary,
    ) -> PDFResult<Vec<u8>> {
        let filter = self.lookup(name)?;
        trace!("{} encode of {} bytes", filter.name(), data.len());
        filter.encode(
            data,
            &FilterParams::from_dict(params),
            stream_dict,
            self.compression_level,
        )
    }

    /// Apply a filter list in array order
    pub fn decode_chain(
        &self,
        filters: &[FilterSpec],
        data: &[u8],
        stream_dict: &Dictionary,
    ) -> PDFResult<Vec<u8>> {
        let mut current = data.to_vec();
        for spec in filters {
            current = self.decode(&spec.name, spec.params.as_ref(), &current, stream_dict)?;
        }
        debug!(
            "Decoded {} bytes into {} through {} filter(s)",
            data.len(),
            current.len(),
            filters.len()
        );
        Ok(current)
    }

    /// Apply a filter list in reverse order
    pub fn encode_chain(
        &self,
        filters: &[FilterSpec],
        data: &[u8],
        stream_dict: &Dictionary,
    ) -> PDFResult<Vec<u8>> {
        let mut current = data.to_vec();
        for spec in filters.iter().rev() {
            current = self.encode(&spec.name, spec.params.as_ref(), &current, stream_dict)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<u8> {
        let mut data = b"stream content with some repetition, repetition, repetition. ".repeat(40);
        data.extend((0..=255u8).cycle().take(3000));
        data
    }

    #[rstest]
    #[case("FlateDecode")]
    #[case("LZWDecode")]
    #[case("ASCIIHexDecode")]
    #[case("ASCII85Decode")]
    #[case("RunLengthDecode")]
    #[case("Crypt")]
    fn test_round_trip(#[case] name: &str) {
        let registry = FilterRegistry::standard();
        let dict = Dictionary::new();
        let data = sample();
        let encoded = registry.encode(name.as_bytes(), None, &data, &dict).unwrap();
        let decoded = registry.decode(name.as_bytes(), None, &encoded, &dict).unwrap();
        assert_eq!(decoded, data);
    }

    #[rstest]
    fn test_flate_levels(#[values(0, 1, 2, 3, 4, 5, 6, 7, 8, 9)] level: u32) {
        let registry = FilterRegistry::standard().with_compression_level(level);
        let dict = Dictionary::new();
        let data = sample();
        let encoded = registry.encode(b"Fl", None, &data, &dict).unwrap();
        assert_eq!(registry.decode(b"Fl", None, &encoded, &dict).unwrap(), data);
    }

    #[test_log::test]
    fn test_aliases_resolve_to_same_filter() {
        let registry = FilterRegistry::standard();
        for (alias, canonical) in [
            ("Fl", "FlateDecode"),
            ("LZW", "LZWDecode"),
            ("AHx", "ASCIIHexDecode"),
            ("A85", "ASCII85Decode"),
            ("RL", "RunLengthDecode"),
            ("CCF", "CCITTFaxDecode"),
        ] {
            assert_eq!(
                registry.lookup(alias.as_bytes()).unwrap(),
                registry.lookup(canonical.as_bytes()).unwrap()
            );
        }
    }

    #[test_log::test]
    fn test_unknown_filter() {
        let registry = FilterRegistry::standard();
        let result = registry.decode(b"DCTDecode", None, b"", &Dictionary::new());
        assert!(matches!(result, Err(PDFError::UnsupportedFilter(name)) if name == "DCTDecode"));
    }

    #[test_log::test]
    fn test_filter_spec_with_params_array() {
        let mut params = Dictionary::new();
        params.set("Predictor", 12);
        let mut dict = Dictionary::new();
        dict.set("Filter", vec![PDFValue::name("A85"), PDFValue::name("Fl")]);
        dict.set("DecodeParms", vec![PDFValue::Null, PDFValue::Dictionary(params.clone())]);

        let specs = FilterSpec::from_dict(&dict).unwrap();
        assert_eq!(
            specs,
            vec![FilterSpec::new("A85", None), FilterSpec::new("Fl", Some(params))]
        );
    }

    #[test_log::test]
    fn test_chain_with_predictor() {
        let registry = FilterRegistry::standard();
        let mut params = Dictionary::new();
        params.set("Predictor", 12);
        params.set("Columns", 4);
        params.set("Colors", 3);
        let filters = vec![
            FilterSpec::new("ASCII85Decode", None),
            FilterSpec::new("FlateDecode", Some(params)),
        ];
        let data: Vec<u8> = (0..480u32).map(|i| (i * 7 % 251) as u8).collect();
        let dict = Dictionary::new();

        let encoded = registry.encode_chain(&filters, &data, &dict).unwrap();
        assert!(encoded.ends_with(b"~>"));
        assert_eq!(registry.decode_chain(&filters, &encoded, &dict).unwrap(), data);
    }

    #[test_log::test]
    fn test_params_defaults() {
        let params = FilterParams::from_dict(None);
        assert_eq!(params.predictor.predictor, 1);
        assert!(params.early_change);
        assert!(params.end_of_block);
        assert!(!params.black_is_1);
    }
}
