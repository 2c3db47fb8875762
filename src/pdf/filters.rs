//! Stream filters needed for the structural layer.
//!
//! Cross-reference streams and object streams are almost always
//! FlateDecode with a PNG Up predictor; content streams are never decoded
//! here, so only the filters those structures use are supported.

use super::object::{Dictionary, Object};
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Decode a stream's data according to its `/Filter` and `/DecodeParms`.
///
/// `max_size` bounds the decompressed output (0 = unlimited).
pub fn decode_stream(dict: &Dictionary, data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => Vec::new(),
        Some(Object::Name(n)) => vec![n.as_str()],
        Some(Object::Array(items)) => items.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(Error::Decode(format!("unsupported /Filter value: {}", other.type_name())))
        },
    };
    let params: Vec<Option<&Dictionary>> = match dict.get("DecodeParms") {
        Some(Object::Array(items)) => items.iter().map(Object::as_dict).collect(),
        Some(obj) => vec![obj.as_dict()],
        None => Vec::new(),
    };

    let mut out = data.to_vec();
    for (i, filter) in filters.iter().enumerate() {
        out = match *filter {
            "FlateDecode" | "Fl" => inflate(&out, max_size)?,
            "ASCIIHexDecode" | "AHx" => {
                let body = out.split(|&c| c == b'>').next().unwrap_or_default();
                super::parser::decode_hex(body)?
            },
            other => return Err(Error::Decode(format!("unsupported filter /{}", other))),
        };
        if let Some(Some(p)) = params.get(i) {
            out = apply_predictor(&out, p)?;
        }
    }
    Ok(out)
}

fn inflate(input: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let limit = if max_size == 0 { u64::MAX } else { max_size as u64 + 1 };
    let mut output = Vec::new();
    let zlib = ZlibDecoder::new(input).take(limit).read_to_end(&mut output);
    if zlib.is_err() {
        // Some producers omit the zlib wrapper
        log::debug!("Zlib decode failed, trying raw deflate");
        output.clear();
        DeflateDecoder::new(input)
            .take(limit)
            .read_to_end(&mut output)
            .map_err(|e| Error::Decode(format!("FlateDecode failed: {}", e)))?;
    }
    if max_size != 0 && output.len() > max_size {
        return Err(Error::Decode(format!(
            "decompressed stream exceeds limit of {} bytes",
            max_size
        )));
    }
    Ok(output)
}

/// Compress data with zlib (FlateDecode).
pub fn encode_flate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn apply_predictor(data: &[u8], params: &Dictionary) -> Result<Vec<u8>> {
    let predictor = params.get("Predictor").and_then(Object::as_integer).unwrap_or(1);
    if predictor < 10 {
        if predictor > 1 {
            return Err(Error::Decode(format!("unsupported predictor {}", predictor)));
        }
        return Ok(data.to_vec());
    }
    let columns = params.get("Columns").and_then(Object::as_integer).unwrap_or(1).max(1) as usize;
    let colors = params.get("Colors").and_then(Object::as_integer).unwrap_or(1).max(1) as usize;
    let bpc = params
        .get("BitsPerComponent")
        .and_then(Object::as_integer)
        .unwrap_or(8)
        .max(1) as usize;
    let bpp = (colors * bpc).div_ceil(8);
    let row_len = (columns * colors * bpc).div_ceil(8);
    decode_png_rows(data, row_len, bpp)
}

/// Undo PNG row filters. Every row carries its own tag byte.
fn decode_png_rows(data: &[u8], row_len: usize, bpp: usize) -> Result<Vec<u8>> {
    let stride = row_len + 1;
    if data.len() % stride != 0 {
        return Err(Error::Decode(format!(
            "data length {} is not a multiple of row size {}",
            data.len(),
            stride
        )));
    }

    let mut output: Vec<u8> = Vec::with_capacity(data.len() / stride * row_len);
    let mut prev = vec![0u8; row_len];
    for row in data.chunks(stride) {
        let tag = row[0];
        let mut cur = row[1..].to_vec();
        for i in 0..row_len {
            let left = if i >= bpp { cur[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let delta = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((u16::from(left) + u16::from(up)) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => return Err(Error::Decode(format!("invalid PNG predictor tag {}", other))),
            };
            cur[i] = cur[i].wrapping_add(delta);
        }
        output.extend_from_slice(&cur);
        prev = cur;
    }
    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let (ia, ib, ic) = (i16::from(a), i16::from(b), i16::from(c));
    let p = ia + ib - ic;
    let (pa, pb, pc) = ((p - ia).abs(), (p - ib).abs(), (p - ic).abs());
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::object::{dict, name};

    #[test]
    fn test_flate_roundtrip() {
        let compressed = encode_flate(b"1 0 0 0 0").unwrap();
        let d = dict([("Filter", name("FlateDecode"))]);
        assert_eq!(decode_stream(&d, &compressed, 0).unwrap(), b"1 0 0 0 0");
    }

    #[test]
    fn test_decompression_limit() {
        let compressed = encode_flate(&[0u8; 4096]).unwrap();
        let d = dict([("Filter", name("FlateDecode"))]);
        assert!(matches!(decode_stream(&d, &compressed, 100), Err(Error::Decode(_))));
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of three columns, both tagged Up
        let encoded = [2, 1, 2, 3, 2, 1, 1, 1];
        let d = dict([("Predictor", Object::Integer(12)), ("Columns", Object::Integer(3))]);
        assert_eq!(apply_predictor(&encoded, &d).unwrap(), vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_unsupported_filter() {
        let d = dict([("Filter", name("LZWDecode"))]);
        assert!(decode_stream(&d, b"", 0).is_err());
    }

    #[test]
    fn test_no_filter_is_identity() {
        assert_eq!(decode_stream(&Dictionary::new(), b"abc", 0).unwrap(), b"abc");
    }
}
