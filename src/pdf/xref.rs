//! Cross-reference sections.
//!
//! Reads classic `xref` tables and PDF 1.5 cross-reference streams from an
//! in-memory buffer. Each incremental update contributes one section; the
//! caller follows `/Prev` to collect them.

use super::filters::decode_stream;
use super::lexer::skip_ws;
use super::object::{Dictionary, Object};
use super::parser::{parse_indirect_object, parse_object, to_parse_error};
use crate::error::{Error, Result};
use crate::parser_config::ParserOptions;
use std::collections::BTreeMap;

/// Cross-reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free slot (`f` row or type 0)
    Free {
        /// Generation for the next reuse
        generation: u16,
    },
    /// Object stored at a byte offset (`n` row or type 1)
    InUse {
        /// Byte offset of `N G obj`
        offset: usize,
        /// Generation number
        generation: u16,
    },
    /// Object stored inside an object stream (type 2)
    Compressed {
        /// Object number of the containing object stream
        stream_id: u32,
        /// Index within that stream
        index: u32,
    },
}

impl XRefEntry {
    /// Whether the entry points at a live object.
    pub fn is_in_use(&self) -> bool {
        !matches!(self, XRefEntry::Free { .. })
    }
}

/// One cross-reference section plus its trailer.
#[derive(Debug, Clone)]
pub struct XRefSection {
    /// Byte offset `startxref` pointed at
    pub offset: usize,
    /// Entries declared by this section only
    pub entries: BTreeMap<u32, XRefEntry>,
    /// Trailer dictionary (the stream dictionary for xref streams)
    pub trailer: Dictionary,
    /// Whether the section is a cross-reference stream
    pub is_stream: bool,
}

impl XRefSection {
    /// `/Prev` offset of the previous section, if any.
    pub fn prev(&self) -> Option<usize> {
        self.trailer
            .get("Prev")
            .and_then(Object::as_integer)
            .and_then(|v| usize::try_from(v).ok())
    }
}

/// Find the offset recorded after the last `startxref` keyword in `data`.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let keyword = b"startxref";
    // Only the tail of the file is searched
    let window_start = data.len().saturating_sub(2048);
    let pos = data[window_start..]
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .map(|p| window_start + p)
        .ok_or_else(|| Error::InvalidPdf("startxref not found".to_string()))?;

    let (rest, _) = skip_ws(&data[pos + keyword.len()..])
        .map_err(|e| to_parse_error(data, 0, e))?;
    let digits: Vec<u8> = rest.iter().copied().take_while(u8::is_ascii_digit).collect();
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&offset| offset < data.len())
        .ok_or(Error::InvalidXref)
}

/// Parse the section starting at `offset`.
pub fn parse_section(data: &[u8], offset: usize, options: &ParserOptions) -> Result<XRefSection> {
    if offset >= data.len() {
        return Err(Error::InvalidXref);
    }
    let (body, _) = skip_ws(&data[offset..]).map_err(|e| to_parse_error(data, offset, e))?;
    if body.starts_with(b"xref") {
        parse_table(data, offset, &body[4..], options)
    } else {
        parse_stream_section(data, offset, options)
    }
}

fn parse_table(
    data: &[u8],
    offset: usize,
    mut input: &[u8],
    options: &ParserOptions,
) -> Result<XRefSection> {
    let mut entries = BTreeMap::new();

    loop {
        input = skip_ws(input).map_err(|e| to_parse_error(data, offset, e))?.0;
        if input.starts_with(b"trailer") {
            input = &input[b"trailer".len()..];
            break;
        }
        let (rest, first) = read_uint(input).ok_or(Error::InvalidXref)?;
        let rest = skip_ws(rest).map_err(|e| to_parse_error(data, offset, e))?.0;
        let (rest, count) = read_uint(rest).ok_or(Error::InvalidXref)?;
        input = rest;

        for i in 0..count {
            input = skip_ws(input).map_err(|e| to_parse_error(data, offset, e))?.0;
            let (row, rest) = split_row(input);
            input = rest;
            let entry = parse_row(row, options)?;
            let id = u32::try_from(first + i).map_err(|_| Error::InvalidXref)?;
            entries.insert(id, entry);
        }
    }

    let trailer = match parse_object(input) {
        Ok((_, Object::Dictionary(d))) => d,
        _ => return Err(Error::InvalidPdf("trailer is not a dictionary".to_string())),
    };

    let mut section = XRefSection {
        offset,
        entries,
        trailer,
        is_stream: false,
    };

    // Hybrid files: table entries win over the companion stream
    if let Some(stm) = section.trailer.get("XRefStm").and_then(Object::as_integer) {
        if let Ok(stm_offset) = usize::try_from(stm) {
            match parse_stream_section(data, stm_offset, options) {
                Ok(companion) => {
                    for (id, entry) in companion.entries {
                        section.entries.entry(id).or_insert(entry);
                    }
                },
                Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", stm_offset, e),
            }
        }
    }

    Ok(section)
}

fn read_uint(input: &[u8]) -> Option<(&[u8], u64)> {
    let len = input.iter().take_while(|c| c.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    let value = std::str::from_utf8(&input[..len]).ok()?.parse().ok()?;
    Some((&input[len..], value))
}

/// Split one xref row (up to its EOL) off the input.
fn split_row(input: &[u8]) -> (&[u8], &[u8]) {
    let end = input
        .iter()
        .position(|&c| c == b'\n' || c == b'\r')
        .unwrap_or(input.len());
    (&input[..end], &input[end..])
}

fn parse_row(row: &[u8], options: &ParserOptions) -> Result<XRefEntry> {
    let text = std::str::from_utf8(row).map_err(|_| Error::InvalidXref)?;
    let mut parts = text.split_whitespace();
    let offset: usize = parts.next().and_then(|p| p.parse().ok()).ok_or(Error::InvalidXref)?;
    let generation: u16 = parts.next().and_then(|p| p.parse().ok()).ok_or(Error::InvalidXref)?;
    let kind = parts.next().ok_or(Error::InvalidXref)?;
    if options.strict && parts.next().is_some() {
        return Err(Error::InvalidXref);
    }
    match kind {
        "n" => Ok(XRefEntry::InUse { offset, generation }),
        "f" => Ok(XRefEntry::Free { generation }),
        _ => Err(Error::InvalidXref),
    }
}

fn parse_stream_section(
    data: &[u8],
    offset: usize,
    options: &ParserOptions,
) -> Result<XRefSection> {
    let (_, (_, obj)) = parse_indirect_object(&data[offset..], options.max_nesting)
        .map_err(|e| to_parse_error(&data[offset..], offset, e))?;
    let (dict, raw) = match obj {
        Object::Stream { dict, data } => (dict, data),
        _ => return Err(Error::InvalidXref),
    };
    if dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(Error::InvalidXref);
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .ok_or(Error::InvalidXref)?
        .iter()
        .map(|w| w.as_integer().and_then(|v| usize::try_from(v).ok()).ok_or(Error::InvalidXref))
        .collect::<Result<_>>()?;
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::InvalidXref);
    }
    let size = dict.get("Size").and_then(Object::as_integer).ok_or(Error::InvalidXref)?;
    let index: Vec<i64> = match dict.get("Index").and_then(Object::as_array) {
        Some(items) => items.iter().filter_map(Object::as_integer).collect(),
        None => vec![0, size],
    };
    if index.len() % 2 != 0 {
        return Err(Error::InvalidXref);
    }

    let decoded = decode_stream(&dict, &raw, options.max_decompressed_size)?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidXref);
    }
    let mut rows = decoded.chunks_exact(row_len);
    let mut entries = BTreeMap::new();

    for pair in index.chunks(2) {
        let (first, count) = (pair[0], pair[1]);
        for i in 0..count {
            let row = match rows.next() {
                Some(row) => row,
                None => {
                    log::warn!("Cross-reference stream at {} is shorter than its /Index", offset);
                    break;
                },
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type field defaults to type 1
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let (a, b) = (read_be(f2), read_be(f3));
            let entry = match kind {
                0 => XRefEntry::Free { generation: b as u16 },
                1 => XRefEntry::InUse {
                    offset: a as usize,
                    generation: b as u16,
                },
                2 => XRefEntry::Compressed {
                    stream_id: a as u32,
                    index: b as u32,
                },
                _ => continue,
            };
            let id = u32::try_from(first + i).map_err(|_| Error::InvalidXref)?;
            entries.insert(id, entry);
        }
    }

    Ok(XRefSection {
        offset,
        entries,
        trailer: dict,
        is_stream: true,
    })
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
