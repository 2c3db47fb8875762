//! PDF object parser.
//!
//! Recursive descent over lexer tokens. Composite objects recurse with a
//! depth counter so hostile nesting cannot exhaust the stack.

use super::lexer::{token, Token};
use super::object::{Dictionary, Object, ObjectRef};
use crate::error::{Error, Result};
use nom::IResult;

/// Nesting depth used by [`parse_object`].
pub const DEFAULT_MAX_NESTING: usize = 100;

/// Decode escape sequences in a literal string body.
///
/// ```
/// # use sign_oxide::pdf::parser::decode_literal_string_escapes;
/// assert_eq!(decode_literal_string_escapes(b"Section \\247 1"), b"Section \xa7 1");
/// assert_eq!(decode_literal_string_escapes(b"a\\(b\\)"), b"a(b)");
/// ```
pub fn decode_literal_string_escapes(raw: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        if raw[i] != b'\\' || i + 1 >= raw.len() {
            result.push(raw[i]);
            i += 1;
            continue;
        }
        let escaped = raw[i + 1];
        i += 2;
        match escaped {
            b'n' => result.push(b'\n'),
            b'r' => result.push(b'\r'),
            b't' => result.push(b'\t'),
            b'b' => result.push(8),
            b'f' => result.push(12),
            b'(' | b')' | b'\\' => result.push(escaped),
            // Line continuation
            b'\n' => {},
            b'\r' => {
                if raw.get(i) == Some(&b'\n') {
                    i += 1;
                }
            },
            b'0'..=b'7' => {
                let mut octal = u32::from(escaped - b'0');
                for _ in 0..2 {
                    match raw.get(i) {
                        Some(d @ b'0'..=b'7') => {
                            octal = octal * 8 + u32::from(d - b'0');
                            i += 1;
                        },
                        _ => break,
                    }
                }
                result.push((octal & 0xFF) as u8);
            },
            // Unknown escape: the backslash is dropped
            other => result.push(other),
        }
    }

    result
}

/// Decode a hex string body, ignoring whitespace and padding an odd digit with 0.
pub fn decode_hex(hex_bytes: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = hex_bytes
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0])?;
            let lo = match pair.get(1) {
                Some(&c) => hex_value(c)?,
                None => 0,
            };
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn hex_value(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit 0x{:02X}", c))),
    }
}

fn fail(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Unrecoverable parse error.
fn failure(input: &[u8], kind: nom::error::ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Failure(nom::error::Error::new(input, kind))
}

/// Parse one direct object.
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    parse_object_nested(input, DEFAULT_MAX_NESTING)
}

/// Parse one direct object, refusing to nest deeper than `depth` levels.
pub fn parse_object_nested(input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    let (input, tok) = token(input)?;

    match tok {
        Token::Null => Ok((input, Object::Null)),
        Token::True => Ok((input, Object::Boolean(true))),
        Token::False => Ok((input, Object::Boolean(false))),
        Token::Integer(i) => {
            // "N G R" is a reference; anything else leaves the integer alone
            if let Ok((after_gen, Token::Integer(gen))) = token(input) {
                if let Ok((after_r, Token::R)) = token(after_gen) {
                    if let (Ok(id), Ok(gen)) = (u32::try_from(i), u16::try_from(gen)) {
                        return Ok((after_r, Object::Reference(ObjectRef::new(id, gen))));
                    }
                }
            }
            Ok((input, Object::Integer(i)))
        },
        Token::Real(r) => Ok((input, Object::Real(r))),
        Token::LiteralString(raw) => {
            Ok((input, Object::String(decode_literal_string_escapes(raw))))
        },
        Token::HexString(raw) => decode_hex(raw)
            .map(|bytes| (input, Object::String(bytes)))
            .map_err(|_| failure(input, nom::error::ErrorKind::HexDigit)),
        Token::Name(name) => Ok((input, Object::Name(name))),
        Token::ArrayStart => {
            let depth = depth
                .checked_sub(1)
                .ok_or_else(|| failure(input, nom::error::ErrorKind::TooLarge))?;
            parse_array(input, depth)
        },
        Token::DictStart => {
            let depth = depth
                .checked_sub(1)
                .ok_or_else(|| failure(input, nom::error::ErrorKind::TooLarge))?;
            let (remaining, dict) = parse_dictionary(input, depth)?;
            if let Ok((stream_input, Token::StreamStart)) = token(remaining) {
                let (rest, data) = parse_stream_data(stream_input, &dict)?;
                return Ok((
                    rest,
                    Object::Stream {
                        dict,
                        data: bytes::Bytes::from(data),
                    },
                ));
            }
            Ok((remaining, Object::Dictionary(dict)))
        },
        _ => Err(fail(input, nom::error::ErrorKind::Tag)),
    }
}

fn parse_array(mut input: &[u8], depth: usize) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        if let Ok((rest, Token::ArrayEnd)) = token(input) {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, obj) = parse_object_nested(input, depth)?;
        items.push(obj);
        input = rest;
    }
}

fn parse_dictionary(mut input: &[u8], depth: usize) -> IResult<&[u8], Dictionary> {
    let mut dict = Dictionary::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictEnd => return Ok((rest, dict)),
            Token::Name(key) => {
                let (rest, value) = parse_object_nested(rest, depth)?;
                dict.insert(key, value);
                input = rest;
            },
            _ => return Err(fail(input, nom::error::ErrorKind::Tag)),
        }
    }
}

/// Read the data of a stream following the `stream` keyword.
///
/// Uses a direct `/Length` when `endstream` follows it; otherwise scans for
/// `endstream`, which also covers `/Length` given as an indirect reference.
fn parse_stream_data<'a>(input: &'a [u8], dict: &Dictionary) -> IResult<&'a [u8], Vec<u8>> {
    let input = if input.starts_with(b"\r\n") {
        &input[2..]
    } else if input.starts_with(b"\n") || input.starts_with(b"\r") {
        &input[1..]
    } else {
        log::warn!("No EOL after stream keyword");
        input
    };

    if let Some(length) = dict.get("Length").and_then(Object::as_integer) {
        if let Ok(length) = usize::try_from(length) {
            if length <= input.len() {
                if let Ok((rest, Token::StreamEnd)) = token(&input[length..]) {
                    return Ok((rest, input[..length].to_vec()));
                }
            }
        }
        log::debug!("Stream /Length {} does not land on endstream, scanning", length);
    }

    let pos = find_endstream(input).ok_or_else(|| fail(input, nom::error::ErrorKind::Eof))?;
    let mut data = &input[..pos];
    // The EOL before endstream is not part of the data
    if data.ends_with(b"\r\n") {
        data = &data[..data.len() - 2];
    } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
        data = &data[..data.len() - 1];
    }
    Ok((&input[pos + b"endstream".len()..], data.to_vec()))
}

fn find_endstream(input: &[u8]) -> Option<usize> {
    let keyword = b"endstream";
    input.windows(keyword.len()).position(|window| window == keyword)
}

/// Parse `N G obj <object> endobj` and return the object's reference and body.
pub fn parse_indirect_object(
    input: &[u8],
    max_nesting: usize,
) -> IResult<&[u8], (ObjectRef, Object)> {
    let (input, id) = match token(input)? {
        (rest, Token::Integer(id)) => (rest, id),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let (input, gen) = match token(input)? {
        (rest, Token::Integer(gen)) => (rest, gen),
        _ => return Err(fail(input, nom::error::ErrorKind::Digit)),
    };
    let (input, _) = match token(input)? {
        (rest, Token::ObjStart) => (rest, ()),
        _ => return Err(fail(input, nom::error::ErrorKind::Tag)),
    };
    let (input, obj) = parse_object_nested(input, max_nesting)?;
    // A missing endobj is tolerated
    let input = match token(input) {
        Ok((rest, Token::ObjEnd)) => rest,
        _ => input,
    };
    let id = u32::try_from(id).map_err(|_| fail(input, nom::error::ErrorKind::Digit))?;
    let gen = u16::try_from(gen).map_err(|_| fail(input, nom::error::ErrorKind::Digit))?;
    Ok((input, (ObjectRef::new(id, gen), obj)))
}

/// Convert a nom failure at some position within `whole` into a crate error.
pub(crate) fn to_parse_error(
    whole: &[u8],
    base: usize,
    err: nom::Err<nom::error::Error<&[u8]>>,
) -> Error {
    match err {
        nom::Err::Incomplete(_) => Error::ParseError {
            offset: base + whole.len(),
            reason: "unexpected end of input".to_string(),
        },
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            if e.code == nom::error::ErrorKind::TooLarge {
                return Error::RecursionLimitExceeded(DEFAULT_MAX_NESTING as u32);
            }
            Error::ParseError {
                offset: base + whole.len().saturating_sub(e.input.len()),
                reason: format!("{:?}", e.code),
            }
        },
    }
}
