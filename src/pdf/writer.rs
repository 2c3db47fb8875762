//! Object serialization and incremental updates.
//!
//! [`IncrementalUpdate`] appends new and replaced objects after the bytes
//! of an existing document, followed by a cross-reference section and a
//! trailer chaining to the previous one via `/Prev`. The original bytes are
//! never touched, which is what keeps earlier signatures valid.

use super::file::PdfFile;
use super::filters::encode_flate;
use super::object::{dict, name, Dictionary, Object, ObjectRef};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::io::Write;

/// Serializer for PDF objects.
///
/// Dictionaries are written in insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSerializer;

impl ObjectSerializer {
    /// Serialize an object to bytes.
    pub fn serialize(obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        Self::write_object(&mut buf, obj);
        buf
    }

    /// Serialize a dictionary body without the surrounding `<<` `>>`.
    ///
    /// Callers that need to append raw entries (signature placeholders)
    /// wrap this themselves.
    pub fn serialize_entries(dict: &Dictionary) -> Vec<u8> {
        let mut buf = Vec::new();
        for (key, value) in dict {
            Self::write_name(&mut buf, key);
            buf.push(b' ');
            Self::write_object(&mut buf, value);
            buf.push(b' ');
        }
        buf
    }

    fn write_object(w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => Self::write_real(w, *r),
            Object::String(s) => Self::write_string(w, s),
            Object::Name(n) => Self::write_name(w, n),
            Object::Array(items) => {
                w.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        w.push(b' ');
                    }
                    Self::write_object(w, item);
                }
                w.push(b']');
            },
            Object::Dictionary(d) => Self::write_dictionary(w, d),
            Object::Stream { dict, data } => {
                let mut d = dict.clone();
                d.insert("Length".to_string(), Object::Integer(data.len() as i64));
                Self::write_dictionary(w, &d);
                w.extend_from_slice(b"\nstream\n");
                w.extend_from_slice(data);
                w.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => w.extend_from_slice(r.to_string().as_bytes()),
        }
    }

    fn write_dictionary(w: &mut Vec<u8>, d: &Dictionary) {
        w.extend_from_slice(b"<<");
        for (key, value) in d {
            Self::write_name(w, key);
            w.push(b' ');
            Self::write_object(w, value);
        }
        w.extend_from_slice(b">>");
    }

    fn write_real(w: &mut Vec<u8>, value: f64) {
        if value.fract() == 0.0 {
            w.extend_from_slice((value as i64).to_string().as_bytes());
        } else {
            let formatted = format!("{:.5}", value);
            let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
            w.extend_from_slice(trimmed.as_bytes());
        }
    }

    /// Literal syntax for printable text, hex syntax for anything binary.
    fn write_string(w: &mut Vec<u8>, data: &[u8]) {
        let printable = data
            .iter()
            .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));
        if printable {
            w.push(b'(');
            for &byte in data {
                match byte {
                    b'(' => w.extend_from_slice(b"\\("),
                    b')' => w.extend_from_slice(b"\\)"),
                    b'\\' => w.extend_from_slice(b"\\\\"),
                    b'\n' => w.extend_from_slice(b"\\n"),
                    b'\r' => w.extend_from_slice(b"\\r"),
                    b'\t' => w.extend_from_slice(b"\\t"),
                    _ => w.push(byte),
                }
            }
            w.push(b')');
        } else {
            w.push(b'<');
            for byte in data {
                w.extend_from_slice(format!("{:02X}", byte).as_bytes());
            }
            w.push(b'>');
        }
    }

    fn write_name(w: &mut Vec<u8>, n: &str) {
        w.push(b'/');
        for byte in n.bytes() {
            match byte {
                b'!' | b'"' | b'$'..=b'&' | b'\'' | b'*'..=b'.' | b'0'..=b'9' | b';' | b'?' | b'@'
                | b'A'..=b'Z' | b'^'..=b'z' | b'|' | b'~' => w.push(byte),
                _ => w.extend_from_slice(format!("#{:02X}", byte).as_bytes()),
            }
        }
    }
}

/// Output of [`IncrementalUpdate::finish`].
#[derive(Debug, Clone)]
pub struct UpdateOutput {
    /// Complete document: base bytes followed by the update
    pub bytes: Vec<u8>,
    /// Offset of each written object's body (just after `N G obj\n`)
    pub body_offsets: BTreeMap<u32, usize>,
    /// Offset of the new cross-reference section
    pub xref_offset: usize,
}

/// Builder for one incremental-update section.
#[derive(Debug)]
pub struct IncrementalUpdate {
    base: bytes::Bytes,
    prev: Option<usize>,
    base_trailer: Dictionary,
    xref_stream: bool,
    next_id: u32,
    root: Option<ObjectRef>,
    info: Option<ObjectRef>,
    objects: BTreeMap<u32, Vec<u8>>,
}

impl IncrementalUpdate {
    /// Start an update on top of an opened document.
    ///
    /// The new section uses the same cross-reference style as the
    /// document's newest revision.
    pub fn new(base: &PdfFile) -> Self {
        Self {
            base: bytes::Bytes::copy_from_slice(base.data()),
            prev: Some(base.startxref()),
            base_trailer: base.trailer().clone(),
            xref_stream: base.uses_xref_stream(),
            next_id: base.next_object_id().max(1),
            root: None,
            info: None,
            objects: BTreeMap::new(),
        }
    }

    /// Start a fresh document whose only prior content is `header`
    /// (for example `%PDF-1.7\n`).
    pub fn from_header(header: &[u8]) -> Self {
        Self {
            base: bytes::Bytes::copy_from_slice(header),
            prev: None,
            base_trailer: Dictionary::new(),
            xref_stream: false,
            next_id: 1,
            root: None,
            info: None,
            objects: BTreeMap::new(),
        }
    }

    /// Force a cross-reference stream (true) or a classic table (false).
    pub fn with_xref_stream(mut self, xref_stream: bool) -> Self {
        self.xref_stream = xref_stream;
        self
    }

    /// Reserve a new object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        r
    }

    /// Write (or replace) an object.
    pub fn put(&mut self, r: ObjectRef, obj: &Object) {
        self.put_raw(r, ObjectSerializer::serialize(obj));
    }

    /// Write an object whose body is already serialized.
    pub fn put_raw(&mut self, r: ObjectRef, body: Vec<u8>) {
        if r.id >= self.next_id {
            self.next_id = r.id + 1;
        }
        self.objects.insert(r.id, body);
    }

    /// Set `/Root` of the new trailer.
    pub fn set_root(&mut self, r: ObjectRef) {
        self.root = Some(r);
    }

    /// Set `/Info` of the new trailer.
    pub fn set_info(&mut self, r: ObjectRef) {
        self.info = Some(r);
    }

    /// Write the update and return the complete document.
    pub fn finish(mut self) -> Result<UpdateOutput> {
        if self.objects.is_empty() {
            return Err(Error::Validation("incremental update has no objects".to_string()));
        }
        let root = self
            .root
            .or_else(|| self.base_trailer.get("Root").and_then(Object::as_reference))
            .ok_or_else(|| Error::InvalidPdf("update has no /Root".to_string()))?;

        let mut out = self.base.to_vec();
        if !out.ends_with(b"\n") && !out.ends_with(b"\r") {
            out.push(b'\n');
        }

        let mut offsets: BTreeMap<u32, usize> = BTreeMap::new();
        let mut body_offsets = BTreeMap::new();
        for (id, body) in &self.objects {
            offsets.insert(*id, out.len());
            write!(out, "{} 0 obj\n", id)?;
            body_offsets.insert(*id, out.len());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let mut trailer = Dictionary::new();
        let xref_offset = out.len();
        let stream_id = if self.xref_stream {
            let r = self.allocate();
            offsets.insert(r.id, xref_offset);
            Some(r.id)
        } else {
            None
        };
        let size = self.next_id.max(
            self.base_trailer
                .get("Size")
                .and_then(Object::as_integer)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0),
        );
        trailer.insert("Size".to_string(), Object::Integer(i64::from(size)));
        if let Some(prev) = self.prev {
            trailer.insert("Prev".to_string(), Object::Integer(prev as i64));
        }
        trailer.insert("Root".to_string(), Object::Reference(root));
        let info = self
            .info
            .or_else(|| self.base_trailer.get("Info").and_then(Object::as_reference));
        if let Some(info) = info {
            trailer.insert("Info".to_string(), Object::Reference(info));
        }
        if let Some(id) = self.base_trailer.get("ID") {
            trailer.insert("ID".to_string(), id.clone());
        }

        match stream_id {
            Some(stream_id) => {
                let (index, rows) = stream_rows(&offsets, self.prev.is_none());
                let data = encode_flate(&rows)?;
                let mut d = dict([
                    ("Type", name("XRef")),
                    ("W", Object::Array([1, 4, 2].into_iter().map(Object::Integer).collect())),
                    ("Index", Object::Array(index.into_iter().map(Object::Integer).collect())),
                    ("Filter", name("FlateDecode")),
                ]);
                d.extend(trailer);
                let stream = Object::Stream {
                    dict: d,
                    data: bytes::Bytes::from(data),
                };
                write!(out, "{} 0 obj\n", stream_id)?;
                out.extend_from_slice(&ObjectSerializer::serialize(&stream));
                out.extend_from_slice(b"\nendobj\n");
            },
            None => {
                out.extend_from_slice(b"xref\n");
                if self.prev.is_none() {
                    offsets.entry(0).or_insert(usize::MAX);
                }
                for run in contiguous_runs(&offsets) {
                    write!(out, "{} {}\n", run[0].0, run.len())?;
                    for (_, offset) in run {
                        if offset == usize::MAX {
                            out.extend_from_slice(b"0000000000 65535 f \n");
                        } else {
                            write!(out, "{:010} 00000 n \n", offset)?;
                        }
                    }
                }
                out.extend_from_slice(b"trailer\n");
                out.extend_from_slice(&ObjectSerializer::serialize(&Object::Dictionary(trailer)));
                out.push(b'\n');
            },
        }
        write!(out, "startxref\n{}\n%%EOF\n", xref_offset)?;

        log::debug!(
            "Wrote incremental update: {} object(s), xref at {}",
            self.objects.len(),
            xref_offset
        );

        Ok(UpdateOutput {
            bytes: out,
            body_offsets,
            xref_offset,
        })
    }
}

fn contiguous_runs(offsets: &BTreeMap<u32, usize>) -> Vec<Vec<(u32, usize)>> {
    let mut runs: Vec<Vec<(u32, usize)>> = Vec::new();
    for (&id, &offset) in offsets {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|(last, _)| *last + 1 == id) => {
                run.push((id, offset))
            },
            _ => runs.push(vec![(id, offset)]),
        }
    }
    runs
}

/// `/Index` pairs and `W [1 4 2]` rows for a cross-reference stream.
fn stream_rows(offsets: &BTreeMap<u32, usize>, fresh: bool) -> (Vec<i64>, Vec<u8>) {
    let mut offsets = offsets.clone();
    if fresh {
        offsets.entry(0).or_insert(usize::MAX);
    }
    let mut index = Vec::new();
    let mut rows = Vec::new();
    for run in contiguous_runs(&offsets) {
        index.push(i64::from(run[0].0));
        index.push(run.len() as i64);
        for (_, offset) in run {
            if offset == usize::MAX {
                rows.extend_from_slice(&[0, 0, 0, 0, 0, 0xFF, 0xFF]);
            } else {
                rows.push(1);
                rows.extend_from_slice(&(offset as u32).to_be_bytes());
                rows.extend_from_slice(&[0, 0]);
            }
        }
    }
    (index, rows)
}
