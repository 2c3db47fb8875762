//! An opened PDF file with its revision chain.
//!
//! [`PdfFile`] keeps the raw bytes, every cross-reference section reachable
//! through `/Prev` and the merged object table of the newest revision.
//! Each incremental update is exposed as a [`Revision`] so that earlier
//! states of the document can be reopened byte-exactly.

use super::filters::decode_stream;
use super::object::{Dictionary, Object, ObjectRef};
use super::parser::{parse_indirect_object, parse_object, to_parse_error};
use super::xref::{find_startxref, parse_section, XRefEntry, XRefSection};
use crate::error::{Error, Result};
use crate::parser_config::ParserOptions;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Reference chains longer than this are treated as cycles.
const MAX_RESOLVE_DEPTH: usize = 32;

/// One incremental-update section of a document.
#[derive(Debug, Clone)]
pub struct Revision {
    /// Zero-based position, oldest first
    pub index: usize,
    /// Offset of the cross-reference section
    pub xref_offset: usize,
    /// Byte length of the document as of this revision (through `%%EOF`)
    pub end: usize,
    /// Whether the section is a cross-reference stream
    pub is_stream: bool,
    /// Entries declared by this revision only
    pub entries: BTreeMap<u32, XRefEntry>,
    /// Trailer of this revision
    pub trailer: Dictionary,
}

/// Decoded object stream: `(object number, offset)` pairs plus the body.
#[derive(Debug)]
struct ObjectStream {
    offsets: Vec<(u32, usize)>,
    body: Vec<u8>,
}

/// A parsed PDF file.
#[derive(Debug)]
pub struct PdfFile {
    data: bytes::Bytes,
    options: ParserOptions,
    revisions: Vec<Revision>,
    xref: BTreeMap<u32, XRefEntry>,
    trailer: Dictionary,
    objstm_cache: RwLock<HashMap<u32, Arc<ObjectStream>>>,
}

impl PdfFile {
    /// Open a document with default parser options.
    pub fn from_bytes(data: impl Into<bytes::Bytes>) -> Result<Self> {
        Self::parse(data, ParserOptions::default())
    }

    /// Open a document.
    pub fn parse(data: impl Into<bytes::Bytes>, options: ParserOptions) -> Result<Self> {
        let data: bytes::Bytes = data.into();
        if !options.accepts_file_size(data.len()) {
            return Err(Error::InvalidPdf(format!(
                "file size {} exceeds limit {}",
                data.len(),
                options.max_file_size
            )));
        }
        let header_window = &data[..data.len().min(1024)];
        if !header_window.windows(5).any(|w| w == b"%PDF-") {
            return Err(Error::InvalidPdf("missing %PDF- header".to_string()));
        }

        // Newest first while walking /Prev
        let mut sections: Vec<XRefSection> = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(find_startxref(&data)?);
        while let Some(offset) = next {
            if !seen.insert(offset) {
                log::warn!("Cross-reference /Prev loop at offset {}", offset);
                break;
            }
            if sections.len() >= options.max_revisions {
                return Err(Error::InvalidPdf(format!(
                    "more than {} revisions",
                    options.max_revisions
                )));
            }
            let section = parse_section(&data, offset, &options)?;
            next = section.prev();
            sections.push(section);
        }
        sections.reverse();

        let mut revisions = Vec::with_capacity(sections.len());
        let mut last_end = 0usize;
        for (index, section) in sections.into_iter().enumerate() {
            let end = revision_end(&data, section.offset).unwrap_or(data.len()).max(last_end);
            last_end = end;
            revisions.push(Revision {
                index,
                xref_offset: section.offset,
                end,
                is_stream: section.is_stream,
                entries: section.entries,
                trailer: section.trailer,
            });
        }

        let mut xref = BTreeMap::new();
        for rev in &revisions {
            for (id, entry) in &rev.entries {
                xref.insert(*id, *entry);
            }
        }
        let trailer = revisions
            .last()
            .map(|r| r.trailer.clone())
            .ok_or(Error::InvalidXref)?;

        log::debug!(
            "Opened PDF: {} bytes, {} revision(s), {} xref entries",
            data.len(),
            revisions.len(),
            xref.len()
        );

        Ok(Self {
            data,
            options,
            revisions,
            xref,
            trailer,
            objstm_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Parser options the file was opened with.
    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Revisions, oldest first.
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    /// Trailer of the newest revision.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> usize {
        self.revisions.last().map(|r| r.xref_offset).unwrap_or(0)
    }

    /// Whether the newest revision uses a cross-reference stream.
    pub fn uses_xref_stream(&self) -> bool {
        self.revisions.last().is_some_and(|r| r.is_stream)
    }

    /// First object number not yet allocated (`/Size`).
    pub fn next_object_id(&self) -> u32 {
        let from_trailer = self
            .trailer
            .get("Size")
            .and_then(Object::as_integer)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);
        let from_xref = self.xref.keys().next_back().map(|id| id + 1).unwrap_or(0);
        from_trailer.max(from_xref)
    }

    /// Numbers of every in-use object.
    pub fn object_ids(&self) -> Vec<u32> {
        self.xref
            .iter()
            .filter(|(_, e)| e.is_in_use())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Cross-reference entry for an object number.
    pub fn entry(&self, id: u32) -> Option<XRefEntry> {
        self.xref.get(&id).copied()
    }

    /// Reopen the document as it was at the end of revision `index`.
    pub fn revision_view(&self, index: usize) -> Result<PdfFile> {
        let rev = self
            .revisions
            .get(index)
            .ok_or_else(|| Error::not_found("revision", index))?;
        PdfFile::parse(self.data.slice(..rev.end), self.options)
    }

    /// `/Root` reference.
    pub fn root_ref(&self) -> Result<ObjectRef> {
        self.trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("trailer has no /Root".to_string()))
    }

    /// Document catalog dictionary.
    pub fn catalog(&self) -> Result<Dictionary> {
        let root = self.root_ref()?;
        self.get_object(root)?
            .as_dict()
            .cloned()
            .ok_or_else(|| Error::InvalidPdf("catalog is not a dictionary".to_string()))
    }

    /// Load an indirect object.
    pub fn get_object(&self, r: ObjectRef) -> Result<Object> {
        match self.xref.get(&r.id) {
            Some(XRefEntry::InUse { offset, .. }) => {
                let offset = *offset;
                if offset >= self.data.len() {
                    return Err(Error::ObjectNotFound(r.id, r.gen));
                }
                let input = &self.data[offset..];
                let (_, (found, obj)) = parse_indirect_object(input, self.options.max_nesting)
                    .map_err(|e| to_parse_error(input, offset, e))?;
                if found.id != r.id {
                    return Err(Error::InvalidPdf(format!(
                        "xref points object {} at {}, found {}",
                        r.id, offset, found.id
                    )));
                }
                Ok(obj)
            },
            Some(XRefEntry::Compressed { stream_id, index }) => {
                self.get_compressed(r, *stream_id, *index as usize)
            },
            _ => Err(Error::ObjectNotFound(r.id, r.gen)),
        }
    }

    fn get_compressed(&self, r: ObjectRef, stream_id: u32, index: usize) -> Result<Object> {
        let stream = self.object_stream(stream_id)?;
        let (id, start) = *stream
            .offsets
            .get(index)
            .filter(|(id, _)| *id == r.id)
            .or_else(|| stream.offsets.iter().find(|(id, _)| *id == r.id))
            .ok_or(Error::ObjectNotFound(r.id, r.gen))?;
        let body = stream.body.get(start..).ok_or(Error::ObjectNotFound(id, r.gen))?;
        let (_, obj) = parse_object(body).map_err(|e| to_parse_error(body, start, e))?;
        Ok(obj)
    }

    fn object_stream(&self, stream_id: u32) -> Result<Arc<ObjectStream>> {
        if let Some(cached) = self.objstm_cache.read().get(&stream_id) {
            return Ok(Arc::clone(cached));
        }
        // Object streams never live inside other object streams
        let offset = match self.xref.get(&stream_id) {
            Some(XRefEntry::InUse { offset, .. }) => *offset,
            _ => return Err(Error::ObjectNotFound(stream_id, 0)),
        };
        let input = self.data.get(offset..).ok_or(Error::ObjectNotFound(stream_id, 0))?;
        let (_, (_, obj)) = parse_indirect_object(input, self.options.max_nesting)
            .map_err(|e| to_parse_error(input, offset, e))?;
        let (dict, raw) = match obj {
            Object::Stream { dict, data } => (dict, data),
            _ => return Err(Error::InvalidPdf(format!("object {} is not a stream", stream_id))),
        };
        let decoded = decode_stream(&dict, &raw, self.options.max_decompressed_size)?;
        let n = dict.get("N").and_then(Object::as_integer).unwrap_or(0).max(0) as usize;
        let first = dict.get("First").and_then(Object::as_integer).unwrap_or(0).max(0) as usize;

        let header = decoded
            .get(..first)
            .ok_or_else(|| Error::InvalidPdf("bad object stream /First".to_string()))?;
        let numbers: Vec<usize> = std::str::from_utf8(header)
            .map_err(|_| Error::InvalidPdf("object stream header is not ASCII".to_string()))?
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        let offsets: Vec<(u32, usize)> = numbers
            .chunks_exact(2)
            .take(n)
            .map(|pair| (pair[0] as u32, pair[1]))
            .collect();
        let body = decoded[first..].to_vec();

        let stream = Arc::new(ObjectStream { offsets, body });
        self.objstm_cache.write().insert(stream_id, Arc::clone(&stream));
        Ok(stream)
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(r) => current = self.get_object(r)?,
                other => return Ok(other),
            }
        }
        Err(Error::RecursionLimitExceeded(MAX_RESOLVE_DEPTH as u32))
    }

    /// Look up `key` in `dict` and resolve the value.
    pub fn resolve_key(&self, dict: &Dictionary, key: &str) -> Result<Option<Object>> {
        dict.get(key).map(|v| self.resolve(v)).transpose()
    }

    /// Page object references in document order.
    pub fn page_refs(&self) -> Result<Vec<ObjectRef>> {
        let catalog = self.catalog()?;
        let pages = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::InvalidPdf("catalog has no /Pages".to_string()))?;
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(pages, &mut out, &mut visited, 0)?;
        Ok(out)
    }

    fn collect_pages(
        &self,
        node: ObjectRef,
        out: &mut Vec<ObjectRef>,
        visited: &mut HashSet<ObjectRef>,
        depth: usize,
    ) -> Result<()> {
        if depth > self.options.max_nesting {
            return Err(Error::RecursionLimitExceeded(self.options.max_nesting as u32));
        }
        if !visited.insert(node) {
            return Ok(());
        }
        let obj = self.get_object(node)?;
        match obj.dict_type() {
            Some("Pages") => {
                let kids = match obj.get("Kids") {
                    Some(k) => self.resolve(k)?,
                    None => Object::Array(Vec::new()),
                };
                for kid in kids.as_array().into_iter().flatten() {
                    if let Some(r) = kid.as_reference() {
                        self.collect_pages(r, out, visited, depth + 1)?;
                    }
                }
            },
            _ => out.push(node),
        }
        Ok(())
    }

    /// Terminal form fields reachable from `/AcroForm /Fields`.
    pub fn form_fields(&self) -> Result<Vec<(ObjectRef, Dictionary)>> {
        let catalog = self.catalog()?;
        let acroform = match self.resolve_key(&catalog, "AcroForm")? {
            Some(Object::Dictionary(d)) => d,
            _ => return Ok(Vec::new()),
        };
        let fields = match self.resolve_key(&acroform, "Fields")? {
            Some(Object::Array(items)) => items,
            _ => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        for field in fields.iter().filter_map(Object::as_reference) {
            self.collect_fields(field, &mut out, &mut visited, 0)?;
        }
        Ok(out)
    }

    fn collect_fields(
        &self,
        node: ObjectRef,
        out: &mut Vec<(ObjectRef, Dictionary)>,
        visited: &mut HashSet<ObjectRef>,
        depth: usize,
    ) -> Result<()> {
        if depth > self.options.max_nesting || !visited.insert(node) {
            return Ok(());
        }
        let dict = match self.get_object(node)? {
            Object::Dictionary(d) => d,
            _ => return Ok(()),
        };
        let kids: Vec<ObjectRef> = dict
            .get("Kids")
            .and_then(Object::as_array)
            .map(|k| k.iter().filter_map(Object::as_reference).collect())
            .unwrap_or_default();
        // Widget-only kids do not make the parent non-terminal
        let has_field_kids = !kids.is_empty() && dict.get("FT").is_none();
        if has_field_kids {
            for kid in kids {
                self.collect_fields(kid, out, visited, depth + 1)?;
            }
        } else {
            out.push((node, dict));
        }
        Ok(())
    }
}

/// End of the revision whose cross-reference section starts at `xref_offset`.
fn revision_end(data: &[u8], xref_offset: usize) -> Option<usize> {
    let marker = b"%%EOF";
    let pos = data[xref_offset..]
        .windows(marker.len())
        .position(|w| w == marker)?;
    let mut end = xref_offset + pos + marker.len();
    if data[end..].starts_with(b"\r\n") {
        end += 2;
    } else if data[end..].starts_with(b"\n") || data[end..].starts_with(b"\r") {
        end += 1;
    }
    Some(end)
}
