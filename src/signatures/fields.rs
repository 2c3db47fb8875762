//! Signature field discovery.

use super::types::{SignatureInfo, SignatureSubFilter};
use crate::error::{Error, Result};
use crate::pdf::object::{Dictionary, Object, ObjectRef};
use crate::pdf::PdfFile;

/// A `/FT /Sig` form field.
#[derive(Debug, Clone)]
pub struct SignatureField {
    /// Field object
    pub field_ref: ObjectRef,
    /// Fully qualified name (`/T`)
    pub name: String,
    /// `/V` reference, absent for unsigned fields
    pub value_ref: Option<ObjectRef>,
    /// Resolved signature dictionary, absent for unsigned fields
    pub signature: Option<Dictionary>,
}

impl SignatureField {
    /// Whether the field holds a signature.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// The `/ByteRange` of the signature, if signed.
    pub fn byte_range(&self) -> Result<Option<[i64; 4]>> {
        let Some(sig) = &self.signature else {
            return Ok(None);
        };
        let values = sig
            .get("ByteRange")
            .and_then(Object::as_array)
            .ok_or_else(|| {
                Error::InvalidPdf(format!("signature {} has no /ByteRange", self.name))
            })?;
        if values.len() != 4 {
            return Err(Error::InvalidPdf(format!(
                "/ByteRange of {} has {} elements",
                self.name,
                values.len()
            )));
        }
        let mut out = [0i64; 4];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = value
                .as_integer()
                .ok_or_else(|| Error::InvalidPdf("non-integer /ByteRange value".to_string()))?;
        }
        Ok(Some(out))
    }

    /// Raw `/Contents` bytes (DER plus zero padding).
    pub fn contents(&self) -> Option<&[u8]> {
        self.signature.as_ref()?.get("Contents")?.as_string()
    }

    /// Offset one past the last signed byte.
    pub fn signed_end(&self) -> Result<Option<usize>> {
        Ok(self.byte_range()?.map(|br| (br[2] + br[3]).max(0) as usize))
    }
}

/// Every signature field of the document, in AcroForm order.
pub fn signature_fields(file: &PdfFile) -> Result<Vec<SignatureField>> {
    let mut out = Vec::new();
    for (field_ref, dict) in file.form_fields()? {
        let is_sig = field_type(file, &dict)?.as_deref() == Some("Sig");
        if !is_sig {
            continue;
        }
        let name = dict
            .get("T")
            .and_then(Object::as_string)
            .map(|t| String::from_utf8_lossy(t).into_owned())
            .unwrap_or_default();
        let value_ref = dict.get("V").and_then(Object::as_reference);
        let signature = match file.resolve_key(&dict, "V")? {
            Some(Object::Dictionary(d)) => Some(d),
            _ => None,
        };
        out.push(SignatureField {
            field_ref,
            name,
            value_ref,
            signature,
        });
    }
    Ok(out)
}

/// `/FT`, inherited from `/Parent` when absent.
fn field_type(file: &PdfFile, dict: &Dictionary) -> Result<Option<String>> {
    let mut current = dict.clone();
    for _ in 0..file.options().max_nesting {
        if let Some(ft) = current.get("FT").and_then(Object::as_name) {
            return Ok(Some(ft.to_string()));
        }
        match file.resolve_key(&current, "Parent")? {
            Some(Object::Dictionary(parent)) => current = parent,
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Read the descriptive entries of a signature dictionary.
pub fn extract_signature_info(sig: &Dictionary) -> Result<SignatureInfo> {
    let text = |key: &str| {
        sig.get(key)
            .and_then(Object::as_string)
            .map(|s| String::from_utf8_lossy(s).into_owned())
    };
    let byte_range = match sig.get("ByteRange").and_then(Object::as_array) {
        Some(values) if values.len() == 4 => {
            let nums: Vec<i64> = values.iter().filter_map(Object::as_integer).collect();
            let br: [i64; 4] = nums
                .try_into()
                .map_err(|_| Error::InvalidPdf("non-integer /ByteRange value".to_string()))?;
            Some(br)
        },
        _ => None,
    };
    Ok(SignatureInfo {
        signer_name: text("Name"),
        signing_time: text("M"),
        reason: text("Reason"),
        location: text("Location"),
        contact_info: text("ContactInfo"),
        sub_filter: sig
            .get("SubFilter")
            .and_then(Object::as_name)
            .and_then(SignatureSubFilter::from_pdf_name),
        byte_range,
    })
}
