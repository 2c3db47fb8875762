//! ByteRange handling for PDF signatures.
//!
//! A signature covers `[0, a, b, c]`: the bytes before the `/Contents` hex
//! string and the bytes after it. Both the `/ByteRange` array and the
//! `/Contents` string are written as fixed-width placeholders first, then
//! patched in place once the final file length is known, so no offset moves.

use crate::error::{Error, Result};

/// Digits reserved for each of the last three `/ByteRange` numbers.
const BYTE_RANGE_DIGITS: usize = 10;

/// Calculator for PDF signature byte ranges.
#[derive(Debug)]
pub struct ByteRangeCalculator {
    /// Size of the `/Contents` value: hex digits plus the two angle brackets
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Create a calculator reserving room for `estimated_signature_size`
    /// bytes of DER.
    pub fn new(estimated_signature_size: usize) -> Self {
        Self {
            placeholder_size: estimated_signature_size * 2 + 2,
        }
    }

    /// Create a calculator with an exact `/Contents` placeholder size.
    pub fn with_placeholder_size(placeholder_size: usize) -> Self {
        Self { placeholder_size }
    }

    /// Size of the `/Contents` value including brackets.
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// `<000...0>` filling the whole placeholder.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size.saturating_sub(2)))
    }

    /// Fixed-width `/ByteRange` placeholder, the same length as any value
    /// written later by [`format_byte_range_padded`](Self::format_byte_range_padded).
    pub fn byte_range_placeholder() -> String {
        Self::format_byte_range_padded(&[0, 0, 0, 0])
    }

    /// `[0 a b c]` where `a`, `b` and `c` are zero-padded, trailing spaces
    /// keep the width constant.
    pub fn format_byte_range_padded(byte_range: &[i64; 4]) -> String {
        format!(
            "[{} {:0w$} {:0w$} {:0w$}]",
            byte_range[0],
            byte_range[1],
            byte_range[2],
            byte_range[3],
            w = BYTE_RANGE_DIGITS
        )
    }

    /// `[0, before_sig, after_sig_start, after_sig_len]`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let before_sig = contents_offset as i64;
        let after_sig_start = (contents_offset + self.placeholder_size) as i64;
        let after_sig_len = file_size as i64 - after_sig_start;
        [0, before_sig, after_sig_start, after_sig_len]
    }

    /// Concatenate the two signed ranges.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let [o1, l1, o2, l2] = Self::as_usize(byte_range)?;
        if o1 + l1 > pdf_data.len() || o2 + l2 > pdf_data.len() {
            return Err(Error::InvalidPdf(format!(
                "ByteRange {:?} exceeds file size {}",
                byte_range,
                pdf_data.len()
            )));
        }
        let mut signed = Vec::with_capacity(l1 + l2);
        signed.extend_from_slice(&pdf_data[o1..o1 + l1]);
        signed.extend_from_slice(&pdf_data[o2..o2 + l2]);
        Ok(signed)
    }

    /// Check that the range starts at 0, has a gap, and ends at `covered_len`.
    pub fn validate_byte_range(byte_range: &[i64; 4], covered_len: usize) -> Result<()> {
        let [o1, l1, o2, l2] = Self::as_usize(byte_range)?;
        if o1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", o1)));
        }
        if l1 > o2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps second range start ({})",
                l1, o2
            )));
        }
        if o2 + l2 != covered_len {
            return Err(Error::InvalidPdf(format!(
                "ByteRange must end at {}, got {}",
                covered_len,
                o2 + l2
            )));
        }
        Ok(())
    }

    fn as_usize(byte_range: &[i64; 4]) -> Result<[usize; 4]> {
        let mut out = [0usize; 4];
        for (slot, value) in out.iter_mut().zip(byte_range) {
            *slot = usize::try_from(*value)
                .map_err(|_| Error::InvalidPdf(format!("negative ByteRange value {}", value)))?;
        }
        Ok(out)
    }

    /// Overwrite the `/Contents` placeholder with the hex signature,
    /// zero-padded to the placeholder width.
    pub fn insert_signature(
        &self,
        pdf_data: &mut [u8],
        contents_offset: usize,
        signature_hex: &str,
    ) -> Result<()> {
        if signature_hex.len() + 2 > self.placeholder_size {
            return Err(Error::Crypto(format!(
                "signature ({} hex digits) exceeds placeholder ({} bytes)",
                signature_hex.len(),
                self.placeholder_size
            )));
        }
        if contents_offset + self.placeholder_size > pdf_data.len() {
            return Err(Error::InvalidPdf("signature insertion exceeds file bounds".to_string()));
        }
        let mut value = String::with_capacity(self.placeholder_size);
        value.push('<');
        value.push_str(signature_hex);
        value.push_str(&"0".repeat(self.placeholder_size - 2 - signature_hex.len()));
        value.push('>');
        let end = contents_offset + self.placeholder_size;
        pdf_data[contents_offset..end].copy_from_slice(value.as_bytes());
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(8192)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_size() {
        assert_eq!(ByteRangeCalculator::new(1024).placeholder_size(), 2050);
        let small = ByteRangeCalculator::with_placeholder_size(10);
        assert_eq!(small.generate_placeholder(), "<00000000>");
    }

    #[test]
    fn test_byte_range_placeholder_width_is_stable() {
        let placeholder = ByteRangeCalculator::byte_range_placeholder();
        let real = ByteRangeCalculator::format_byte_range_padded(&[0, 1234, 21000, 987]);
        assert_eq!(placeholder.len(), real.len());
        assert_eq!(real, "[0 0000001234 0000021000 0000000987]");
    }

    #[test]
    fn test_calculate_byte_range() {
        let calc = ByteRangeCalculator::with_placeholder_size(100);
        assert_eq!(calc.calculate_byte_range(1000, 400), [0, 400, 500, 500]);
    }

    #[test]
    fn test_extract_signed_bytes() {
        let signed =
            ByteRangeCalculator::extract_signed_bytes(b"AAABBBCCC", &[0, 3, 6, 3]).unwrap();
        assert_eq!(signed, b"AAACCC");
        assert!(ByteRangeCalculator::extract_signed_bytes(b"AAA", &[0, 3, 6, 3]).is_err());
        assert!(ByteRangeCalculator::extract_signed_bytes(b"AAA", &[0, -3, 6, 3]).is_err());
    }

    #[test]
    fn test_validate_byte_range() {
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 100, 150, 50], 200).is_ok());
        assert!(ByteRangeCalculator::validate_byte_range(&[10, 100, 150, 50], 200).is_err());
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 100, 150, 100], 200).is_err());
        assert!(ByteRangeCalculator::validate_byte_range(&[0, 160, 150, 50], 200).is_err());
    }

    #[test]
    fn test_insert_signature() {
        let calc = ByteRangeCalculator::with_placeholder_size(10);
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        calc.insert_signature(&mut pdf_data, 2, "ABCD").unwrap();
        assert_eq!(&pdf_data, b"XX<ABCD0000>YY");
        assert!(calc.insert_signature(&mut pdf_data, 2, "AABBCCDDEE").is_err());
    }
}
