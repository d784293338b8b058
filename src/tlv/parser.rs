//! BER-TLV parser
//!
//! Parses the BER-TLV structures carried in card responses. The entry points
//! are strict: a truncated length or value is an error, because the FCP
//! decoder must treat such responses as a data-integrity fault rather than
//! stopping quietly at the damage.

use thiserror::Error;

/// Errors that can occur during TLV parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    #[error("unexpected end of data while parsing tag")]
    TruncatedTag,

    #[error("unexpected end of data while parsing length")]
    TruncatedLength,

    #[error("value of tag {tag:#x} runs past end of data")]
    TruncatedValue { tag: u32 },

    #[error("indefinite length not supported")]
    IndefiniteLength,

    #[error("length field of {0} bytes too large")]
    LengthTooLarge(usize),
}

/// A decoded TLV element.
///
/// `tag` holds 1-3 tag bytes packed into a u32. Constructed elements carry
/// their children in `children`; their raw value is kept as well so callers
/// that treat a constructed tag opaquely can re-emit it unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// The tag (1-3 bytes, big-endian packed).
    pub tag: u32,
    /// The raw value bytes.
    pub value: Vec<u8>,
    /// Child elements if this tag is constructed.
    pub children: Vec<Tlv>,
}

impl Tlv {
    /// Create a primitive TLV.
    pub fn new(tag: u32, value: Vec<u8>) -> Self {
        Self {
            tag,
            value,
            children: Vec::new(),
        }
    }

    /// True if the tag byte marks a constructed element.
    pub fn is_constructed(&self) -> bool {
        (first_tag_byte(self.tag) & 0x20) != 0
    }

    /// Find a direct child by tag (non-recursive).
    pub fn child(&self, tag: u32) -> Option<&Tlv> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Depth-first search for a tag, starting with self.
    pub fn find(&self, tag: u32) -> Option<&Tlv> {
        if self.tag == tag {
            return Some(self);
        }
        for child in &self.children {
            if let Some(found) = child.find(tag) {
                return Some(found);
            }
        }
        None
    }
}

fn first_tag_byte(tag: u32) -> u8 {
    if tag > 0xFFFF {
        (tag >> 16) as u8
    } else if tag > 0xFF {
        (tag >> 8) as u8
    } else {
        tag as u8
    }
}

/// Parse a whole buffer into a list of TLVs, recursing into constructed
/// tags. Filler bytes (0x00, 0xFF) between elements are skipped.
pub fn parse_all(data: &[u8]) -> Result<Vec<Tlv>, TlvError> {
    let mut out = Vec::new();
    let mut rest = data;
    loop {
        while let [first, tail @ ..] = rest {
            if *first == 0x00 || *first == 0xFF {
                rest = tail;
            } else {
                break;
            }
        }
        if rest.is_empty() {
            return Ok(out);
        }
        let (tlv, tail) = parse_one(rest)?;
        out.push(tlv);
        rest = tail;
    }
}

/// Parse a single TLV, returning it together with the unconsumed tail.
pub fn parse_one(data: &[u8]) -> Result<(Tlv, &[u8]), TlvError> {
    let (tag, tag_len) = parse_tag(data)?;
    let (length, len_len) = parse_length(&data[tag_len..])?;
    let header = tag_len + len_len;
    if data.len() < header + length {
        return Err(TlvError::TruncatedValue { tag });
    }
    let value = data[header..header + length].to_vec();
    let children = if (first_tag_byte(tag) & 0x20) != 0 && !value.is_empty() {
        parse_all(&value)?
    } else {
        Vec::new()
    };
    Ok((
        Tlv {
            tag,
            value,
            children,
        },
        &data[header + length..],
    ))
}

/// Parse a BER tag (1-3 bytes).
fn parse_tag(data: &[u8]) -> Result<(u32, usize), TlvError> {
    let first = *data.first().ok_or(TlvError::TruncatedTag)?;
    // Low 5 bits all set means a multi-byte tag follows.
    if (first & 0x1F) != 0x1F {
        return Ok((first as u32, 1));
    }
    let second = *data.get(1).ok_or(TlvError::TruncatedTag)?;
    if (second & 0x80) == 0 {
        return Ok((((first as u32) << 8) | second as u32, 2));
    }
    let third = *data.get(2).ok_or(TlvError::TruncatedTag)?;
    Ok((
        ((first as u32) << 16) | ((second as u32) << 8) | third as u32,
        3,
    ))
}

/// Parse a BER length (definite form, up to 4 length bytes).
fn parse_length(data: &[u8]) -> Result<(usize, usize), TlvError> {
    let first = *data.first().ok_or(TlvError::TruncatedLength)?;
    if (first & 0x80) == 0 {
        return Ok((first as usize, 1));
    }
    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 {
        return Err(TlvError::IndefiniteLength);
    }
    if num_bytes > 4 {
        return Err(TlvError::LengthTooLarge(num_bytes));
    }
    if data.len() < 1 + num_bytes {
        return Err(TlvError::TruncatedLength);
    }
    let mut length = 0usize;
    for b in &data[1..1 + num_bytes] {
        length = (length << 8) | *b as usize;
    }
    Ok((length, 1 + num_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive() {
        let data = hex::decode("83023f00").unwrap();
        let tlvs = parse_all(&data).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].tag, 0x83);
        assert_eq!(tlvs[0].value, vec![0x3F, 0x00]);
        assert!(tlvs[0].children.is_empty());
    }

    #[test]
    fn test_two_byte_tag() {
        let data = hex::decode("5f500b6578616d706c652e636f6d").unwrap();
        let tlvs = parse_all(&data).unwrap();
        assert_eq!(tlvs[0].tag, 0x5F50);
        assert_eq!(tlvs[0].value, b"example.com");
    }

    #[test]
    fn test_constructed_recursion() {
        // 62 template containing 83 (fid) and 8A (life cycle)
        let data = hex::decode("620783027f108a0105").unwrap();
        let tlvs = parse_all(&data).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert!(tlvs[0].is_constructed());
        assert_eq!(tlvs[0].children.len(), 2);
        assert_eq!(tlvs[0].child(0x83).unwrap().value, vec![0x7F, 0x10]);
        assert_eq!(tlvs[0].find(0x8A).unwrap().value, vec![0x05]);
    }

    #[test]
    fn test_long_length() {
        let mut data = vec![0xC0, 0x81, 0x80];
        data.extend(vec![0x55; 128]);
        let tlvs = parse_all(&data).unwrap();
        assert_eq!(tlvs[0].value.len(), 128);
    }

    #[test]
    fn test_filler_bytes_skipped() {
        let data = hex::decode("00ff83023f00").unwrap();
        let tlvs = parse_all(&data).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].tag, 0x83);
    }

    #[test]
    fn test_truncated_value_is_error() {
        let data = hex::decode("83053f00").unwrap();
        assert_eq!(
            parse_all(&data),
            Err(TlvError::TruncatedValue { tag: 0x83 })
        );
    }

    #[test]
    fn test_truncated_length_is_error() {
        assert_eq!(parse_all(&[0x83, 0x82, 0x01]), Err(TlvError::TruncatedLength));
    }

    #[test]
    fn test_indefinite_length_rejected() {
        assert_eq!(parse_all(&[0x30, 0x80, 0x00]), Err(TlvError::IndefiniteLength));
    }

    #[test]
    fn test_multiple_elements() {
        let data = hex::decode("800200648a0105").unwrap();
        let tlvs = parse_all(&data).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].tag, 0x80);
        assert_eq!(tlvs[1].tag, 0x8A);
    }
}
