//! BER-TLV encoder
//!
//! Emits TLV structures; the virtual card uses this to build FCP templates.

/// Encode a tag-value pair to bytes.
pub fn encode(tag: u32, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 6);
    out.extend(encode_tag(tag));
    out.extend(encode_length(value.len()));
    out.extend_from_slice(value);
    out
}

/// Encode just the tag bytes (1-3 bytes, big-endian packed u32).
pub fn encode_tag(tag: u32) -> Vec<u8> {
    if tag > 0xFFFF {
        vec![(tag >> 16) as u8, (tag >> 8) as u8, tag as u8]
    } else if tag > 0xFF {
        vec![(tag >> 8) as u8, tag as u8]
    } else {
        vec![tag as u8]
    }
}

/// Encode a definite-form length.
pub fn encode_length(length: usize) -> Vec<u8> {
    if length < 128 {
        vec![length as u8]
    } else if length < 256 {
        vec![0x81, length as u8]
    } else {
        vec![0x82, (length >> 8) as u8, length as u8]
    }
}

/// Builder for nested TLV structures.
///
/// ```ignore
/// let fcp = TlvBuilder::new()
///     .add(0x82, &[0x41, 0x21])
///     .add(0x83, &fid.to_be_bytes())
///     .wrap(0x62)
///     .build();
/// ```
#[derive(Default)]
pub struct TlvBuilder {
    data: Vec<u8>,
}

impl TlvBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a primitive TLV.
    pub fn add(mut self, tag: u32, value: &[u8]) -> Self {
        self.data.extend(encode(tag, value));
        self
    }

    /// Append a primitive TLV only if the value is present.
    pub fn add_opt(self, tag: u32, value: Option<&[u8]>) -> Self {
        match value {
            Some(v) => self.add(tag, v),
            None => self,
        }
    }

    /// Append pre-encoded bytes.
    pub fn add_raw(mut self, raw: &[u8]) -> Self {
        self.data.extend_from_slice(raw);
        self
    }

    /// Wrap everything added so far in a constructed tag.
    pub fn wrap(self, tag: u32) -> Self {
        Self {
            data: encode(tag, &self.data),
        }
    }

    /// Finish and return the encoded bytes.
    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlv::parse_all;

    #[test]
    fn test_encode_simple() {
        assert_eq!(encode(0x83, &[0x3F, 0x00]), vec![0x83, 0x02, 0x3F, 0x00]);
    }

    #[test]
    fn test_encode_two_byte_tag() {
        let out = encode(0x5F50, b"test");
        assert_eq!(&out[..3], &[0x5F, 0x50, 0x04]);
        assert_eq!(&out[3..], b"test");
    }

    #[test]
    fn test_encode_lengths() {
        assert_eq!(encode_length(0), vec![0x00]);
        assert_eq!(encode_length(127), vec![0x7F]);
        assert_eq!(encode_length(128), vec![0x81, 0x80]);
        assert_eq!(encode_length(256), vec![0x82, 0x01, 0x00]);
    }

    #[test]
    fn test_builder_round_trip() {
        let out = TlvBuilder::new()
            .add(0x82, &[0x41, 0x21])
            .add(0x83, &[0x2F, 0xE2])
            .add_opt(0x88, None)
            .wrap(0x62)
            .build();

        let tlvs = parse_all(&out).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].tag, 0x62);
        assert_eq!(tlvs[0].children.len(), 2);
        assert_eq!(tlvs[0].child(0x83).unwrap().value, vec![0x2F, 0xE2]);
    }
}
