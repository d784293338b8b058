//! FCP (File Control Parameters) decoder
//!
//! A successful SELECT returns an FCP template (tag 0x62, ETSI TS 102 221
//! clause 11.1.1.3) describing the selected file. [`decode_fcp`] turns that
//! TLV blob into a [`FileDescriptor`]. The decoder is pure: it never touches
//! the tree model, the caller applies the result to the matching node.

use serde::Serialize;
use thiserror::Error;

use crate::tlv::{self, Tlv, TlvError};

/// FCP template tags recognized by the decoder.
pub mod tag {
    /// Top-level FCP template.
    pub const FCP_TEMPLATE: u32 = 0x62;
    /// File size excluding structural overhead.
    pub const FILE_SIZE: u32 = 0x80;
    /// Total allocated size.
    pub const TOTAL_SIZE: u32 = 0x81;
    /// File descriptor (category, structure, record geometry). Mandatory.
    pub const FILE_DESCRIPTOR: u32 = 0x82;
    /// 2-byte file identifier.
    pub const FILE_ID: u32 = 0x83;
    /// DF name (AID) for ADFs.
    pub const DF_NAME: u32 = 0x84;
    /// Short file identifier, coded in bits b8-b4.
    pub const SFI: u32 = 0x88;
    /// Life cycle status byte.
    pub const LIFE_CYCLE: u32 = 0x8A;
}

/// Errors produced while decoding an FCP template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FcpError {
    #[error("TLV parse error inside FCP: {0}")]
    Tlv(#[from] TlvError),

    #[error("response is not an FCP template (missing tag 62)")]
    NotFcpTemplate,

    #[error("missing mandatory file descriptor (tag 82)")]
    MissingFileDescriptor,

    #[error("file descriptor value too short ({0} bytes)")]
    DescriptorTooShort(usize),

    #[error("unsupported file descriptor byte {0:#04x}")]
    UnknownDescriptor(u8),

    #[error("tag {tag:#x} value has unexpected length {len}")]
    BadValueLength { tag: u32, len: usize },

    #[error("record-structured file reports zero record length")]
    ZeroRecordLength,

    #[error("file structure changed across selections: was {previous}, card now reports {decoded}")]
    StructureChanged {
        previous: EfStructure,
        decoded: EfStructure,
    },

    #[error("selected file category does not match the registered node")]
    CategoryMismatch,
}

/// EF data structure, fixed at first decode for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EfStructure {
    /// Flat byte array, accessed by offset.
    Transparent,
    /// Ordered fixed-size records, accessed by 1-based index.
    LinearFixed,
    /// Ring of fixed-size records; index 1 is the most recently written.
    Cyclic,
    /// Self-describing TLV records.
    BerTlv,
}

impl std::fmt::Display for EfStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EfStructure::Transparent => "transparent",
            EfStructure::LinearFixed => "linear fixed",
            EfStructure::Cyclic => "cyclic",
            EfStructure::BerTlv => "BER-TLV",
        };
        f.write_str(s)
    }
}

/// File category as reported by the file descriptor byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    /// DF, ADF or MF.
    Df,
    /// Working EF (application data).
    WorkingEf,
    /// Internal EF (card-internal data, e.g. keys).
    InternalEf,
}

/// Custom serde encoding of optional byte strings as lowercase hex.
mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }
}

fn hex_fid<S>(fid: &Option<u16>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match fid {
        Some(f) => serializer.serialize_some(&format!("{f:04x}")),
        None => serializer.serialize_none(),
    }
}

/// Structured result of decoding one FCP template.
#[derive(Debug, Clone, Serialize)]
pub struct FileDescriptor {
    /// DF vs working/internal EF.
    pub category: FileCategory,
    /// EF structure; None for DFs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<EfStructure>,
    /// Shareable bit of the descriptor byte.
    pub shareable: bool,
    /// 2-byte file identifier (tag 83).
    #[serde(serialize_with = "hex_fid")]
    pub file_id: Option<u16>,
    /// DF name / AID (tag 84).
    #[serde(with = "hex_bytes", skip_serializing_if = "Option::is_none")]
    pub df_name: Option<Vec<u8>>,
    /// Short file identifier (tag 88), already shifted down from b8-b4.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sfi: Option<u8>,
    /// File size excluding structural overhead (tag 80).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<usize>,
    /// Total allocated size (tag 81).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<usize>,
    /// Record length for record-structured files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_len: Option<usize>,
    /// Record count: explicit from the descriptor, or derived from
    /// file size / record length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_count: Option<usize>,
    /// Life cycle status byte (tag 8A).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub life_cycle: Option<u8>,
    /// Tags the decoder does not interpret (security attributes, proprietary
    /// templates, ...), preserved opaquely for forward compatibility.
    #[serde(skip)]
    pub raw: Vec<Tlv>,
}

impl FileDescriptor {
    /// True if this descriptor describes an EF.
    pub fn is_ef(&self) -> bool {
        self.category != FileCategory::Df
    }

    /// The decoded descriptor as a JSON value (what a shell layer prints
    /// after SELECT).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Decode the response body of a successful SELECT into a [`FileDescriptor`].
pub fn decode_fcp(data: &[u8]) -> Result<FileDescriptor, FcpError> {
    let tlvs = tlv::parse_all(data)?;
    let template = tlvs
        .iter()
        .find(|t| t.tag == tag::FCP_TEMPLATE)
        .ok_or(FcpError::NotFcpTemplate)?;

    let mut desc: Option<FileDescriptor> = None;
    let mut file_id = None;
    let mut df_name = None;
    let mut sfi = None;
    let mut file_size = None;
    let mut total_size = None;
    let mut life_cycle = None;
    let mut raw = Vec::new();

    for element in &template.children {
        match element.tag {
            tag::FILE_DESCRIPTOR => {
                desc = Some(decode_descriptor_bytes(&element.value)?);
            }
            tag::FILE_ID => {
                if element.value.len() != 2 {
                    return Err(FcpError::BadValueLength {
                        tag: element.tag,
                        len: element.value.len(),
                    });
                }
                file_id = Some(u16::from_be_bytes([element.value[0], element.value[1]]));
            }
            tag::DF_NAME => {
                df_name = Some(element.value.clone());
            }
            tag::SFI => {
                // Empty value means "no SFI supported"; otherwise the SFI
                // sits in the upper five bits.
                match element.value.len() {
                    0 => {}
                    1 => sfi = Some(element.value[0] >> 3),
                    len => {
                        return Err(FcpError::BadValueLength {
                            tag: element.tag,
                            len,
                        })
                    }
                }
            }
            tag::FILE_SIZE => {
                file_size = Some(be_usize(&element.value));
            }
            tag::TOTAL_SIZE => {
                total_size = Some(be_usize(&element.value));
            }
            tag::LIFE_CYCLE => {
                if element.value.len() != 1 {
                    return Err(FcpError::BadValueLength {
                        tag: element.tag,
                        len: element.value.len(),
                    });
                }
                life_cycle = Some(element.value[0]);
            }
            _ => raw.push(element.clone()),
        }
    }

    let mut fd = desc.ok_or(FcpError::MissingFileDescriptor)?;
    fd.file_id = file_id;
    fd.df_name = df_name;
    fd.sfi = sfi;
    fd.file_size = file_size;
    fd.total_size = total_size;
    fd.life_cycle = life_cycle;
    fd.raw = raw;

    // Derive the record count from size/length division when the descriptor
    // did not carry an explicit count.
    if let (Some(len), None) = (fd.record_len, fd.record_count) {
        if let Some(size) = fd.file_size {
            fd.record_count = Some(size / len);
        }
    }
    Ok(fd)
}

/// Decode the tag-82 value: descriptor byte, data coding byte, and for
/// record-structured files a 2-byte record length plus optional record count.
fn decode_descriptor_bytes(value: &[u8]) -> Result<FileDescriptor, FcpError> {
    if value.is_empty() {
        return Err(FcpError::DescriptorTooShort(0));
    }
    let fd_byte = value[0];
    let shareable = (fd_byte & 0x40) != 0;

    let (category, structure) = match fd_byte & 0xBF {
        0x38 => (FileCategory::Df, None),
        0x39 => (FileCategory::WorkingEf, Some(EfStructure::BerTlv)),
        b => {
            let category = if (b & 0x08) != 0 {
                FileCategory::InternalEf
            } else {
                FileCategory::WorkingEf
            };
            let structure = match b & 0x07 {
                0x01 => EfStructure::Transparent,
                0x02 => EfStructure::LinearFixed,
                0x06 => EfStructure::Cyclic,
                _ => return Err(FcpError::UnknownDescriptor(fd_byte)),
            };
            (category, Some(structure))
        }
    };

    let mut record_len = None;
    let mut record_count = None;
    if matches!(
        structure,
        Some(EfStructure::LinearFixed) | Some(EfStructure::Cyclic)
    ) {
        if value.len() < 4 {
            return Err(FcpError::DescriptorTooShort(value.len()));
        }
        let len = u16::from_be_bytes([value[2], value[3]]) as usize;
        if len == 0 {
            return Err(FcpError::ZeroRecordLength);
        }
        record_len = Some(len);
        if value.len() >= 5 {
            record_count = Some(value[4] as usize);
        }
    }

    Ok(FileDescriptor {
        category,
        structure,
        shareable,
        file_id: None,
        df_name: None,
        sfi: None,
        file_size: None,
        total_size: None,
        record_len,
        record_count,
        life_cycle: None,
        raw: Vec::new(),
    })
}

fn be_usize(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_transparent_ef() {
        // EF.ICCID: transparent, 10 bytes, fid 2FE2, SFI 0x02, activated,
        // trailed by an uninterpreted 8B security attribute
        let fcp = hex::decode("62158202412183022fe28a01058002000a8801108b01aa").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        assert_eq!(fd.category, FileCategory::WorkingEf);
        assert_eq!(fd.structure, Some(EfStructure::Transparent));
        assert_eq!(fd.file_id, Some(0x2FE2));
        assert_eq!(fd.sfi, Some(0x02));
        assert_eq!(fd.file_size, Some(10));
        assert_eq!(fd.life_cycle, Some(0x05));
        assert_eq!(fd.raw.len(), 1);
        assert_eq!(fd.raw[0].tag, 0x8B);
    }

    #[test]
    fn test_decode_linear_fixed_with_count() {
        // EF.ADN: linear fixed, 28-byte records, explicit count 10
        let fcp = hex::decode("620f82054221001c0a83026f3a80020118").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        assert_eq!(fd.structure, Some(EfStructure::LinearFixed));
        assert_eq!(fd.record_len, Some(28));
        assert_eq!(fd.record_count, Some(10));
        assert_eq!(fd.file_id, Some(0x6F3A));
        assert_eq!(fd.file_size, Some(280));
    }

    #[test]
    fn test_record_count_derived_from_size() {
        // No explicit count byte; 120 / 30 = 4 records
        let fcp = hex::decode("620e82044221001e83026f4080020078").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        assert_eq!(fd.record_len, Some(30));
        assert_eq!(fd.record_count, Some(4));
    }

    #[test]
    fn test_decode_cyclic() {
        let fcp = hex::decode("620e82044621000383026f3980020009").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        assert_eq!(fd.structure, Some(EfStructure::Cyclic));
        assert_eq!(fd.record_len, Some(3));
        assert_eq!(fd.record_count, Some(3));
    }

    #[test]
    fn test_decode_df() {
        let fcp = hex::decode("620b8202782183027f108a0105").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        assert_eq!(fd.category, FileCategory::Df);
        assert!(fd.structure.is_none());
        assert!(fd.shareable);
        assert_eq!(fd.file_id, Some(0x7F10));
    }

    #[test]
    fn test_decode_adf_with_name() {
        let fcp = hex::decode("620d820278218407a0000000871002").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        assert_eq!(fd.category, FileCategory::Df);
        assert_eq!(
            fd.df_name.as_deref(),
            Some(hex::decode("a0000000871002").unwrap().as_slice())
        );
    }

    #[test]
    fn test_missing_template_tag() {
        let data = hex::decode("83023f00").unwrap();
        assert!(matches!(decode_fcp(&data), Err(FcpError::NotFcpTemplate)));
    }

    #[test]
    fn test_missing_descriptor_tag() {
        let data = hex::decode("620483023f00").unwrap();
        assert!(matches!(
            decode_fcp(&data),
            Err(FcpError::MissingFileDescriptor)
        ));
    }

    #[test]
    fn test_truncated_template_is_error() {
        // template announces more bytes than are present
        let data = hex::decode("62108202412183022fe2").unwrap();
        assert!(matches!(decode_fcp(&data), Err(FcpError::Tlv(_))));
    }

    #[test]
    fn test_zero_record_length_rejected() {
        let data = hex::decode("6206820442210000").unwrap();
        assert!(matches!(decode_fcp(&data), Err(FcpError::ZeroRecordLength)));
    }

    #[test]
    fn test_internal_ef_category() {
        // 0x49: shareable | internal | transparent
        let fcp = hex::decode("62088202490083026f0c").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        assert_eq!(fd.category, FileCategory::InternalEf);
        assert_eq!(fd.structure, Some(EfStructure::Transparent));
    }

    #[test]
    fn test_descriptor_json_shape() {
        let fcp = hex::decode("620f82054221001c0a83026f3a80020118").unwrap();
        let fd = decode_fcp(&fcp).unwrap();
        let json = fd.to_json();
        assert_eq!(json["structure"], "linear_fixed");
        assert_eq!(json["file_id"], "6f3a");
        assert_eq!(json["record_len"], 28);
    }
}
