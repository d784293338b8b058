//! APDU (Application Protocol Data Unit) handling
//!
//! Command APDUs for the SIM/UICC file-access instruction set (ISO 7816-4 /
//! ETSI TS 102 221): builders for the commands the session layer issues, a
//! short-format parser for the card side, and status-word helpers.
//!
//! # Example
//! ```ignore
//! use uiccfs::apdu;
//!
//! let cmd = apdu::select_by_fid(0x7F10);
//! assert_eq!(cmd.to_bytes(), vec![0x00, 0xA4, 0x00, 0x04, 0x02, 0x7F, 0x10]);
//! ```

mod response;
mod status;

pub use response::Response;
pub use status::{sw, SwClass};

use thiserror::Error;

/// Class byte for UICC commands.
pub const CLA_UICC: u8 = 0x00;

/// Instruction bytes used by the engine.
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const READ_BINARY: u8 = 0xB0;
    pub const UPDATE_BINARY: u8 = 0xD6;
    pub const READ_RECORD: u8 = 0xB2;
    pub const UPDATE_RECORD: u8 = 0xDC;
    pub const VERIFY: u8 = 0x20;
}

/// SELECT P1 values.
pub mod select_mode {
    /// Select by file identifier.
    pub const BY_FID: u8 = 0x00;
    /// Select the parent DF of the current DF.
    pub const PARENT: u8 = 0x03;
    /// Select by DF name (AID).
    pub const BY_AID: u8 = 0x04;
}

/// Record addressing modes (low 3 bits of P2).
pub mod record_mode {
    /// P1 is an absolute record number.
    pub const ABSOLUTE: u8 = 0x04;
    /// Previous record relative to the record pointer; on a cyclic EF an
    /// update in this mode writes the next slot of the ring.
    pub const PREVIOUS: u8 = 0x03;
}

/// Errors that can occur while parsing a command APDU.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApduError {
    #[error("APDU too short: expected at least 4 bytes, got {0}")]
    TooShort(usize),

    #[error("Lc inconsistent with APDU length")]
    InvalidLength,
}

/// A command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    /// Class byte (CLA).
    pub cla: u8,
    /// Instruction byte (INS).
    pub ins: u8,
    /// Parameter 1 (P1).
    pub p1: u8,
    /// Parameter 2 (P2).
    pub p2: u8,
    /// Command data (may be empty).
    pub data: Vec<u8>,
    /// Expected response length (Le); None if absent, 0 means 256.
    pub le: Option<u8>,
}

impl Apdu {
    /// Header-only command (case 1).
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Command with data (case 3).
    pub fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        }
    }

    /// Attach an expected-response length (cases 2 and 4).
    pub fn expecting(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// P1-P2 combined as a u16.
    pub fn p1p2(&self) -> u16 {
        ((self.p1 as u16) << 8) | (self.p2 as u16)
    }

    /// Serialize for transmission (short format).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.push(self.cla);
        out.push(self.ins);
        out.push(self.p1);
        out.push(self.p2);
        if !self.data.is_empty() {
            out.push(self.data.len() as u8);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(le);
        }
        out
    }
}

/// Parse a short-format command APDU (cases 1, 2s, 3s, 4s).
///
/// Used by the virtual card; the builders above only ever produce short
/// format, so extended Lc/Le is not handled here.
pub fn parse_apdu(raw: &[u8]) -> Result<Apdu, ApduError> {
    if raw.len() < 4 {
        return Err(ApduError::TooShort(raw.len()));
    }
    let (cla, ins, p1, p2) = (raw[0], raw[1], raw[2], raw[3]);
    let rest = &raw[4..];

    // Case 1: header only.
    if rest.is_empty() {
        return Ok(Apdu::new(cla, ins, p1, p2));
    }
    // Case 2: single Le byte.
    if rest.len() == 1 {
        return Ok(Apdu::new(cla, ins, p1, p2).expecting(rest[0]));
    }
    let lc = rest[0] as usize;
    // Case 3: Lc + data.
    if rest.len() == 1 + lc {
        return Ok(Apdu::with_data(cla, ins, p1, p2, rest[1..].to_vec()));
    }
    // Case 4: Lc + data + Le.
    if rest.len() == 1 + lc + 1 {
        let le = rest[1 + lc];
        return Ok(Apdu::with_data(cla, ins, p1, p2, rest[1..1 + lc].to_vec()).expecting(le));
    }
    Err(ApduError::InvalidLength)
}

/// SELECT by 2-byte file identifier, requesting FCP in the response.
pub fn select_by_fid(fid: u16) -> Apdu {
    Apdu::with_data(
        CLA_UICC,
        ins::SELECT,
        select_mode::BY_FID,
        0x04,
        fid.to_be_bytes().to_vec(),
    )
}

/// SELECT an application by AID (full or partial, first occurrence).
pub fn select_by_aid(aid: &[u8]) -> Apdu {
    Apdu::with_data(
        CLA_UICC,
        ins::SELECT,
        select_mode::BY_AID,
        0x04,
        aid.to_vec(),
    )
}

/// SELECT the parent DF of the currently selected DF.
pub fn select_parent() -> Apdu {
    Apdu::new(CLA_UICC, ins::SELECT, select_mode::PARENT, 0x04)
}

/// READ BINARY at a 15-bit offset.
pub fn read_binary(offset: u16, len: u8) -> Apdu {
    Apdu::new(
        CLA_UICC,
        ins::READ_BINARY,
        (offset >> 8) as u8,
        offset as u8,
    )
    .expecting(len)
}

/// UPDATE BINARY at a 15-bit offset.
pub fn update_binary(offset: u16, data: &[u8]) -> Apdu {
    Apdu::with_data(
        CLA_UICC,
        ins::UPDATE_BINARY,
        (offset >> 8) as u8,
        offset as u8,
        data.to_vec(),
    )
}

/// READ RECORD by absolute 1-based record number.
pub fn read_record(rec_no: u8, rec_len: u8) -> Apdu {
    Apdu::new(CLA_UICC, ins::READ_RECORD, rec_no, record_mode::ABSOLUTE).expecting(rec_len)
}

/// UPDATE RECORD by absolute 1-based record number.
pub fn update_record(rec_no: u8, data: &[u8]) -> Apdu {
    Apdu::with_data(
        CLA_UICC,
        ins::UPDATE_RECORD,
        rec_no,
        record_mode::ABSOLUTE,
        data.to_vec(),
    )
}

/// UPDATE RECORD in "previous" mode: the card-native write for cyclic EFs,
/// targeting the next ring slot according to the card's own pointer.
pub fn update_record_previous(data: &[u8]) -> Apdu {
    Apdu::with_data(
        CLA_UICC,
        ins::UPDATE_RECORD,
        0x00,
        record_mode::PREVIOUS,
        data.to_vec(),
    )
}

/// VERIFY a CHV (PIN). The code is padded to 8 bytes with 0xFF.
pub fn verify_chv(chv_no: u8, code: &[u8]) -> Apdu {
    let mut padded = code.to_vec();
    padded.truncate(8);
    padded.resize(8, 0xFF);
    Apdu::with_data(CLA_UICC, ins::VERIFY, 0x00, chv_no, padded)
}
