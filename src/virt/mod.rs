//! Virtual card
//!
//! A [`VirtualCard`] is an in-process card behind the [`CardTransport`]
//! trait: it parses the command APDUs the session layer emits, keeps its own
//! selection state and CHV counters, and answers with protocol-correct
//! status words and FCP templates. Tests and offline tooling run against it
//! exactly as against a reader.

use log::debug;

use crate::apdu::{self, ins, parse_apdu, record_mode, select_mode, sw, Apdu, Response};
use crate::tlv::TlvBuilder;
use crate::transport::{CardTransport, TransportError};

const MF_FID: u16 = 0x3F00;
const CHV_RETRIES: u8 = 3;

/// Handle to a file inside a [`VirtualCard`].
pub type VfId = usize;

#[derive(Debug, Clone)]
enum VfKind {
    Df,
    Adf { aid: Vec<u8> },
    EfTransparent { data: Vec<u8> },
    EfLinear { rec_len: usize, records: Vec<Vec<u8>> },
    /// `head` indexes the most recently written record.
    EfCyclic { rec_len: usize, records: Vec<Vec<u8>>, head: usize },
}

#[derive(Debug, Clone)]
struct VirtualFile {
    fid: Option<u16>,
    sfi: Option<u8>,
    kind: VfKind,
    parent: VfId,
    children: Vec<VfId>,
    /// Read/update require a verified CHV1.
    protected: bool,
}

impl VirtualFile {
    fn is_dir(&self) -> bool {
        matches!(self.kind, VfKind::Df | VfKind::Adf { .. })
    }

    /// FCP template as returned by SELECT.
    fn fcp(&self) -> Vec<u8> {
        let mut descriptor = TlvBuilder::new();
        let mut size = None;
        descriptor = match &self.kind {
            VfKind::Df | VfKind::Adf { .. } => descriptor.add(0x82, &[0x78, 0x21]),
            VfKind::EfTransparent { data } => {
                size = Some(data.len());
                descriptor.add(0x82, &[0x41, 0x21])
            }
            VfKind::EfLinear { rec_len, records } => {
                size = Some(rec_len * records.len());
                let mut fd = vec![0x42, 0x21];
                fd.extend((*rec_len as u16).to_be_bytes());
                fd.push(records.len() as u8);
                descriptor.add(0x82, &fd)
            }
            VfKind::EfCyclic { rec_len, records, .. } => {
                size = Some(rec_len * records.len());
                let mut fd = vec![0x46, 0x21];
                fd.extend((*rec_len as u16).to_be_bytes());
                fd.push(records.len() as u8);
                descriptor.add(0x82, &fd)
            }
        };
        if let Some(fid) = self.fid {
            descriptor = descriptor.add(0x83, &fid.to_be_bytes());
        }
        if let VfKind::Adf { aid } = &self.kind {
            descriptor = descriptor.add(0x84, aid);
        }
        if let Some(size) = size {
            descriptor = descriptor.add(0x80, &(size as u16).to_be_bytes());
        }
        if let Some(sfi) = self.sfi {
            descriptor = descriptor.add(0x88, &[sfi << 3]);
        }
        descriptor.add(0x8A, &[0x05]).wrap(0x62).build()
    }
}

/// In-process card implementing the UICC file-access instruction set.
#[derive(Debug)]
pub struct VirtualCard {
    files: Vec<VirtualFile>,
    cur_dir: VfId,
    cur_ef: Option<VfId>,
    chv1_code: Vec<u8>,
    chv1_retries: u8,
    chv1_verified: bool,
}

impl VirtualCard {
    /// An empty card: a lone MF, CHV1 disabled until a code is set.
    pub fn new() -> Self {
        let mf = VirtualFile {
            fid: Some(MF_FID),
            sfi: None,
            kind: VfKind::Df,
            parent: 0,
            children: Vec::new(),
            protected: false,
        };
        Self {
            files: vec![mf],
            cur_dir: 0,
            cur_ef: None,
            chv1_code: Vec::new(),
            chv1_retries: CHV_RETRIES,
            chv1_verified: true,
        }
    }

    /// The MF handle.
    pub fn mf(&self) -> VfId {
        0
    }

    /// Add a DF under `parent`.
    pub fn add_df(&mut self, parent: VfId, fid: u16) -> VfId {
        self.attach(parent, VirtualFile {
            fid: Some(fid),
            sfi: None,
            kind: VfKind::Df,
            parent,
            children: Vec::new(),
            protected: false,
        })
    }

    /// Register an application DF under the MF.
    pub fn add_adf(&mut self, aid: &[u8]) -> VfId {
        self.attach(0, VirtualFile {
            fid: None,
            sfi: None,
            kind: VfKind::Adf { aid: aid.to_vec() },
            parent: 0,
            children: Vec::new(),
            protected: false,
        })
    }

    /// Add a transparent EF with initial content.
    pub fn add_transparent(&mut self, parent: VfId, fid: u16, data: &[u8]) -> VfId {
        self.attach(parent, VirtualFile {
            fid: Some(fid),
            sfi: None,
            kind: VfKind::EfTransparent { data: data.to_vec() },
            parent,
            children: Vec::new(),
            protected: false,
        })
    }

    /// Add a linear fixed EF, records initialized to 0xFF fill.
    pub fn add_linear(&mut self, parent: VfId, fid: u16, rec_len: usize, count: usize) -> VfId {
        self.attach(parent, VirtualFile {
            fid: Some(fid),
            sfi: None,
            kind: VfKind::EfLinear {
                rec_len,
                records: vec![vec![0xFF; rec_len]; count],
            },
            parent,
            children: Vec::new(),
            protected: false,
        })
    }

    /// Add a cyclic EF, records initialized to 0xFF fill.
    pub fn add_cyclic(&mut self, parent: VfId, fid: u16, rec_len: usize, count: usize) -> VfId {
        self.attach(parent, VirtualFile {
            fid: Some(fid),
            sfi: None,
            kind: VfKind::EfCyclic {
                rec_len,
                records: vec![vec![0xFF; rec_len]; count],
                head: count - 1,
            },
            parent,
            children: Vec::new(),
            protected: false,
        })
    }

    /// Require a verified CHV1 for reads and updates of a file.
    pub fn protect(&mut self, id: VfId) {
        self.files[id].protected = true;
    }

    /// Enable CHV1 with the given code. Until verified, protected files
    /// answer 6982.
    pub fn set_chv1(&mut self, code: &[u8]) {
        self.chv1_code = pad_chv(code);
        self.chv1_verified = false;
        self.chv1_retries = CHV_RETRIES;
    }

    /// Overwrite a record directly, bypassing the protocol. For seeding
    /// test content.
    pub fn seed_record(&mut self, id: VfId, rec_no: usize, data: &[u8]) {
        match &mut self.files[id].kind {
            VfKind::EfLinear { records, .. } => {
                records[rec_no - 1] = data.to_vec();
            }
            VfKind::EfCyclic { records, head, .. } => {
                let physical = (*head + 1) % records.len();
                records[physical] = data.to_vec();
                *head = physical;
            }
            _ => {}
        }
    }

    /// A populated sample card: standard MF/DF layout, a CHV1-protected
    /// EF.SMS, a cyclic call-meter file and one file absent from the
    /// standard profile.
    pub fn standard() -> Self {
        let mut card = Self::new();
        let mf = card.mf();

        card.add_transparent(mf, 0x2FE2, &hex_lit("98942000000000000000"));
        card.add_transparent(mf, 0x2F05, &hex_lit("656e6672ffff"));

        let telecom = card.add_df(mf, 0x7F10);
        let adn = card.add_linear(telecom, 0x6F3A, 28, 10);
        card.seed_record(adn, 1, &adn_record("Alice", "123456"));
        card.seed_record(adn, 2, &adn_record("Bob", "987654"));
        let sms = card.add_linear(telecom, 0x6F3C, 176, 5);
        card.protect(sms);

        let gsm = card.add_df(mf, 0x7F20);
        card.add_transparent(gsm, 0x6F07, &hex_lit("082943019876543210"));
        card.add_transparent(gsm, 0x6F78, &hex_lit("0001"));
        let acm = card.add_cyclic(gsm, 0x6F39, 3, 3);
        card.seed_record(acm, 1, &[0x00, 0x00, 0x01]);
        card.seed_record(acm, 1, &[0x00, 0x00, 0x02]);
        card.seed_record(acm, 1, &[0x00, 0x00, 0x03]);
        // present on the card but not in the standard profile
        card.add_transparent(gsm, 0x6FE0, &hex_lit("cafe0000"));

        let usim = card.add_adf(&hex_lit("a0000000871002ffffffff8907090000"));
        card.add_transparent(usim, 0x6F07, &hex_lit("082943019876543210"));
        card.add_transparent(usim, 0x6FAD, &hex_lit("00000002"));

        card.set_chv1(b"1234");
        card
    }

    fn attach(&mut self, parent: VfId, file: VirtualFile) -> VfId {
        let id = self.files.len();
        self.files.push(file);
        self.files[parent].children.push(id);
        id
    }

    // ---- dispatch -------------------------------------------------------

    fn dispatch(&mut self, cmd: &Apdu) -> Response {
        if cmd.cla != apdu::CLA_UICC {
            return Response::error(sw::CLA_NOT_SUPPORTED);
        }
        match cmd.ins {
            ins::SELECT => self.cmd_select(cmd),
            ins::READ_BINARY => self.cmd_read_binary(cmd),
            ins::UPDATE_BINARY => self.cmd_update_binary(cmd),
            ins::READ_RECORD => self.cmd_read_record(cmd),
            ins::UPDATE_RECORD => self.cmd_update_record(cmd),
            ins::VERIFY => self.cmd_verify(cmd),
            _ => Response::error(sw::INS_NOT_SUPPORTED),
        }
    }

    fn cmd_select(&mut self, cmd: &Apdu) -> Response {
        let found = match cmd.p1 {
            select_mode::BY_FID => {
                let [hi, lo] = match cmd.data[..] {
                    [hi, lo] => [hi, lo],
                    _ => return Response::error(sw::WRONG_LENGTH),
                };
                self.find_by_fid(u16::from_be_bytes([hi, lo]))
            }
            select_mode::PARENT => Some(self.files[self.cur_dir].parent),
            select_mode::BY_AID => self.find_by_aid(&cmd.data),
            _ => return Response::error(sw::INCORRECT_P1_P2),
        };
        let id = match found {
            Some(id) => id,
            None => return Response::error(sw::FILE_NOT_FOUND),
        };
        if self.files[id].is_dir() {
            self.cur_dir = id;
            self.cur_ef = None;
        } else {
            self.cur_dir = self.files[id].parent;
            self.cur_ef = Some(id);
        }
        if cmd.p2 & 0x04 != 0 {
            Response::success(self.files[id].fcp())
        } else {
            Response::ok()
        }
    }

    /// SELECT-by-fid reach: the MF from anywhere, then children of the
    /// current DF, the current DF itself, its parent, and siblings.
    fn find_by_fid(&self, fid: u16) -> Option<VfId> {
        if fid == MF_FID {
            return Some(0);
        }
        let dir = &self.files[self.cur_dir];
        let child = |of: VfId| {
            self.files[of]
                .children
                .iter()
                .copied()
                .find(|c| self.files[*c].fid == Some(fid))
        };
        child(self.cur_dir)
            .or_else(|| (dir.fid == Some(fid)).then_some(self.cur_dir))
            .or_else(|| (self.files[dir.parent].fid == Some(fid)).then_some(dir.parent))
            .or_else(|| child(dir.parent))
    }

    fn find_by_aid(&self, aid: &[u8]) -> Option<VfId> {
        self.files.iter().position(|f| match &f.kind {
            VfKind::Adf { aid: full } => full.starts_with(aid),
            _ => false,
        })
    }

    /// Current EF after access-condition check, or the status word to
    /// answer with.
    fn checked_ef(&self) -> Result<VfId, u16> {
        let id = self.cur_ef.ok_or(sw::NO_CURRENT_EF)?;
        if self.files[id].protected && !self.chv1_verified {
            return Err(sw::SECURITY_STATUS_NOT_SATISFIED);
        }
        Ok(id)
    }

    fn cmd_read_binary(&mut self, cmd: &Apdu) -> Response {
        let id = match self.checked_ef() {
            Ok(id) => id,
            Err(sw) => return Response::error(sw),
        };
        let data = match &self.files[id].kind {
            VfKind::EfTransparent { data } => data,
            _ => return Response::error(sw::COMMAND_INCOMPATIBLE),
        };
        let offset = (cmd.p1p2() & 0x7FFF) as usize;
        if offset >= data.len() && !data.is_empty() {
            return Response::error(sw::WRONG_P1_P2);
        }
        let wanted = match cmd.le {
            Some(0) | None => 256,
            Some(le) => le as usize,
        };
        let end = (offset + wanted).min(data.len());
        Response::success(data[offset..end].to_vec())
    }

    fn cmd_update_binary(&mut self, cmd: &Apdu) -> Response {
        let id = match self.checked_ef() {
            Ok(id) => id,
            Err(sw) => return Response::error(sw),
        };
        let offset = (cmd.p1p2() & 0x7FFF) as usize;
        let incoming = cmd.data.clone();
        let data = match &mut self.files[id].kind {
            VfKind::EfTransparent { data } => data,
            _ => return Response::error(sw::COMMAND_INCOMPATIBLE),
        };
        if offset + incoming.len() > data.len() {
            return Response::error(sw::WRONG_LENGTH);
        }
        data[offset..offset + incoming.len()].copy_from_slice(&incoming);
        Response::ok()
    }

    fn cmd_read_record(&mut self, cmd: &Apdu) -> Response {
        if cmd.p2 != record_mode::ABSOLUTE {
            return Response::error(sw::INCORRECT_P1_P2);
        }
        let id = match self.checked_ef() {
            Ok(id) => id,
            Err(sw) => return Response::error(sw),
        };
        let rec_no = cmd.p1 as usize;
        match &self.files[id].kind {
            VfKind::EfLinear { records, .. } => {
                if rec_no == 0 || rec_no > records.len() {
                    return Response::error(sw::RECORD_NOT_FOUND);
                }
                Response::success(records[rec_no - 1].clone())
            }
            VfKind::EfCyclic { records, head, .. } => {
                if rec_no == 0 || rec_no > records.len() {
                    return Response::error(sw::RECORD_NOT_FOUND);
                }
                // record 1 is the most recently written
                let physical = (head + records.len() - (rec_no - 1)) % records.len();
                Response::success(records[physical].clone())
            }
            _ => Response::error(sw::COMMAND_INCOMPATIBLE),
        }
    }

    fn cmd_update_record(&mut self, cmd: &Apdu) -> Response {
        let id = match self.checked_ef() {
            Ok(id) => id,
            Err(sw) => return Response::error(sw),
        };
        let incoming = cmd.data.clone();
        match (cmd.p2, &mut self.files[id].kind) {
            (record_mode::ABSOLUTE, VfKind::EfLinear { rec_len, records }) => {
                let rec_no = cmd.p1 as usize;
                if rec_no == 0 || rec_no > records.len() {
                    return Response::error(sw::RECORD_NOT_FOUND);
                }
                if incoming.len() != *rec_len {
                    return Response::error(sw::WRONG_LENGTH);
                }
                records[rec_no - 1] = incoming;
                Response::ok()
            }
            (record_mode::PREVIOUS, VfKind::EfCyclic { rec_len, records, head }) => {
                if incoming.len() != *rec_len {
                    return Response::error(sw::WRONG_LENGTH);
                }
                let next = (*head + 1) % records.len();
                records[next] = incoming;
                *head = next;
                Response::ok()
            }
            _ => Response::error(sw::COMMAND_INCOMPATIBLE),
        }
    }

    fn cmd_verify(&mut self, cmd: &Apdu) -> Response {
        if cmd.p2 != 0x01 {
            return Response::error(sw::INCORRECT_P1_P2);
        }
        if self.chv1_code.is_empty() {
            return Response::ok();
        }
        if self.chv1_retries == 0 {
            return Response::error(sw::AUTH_METHOD_BLOCKED);
        }
        if cmd.data == self.chv1_code {
            self.chv1_verified = true;
            self.chv1_retries = CHV_RETRIES;
            Response::ok()
        } else {
            self.chv1_retries -= 1;
            if self.chv1_retries == 0 {
                Response::error(sw::AUTH_METHOD_BLOCKED)
            } else {
                Response::error(sw::retries_remaining(self.chv1_retries))
            }
        }
    }
}

impl Default for VirtualCard {
    fn default() -> Self {
        Self::new()
    }
}

impl CardTransport for VirtualCard {
    fn transceive(&mut self, raw: &[u8]) -> Result<Response, TransportError> {
        let cmd = match parse_apdu(raw) {
            Ok(cmd) => cmd,
            Err(_) => return Ok(Response::error(sw::WRONG_LENGTH)),
        };
        let resp = self.dispatch(&cmd);
        debug!(
            "card: ins {:02x} p1p2 {:04x} -> {:04X}",
            cmd.ins,
            cmd.p1p2(),
            resp.sw()
        );
        Ok(resp)
    }

    fn wait_for_card(&mut self) -> bool {
        true
    }
}

fn pad_chv(code: &[u8]) -> Vec<u8> {
    let mut padded = code.to_vec();
    padded.truncate(8);
    padded.resize(8, 0xFF);
    padded
}

fn hex_lit(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap_or_default()
}

/// A 28-byte ADN record: padded alpha identifier plus a stub dialling
/// number field.
fn adn_record(name: &str, number: &str) -> Vec<u8> {
    let mut rec = vec![0xFF; 28];
    let alpha = name.as_bytes();
    rec[..alpha.len().min(14)].copy_from_slice(&alpha[..alpha.len().min(14)]);
    let digits = number.as_bytes();
    rec[14] = (digits.len().min(13)) as u8;
    rec[15..15 + digits.len().min(13)].copy_from_slice(&digits[..digits.len().min(13)]);
    rec
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(card: &mut VirtualCard, cmd: &Apdu) -> Response {
        card.transceive(&cmd.to_bytes()).unwrap()
    }

    #[test]
    fn test_select_mf_returns_fcp() {
        let mut card = VirtualCard::standard();
        let resp = send(&mut card, &apdu::select_by_fid(0x3F00));
        assert!(resp.is_okay());
        let fd = crate::fcp::decode_fcp(&resp.data).unwrap();
        assert_eq!(fd.file_id, Some(0x3F00));
        assert!(!fd.is_ef());
    }

    #[test]
    fn test_select_unknown_fid() {
        let mut card = VirtualCard::standard();
        let resp = send(&mut card, &apdu::select_by_fid(0x5A5A));
        assert_eq!(resp.sw(), sw::FILE_NOT_FOUND);
    }

    #[test]
    fn test_select_reach_rules() {
        let mut card = VirtualCard::standard();
        // EF under DF.TELECOM is not selectable from the MF
        let resp = send(&mut card, &apdu::select_by_fid(0x6F3A));
        assert_eq!(resp.sw(), sw::FILE_NOT_FOUND);
        assert!(send(&mut card, &apdu::select_by_fid(0x7F10)).is_okay());
        assert!(send(&mut card, &apdu::select_by_fid(0x6F3A)).is_okay());
        // sibling DF reachable from inside DF.TELECOM
        assert!(send(&mut card, &apdu::select_by_fid(0x7F20)).is_okay());
    }

    #[test]
    fn test_select_parent() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::select_by_fid(0x7F10));
        let resp = send(&mut card, &apdu::select_parent());
        assert!(resp.is_okay());
        let fd = crate::fcp::decode_fcp(&resp.data).unwrap();
        assert_eq!(fd.file_id, Some(0x3F00));
    }

    #[test]
    fn test_select_by_aid_prefix() {
        let mut card = VirtualCard::standard();
        let resp = send(&mut card, &apdu::select_by_aid(&hex_lit("a0000000871002")));
        assert!(resp.is_okay());
        let fd = crate::fcp::decode_fcp(&resp.data).unwrap();
        assert_eq!(fd.df_name, Some(hex_lit("a0000000871002ffffffff8907090000")));
    }

    #[test]
    fn test_read_binary_and_bounds() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::select_by_fid(0x2FE2));
        let resp = send(&mut card, &apdu::read_binary(0, 10));
        assert_eq!(resp.data, hex_lit("98942000000000000000"));
        let resp = send(&mut card, &apdu::read_binary(100, 1));
        assert_eq!(resp.sw(), sw::WRONG_P1_P2);
    }

    #[test]
    fn test_read_binary_without_ef() {
        let mut card = VirtualCard::standard();
        let resp = send(&mut card, &apdu::read_binary(0, 1));
        assert_eq!(resp.sw(), sw::NO_CURRENT_EF);
    }

    #[test]
    fn test_update_binary_too_long() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::select_by_fid(0x2FE2));
        let resp = send(&mut card, &apdu::update_binary(8, &[0; 4]));
        assert_eq!(resp.sw(), sw::WRONG_LENGTH);
    }

    #[test]
    fn test_record_round_trip() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::select_by_fid(0x7F10));
        send(&mut card, &apdu::select_by_fid(0x6F3A));
        let rec = vec![0x41; 28];
        assert!(send(&mut card, &apdu::update_record(3, &rec)).is_okay());
        let resp = send(&mut card, &apdu::read_record(3, 28));
        assert_eq!(resp.data, rec);
        let resp = send(&mut card, &apdu::read_record(11, 28));
        assert_eq!(resp.sw(), sw::RECORD_NOT_FOUND);
    }

    #[test]
    fn test_cyclic_previous_write() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::select_by_fid(0x7F20));
        send(&mut card, &apdu::select_by_fid(0x6F39));
        // newest first: 03, 02, 01
        assert_eq!(send(&mut card, &apdu::read_record(1, 3)).data, vec![0, 0, 3]);
        assert_eq!(send(&mut card, &apdu::read_record(3, 3)).data, vec![0, 0, 1]);
        // appending overwrites the oldest and becomes record 1
        assert!(send(&mut card, &apdu::update_record_previous(&[0, 0, 4])).is_okay());
        assert_eq!(send(&mut card, &apdu::read_record(1, 3)).data, vec![0, 0, 4]);
        assert_eq!(send(&mut card, &apdu::read_record(3, 3)).data, vec![0, 0, 2]);
    }

    #[test]
    fn test_cyclic_absolute_update_rejected() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::select_by_fid(0x7F20));
        send(&mut card, &apdu::select_by_fid(0x6F39));
        let resp = send(&mut card, &apdu::update_record(1, &[0, 0, 9]));
        assert_eq!(resp.sw(), sw::COMMAND_INCOMPATIBLE);
    }

    #[test]
    fn test_chv_gate_and_retries() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::select_by_fid(0x7F10));
        send(&mut card, &apdu::select_by_fid(0x6F3C));
        assert_eq!(
            send(&mut card, &apdu::read_record(1, 176)).sw(),
            sw::SECURITY_STATUS_NOT_SATISFIED
        );
        let resp = send(&mut card, &apdu::verify_chv(1, b"0000"));
        assert_eq!(resp.sw(), sw::retries_remaining(2));
        assert!(send(&mut card, &apdu::verify_chv(1, b"1234")).is_okay());
        assert!(send(&mut card, &apdu::read_record(1, 176)).is_okay());
    }

    #[test]
    fn test_chv_blocks_after_three_failures() {
        let mut card = VirtualCard::standard();
        send(&mut card, &apdu::verify_chv(1, b"0000"));
        send(&mut card, &apdu::verify_chv(1, b"0000"));
        let resp = send(&mut card, &apdu::verify_chv(1, b"0000"));
        assert_eq!(resp.sw(), sw::AUTH_METHOD_BLOCKED);
        // correct code no longer helps
        let resp = send(&mut card, &apdu::verify_chv(1, b"1234"));
        assert_eq!(resp.sw(), sw::AUTH_METHOD_BLOCKED);
    }

    #[test]
    fn test_bad_cla() {
        let mut card = VirtualCard::standard();
        let resp = card.transceive(&[0x80, 0xA4, 0x00, 0x04]).unwrap();
        assert_eq!(resp.sw(), sw::CLA_NOT_SUPPORTED);
    }
}
