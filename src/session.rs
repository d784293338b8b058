//! Card session: path resolution and structured access
//!
//! A [`Session`] owns a transport and the tree model, and keeps both in lock
//! step with the card's own selection state: the model is only ever mutated
//! after the card has confirmed a SELECT, and the cursor/stack only move on
//! success. Path resolution is transactional per call: a failed multi-element
//! path leaves the session state where it was, re-syncing the card by
//! replaying the committed stack.
//!
//! Path grammar: elements separated by `/`, a leading `/` making the path
//! absolute (starting at the MF). An element is a symbolic name, a 4-digit
//! hex file identifier, a longer even-length hex AID, `..` (parent) or `.`
//! (re-select the current file). A fid parse always wins over a name match.

use log::{debug, warn};

use crate::apdu::{self, Response};
use crate::error::Error;
use crate::fcp::{decode_fcp, EfStructure, FileDescriptor};
use crate::fs::{self, EfInfo, FileNode, FileSystem, NodeId, SelFlags};
use crate::transport::CardTransport;

/// Largest data length moved per READ/UPDATE BINARY round trip.
const CHUNK: usize = 255;

/// Address space of READ/UPDATE BINARY: the offset field is 15 bits, b8 of
/// P1 switching the command to short-file-identifier addressing.
const BINARY_SPAN: usize = 0x8000;

/// A live session against one card.
///
/// Holds the current selection as a cursor into the tree plus the stack of
/// nodes from the MF down to the cursor itself. The stack is what `..` pops
/// and what gets replayed to re-sync the card after a failed path.
pub struct Session<T: CardTransport> {
    fs: FileSystem,
    transport: T,
    cursor: NodeId,
    stack: Vec<NodeId>,
}

impl<T: CardTransport> Session<T> {
    /// Open a session with the standard UICC profile, waiting for a card
    /// and selecting the MF.
    pub fn new(transport: T) -> Result<Self, Error> {
        Self::with_tree(fs::profile::standard(), transport)
    }

    /// Open a session over a caller-provided tree (custom profile).
    pub fn with_tree(fs: FileSystem, mut transport: T) -> Result<Self, Error> {
        if !transport.wait_for_card() {
            return Err(crate::transport::TransportError::NoCard.into());
        }
        let mf = fs.mf();
        let mut session = Self {
            fs,
            transport,
            cursor: mf,
            stack: vec![mf],
        };
        session.select_fid_on_card(fs::MF_FID)?;
        Ok(session)
    }

    /// The tree model as learned so far.
    pub fn fs(&self) -> &FileSystem {
        &self.fs
    }

    /// Node currently selected.
    pub fn selected(&self) -> &FileNode {
        self.fs.node(self.cursor)
    }

    /// Cursor node id.
    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    /// Absolute path of the current selection, `MF/DF.TELECOM/EF.ADN` style.
    /// With `numeric` set, every element is rendered as hex identifier.
    pub fn current_path(&self, numeric: bool) -> String {
        self.fs.path_labels(self.cursor, numeric).join("/")
    }

    /// Identifiers selectable from the current position.
    pub fn selectables(&self, flags: SelFlags) -> Vec<String> {
        self.fs.selectables(self.cursor, flags).into_keys().collect()
    }

    /// Child labels of the enclosing DF, for directory listings.
    pub fn list(&self, flags: SelFlags, by_name: bool) -> Vec<String> {
        self.fs.list_children(self.cursor, flags, by_name)
    }

    // ---- path resolution ------------------------------------------------

    /// Resolve and select a path, element by element. Returns the decoded
    /// descriptor of the final file. On failure the cursor and stack are
    /// unchanged and the card is re-synced to them, except after a
    /// transport failure, where the card state is unknown.
    pub fn select(&mut self, path: &str) -> Result<FileDescriptor, Error> {
        let (absolute, elements) = parse_path(path);
        let mut cursor = self.cursor;
        let mut stack = self.stack.clone();
        let mut last_fd = None;

        let result = (|| {
            if absolute {
                last_fd = Some(self.step_to_mf(&mut cursor, &mut stack)?);
            }
            for element in &elements {
                last_fd = Some(self.step(element, &mut cursor, &mut stack)?);
            }
            match last_fd.take() {
                Some(fd) => Ok(fd),
                // empty relative path: re-select the current file
                None => self.step(".", &mut cursor, &mut stack),
            }
        })();

        match result {
            Ok(fd) => {
                self.cursor = cursor;
                self.stack = stack;
                Ok(fd)
            }
            Err(e @ Error::Transport(_)) => Err(e),
            Err(e) => {
                self.resync();
                Err(e)
            }
        }
    }

    /// Re-issue the SELECTs for the committed stack so the card's state
    /// matches the model again. Best effort: status-word failures are
    /// logged, not surfaced.
    fn resync(&mut self) {
        for id in self.stack.clone() {
            let outcome = match (self.fs.node(id).fid, self.fs.node(id).aid()) {
                (Some(fid), _) => self.transceive_checked(&apdu::select_by_fid(fid)),
                (None, Some(aid)) => {
                    let aid = aid.to_vec();
                    self.transceive_checked(&apdu::select_by_aid(&aid))
                }
                (None, None) => continue,
            };
            if let Err(e) = outcome {
                warn!("re-sync select failed: {e}");
                return;
            }
        }
    }

    /// Select the MF and reset the scratch state to the root.
    fn step_to_mf(
        &mut self,
        cursor: &mut NodeId,
        stack: &mut Vec<NodeId>,
    ) -> Result<FileDescriptor, Error> {
        let fd = self.select_fid_on_card(fs::MF_FID)?;
        let mf = self.fs.mf();
        self.fs.enrich(mf, &fd)?;
        *cursor = mf;
        *stack = vec![mf];
        Ok(fd)
    }

    /// Resolve and select one path element relative to the scratch state.
    fn step(
        &mut self,
        element: &str,
        cursor: &mut NodeId,
        stack: &mut Vec<NodeId>,
    ) -> Result<FileDescriptor, Error> {
        match element {
            "." => return self.reselect(*cursor),
            ".." => return self.step_up(cursor, stack),
            "MF" => return self.step_to_mf(cursor, stack),
            _ => {}
        }

        if let Some(fid) = parse_fid(element) {
            if fid == fs::MF_FID {
                return self.step_to_mf(cursor, stack);
            }
            return self.step_fid(fid, element, cursor, stack);
        }
        if let Some(aid) = parse_aid(element) {
            return self.step_aid(&aid, cursor, stack);
        }

        // symbolic name: the model must already know it
        let sels = self.fs.selectables(*cursor, SelFlags::everything());
        let target = *sels.get(element).ok_or_else(|| Error::PathNotFound {
            element: element.to_string(),
        })?;
        match self.fs.node(target).aid() {
            Some(aid) => {
                let aid = aid.to_vec();
                self.step_aid(&aid, cursor, stack)
            }
            None => {
                let fid = self.fs.node(target).fid.ok_or_else(|| Error::PathNotFound {
                    element: element.to_string(),
                })?;
                if fid == fs::MF_FID {
                    self.step_to_mf(cursor, stack)
                } else {
                    self.step_fid(fid, element, cursor, stack)
                }
            }
        }
    }

    /// Re-select the current file without moving cursor or stack.
    fn reselect(&mut self, cursor: NodeId) -> Result<FileDescriptor, Error> {
        let node = self.fs.node(cursor);
        let fd = match (node.fid, node.aid().map(<[u8]>::to_vec)) {
            (Some(fid), _) => self.select_fid_on_card(fid)?,
            (None, Some(aid)) => self.select_aid_on_card(&aid)?,
            (None, None) => return Err(Error::NoFileSelected),
        };
        self.fs.enrich(cursor, &fd)?;
        Ok(fd)
    }

    /// `..`: select the current node's parent. From an EF that is its
    /// enclosing DF; from a DF its parent DF. At the MF this stays at the
    /// MF.
    fn step_up(
        &mut self,
        cursor: &mut NodeId,
        stack: &mut Vec<NodeId>,
    ) -> Result<FileDescriptor, Error> {
        let popped = match stack.pop() {
            Some(id) if !stack.is_empty() => id,
            _ => return self.step_to_mf(cursor, stack),
        };
        let parent = *stack.last().unwrap_or(&self.fs.mf());
        let fd = if parent == self.fs.mf() {
            self.select_fid_on_card(fs::MF_FID)?
        } else if self.fs.node(popped).is_dir() {
            self.select_parent_on_card()?
        } else {
            // Leaving an EF: the card's current DF already is the target,
            // so a parent-SELECT would overshoot. Select the DF itself.
            let node = self.fs.node(parent);
            match (node.fid, node.aid().map(<[u8]>::to_vec)) {
                (Some(fid), _) => self.select_fid_on_card(fid)?,
                (None, Some(aid)) => self.select_aid_on_card(&aid)?,
                (None, None) => return Err(Error::NoFileSelected),
            }
        };
        self.fs.enrich(parent, &fd)?;
        *cursor = parent;
        Ok(fd)
    }

    /// Select a file by fid under the current position, discovering files
    /// the model does not know yet.
    fn step_fid(
        &mut self,
        fid: u16,
        element: &str,
        cursor: &mut NodeId,
        stack: &mut Vec<NodeId>,
    ) -> Result<FileDescriptor, Error> {
        let fd = match self.select_fid_on_card(fid) {
            Ok(fd) => fd,
            Err(e) if e.is_file_not_found() => {
                return Err(Error::PathNotFound {
                    element: element.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let cwd = self.fs.cwd_of(*cursor);
        let target = match self.find_selected(*cursor, fid) {
            Some(id) => id,
            None => {
                let id = self.fs.discover(cwd, &fd)?;
                debug!("discovered {:04x} under {}", fid, self.fs.node(cwd).label(false));
                id
            }
        };
        self.fs.enrich(target, &fd)?;
        self.commit_move(target, cursor, stack);
        Ok(fd)
    }

    /// Select an application by AID (full or registered prefix).
    fn step_aid(
        &mut self,
        aid: &[u8],
        cursor: &mut NodeId,
        stack: &mut Vec<NodeId>,
    ) -> Result<FileDescriptor, Error> {
        let fd = match self.select_aid_on_card(aid) {
            Ok(fd) => fd,
            Err(e) if e.is_file_not_found() => {
                return Err(Error::PathNotFound {
                    element: hex::encode(aid),
                })
            }
            Err(e) => return Err(e),
        };
        let target = match self.fs.app_by_aid(aid) {
            Some(id) => id,
            None => self.fs.discover(self.fs.mf(), &fd)?,
        };
        self.fs.enrich(target, &fd)?;
        self.commit_move(target, cursor, stack);
        Ok(fd)
    }

    /// Which known node does SELECT-by-fid land on from `at`? Children of
    /// the enclosing DF first, then the DF itself, then its parent chain.
    fn find_selected(&self, at: NodeId, fid: u16) -> Option<NodeId> {
        let cwd = self.fs.cwd_of(at);
        if let Some(id) = self.fs.child_by_fid(cwd, fid) {
            return Some(id);
        }
        let mut cur = cwd;
        loop {
            if self.fs.node(cur).fid == Some(fid) {
                return Some(cur);
            }
            let parent = self.fs.parent(cur);
            if parent == cur {
                return None;
            }
            cur = parent;
        }
    }

    /// Move the scratch cursor/stack onto a confirmed node.
    fn commit_move(&self, target: NodeId, cursor: &mut NodeId, stack: &mut Vec<NodeId>) {
        *cursor = target;
        *stack = self.fs.ancestry(target);
    }

    // ---- card round trips ----------------------------------------------

    fn transceive_checked(&mut self, cmd: &apdu::Apdu) -> Result<Response, Error> {
        let resp = self.transport.transceive(&cmd.to_bytes())?;
        debug!(
            "ins {:02x} p1p2 {:04x} -> sw {:04X}",
            cmd.ins,
            cmd.p1p2(),
            resp.sw()
        );
        if resp.is_okay() {
            Ok(resp)
        } else {
            Err(Error::from_sw(resp.sw()))
        }
    }

    fn select_fid_on_card(&mut self, fid: u16) -> Result<FileDescriptor, Error> {
        let resp = self.transceive_checked(&apdu::select_by_fid(fid))?;
        Ok(decode_fcp(&resp.data)?)
    }

    fn select_aid_on_card(&mut self, aid: &[u8]) -> Result<FileDescriptor, Error> {
        let resp = self.transceive_checked(&apdu::select_by_aid(aid))?;
        Ok(decode_fcp(&resp.data)?)
    }

    fn select_parent_on_card(&mut self) -> Result<FileDescriptor, Error> {
        let resp = self.transceive_checked(&apdu::select_parent())?;
        Ok(decode_fcp(&resp.data)?)
    }

    // ---- structured access ---------------------------------------------

    /// Cursor as a decoded EF, or the error the accessors report.
    fn current_ef(&self) -> Result<EfInfo, Error> {
        match self.fs.node(self.cursor).ef_info() {
            Some(info) => Ok(info.clone()),
            None => Err(Error::NoFileSelected),
        }
    }

    fn require_structure(info: &EfInfo, wanted: &[EfStructure]) -> Result<(), Error> {
        if wanted.contains(&info.structure) {
            Ok(())
        } else {
            Err(Error::StructureMismatch {
                actual: info.structure,
            })
        }
    }

    /// Read from the selected transparent EF. `len` of None reads from
    /// `offset` to the end of the file. Large reads are split into
    /// 255-byte round trips. The addressed range must fit the command's
    /// 15-bit offset field.
    pub fn read_binary(&mut self, offset: usize, len: Option<usize>) -> Result<Vec<u8>, Error> {
        let info = self.current_ef()?;
        Self::require_structure(&info, &[EfStructure::Transparent])?;
        if offset > info.size {
            return Err(Error::OutOfRange);
        }
        let len = match len {
            Some(len) => {
                if offset + len > info.size {
                    return Err(Error::OutOfRange);
                }
                len
            }
            None => info.size - offset,
        };
        if offset + len > BINARY_SPAN {
            return Err(Error::OutOfRange);
        }

        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        while out.len() < len {
            let chunk = (len - out.len()).min(CHUNK);
            let resp =
                self.transceive_checked(&apdu::read_binary(pos as u16, chunk as u8))?;
            if resp.data.is_empty() {
                break;
            }
            pos += resp.data.len();
            out.extend_from_slice(&resp.data);
        }
        if out.len() < len {
            return Err(Error::ShortRead {
                expected: len,
                got: out.len(),
            });
        }
        Ok(out)
    }

    /// Write to the selected transparent EF. The write must fit inside the
    /// decoded file size; no partial write is attempted otherwise.
    pub fn update_binary(&mut self, offset: usize, data: &[u8]) -> Result<(), Error> {
        let info = self.current_ef()?;
        Self::require_structure(&info, &[EfStructure::Transparent])?;
        if offset + data.len() > info.size || offset + data.len() > BINARY_SPAN {
            return Err(Error::OutOfRange);
        }
        let mut pos = offset;
        for chunk in data.chunks(CHUNK) {
            self.transceive_checked(&apdu::update_binary(pos as u16, chunk))?;
            pos += chunk.len();
        }
        Ok(())
    }

    /// Read one record (1-based) from the selected record-structured EF.
    /// On a cyclic EF, record 1 is the most recently written one.
    pub fn read_record(&mut self, rec_no: usize) -> Result<Vec<u8>, Error> {
        let info = self.current_ef()?;
        Self::require_structure(&info, &[EfStructure::LinearFixed, EfStructure::Cyclic])?;
        let (count, rec_len) = record_geometry(&info)?;
        if rec_no == 0 || rec_no > count {
            return Err(Error::OutOfRange);
        }
        let resp =
            self.transceive_checked(&apdu::read_record(rec_no as u8, rec_len as u8))?;
        if resp.data.len() != rec_len {
            return Err(Error::RecordLength {
                expected: rec_len,
                got: resp.data.len(),
            });
        }
        Ok(resp.data)
    }

    /// Write one record (1-based) of the selected record-structured EF.
    /// The data must be exactly one record long. On a cyclic EF the ring
    /// pointer is card-owned: the write always lands on the next logical
    /// slot regardless of the index, which is only bounds-checked.
    pub fn update_record(&mut self, rec_no: usize, data: &[u8]) -> Result<(), Error> {
        let info = self.current_ef()?;
        Self::require_structure(&info, &[EfStructure::LinearFixed, EfStructure::Cyclic])?;
        let (count, rec_len) = record_geometry(&info)?;
        if rec_no == 0 || rec_no > count {
            return Err(Error::OutOfRange);
        }
        if data.len() != rec_len {
            return Err(Error::RecordLength {
                expected: rec_len,
                got: data.len(),
            });
        }
        if info.structure == EfStructure::Cyclic {
            self.transceive_checked(&apdu::update_record_previous(data))?;
        } else {
            self.transceive_checked(&apdu::update_record(rec_no as u8, data))?;
        }
        Ok(())
    }

    /// Write the next record of the selected cyclic EF, overwriting the
    /// oldest entry. The written record becomes record 1.
    pub fn append_record(&mut self, data: &[u8]) -> Result<(), Error> {
        let info = self.current_ef()?;
        Self::require_structure(&info, &[EfStructure::Cyclic])?;
        let (_, rec_len) = record_geometry(&info)?;
        if data.len() != rec_len {
            return Err(Error::RecordLength {
                expected: rec_len,
                got: data.len(),
            });
        }
        self.transceive_checked(&apdu::update_record_previous(data))?;
        Ok(())
    }

    /// Record count of the selected record-structured EF.
    pub fn record_count(&self) -> Result<usize, Error> {
        let info = self.current_ef()?;
        Self::require_structure(&info, &[EfStructure::LinearFixed, EfStructure::Cyclic])?;
        record_geometry(&info).map(|(count, _)| count)
    }

    /// Record length of the selected record-structured EF.
    pub fn record_len(&self) -> Result<usize, Error> {
        let info = self.current_ef()?;
        Self::require_structure(&info, &[EfStructure::LinearFixed, EfStructure::Cyclic])?;
        record_geometry(&info).map(|(_, len)| len)
    }

    /// File size of the selected EF.
    pub fn file_size(&self) -> Result<usize, Error> {
        let info = self.current_ef()?;
        Ok(info.size)
    }

    // ---- PIN -----------------------------------------------------------

    /// Verify a CHV (PIN). On a wrong code the error carries the 63Cx
    /// status word with the remaining attempts, readable via
    /// [`crate::apdu::sw::retry_count`].
    pub fn verify_chv(&mut self, chv_no: u8, code: &[u8]) -> Result<(), Error> {
        self.transceive_checked(&apdu::verify_chv(chv_no, code))?;
        Ok(())
    }
}

/// Record count and length, or the structure-level error when the FCP did
/// not carry them.
fn record_geometry(info: &EfInfo) -> Result<(usize, usize), Error> {
    match (info.record_count, info.record_len) {
        (Some(count), Some(len)) if len > 0 => Ok((count, len)),
        _ => Err(Error::StructureMismatch {
            actual: info.structure,
        }),
    }
}

/// Split a path into (absolute, elements). Empty elements are dropped, so
/// `//MF//DF.GSM/` parses the same as `/MF/DF.GSM`.
fn parse_path(path: &str) -> (bool, Vec<String>) {
    let absolute = path.starts_with('/');
    let elements = path
        .split('/')
        .filter(|e| !e.is_empty())
        .map(str::to_string)
        .collect();
    (absolute, elements)
}

/// Parse an element as a 4-digit hex file identifier.
fn parse_fid(element: &str) -> Option<u16> {
    if element.len() != 4 || !element.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(element, 16).ok()
}

/// Parse an element as an AID: even-length hex, longer than a fid.
fn parse_aid(element: &str) -> Option<Vec<u8>> {
    if element.len() <= 4 || element.len() % 2 != 0 {
        return None;
    }
    hex::decode(element).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use crate::virt::VirtualCard;

    fn session() -> Session<VirtualCard> {
        Session::new(VirtualCard::standard()).unwrap()
    }

    #[test]
    fn test_starts_at_mf() {
        let s = session();
        assert_eq!(s.current_path(false), "MF");
        assert_eq!(s.current_path(true), "3f00");
    }

    #[test]
    fn test_absolute_path_round_trip() {
        let mut s = session();
        let fd = s.select("/MF/DF.TELECOM/EF.ADN").unwrap();
        assert_eq!(fd.file_id, Some(0x6F3A));
        assert_eq!(s.current_path(false), "MF/DF.TELECOM/EF.ADN");
        assert_eq!(s.current_path(true), "3f00/7f10/6f3a");
    }

    #[test]
    fn test_relative_and_fid_elements() {
        let mut s = session();
        s.select("7f10").unwrap();
        assert_eq!(s.current_path(false), "MF/DF.TELECOM");
        s.select("EF.ADN").unwrap();
        assert_eq!(s.current_path(false), "MF/DF.TELECOM/EF.ADN");
        // sibling directly from an EF cursor
        s.select("EF.SMS").unwrap();
        assert_eq!(s.current_path(false), "MF/DF.TELECOM/EF.SMS");
    }

    #[test]
    fn test_dotdot_from_ef_lands_on_its_df() {
        let mut s = session();
        s.select("/MF/DF.TELECOM").unwrap();
        let before = s.current_path(false);
        s.select("EF.ADN").unwrap();
        s.select("..").unwrap();
        assert_eq!(s.current_path(false), before);
        s.select("..").unwrap();
        assert_eq!(s.current_path(false), "MF");
        // and again at the MF it stays put
        s.select("..").unwrap();
        assert_eq!(s.current_path(false), "MF");
    }

    #[test]
    fn test_dotdot_from_ef_inside_adf() {
        let mut s = session();
        s.select("/MF/ADF.USIM/EF.IMSI").unwrap();
        s.select("..").unwrap();
        assert_eq!(s.current_path(false), "MF/ADF.USIM");
        // the card followed: selecting a child works from the restored DF
        s.select("EF.AD").unwrap();
        assert_eq!(s.current_path(false), "MF/ADF.USIM/EF.AD");
    }

    #[test]
    fn test_dot_reselects() {
        let mut s = session();
        s.select("/MF/DF.GSM").unwrap();
        let fd = s.select(".").unwrap();
        assert_eq!(fd.file_id, Some(0x7F20));
        assert_eq!(s.current_path(false), "MF/DF.GSM");
    }

    #[test]
    fn test_adn_geometry_after_select() {
        let mut s = session();
        s.select("/MF/DF.TELECOM/EF.ADN").unwrap();
        assert_eq!(s.record_count().unwrap(), 10);
        assert_eq!(s.record_len().unwrap(), 28);
        let rec = s.read_record(1).unwrap();
        assert_eq!(rec.len(), 28);
        assert!(rec.starts_with(b"Alice"));
    }

    #[test]
    fn test_record_bounds_checked_before_card() {
        let mut s = session();
        s.select("/MF/DF.TELECOM/EF.ADN").unwrap();
        assert!(matches!(s.read_record(0), Err(Error::OutOfRange)));
        assert!(matches!(s.read_record(11), Err(Error::OutOfRange)));
        assert!(matches!(
            s.update_record(1, &[0u8; 27]),
            Err(Error::RecordLength { expected: 28, got: 27 })
        ));
    }

    #[test]
    fn test_binary_bounds() {
        let mut s = session();
        s.select("/MF/EF.ICCID").unwrap();
        assert_eq!(s.file_size().unwrap(), 10);
        assert_eq!(s.read_binary(0, None).unwrap().len(), 10);
        assert_eq!(s.read_binary(8, Some(2)).unwrap().len(), 2);
        assert!(matches!(s.read_binary(8, Some(3)), Err(Error::OutOfRange)));
        assert!(matches!(s.update_binary(9, &[0, 0]), Err(Error::OutOfRange)));
    }

    #[test]
    fn test_structure_mismatch() {
        let mut s = session();
        s.select("/MF/DF.TELECOM/EF.ADN").unwrap();
        assert!(matches!(
            s.read_binary(0, None),
            Err(Error::StructureMismatch {
                actual: EfStructure::LinearFixed
            })
        ));
        s.select("/MF/EF.ICCID").unwrap();
        assert!(matches!(
            s.read_record(1),
            Err(Error::StructureMismatch {
                actual: EfStructure::Transparent
            })
        ));
    }

    #[test]
    fn test_no_file_selected_on_df_cursor() {
        let mut s = session();
        s.select("/MF/DF.GSM").unwrap();
        assert!(matches!(s.read_binary(0, None), Err(Error::NoFileSelected)));
        assert!(matches!(s.record_count(), Err(Error::NoFileSelected)));
    }

    #[test]
    fn test_unknown_name_fails_without_moving() {
        let mut s = session();
        s.select("/MF/DF.TELECOM").unwrap();
        let err = s.select("EF.NOPE").unwrap_err();
        assert!(matches!(err, Error::PathNotFound { .. }));
        assert_eq!(s.current_path(false), "MF/DF.TELECOM");
    }

    #[test]
    fn test_midpath_failure_restores_cursor_and_card() {
        let mut s = session();
        s.select("/MF/DF.TELECOM/EF.ADN").unwrap();
        let err = s.select("/MF/DF.GSM/6fee").unwrap_err();
        assert!(matches!(err, Error::PathNotFound { ref element } if element == "6fee"));
        assert_eq!(s.current_path(false), "MF/DF.TELECOM/EF.ADN");
        // the card was re-synced: record access still works
        assert!(s.read_record(1).is_ok());
    }

    #[test]
    fn test_discovery_of_unprofiled_file() {
        let mut s = session();
        let fd = s.select("/MF/DF.GSM/6fe0").unwrap();
        assert_eq!(fd.file_id, Some(0x6FE0));
        assert_eq!(s.current_path(false), "MF/DF.GSM/6fe0");
        assert_eq!(s.read_binary(0, None).unwrap(), hex::decode("cafe0000").unwrap());
        // now part of the model
        assert!(s
            .fs()
            .child_by_fid(s.fs().cwd_of(s.cursor()), 0x6FE0)
            .is_some());
    }

    #[test]
    fn test_adf_by_name_and_by_aid() {
        let mut s = session();
        s.select("ADF.USIM").unwrap();
        assert_eq!(s.current_path(false), "MF/ADF.USIM");
        s.select("EF.IMSI").unwrap();
        assert_eq!(s.current_path(false), "MF/ADF.USIM/EF.IMSI");
        // registered AID prefix from anywhere
        s.select("/MF/DF.TELECOM").unwrap();
        s.select("a0000000871002").unwrap();
        assert_eq!(s.current_path(false), "MF/ADF.USIM");
    }

    #[test]
    fn test_chv_gates_protected_file() {
        let mut s = session();
        s.select("/MF/DF.TELECOM/EF.SMS").unwrap();
        let err = s.read_record(1).unwrap_err();
        assert!(matches!(
            err,
            Error::StatusWord {
                sw: 0x6982,
                ..
            }
        ));
        let err = s.verify_chv(1, b"0000").unwrap_err();
        if let Error::StatusWord { sw, .. } = err {
            assert_eq!(apdu::sw::retry_count(sw), Some(2));
        } else {
            panic!("expected status word error, got {err:?}");
        }
        s.verify_chv(1, b"1234").unwrap();
        assert_eq!(s.read_record(1).unwrap().len(), 176);
    }

    #[test]
    fn test_cyclic_read_and_append() {
        let mut s = session();
        s.select("/MF/DF.GSM/6f39").unwrap();
        assert_eq!(s.record_count().unwrap(), 3);
        assert_eq!(s.read_record(1).unwrap(), vec![0, 0, 3]);
        s.append_record(&[0, 0, 9]).unwrap();
        assert_eq!(s.read_record(1).unwrap(), vec![0, 0, 9]);
        assert_eq!(s.read_record(2).unwrap(), vec![0, 0, 3]);
    }

    #[test]
    fn test_cyclic_update_lands_on_ring_head() {
        let mut s = session();
        s.select("/MF/DF.GSM/EF.ACM").unwrap();
        // the index is bounds-checked only; the card's ring pointer picks
        // the slot and the written record becomes record 1
        assert!(matches!(s.update_record(4, &[0, 0, 7]), Err(Error::OutOfRange)));
        s.update_record(3, &[0, 0, 7]).unwrap();
        assert_eq!(s.read_record(1).unwrap(), vec![0, 0, 7]);
        assert_eq!(s.read_record(2).unwrap(), vec![0, 0, 3]);
    }

    struct StarvedCard(VirtualCard);

    impl CardTransport for StarvedCard {
        fn transceive(&mut self, raw: &[u8]) -> Result<Response, TransportError> {
            let mut resp = self.0.transceive(raw)?;
            if raw.get(1) == Some(&apdu::ins::READ_BINARY) {
                resp.data.clear();
            }
            Ok(resp)
        }

        fn wait_for_card(&mut self) -> bool {
            self.0.wait_for_card()
        }
    }

    #[test]
    fn test_short_read_surfaces_as_error() {
        let mut s = Session::new(StarvedCard(VirtualCard::standard())).unwrap();
        s.select("/MF/EF.ICCID").unwrap();
        let err = s.read_binary(0, None).unwrap_err();
        assert!(matches!(err, Error::ShortRead { expected: 10, got: 0 }));
    }

    #[test]
    fn test_binary_offset_is_15_bits() {
        let mut card = VirtualCard::standard();
        let mf = card.mf();
        let blob = vec![0u8; 0x9000];
        card.add_transparent(mf, 0x4F00, &blob);
        let mut s = Session::new(card).unwrap();
        s.select("/MF/4f00").unwrap();
        assert_eq!(s.file_size().unwrap(), 0x9000);
        assert!(s.read_binary(0x7FFF, Some(1)).is_ok());
        assert!(matches!(s.read_binary(0x7FFF, Some(2)), Err(Error::OutOfRange)));
        assert!(matches!(s.read_binary(0x8000, Some(1)), Err(Error::OutOfRange)));
        assert!(matches!(s.update_binary(0x7FFF, &[0, 0]), Err(Error::OutOfRange)));
    }

    #[test]
    fn test_selectables_listing() {
        let mut s = session();
        s.select("/MF/DF.TELECOM").unwrap();
        let sels = s.selectables(SelFlags::everything());
        assert!(sels.contains(&"EF.ADN".to_string()));
        assert!(sels.contains(&"..".to_string()));
        assert!(sels.contains(&"ADF.USIM".to_string()));
        let listing = s.list(SelFlags::FIDS | SelFlags::NAMES, false);
        assert_eq!(listing.first().map(String::as_str), Some("EF.ADN"));
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(parse_path("/MF/DF.GSM"), (true, vec!["MF".into(), "DF.GSM".into()]));
        assert_eq!(parse_path("EF.ADN"), (false, vec!["EF.ADN".into()]));
        assert_eq!(parse_path("//7f10//"), (true, vec!["7f10".into()]));
        assert_eq!(parse_path(""), (false, vec![]));
    }

    #[test]
    fn test_parse_fid() {
        assert_eq!(parse_fid("6f3a"), Some(0x6F3A));
        assert_eq!(parse_fid("6F3A"), Some(0x6F3A));
        assert_eq!(parse_fid("xyz"), None);
        assert_eq!(parse_fid("6f3aa"), None);
        assert_eq!(parse_fid("EF.X"), None);
    }

    #[test]
    fn test_parse_aid() {
        assert_eq!(
            parse_aid("a0000000871002"),
            Some(hex::decode("a0000000871002").unwrap())
        );
        assert_eq!(parse_aid("6f3a"), None);
        assert_eq!(parse_aid("a0001"), None);
        assert_eq!(parse_aid("DF.TELECOM"), None);
    }
}
