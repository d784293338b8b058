//! In-memory model of the card's file hierarchy
//!
//! Nodes live in an arena and reference each other by [`NodeId`], so the
//! tree can grow during traversal without ownership cycles between parent
//! and child. The model mirrors what SELECT has confirmed: EF structure and
//! geometry stay unknown until the first successful selection decodes the
//! FCP, and are immutable afterwards.

pub mod profile;

use std::collections::BTreeMap;

use bitflags::bitflags;
use thiserror::Error;

use crate::fcp::{EfStructure, FileDescriptor};

/// File identifier of the MF, reserved for the root.
pub const MF_FID: u16 = 0x3F00;

/// Names that can never be given to a registered file.
pub const RESERVED_NAMES: [&str; 3] = [".", "..", "MF"];

/// Errors raised while mutating the tree model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("file id {0:04x} already exists under this DF")]
    DuplicateFid(u16),

    #[error("file name {0} already exists under this DF")]
    DuplicateName(String),

    #[error("sfi {0:02x} already exists under this DF")]
    DuplicateSfi(u8),

    #[error("{0} is a reserved name")]
    ReservedName(String),

    #[error("file id {0:04x} is reserved for the MF")]
    ReservedFid(u16),

    #[error("application {0} already registered")]
    DuplicateAid(String),

    #[error("parent is not a DF")]
    NotADirectory,
}

/// Stable handle to a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// EF runtime attributes, populated from the first decoded FCP.
#[derive(Debug, Clone)]
pub struct EfInfo {
    /// Decoded structure; fixed for the rest of the session.
    pub structure: EfStructure,
    /// File size in bytes (data, excluding structural overhead).
    pub size: usize,
    /// Record length for record-structured files.
    pub record_len: Option<usize>,
    /// Record count for record-structured files.
    pub record_count: Option<usize>,
    /// Life cycle status byte.
    pub life_cycle: Option<u8>,
}

/// What kind of node this is.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Master file, the root. Exactly one per tree.
    Mf,
    /// Dedicated file (directory).
    Df,
    /// Application DF, selected by AID.
    Adf { aid: Vec<u8> },
    /// Elementary file; `info` is None until the first FCP decode.
    Ef { info: Option<EfInfo> },
}

bitflags! {
    /// Visibility classes for selectable-identifier listings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SelFlags: u8 {
        /// The current node itself (`.` plus its own fid/name).
        const SELF   = 0b0000_0001;
        /// The parent pseudo-entry (`..`).
        const PARENT = 0b0000_0010;
        /// Numeric file identifiers.
        const FIDS   = 0b0000_0100;
        /// Symbolic names.
        const NAMES  = 0b0000_1000;
        /// The MF, reachable from everywhere.
        const MF     = 0b0001_0000;
        /// Applications (ADFs) registered under the MF.
        const APPS   = 0b0010_0000;
    }
}

impl SelFlags {
    /// Everything: the default for interactive listings.
    pub fn everything() -> Self {
        Self::all()
    }
}

/// One node of the card file system.
#[derive(Debug, Clone)]
pub struct FileNode {
    /// 2-byte file identifier; ADFs may carry none.
    pub fid: Option<u16>,
    /// Human-readable name ("DF.TELECOM", "EF.ADN", ...).
    pub name: Option<String>,
    /// Short file identifier.
    pub sfi: Option<u8>,
    /// Free-form description.
    pub desc: Option<String>,
    kind: NodeKind,
    parent: NodeId,
    children: Vec<NodeId>,
}

impl FileNode {
    /// The node kind.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// True for MF/DF/ADF.
    pub fn is_dir(&self) -> bool {
        !matches!(self.kind, NodeKind::Ef { .. })
    }

    /// Decoded EF attributes, if this is an EF that has been selected.
    pub fn ef_info(&self) -> Option<&EfInfo> {
        match &self.kind {
            NodeKind::Ef { info } => info.as_ref(),
            _ => None,
        }
    }

    /// AID for ADF nodes.
    pub fn aid(&self) -> Option<&[u8]> {
        match &self.kind {
            NodeKind::Adf { aid } => Some(aid),
            _ => None,
        }
    }

    /// Label used in paths and listings: name when known, otherwise the fid
    /// (or AID) in hex.
    pub fn label(&self, numeric: bool) -> String {
        if !numeric {
            if let Some(name) = &self.name {
                return name.clone();
            }
        }
        match (&self.kind, self.fid) {
            (NodeKind::Adf { aid }, None) => hex::encode(aid),
            (_, Some(fid)) => format!("{fid:04x}"),
            _ => String::from("????"),
        }
    }
}

/// Everything a new node needs before it is attached to a parent.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub fid: Option<u16>,
    pub name: Option<String>,
    pub sfi: Option<u8>,
    pub desc: Option<String>,
    pub kind: NodeKind,
}

impl NodeSpec {
    /// A DF with fid and name.
    pub fn df(fid: u16, name: &str) -> Self {
        Self {
            fid: Some(fid),
            name: Some(name.to_string()),
            sfi: None,
            desc: None,
            kind: NodeKind::Df,
        }
    }

    /// An EF with fid and name; structure unknown until selected.
    pub fn ef(fid: u16, name: &str) -> Self {
        Self {
            fid: Some(fid),
            name: Some(name.to_string()),
            sfi: None,
            desc: None,
            kind: NodeKind::Ef { info: None },
        }
    }

    /// An application DF identified by AID.
    pub fn adf(aid: &[u8], name: &str) -> Self {
        Self {
            fid: None,
            name: Some(name.to_string()),
            sfi: None,
            desc: None,
            kind: NodeKind::Adf { aid: aid.to_vec() },
        }
    }

    /// Attach a short file identifier.
    pub fn with_sfi(mut self, sfi: u8) -> Self {
        self.sfi = Some(sfi);
        self
    }

    /// Attach a description.
    pub fn with_desc(mut self, desc: &str) -> Self {
        self.desc = Some(desc.to_string());
        self
    }
}

/// The session-wide file-system tree. Created with a lone MF; grows as the
/// profile registers known files and as SELECT discovers new ones. Nodes
/// are never removed.
#[derive(Debug)]
pub struct FileSystem {
    nodes: Vec<FileNode>,
}

impl FileSystem {
    /// Create a tree holding only the MF.
    pub fn new() -> Self {
        let mf = FileNode {
            fid: Some(MF_FID),
            name: Some("MF".to_string()),
            sfi: None,
            desc: Some("Master File (directory root)".to_string()),
            kind: NodeKind::Mf,
            parent: NodeId(0),
            children: Vec::new(),
        };
        Self { nodes: vec![mf] }
    }

    /// The root node id.
    pub fn mf(&self) -> NodeId {
        NodeId(0)
    }

    /// Borrow a node.
    pub fn node(&self, id: NodeId) -> &FileNode {
        &self.nodes[id.0]
    }

    /// Parent of a node; the MF is its own parent.
    pub fn parent(&self, id: NodeId) -> NodeId {
        self.nodes[id.0].parent
    }

    /// Child ids of a node, in insertion order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// The enclosing directory: the node itself if it is a DF, else its
    /// parent.
    pub fn cwd_of(&self, id: NodeId) -> NodeId {
        if self.node(id).is_dir() {
            id
        } else {
            self.parent(id)
        }
    }

    /// Chain of node ids from the MF down to `id`, inclusive.
    pub fn ancestry(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut cur = id;
        while self.parent(cur) != cur {
            cur = self.parent(cur);
            chain.push(cur);
        }
        chain.reverse();
        chain
    }

    /// Path labels from the MF down to `id`.
    pub fn path_labels(&self, id: NodeId, numeric: bool) -> Vec<String> {
        self.ancestry(id)
            .into_iter()
            .map(|n| self.node(n).label(numeric))
            .collect()
    }

    /// Attach a new node under `parent`, enforcing the sibling-uniqueness
    /// and reserved-identifier invariants.
    pub fn add_child(&mut self, parent: NodeId, spec: NodeSpec) -> Result<NodeId, FsError> {
        if !self.node(parent).is_dir() {
            return Err(FsError::NotADirectory);
        }
        if let Some(fid) = spec.fid {
            if fid == MF_FID {
                return Err(FsError::ReservedFid(fid));
            }
            if self.child_by_fid(parent, fid).is_some() {
                return Err(FsError::DuplicateFid(fid));
            }
        }
        if let Some(name) = &spec.name {
            if RESERVED_NAMES.contains(&name.as_str()) {
                return Err(FsError::ReservedName(name.clone()));
            }
            if self.child_by_name(parent, name).is_some() {
                return Err(FsError::DuplicateName(name.clone()));
            }
        }
        if let Some(sfi) = spec.sfi {
            if self.child_by_sfi(parent, sfi).is_some() {
                return Err(FsError::DuplicateSfi(sfi));
            }
        }
        if let NodeKind::Adf { aid } = &spec.kind {
            let exists = self
                .children(parent)
                .iter()
                .any(|c| self.node(*c).aid() == Some(aid.as_slice()));
            if exists {
                return Err(FsError::DuplicateAid(hex::encode(aid)));
            }
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(FileNode {
            fid: spec.fid,
            name: spec.name,
            sfi: spec.sfi,
            desc: spec.desc,
            kind: spec.kind,
            parent,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// Register an application DF under the MF.
    pub fn add_application(&mut self, spec: NodeSpec) -> Result<NodeId, FsError> {
        let mf = self.mf();
        self.add_child(mf, spec)
    }

    /// Application nodes attached under the MF.
    pub fn applications(&self) -> Vec<NodeId> {
        self.children(self.mf())
            .iter()
            .copied()
            .filter(|c| matches!(self.node(*c).kind(), NodeKind::Adf { .. }))
            .collect()
    }

    /// Find a direct child by file id.
    pub fn child_by_fid(&self, parent: NodeId, fid: u16) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.node(*c).fid == Some(fid))
    }

    /// Find a direct child by name.
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.node(*c).name.as_deref() == Some(name))
    }

    /// Find a direct child by short file identifier.
    pub fn child_by_sfi(&self, parent: NodeId, sfi: u8) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|c| self.node(*c).sfi == Some(sfi))
    }

    /// Find an application by AID prefix match.
    pub fn app_by_aid(&self, aid: &[u8]) -> Option<NodeId> {
        self.applications().into_iter().find(|a| {
            self.node(*a)
                .aid()
                .map(|candidate| candidate.starts_with(aid) || aid.starts_with(candidate))
                .unwrap_or(false)
        })
    }

    /// Map of identifier -> node selectable from `at`, honoring the
    /// visibility flags. Identifiers are fids (4 hex digits), names, AIDs,
    /// and the `.`/`..` pseudo-entries.
    pub fn selectables(&self, at: NodeId, flags: SelFlags) -> BTreeMap<String, NodeId> {
        let mut sels = BTreeMap::new();

        if flags.contains(SelFlags::SELF) {
            sels.insert(".".to_string(), at);
            self.insert_identifiers(&mut sels, at, flags);
        }
        if flags.contains(SelFlags::PARENT) {
            sels.insert("..".to_string(), self.parent(at));
        }
        if flags.contains(SelFlags::MF) {
            sels.insert("MF".to_string(), self.mf());
            sels.insert(format!("{MF_FID:04x}"), self.mf());
        }
        if flags.contains(SelFlags::APPS) {
            for app in self.applications() {
                self.insert_identifiers(&mut sels, app, flags);
                if flags.contains(SelFlags::FIDS) {
                    if let Some(aid) = self.node(app).aid() {
                        sels.insert(hex::encode(aid), app);
                    }
                }
            }
        }
        // Children of the enclosing DF: from an EF, its siblings remain
        // selectable.
        let cwd = self.cwd_of(at);
        for child in self.children(cwd) {
            self.insert_identifiers(&mut sels, *child, flags);
        }
        sels
    }

    fn insert_identifiers(&self, sels: &mut BTreeMap<String, NodeId>, id: NodeId, flags: SelFlags) {
        let node = self.node(id);
        if flags.contains(SelFlags::FIDS) {
            if let Some(fid) = node.fid {
                sels.insert(format!("{fid:04x}"), id);
            }
        }
        if flags.contains(SelFlags::NAMES) {
            if let Some(name) = &node.name {
                sels.insert(name.clone(), id);
            }
        }
    }

    /// Child labels of the DF enclosing `at`, in a stable order: ascending
    /// fid by default (AID-only nodes last), or name order on request.
    pub fn list_children(&self, at: NodeId, flags: SelFlags, by_name: bool) -> Vec<String> {
        let cwd = self.cwd_of(at);
        let mut entries: Vec<NodeId> = self
            .children(cwd)
            .iter()
            .copied()
            .filter(|c| {
                let node = self.node(*c);
                match node.kind() {
                    NodeKind::Adf { .. } => flags.contains(SelFlags::APPS),
                    _ => {
                        (flags.contains(SelFlags::FIDS) && node.fid.is_some())
                            || (flags.contains(SelFlags::NAMES) && node.name.is_some())
                    }
                }
            })
            .collect();
        if by_name {
            entries.sort_by(|a, b| self.node(*a).label(false).cmp(&self.node(*b).label(false)));
        } else {
            entries.sort_by_key(|c| self.node(*c).fid.map(u32::from).unwrap_or(u32::MAX));
        }

        let numeric = !flags.contains(SelFlags::NAMES);
        let mut labels: Vec<String> = entries.iter().map(|c| self.node(*c).label(numeric)).collect();
        if flags.contains(SelFlags::SELF) {
            labels.insert(0, ".".to_string());
        }
        if flags.contains(SelFlags::PARENT) {
            labels.insert(0, "..".to_string());
        }
        labels
    }

    /// Apply a decoded FCP to a node. EF structure is decode-once: a second
    /// decode must report the same structure or the session is facing a
    /// data-integrity fault.
    pub fn enrich(&mut self, id: NodeId, fd: &FileDescriptor) -> Result<(), crate::fcp::FcpError> {
        use crate::fcp::FcpError;

        // Fill in identifiers the profile did not know.
        if self.nodes[id.0].sfi.is_none() {
            self.nodes[id.0].sfi = fd.sfi;
        }

        match (&mut self.nodes[id.0].kind, fd.is_ef()) {
            (NodeKind::Ef { info }, true) => {
                let structure = fd.structure.ok_or(FcpError::MissingFileDescriptor)?;
                match info {
                    Some(existing) => {
                        if existing.structure != structure {
                            return Err(FcpError::StructureChanged {
                                previous: existing.structure,
                                decoded: structure,
                            });
                        }
                        existing.life_cycle = fd.life_cycle.or(existing.life_cycle);
                    }
                    None => {
                        *info = Some(EfInfo {
                            structure,
                            size: fd.file_size.unwrap_or(0),
                            record_len: fd.record_len,
                            record_count: fd.record_count,
                            life_cycle: fd.life_cycle,
                        });
                    }
                }
                Ok(())
            }
            (NodeKind::Mf | NodeKind::Df | NodeKind::Adf { .. }, false) => Ok(()),
            _ => Err(FcpError::CategoryMismatch),
        }
    }

    /// Create a node for a file the card reported but the profile did not
    /// know, placing it under `parent` with attributes from the decode.
    pub fn discover(
        &mut self,
        parent: NodeId,
        fd: &FileDescriptor,
    ) -> Result<NodeId, FsError> {
        let kind = if fd.is_ef() {
            NodeKind::Ef { info: None }
        } else if let Some(aid) = &fd.df_name {
            NodeKind::Adf { aid: aid.clone() }
        } else {
            NodeKind::Df
        };
        let name = match &kind {
            NodeKind::Adf { aid } => profile::app_name_for_aid(aid).map(str::to_string),
            _ => None,
        };
        let spec = NodeSpec {
            fid: fd.file_id,
            name,
            sfi: fd.sfi,
            desc: Some("discovered at runtime".to_string()),
            kind,
        };
        self.add_child(parent, spec)
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new()
    }
}
