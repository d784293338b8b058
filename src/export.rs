//! Tree walking and card export
//!
//! [`walk`] drives a depth-first traversal of the tree below the current
//! position through a live [`Session`], reading every EF it can and
//! reporting unreadable files without aborting the traversal. [`export`]
//! walks the whole card with a handler that renders a replayable script,
//! and [`replay`] feeds such a script back into a session, reproducing the
//! exported content on another card. Both leave the cursor where the
//! caller had it.
//!
//! Script format, one command per line:
//!
//! ```text
//! # MF/DF.TELECOM/EF.ADN
//! select MF
//! select DF.TELECOM
//! select EF.ADN
//! update_record 1 ffffffffffffffffffffffffffffffffffffffffffffffffffffffff
//! ```
//!
//! Comment lines start with `#`; they carry the absolute path of the file
//! the following commands target, and notes about skipped files.

use std::fmt::Write as _;

use log::warn;

use crate::error::Error;
use crate::fcp::{EfStructure, FileDescriptor};
use crate::fs::NodeId;
use crate::session::Session;
use crate::transport::CardTransport;

/// Content of one EF, as read during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Whole body of a transparent EF.
    Transparent(Vec<u8>),
    /// Records of a linear fixed EF, index 1 first.
    Records(Vec<Vec<u8>>),
    /// Records of a cyclic EF, oldest first, so that appending them in
    /// order reproduces the ring.
    Cyclic(Vec<Vec<u8>>),
}

/// Callbacks invoked during a [`walk`].
pub trait WalkHandler {
    /// A directory is about to be descended into.
    fn enter_dir(&mut self, _path: &[String]) {}

    /// An EF was selected and fully read.
    fn visit(&mut self, path: &[String], fd: &FileDescriptor, content: &FileContent);

    /// A file could not be selected or read (typically an access condition
    /// the session does not satisfy). The walk continues with the next
    /// sibling.
    fn skipped(&mut self, _path: &[String], _err: &Error) {}
}

/// Depth-first traversal of the subtree rooted at the current position
/// (for an EF cursor, its enclosing DF). The cursor is returned to its
/// pre-call position whether the walk succeeds or fails.
///
/// Transport failures abort the walk; any other per-file failure is routed
/// to [`WalkHandler::skipped`] and the traversal moves on. The session is
/// re-synced after each recoverable failure, so the walk always descends
/// and backtracks in lock step with the card.
pub fn walk<T, H>(session: &mut Session<T>, handler: &mut H) -> Result<(), Error>
where
    T: CardTransport,
    H: WalkHandler,
{
    let origin = session.current_path(true);
    handler.enter_dir(&path_labels(session, session.fs().cwd_of(session.cursor())));
    let walked = walk_dir(session, handler);
    let restored = session.select(&format!("/{origin}")).map(|_| ());
    walked.and(restored)
}

fn walk_dir<T, H>(session: &mut Session<T>, handler: &mut H) -> Result<(), Error>
where
    T: CardTransport,
    H: WalkHandler,
{
    let cwd = session.fs().cwd_of(session.cursor());
    let mut entries: Vec<NodeId> = session.fs().children(cwd).to_vec();
    entries.sort_by_key(|c| session.fs().node(*c).fid.map(u32::from).unwrap_or(u32::MAX));
    let labels: Vec<String> = entries
        .iter()
        .map(|c| session.fs().node(*c).label(false))
        .collect();

    for label in labels {
        let fd = match session.select(&label) {
            Ok(fd) => fd,
            Err(e @ Error::Transport(_)) => return Err(e),
            Err(e) => {
                let mut path = path_labels(session, cwd);
                path.push(label.clone());
                handler.skipped(&path, &e);
                continue;
            }
        };
        let here = session.cursor();
        let path = path_labels(session, here);

        if fd.is_ef() {
            match read_content(session) {
                Ok(content) => handler.visit(&path, &fd, &content),
                Err(e @ Error::Transport(_)) => return Err(e),
                Err(e) => handler.skipped(&path, &e),
            }
        } else {
            handler.enter_dir(&path);
            walk_dir(session, handler)?;
            session.select("..")?;
        }
    }
    // A trailing EF child leaves the EF selected; step back onto the
    // directory itself so the caller's `..` exits it.
    if !session.selected().is_dir() {
        session.select("..")?;
    }
    Ok(())
}

fn path_labels<T: CardTransport>(session: &Session<T>, id: NodeId) -> Vec<String> {
    session.fs().path_labels(id, false)
}

/// Read the currently selected EF according to its decoded structure.
fn read_content<T: CardTransport>(session: &mut Session<T>) -> Result<FileContent, Error> {
    let info = session
        .selected()
        .ef_info()
        .cloned()
        .ok_or(Error::NoFileSelected)?;
    match info.structure {
        EfStructure::Transparent => Ok(FileContent::Transparent(session.read_binary(0, None)?)),
        EfStructure::LinearFixed => {
            let count = session.record_count()?;
            let mut records = Vec::with_capacity(count);
            for i in 1..=count {
                records.push(session.read_record(i)?);
            }
            Ok(FileContent::Records(records))
        }
        EfStructure::Cyclic => {
            // Record 1 is the newest; reading backwards yields the ring in
            // write order.
            let count = session.record_count()?;
            let mut records = Vec::with_capacity(count);
            for i in (1..=count).rev() {
                records.push(session.read_record(i)?);
            }
            Ok(FileContent::Cyclic(records))
        }
        EfStructure::BerTlv => Err(Error::StructureMismatch {
            actual: EfStructure::BerTlv,
        }),
    }
}

/// Walk handler that renders the replayable export script.
#[derive(Default)]
pub struct ScriptExporter {
    out: String,
}

impl ScriptExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The script produced so far.
    pub fn finish(self) -> String {
        self.out
    }

    fn emit_selects(&mut self, path: &[String]) {
        let _ = writeln!(self.out, "# {}", path.join("/"));
        for segment in path {
            let _ = writeln!(self.out, "select {segment}");
        }
    }
}

impl WalkHandler for ScriptExporter {
    fn visit(&mut self, path: &[String], _fd: &FileDescriptor, content: &FileContent) {
        self.emit_selects(path);
        match content {
            FileContent::Transparent(data) => {
                let _ = writeln!(self.out, "update_binary {}", hex::encode(data));
            }
            FileContent::Records(records) => {
                for (i, rec) in records.iter().enumerate() {
                    let _ = writeln!(self.out, "update_record {} {}", i + 1, hex::encode(rec));
                }
            }
            FileContent::Cyclic(records) => {
                for rec in records {
                    let _ = writeln!(self.out, "append_record {}", hex::encode(rec));
                }
            }
        }
        self.out.push('\n');
    }

    fn skipped(&mut self, path: &[String], err: &Error) {
        warn!("skipping {}: {err}", path.join("/"));
        let _ = writeln!(self.out, "# skipped {}: {err}\n", path.join("/"));
    }
}

/// Walk the whole card from the MF and render the full export script. The
/// cursor is returned to where the caller had it.
pub fn export<T: CardTransport>(session: &mut Session<T>) -> Result<String, Error> {
    let origin = session.current_path(true);
    session.select("/")?;
    let mut exporter = ScriptExporter::new();
    let walked = walk(session, &mut exporter);
    let restored = session.select(&format!("/{origin}")).map(|_| ());
    walked.and(restored)?;
    Ok(exporter.finish())
}

/// Execute an export script against a session. Stops at the first failing
/// line; unparseable lines report [`Error::Script`] with the 1-based line
/// number.
pub fn replay<T: CardTransport>(session: &mut Session<T>, script: &str) -> Result<(), Error> {
    for (idx, raw) in script.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let mut parts = text.split_whitespace();
        let cmd = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        match cmd {
            "select" => {
                let target = one_arg(line, &args)?;
                session.select(target)?;
            }
            "update_binary" => {
                let data = hex_arg(line, one_arg(line, &args)?)?;
                session.update_binary(0, &data)?;
            }
            "update_record" => {
                let [rec_no, data] = two_args(line, &args)?;
                let rec_no: usize = rec_no.parse().map_err(|_| Error::Script {
                    line,
                    reason: format!("bad record number {rec_no}"),
                })?;
                let data = hex_arg(line, data)?;
                session.update_record(rec_no, &data)?;
            }
            "append_record" => {
                let data = hex_arg(line, one_arg(line, &args)?)?;
                session.append_record(&data)?;
            }
            other => {
                return Err(Error::Script {
                    line,
                    reason: format!("unknown command {other}"),
                })
            }
        }
    }
    Ok(())
}

fn one_arg<'a>(line: usize, args: &[&'a str]) -> Result<&'a str, Error> {
    match args {
        [arg] => Ok(arg),
        _ => Err(Error::Script {
            line,
            reason: format!("expected 1 argument, got {}", args.len()),
        }),
    }
}

fn two_args<'a>(line: usize, args: &[&'a str]) -> Result<[&'a str; 2], Error> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(Error::Script {
            line,
            reason: format!("expected 2 arguments, got {}", args.len()),
        }),
    }
}

fn hex_arg(line: usize, arg: &str) -> Result<Vec<u8>, Error> {
    hex::decode(arg).map_err(|_| Error::Script {
        line,
        reason: format!("bad hex data {arg}"),
    })
}
