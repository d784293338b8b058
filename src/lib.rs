//! SIM/UICC/USIM/ISIM file system navigation and structured access
//!
//! This crate models the file hierarchy of a UICC (MF, DFs, ADFs and EFs),
//! resolves symbolic paths into the SELECT sequences the card understands,
//! and gives structured, bounds-checked access to transparent and
//! record-oriented files. The model learns as it goes: every confirmed
//! SELECT response enriches the in-memory tree with the decoded FCP, and
//! files the profile does not know are discovered on the fly.
//!
//! The card itself sits behind the [`transport::CardTransport`] trait; the
//! bundled [`virt::VirtualCard`] implements it in-process for tests and
//! offline use.
//!
//! ```no_run
//! use uiccfs::{Session, virt::VirtualCard};
//!
//! # fn main() -> Result<(), uiccfs::Error> {
//! let mut session = Session::new(VirtualCard::standard())?;
//! session.select("/MF/DF.TELECOM/EF.ADN")?;
//! let record = session.read_record(1)?;
//! println!("{} -> {}", session.current_path(false), hex::encode(record));
//! # Ok(())
//! # }
//! ```

pub mod apdu;
pub mod error;
pub mod export;
pub mod fcp;
pub mod fs;
pub mod session;
pub mod tlv;
pub mod transport;
pub mod virt;

pub use error::Error;
pub use fcp::{decode_fcp, EfStructure, FileDescriptor};
pub use fs::{FileSystem, NodeId, SelFlags};
pub use session::Session;
pub use transport::{CardTransport, TransportError};

use std::sync::Arc;

use parking_lot::Mutex;

/// A session shared between threads. The card's selection state is global
/// to the session, so callers serialize whole operations, not individual
/// APDUs.
pub type SharedSession<T> = Arc<Mutex<Session<T>>>;

/// Wrap a session for shared use.
pub fn shared<T: CardTransport>(session: Session<T>) -> SharedSession<T> {
    Arc::new(Mutex::new(session))
}
