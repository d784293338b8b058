//! Card transport seam
//!
//! The engine talks to the card through [`CardTransport`]: one blocking
//! command/response round trip at a time. Physical drivers (serial, PC/SC,
//! modem, socket readers) live outside this crate and implement the trait;
//! the in-crate [`crate::virt::VirtualCard`] implements it for tests and
//! offline work.

use thiserror::Error;

use crate::apdu::Response;

/// Errors a transport implementation may surface.
///
/// A transport must not block indefinitely: a round trip either completes or
/// ends in one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no card present")]
    NoCard,

    #[error("no response from card")]
    NoResponse,

    #[error("card response timed out")]
    Timeout,

    #[error("response truncated to {0} bytes")]
    Truncated(usize),
}

/// Blocking request/response primitive to a single card.
///
/// One command may be in flight at a time. The card's selection state and
/// internal pointers are shared mutable state with no card-side concurrency
/// control, so concurrent callers must serialize around the transport
/// (see [`crate::SharedSession`]).
pub trait CardTransport {
    /// Send one command APDU and return the response body plus status word.
    fn transceive(&mut self, apdu: &[u8]) -> Result<Response, TransportError>;

    /// Block until a card is present. Returns false if none will arrive.
    fn wait_for_card(&mut self) -> bool;
}
