//! TLV (Tag-Length-Value) encoding and decoding
//!
//! BER-TLV as used in ISO 7816-4 / ETSI TS 102 221 card responses. The FCP
//! decoder parses with this module; the virtual card encodes with it.

mod encoder;
mod parser;

pub use encoder::{encode, encode_length, encode_tag, TlvBuilder};
pub use parser::{parse_all, parse_one, Tlv, TlvError};
