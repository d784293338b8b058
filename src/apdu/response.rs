//! Card response handling
//!
//! A [`Response`] carries the response body plus the two status bytes every
//! card answer ends with.

use super::status::sw;

/// A card response: data bytes plus SW1/SW2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response body (without status bytes).
    pub data: Vec<u8>,
    /// Status word 1 (SW1).
    pub sw1: u8,
    /// Status word 2 (SW2).
    pub sw2: u8,
}

impl Response {
    /// Create a response with data and a combined status word.
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        Self {
            data,
            sw1: (sw >> 8) as u8,
            sw2: sw as u8,
        }
    }

    /// Success response (9000) with data.
    pub fn success(data: Vec<u8>) -> Self {
        Self::new(data, sw::SUCCESS)
    }

    /// Empty success response (9000).
    pub fn ok() -> Self {
        Self::success(Vec::new())
    }

    /// Error response with no data.
    pub fn error(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Combined status word.
    pub fn sw(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// True for 9000 and 61xx.
    pub fn is_okay(&self) -> bool {
        sw::is_success(self.sw())
    }

    /// Split raw reader output (body + 2 trailing status bytes) into a
    /// response. Returns None if fewer than two bytes arrived.
    pub fn from_wire(raw: &[u8]) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let (body, status) = raw.split_at(raw.len() - 2);
        Some(Self {
            data: body.to_vec(),
            sw1: status[0],
            sw2: status[1],
        })
    }

    /// Serialize for transmission: data followed by SW1 SW2.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.push(self.sw1);
        out.push(self.sw2);
        out
    }
}

impl From<u16> for Response {
    /// Create an error response from a status word.
    fn from(sw: u16) -> Self {
        Self::error(sw)
    }
}
