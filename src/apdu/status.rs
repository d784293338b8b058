//! Status word constants and classification
//!
//! ISO 7816-4 / ETSI TS 102 221 status words indicating command execution
//! results, plus the coarse classification the error layer reports.

use std::fmt;

/// Status word constants used by the SIM/UICC command set.
pub mod sw {
    /// Normal completion.
    pub const SUCCESS: u16 = 0x9000;

    /// End of file/record reached before reading Le bytes.
    pub const WARNING_EOF: u16 = 0x6282;
    /// Selected file invalidated.
    pub const WARNING_FILE_INVALIDATED: u16 = 0x6283;

    /// Memory problem (EEPROM write failed).
    pub const MEMORY_FAILURE: u16 = 0x6581;

    /// Wrong length (Lc/Le inconsistent with file geometry).
    pub const WRONG_LENGTH: u16 = 0x6700;

    /// Command incompatible with file structure.
    pub const COMMAND_INCOMPATIBLE: u16 = 0x6981;
    /// Security status not satisfied (PIN/ADM required).
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    /// Authentication method blocked (retry counter exhausted).
    pub const AUTH_METHOD_BLOCKED: u16 = 0x6983;
    /// Command not allowed, no current EF.
    pub const NO_CURRENT_EF: u16 = 0x6986;

    /// Incorrect parameters in the data field.
    pub const WRONG_DATA: u16 = 0x6A80;
    /// File not found.
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    /// Record not found.
    pub const RECORD_NOT_FOUND: u16 = 0x6A83;
    /// Incorrect parameters P1-P2.
    pub const INCORRECT_P1_P2: u16 = 0x6A86;

    /// Wrong parameters P1-P2 (offset outside the EF).
    pub const WRONG_P1_P2: u16 = 0x6B00;

    /// Instruction not supported.
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    /// Class not supported.
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;

    /// Build a verification-failed status with a retry count (63Cx).
    #[inline]
    pub fn retries_remaining(retries: u8) -> u16 {
        0x63C0 | ((retries & 0x0F) as u16)
    }

    /// Check if a status word indicates success (9000 or 61xx).
    #[inline]
    pub fn is_success(sw: u16) -> bool {
        sw == SUCCESS || (sw & 0xFF00) == 0x6100
    }

    /// Check if a status word is a verification retry warning (63Cx).
    #[inline]
    pub fn is_retry_warning(sw: u16) -> bool {
        (sw & 0xFFF0) == 0x63C0
    }

    /// Extract the retry count from a 63Cx warning.
    #[inline]
    pub fn retry_count(sw: u16) -> Option<u8> {
        if is_retry_warning(sw) {
            Some((sw & 0x0F) as u8)
        } else {
            None
        }
    }
}

/// Coarse classification of a status word.
///
/// Callers decide retry policy from the class: a `SecurityStatus` failure
/// typically means "authenticate, then repeat the call". The engine itself
/// never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwClass {
    /// 9000 / 61xx.
    Ok,
    /// 6982, 6983 and 63Cx verification failures.
    SecurityStatus,
    /// 6A82.
    FileNotFound,
    /// 6700 and 6Cxx.
    WrongLength,
    /// 65xx.
    MemoryFailure,
    /// Everything else.
    Other,
}

impl SwClass {
    /// Classify a raw status word.
    pub fn of(sw: u16) -> Self {
        if sw::is_success(sw) {
            SwClass::Ok
        } else if sw == sw::SECURITY_STATUS_NOT_SATISFIED
            || sw == sw::AUTH_METHOD_BLOCKED
            || sw::is_retry_warning(sw)
        {
            SwClass::SecurityStatus
        } else if sw == sw::FILE_NOT_FOUND {
            SwClass::FileNotFound
        } else if sw == sw::WRONG_LENGTH || (sw & 0xFF00) == 0x6C00 {
            SwClass::WrongLength
        } else if (sw & 0xFF00) == 0x6500 {
            SwClass::MemoryFailure
        } else {
            SwClass::Other
        }
    }
}

impl fmt::Display for SwClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwClass::Ok => "ok",
            SwClass::SecurityStatus => "security status not satisfied",
            SwClass::FileNotFound => "file not found",
            SwClass::WrongLength => "wrong length",
            SwClass::MemoryFailure => "memory failure",
            SwClass::Other => "other",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success() {
        assert!(sw::is_success(0x9000));
        assert!(sw::is_success(0x6110));
        assert!(!sw::is_success(0x6A82));
    }

    #[test]
    fn test_retries_remaining() {
        assert_eq!(sw::retries_remaining(3), 0x63C3);
        assert_eq!(sw::retries_remaining(0), 0x63C0);
        assert_eq!(sw::retry_count(0x63C2), Some(2));
        assert_eq!(sw::retry_count(0x9000), None);
    }

    #[test]
    fn test_classification() {
        assert_eq!(SwClass::of(0x9000), SwClass::Ok);
        assert_eq!(SwClass::of(0x6982), SwClass::SecurityStatus);
        assert_eq!(SwClass::of(0x63C1), SwClass::SecurityStatus);
        assert_eq!(SwClass::of(0x6A82), SwClass::FileNotFound);
        assert_eq!(SwClass::of(0x6700), SwClass::WrongLength);
        assert_eq!(SwClass::of(0x6C1C), SwClass::WrongLength);
        assert_eq!(SwClass::of(0x6581), SwClass::MemoryFailure);
        assert_eq!(SwClass::of(0x6B00), SwClass::Other);
    }
}
