//! Supplementary services (PN_SS) message constants and lookup tables.

use std::time::Duration;

use crate::error::{IsiError, Result};

/// Default SS request timeout.
pub const SS_TIMEOUT: Duration = Duration::from_secs(15);

// Message ids
pub const SS_SERVICE_REQ: u8 = 0x00;
pub const SS_SERVICE_COMPLETED_RESP: u8 = 0x01;
pub const SS_SERVICE_FAILED_RESP: u8 = 0x02;
pub const SS_SERVICE_NOT_SUPPORTED_RESP: u8 = 0x03;

// Operations
pub const SS_ACTIVATION: u8 = 0x01;
pub const SS_DEACTIVATION: u8 = 0x02;
pub const SS_INTERROGATION: u8 = 0x05;
pub const SS_GSM_PASSWORD_REGISTRATION: u8 = 0x06;

// Request fields
pub const SS_ALL_TELE_AND_BEARER: u8 = 0x00;
pub const SS_SEND_ADDITIONAL_INFO: u8 = 0x01;

// Sub-blocks
pub const SS_STATUS_RESULT: u16 = 0x01;
pub const SS_GSM_PASSWORD: u16 = 0x03;
pub const SS_GSM_BSC_INFO: u16 = 0x09;
pub const SS_GSM_ADDITIONAL_INFO: u16 = 0x2F;

/// Declared length of the `SS_GSM_PASSWORD` sub-block.
pub const SS_GSM_PASSWORD_LEN: usize = 28;

/// Width of one password field in bytes (4 UCS-2 characters).
pub const SS_PASSWORD_WIDTH: usize = 8;

/// Longest accepted password.
pub const SS_PASSWORD_MAX_DIGITS: usize = 4;

/// The only service class the modem accepts for barring (voice + data + fax).
pub const SS_BARRING_CLASS: u8 = 7;

/// Supplementary service codes for call barring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SsCode {
    BarrAllOut = 33,
    BarrAllIn = 35,
    AllBarrings = 330,
    BarrOutInter = 331,
    BarrOutInterExcHome = 332,
    BarrAllInRoam = 351,
}

impl SsCode {
    #[inline]
    pub fn value(self) -> u16 {
        self as u16
    }
}

/// Lock codes accepted when changing barring state.
///
/// `AG` and `AC` map to the all-outgoing and all-incoming codes rather
/// than dedicated group codes.
pub const SET_LOCKS: &[(&str, SsCode)] = &[
    ("AO", SsCode::BarrAllOut),
    ("OI", SsCode::BarrOutInter),
    ("OX", SsCode::BarrOutInterExcHome),
    ("AI", SsCode::BarrAllIn),
    ("IR", SsCode::BarrAllInRoam),
    ("AB", SsCode::AllBarrings),
    ("AG", SsCode::BarrAllOut),
    ("AC", SsCode::BarrAllIn),
];

/// Lock codes accepted for interrogation.
pub const QUERY_LOCKS: &[(&str, SsCode)] = &[
    ("AO", SsCode::BarrAllOut),
    ("OI", SsCode::BarrOutInter),
    ("OX", SsCode::BarrOutInterExcHome),
    ("AI", SsCode::BarrAllIn),
    ("IR", SsCode::BarrAllInRoam),
];

/// Lock codes accepted for password registration.
pub const PASSWORD_LOCKS: &[(&str, SsCode)] = &[("AB", SsCode::AllBarrings)];

/// Look `lock` up in `table`.
pub fn lock_code(table: &[(&str, SsCode)], lock: &str) -> Result<SsCode> {
    table
        .iter()
        .find(|(name, _)| *name == lock)
        .map(|(_, code)| *code)
        .ok_or_else(|| IsiError::invalid(format!("unsupported lock code {:?}", lock)))
}

// Basic service codes
pub const SS_GSM_TELEPHONY: u8 = 11;
pub const SS_GSM_ALL_DATA_TELE: u8 = 12;
pub const SS_GSM_FACSIMILE: u8 = 13;
pub const SS_GSM_SMS: u8 = 16;
pub const SS_GSM_ALL_DATA_CIRCUIT_SYNC: u8 = 24;
pub const SS_GSM_ALL_DATA_CIRCUIT_ASYNC: u8 = 25;
pub const SS_GSM_ALL_DATA_PACKET_SYNC: u8 = 26;
pub const SS_GSM_ALL_PAD_ACCESS: u8 = 27;

/// Basic service code to status mask bit.
const BSC_MASK_BITS: [(u8, u32); 8] = [
    (SS_GSM_TELEPHONY, 1 << 0),
    (SS_GSM_ALL_DATA_TELE, 1 << 1),
    (SS_GSM_FACSIMILE, 1 << 2),
    (SS_GSM_SMS, 1 << 3),
    (SS_GSM_ALL_DATA_CIRCUIT_SYNC, 1 << 4),
    (SS_GSM_ALL_DATA_CIRCUIT_ASYNC, 1 << 5),
    (SS_GSM_ALL_DATA_PACKET_SYNC, 1 << 6),
    (SS_GSM_ALL_PAD_ACCESS, 1 << 7),
];

/// Mask bit for a basic service code, if it has one.
pub fn bsc_mask_bit(bsc: u8) -> Option<u32> {
    BSC_MASK_BITS
        .iter()
        .find(|(code, _)| *code == bsc)
        .map(|(_, bit)| *bit)
}

/// Fold `bsc` into `mask`; unknown codes are logged and ignored.
pub fn update_status_mask(mask: u32, bsc: u8) -> u32 {
    match bsc_mask_bit(bsc) {
        Some(bit) => mask | bit,
        None => {
            tracing::debug!("Unknown BSC: 0x{:04X}", bsc);
            mask
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_code_lookup() {
        assert_eq!(lock_code(QUERY_LOCKS, "AO").unwrap().value(), 33);
        assert_eq!(lock_code(QUERY_LOCKS, "IR").unwrap().value(), 351);
        assert_eq!(lock_code(SET_LOCKS, "AB").unwrap().value(), 330);
        assert!(lock_code(QUERY_LOCKS, "AB").is_err());
        assert!(matches!(
            lock_code(SET_LOCKS, "ZZ"),
            Err(IsiError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_lock_code_is_case_sensitive() {
        assert!(lock_code(SET_LOCKS, "ao").is_err());
    }

    #[test]
    fn test_group_locks_alias_single_codes() {
        // AG and AC reuse the all-outgoing / all-incoming codes.
        assert_eq!(lock_code(SET_LOCKS, "AG").unwrap(), SsCode::BarrAllOut);
        assert_eq!(lock_code(SET_LOCKS, "AC").unwrap(), SsCode::BarrAllIn);
    }

    #[test]
    fn test_mask_folding() {
        let mask = [SS_GSM_TELEPHONY, SS_GSM_SMS]
            .into_iter()
            .fold(0, update_status_mask);
        assert_eq!(mask, 0b0000_1001);

        let all = [11, 12, 13, 16, 24, 25, 26, 27]
            .into_iter()
            .fold(0, update_status_mask);
        assert_eq!(all, 0xFF);
    }

    #[test]
    fn test_unknown_bsc_ignored() {
        assert_eq!(update_status_mask(0b1, 99), 0b1);
        assert_eq!(bsc_mask_bit(0), None);
    }
}
