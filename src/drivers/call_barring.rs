//! Call barring driver over PN_SS.
//!
//! Three operations, all on the supplementary services resource:
//!
//! | Operation    | Request operation              | Reply sub-code          |
//! |--------------|--------------------------------|-------------------------|
//! | `set`        | `SS_ACTIVATION`/`DEACTIVATION` | either of the two       |
//! | `query`      | `SS_INTERROGATION`             | `SS_INTERROGATION`      |
//! | `set_passwd` | `SS_GSM_PASSWORD_REGISTRATION` | same                    |
//!
//! Request layout of `set` (35 bytes):
//! ```text
//! 0    1   2     3..5  5     6      7        8    9..17     17..35
//! req  op  tele  code  info  count  SS_GSM_  28   password  filler
//!                                   PASSWORD
//! ```
//!
//! The `encode_*` and `decode_*` functions are pure and usable without a
//! modem connection.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::ss::*;
use super::PN_SS;
use crate::bringup::BringUp;
use crate::client::{IsiClient, IsiModem};
use crate::error::{IsiError, Result};
use crate::host::{Feature, HostCore};
use crate::protocol::{field, Envelope, MessageBuilder, ResponseShape, SecondByte, SubBlockLayout};

/// Sub-blocks of an interrogation reply start here.
const QUERY_SUB_BLOCK_START: usize = 7;

const SET_SHAPE: ResponseShape<'static> = ResponseShape {
    min_len: 3,
    opcode: SS_SERVICE_COMPLETED_RESP,
    second: SecondByte::Operation(&[SS_ACTIVATION, SS_DEACTIVATION]),
    layout: SubBlockLayout::Byte,
};

const QUERY_SHAPE: ResponseShape<'static> = ResponseShape {
    min_len: 7,
    opcode: SS_SERVICE_COMPLETED_RESP,
    second: SecondByte::Operation(&[SS_INTERROGATION]),
    layout: SubBlockLayout::Byte,
};

const PASSWD_SHAPE: ResponseShape<'static> = ResponseShape {
    min_len: 3,
    opcode: SS_SERVICE_COMPLETED_RESP,
    second: SecondByte::Operation(&[SS_GSM_PASSWORD_REGISTRATION]),
    layout: SubBlockLayout::Byte,
};

/// Encode a barring password into its 8-byte UCS-2BE field.
pub fn encode_password(password: &str) -> Result<[u8; SS_PASSWORD_WIDTH]> {
    if password.len() > SS_PASSWORD_MAX_DIGITS || !password.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IsiError::invalid(format!(
            "password must be at most {} digits",
            SS_PASSWORD_MAX_DIGITS
        )));
    }

    let encoded = field::encode_fixed_wide_text(password, SS_PASSWORD_WIDTH)?;
    let mut out = [0u8; SS_PASSWORD_WIDTH];
    out.copy_from_slice(&encoded);
    Ok(out)
}

fn check_class(class: u8) -> Result<()> {
    if class != SS_BARRING_CLASS {
        return Err(IsiError::invalid(format!(
            "service class {} not supported, only {}",
            class, SS_BARRING_CLASS
        )));
    }
    Ok(())
}

fn service_request(operation: u8, code: SsCode) -> MessageBuilder {
    MessageBuilder::new(SS_SERVICE_REQ)
        .byte(operation)
        .byte(SS_ALL_TELE_AND_BEARER)
        .u16_be(code.value())
        .byte(SS_SEND_ADDITIONAL_INFO)
        .sub_block_count()
}

/// Build the activation/deactivation request.
pub fn encode_set_request(lock: &str, enable: bool, password: &str, class: u8) -> Result<Bytes> {
    check_class(class)?;
    let code = lock_code(SET_LOCKS, lock)?;
    let password = encode_password(password)?;

    let operation = if enable { SS_ACTIVATION } else { SS_DEACTIVATION };
    let request = service_request(operation, code)
        .padded_sub_block(SS_GSM_PASSWORD, &password, SS_GSM_PASSWORD_LEN)?
        .build();
    Ok(request)
}

/// Build the interrogation request.
pub fn encode_query_request(lock: &str, class: u8) -> Result<Bytes> {
    check_class(class)?;
    let code = lock_code(QUERY_LOCKS, lock)?;
    Ok(service_request(SS_INTERROGATION, code).build())
}

/// Build the password registration request.
///
/// The new password is carried twice, as entry and confirmation.
pub fn encode_passwd_request(lock: &str, old: &str, new: &str) -> Result<Bytes> {
    let code = lock_code(PASSWORD_LOCKS, lock)?;
    let old = encode_password(old)?;
    let new = encode_password(new)?;

    let mut passwords = [0u8; 3 * SS_PASSWORD_WIDTH];
    passwords[..SS_PASSWORD_WIDTH].copy_from_slice(&old);
    passwords[SS_PASSWORD_WIDTH..2 * SS_PASSWORD_WIDTH].copy_from_slice(&new);
    passwords[2 * SS_PASSWORD_WIDTH..].copy_from_slice(&new);

    let request = service_request(SS_GSM_PASSWORD_REGISTRATION, code)
        .padded_sub_block(SS_GSM_PASSWORD, &passwords, SS_GSM_PASSWORD_LEN)?
        .build();
    Ok(request)
}

/// Map explicit failure replies to `StatusNotOk` before shape checks.
pub fn check_service_failure(reply: &[u8]) -> Result<()> {
    match reply.first() {
        Some(&id @ (SS_SERVICE_FAILED_RESP | SS_SERVICE_NOT_SUPPORTED_RESP)) => {
            tracing::debug!("SS request rejected with message 0x{:02X}", id);
            Err(IsiError::StatusNotOk(id))
        }
        _ => Ok(()),
    }
}

pub fn decode_set_response(reply: &[u8]) -> Result<()> {
    check_service_failure(reply)?;
    Envelope::validate(reply, &SET_SHAPE)?;
    Ok(())
}

pub fn decode_passwd_response(reply: &[u8]) -> Result<()> {
    check_service_failure(reply)?;
    Envelope::validate(reply, &PASSWD_SHAPE)?;
    Ok(())
}

/// Decode an interrogation reply into a basic-service status mask.
pub fn decode_query_response(reply: &[u8]) -> Result<u32> {
    check_service_failure(reply)?;
    let envelope = Envelope::validate(reply, &QUERY_SHAPE)?;

    let mut mask = 0;
    for sub_block in envelope.sub_blocks(QUERY_SUB_BLOCK_START) {
        let sub_block = sub_block?;
        match sub_block.tag() {
            SS_STATUS_RESULT | SS_GSM_ADDITIONAL_INFO => {}
            SS_GSM_BSC_INFO => {
                let count = usize::from(sub_block.byte(2)?);
                for i in 0..count {
                    mask = update_status_mask(mask, sub_block.byte(3 + i)?);
                }
            }
            tag => tracing::debug!(
                "Skipping sub-block: 0x{:04X} ({} bytes)",
                tag,
                sub_block.len()
            ),
        }
    }

    tracing::debug!("mask=0x{:04X}", mask);
    Ok(mask)
}

/// Call barring driver bound to one modem.
pub struct CallBarring {
    client: Arc<IsiClient>,
    bring_up: BringUp,
    timeout: Duration,
}

impl CallBarring {
    /// Create the driver and start bringing up PN_SS.
    ///
    /// The feature is registered with `host` once the resource answers.
    pub fn probe(modem: &IsiModem, host: Arc<dyn HostCore>) -> Self {
        let client = Arc::new(modem.create_client(PN_SS));
        let bring_up = BringUp::start(client.clone(), Feature::CallBarring, host);
        Self {
            client,
            bring_up,
            timeout: modem.config().ss_timeout(),
        }
    }

    #[inline]
    pub fn bring_up(&self) -> &BringUp {
        &self.bring_up
    }

    /// Activate or deactivate barring `lock` for `class`.
    pub async fn set(&self, lock: &str, enable: bool, password: &str, class: u8) -> Result<()> {
        tracing::debug!("lock code {} enable {} class {}", lock, enable, class);
        let request = encode_set_request(lock, enable, password, class)?;
        let reply = self.client.request(&request, self.timeout).await?;
        decode_set_response(&reply)
    }

    /// Query which basic services `lock` is active for.
    pub async fn query(&self, lock: &str, class: u8) -> Result<u32> {
        tracing::debug!("barring query lock code {} class {}", lock, class);
        let request = encode_query_request(lock, class)?;
        let reply = self.client.request(&request, self.timeout).await?;
        decode_query_response(&reply)
    }

    /// Change the barring password.
    pub async fn set_passwd(&self, lock: &str, old: &str, new: &str) -> Result<()> {
        tracing::debug!("barring password change for lock code {}", lock);
        let request = encode_passwd_request(lock, old, new)?;
        let reply = self.client.request(&request, self.timeout).await?;
        decode_passwd_response(&reply)
    }

    /// Tear the driver down; in-flight operations fail with `ClientDestroyed`.
    pub fn remove(&self) {
        self.bring_up.remove();
        self.client.destroy();
    }
}

impl Drop for CallBarring {
    fn drop(&mut self) {
        self.remove();
    }
}
