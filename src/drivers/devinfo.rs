//! Device information driver over PN_PHONE_INFO.
//!
//! Each query is a two-to-seven byte request answered by a status reply
//! whose sub-blocks start at offset 3. The first recognised sub-block
//! carries the text: a character count at offset 3, latin-1 characters
//! from offset 4.

use std::sync::Arc;
use std::time::Duration;

use super::PN_PHONE_INFO;
use crate::bringup::BringUp;
use crate::client::{IsiClient, IsiModem};
use crate::error::{IsiError, Result};
use crate::host::{Feature, HostCore};
use crate::protocol::{Envelope, ResponseShape, SecondByte, SubBlockLayout};

/// Default phone info request timeout.
pub const INFO_TIMEOUT: Duration = Duration::from_secs(5);

// Return codes
pub const INFO_OK: u8 = 0x00;
pub const INFO_FAIL: u8 = 0x01;
pub const INFO_NO_NUMBER: u8 = 0x02;
pub const INFO_NOT_SUPPORTED: u8 = 0x03;

// Message ids
pub const INFO_SERIAL_NUMBER_READ_REQ: u8 = 0x00;
pub const INFO_SERIAL_NUMBER_READ_RESP: u8 = 0x01;
pub const INFO_VERSION_READ_REQ: u8 = 0x07;
pub const INFO_VERSION_READ_RESP: u8 = 0x08;
pub const INFO_PRODUCT_INFO_READ_REQ: u8 = 0x15;
pub const INFO_PRODUCT_INFO_READ_RESP: u8 = 0x16;

// Sub-blocks
pub const INFO_SB_PRODUCT_INFO_NAME: u16 = 0x01;
pub const INFO_SB_PRODUCT_INFO_MANUFACTURER: u16 = 0x07;
pub const INFO_SB_SN_IMEI_PLAIN: u16 = 0x41;
pub const INFO_SB_MCUSW_VERSION: u16 = 0x48;

// Request parameters
pub const INFO_PRODUCT_NAME: u8 = 0x01;
pub const INFO_PRODUCT_MANUFACTURER: u8 = 0x07;
pub const INFO_SN_IMEI_PLAIN: u8 = 0x41;
pub const INFO_MCUSW: u8 = 0x01;

/// Shortest text-carrying sub-block (header, two bytes, count).
const INFO_SB_MIN_LEN: usize = 5;

const INFO_SUB_BLOCK_START: usize = 3;

/// The four identity queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    Manufacturer,
    Model,
    Revision,
    Serial,
}

impl InfoQuery {
    /// Request bytes for this query.
    pub fn request(&self) -> &'static [u8] {
        match self {
            InfoQuery::Manufacturer => &[INFO_PRODUCT_INFO_READ_REQ, INFO_PRODUCT_MANUFACTURER],
            InfoQuery::Model => &[INFO_PRODUCT_INFO_READ_REQ, INFO_PRODUCT_NAME],
            InfoQuery::Revision => &[INFO_VERSION_READ_REQ, 0x00, INFO_MCUSW, 0x00, 0x00, 0x00, 0x00],
            InfoQuery::Serial => &[INFO_SERIAL_NUMBER_READ_REQ, INFO_SN_IMEI_PLAIN],
        }
    }

    /// Message id of the matching reply.
    pub fn response_id(&self) -> u8 {
        match self {
            InfoQuery::Manufacturer | InfoQuery::Model => INFO_PRODUCT_INFO_READ_RESP,
            InfoQuery::Revision => INFO_VERSION_READ_RESP,
            InfoQuery::Serial => INFO_SERIAL_NUMBER_READ_RESP,
        }
    }

    fn shape(&self) -> ResponseShape<'static> {
        ResponseShape {
            min_len: 3,
            opcode: self.response_id(),
            second: SecondByte::Status { ok: INFO_OK },
            layout: SubBlockLayout::Byte,
        }
    }
}

fn status_name(status: u8) -> &'static str {
    match status {
        INFO_OK => "INFO_OK",
        INFO_FAIL => "INFO_FAIL",
        INFO_NO_NUMBER => "INFO_NO_NUMBER",
        INFO_NOT_SUPPORTED => "INFO_NOT_SUPPORTED",
        _ => "<UNKNOWN>",
    }
}

/// Decode the text carried by an info reply to `query`.
pub fn decode_info_response(query: InfoQuery, reply: &[u8]) -> Result<String> {
    let envelope = Envelope::validate(reply, &query.shape()).map_err(|e| {
        match e {
            IsiError::StatusNotOk(status) => {
                tracing::debug!("Info request failed: {}", status_name(status))
            }
            ref e => tracing::debug!("Info request failed: {}", e),
        }
        e
    })?;

    for sub_block in envelope.sub_blocks(INFO_SUB_BLOCK_START) {
        let sub_block = sub_block?;
        match sub_block.tag() {
            INFO_SB_PRODUCT_INFO_MANUFACTURER
            | INFO_SB_PRODUCT_INFO_NAME
            | INFO_SB_MCUSW_VERSION
            | INFO_SB_SN_IMEI_PLAIN => {
                if sub_block.len() < INFO_SB_MIN_LEN {
                    return Err(IsiError::malformed(format!(
                        "info sub-block 0x{:02X} of {} bytes too short",
                        sub_block.tag(),
                        sub_block.len()
                    )));
                }
                let chars = usize::from(sub_block.byte(3)?);
                let info = sub_block.latin_text(chars, 4)?;
                tracing::debug!("info=<{}>", info);
                return Ok(info);
            }
            tag => tracing::debug!(
                "Unknown sub-block: 0x{:02X} ({} bytes)",
                tag,
                sub_block.len()
            ),
        }
    }

    Err(IsiError::malformed("no info sub-block in reply"))
}

/// Device information driver bound to one modem.
pub struct DeviceInfo {
    client: Arc<IsiClient>,
    bring_up: BringUp,
    timeout: Duration,
}

impl DeviceInfo {
    /// Create the driver and start bringing up PN_PHONE_INFO.
    pub fn probe(modem: &IsiModem, host: Arc<dyn HostCore>) -> Self {
        let client = Arc::new(modem.create_client(PN_PHONE_INFO));
        let bring_up = BringUp::start(client.clone(), Feature::DeviceInfo, host);
        Self {
            client,
            bring_up,
            timeout: modem.config().info_timeout(),
        }
    }

    #[inline]
    pub fn bring_up(&self) -> &BringUp {
        &self.bring_up
    }

    /// Run one identity query.
    pub async fn query(&self, query: InfoQuery) -> Result<String> {
        let reply = self.client.request(query.request(), self.timeout).await?;
        decode_info_response(query, &reply)
    }

    pub async fn query_manufacturer(&self) -> Result<String> {
        self.query(InfoQuery::Manufacturer).await
    }

    pub async fn query_model(&self) -> Result<String> {
        self.query(InfoQuery::Model).await
    }

    pub async fn query_revision(&self) -> Result<String> {
        self.query(InfoQuery::Revision).await
    }

    pub async fn query_serial(&self) -> Result<String> {
        self.query(InfoQuery::Serial).await
    }

    /// Tear the driver down; in-flight queries fail with `ClientDestroyed`.
    pub fn remove(&self) {
        self.bring_up.remove();
        self.client.destroy();
    }
}

impl Drop for DeviceInfo {
    fn drop(&mut self) {
        self.remove();
    }
}
