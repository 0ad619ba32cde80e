//! Feature drivers built on [`IsiClient`](crate::IsiClient).

mod call_barring;
mod devinfo;
pub mod ss;

pub use call_barring::{
    check_service_failure, decode_passwd_response, decode_query_response, decode_set_response,
    encode_passwd_request, encode_password, encode_query_request, encode_set_request, CallBarring,
};
pub use devinfo::{decode_info_response, DeviceInfo, InfoQuery, INFO_TIMEOUT};
pub use ss::SS_TIMEOUT;

/// Supplementary services resource.
pub const PN_SS: u8 = 0x06;

/// Phone information resource.
pub const PN_PHONE_INFO: u8 = 0x1B;
