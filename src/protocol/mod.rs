//! Protocol module - ISI message codec and PhoNet framing.
//!
//! This module implements the byte-level layers:
//! - Field codec for fixed-offset primitives and text
//! - Sub-block iteration with strict bounds checking
//! - Request builder and response envelope validation
//! - PhoNet header and frame buffer for stream transports

pub mod field;

mod frame;
mod frame_buffer;
mod message;
mod phonet;
mod subblock;

pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use message::{Envelope, MessageBuilder, ResponseShape, SecondByte};
pub use phonet::{
    build_frame, PhonetAddress, PhonetHeader, DEFAULT_MAX_FRAME_PAYLOAD, PHONET_HEADER_SIZE,
    PHONET_LENGTH_BIAS, PN_DEV_HOST, PN_DEV_MODEM, PN_MEDIA_DEFAULT,
};
pub use subblock::{SubBlock, SubBlockIter, SubBlockLayout};
