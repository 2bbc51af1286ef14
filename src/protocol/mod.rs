//! Protocol module - wire messages and the push-channel frame codec.
//!
//! This module implements the binary layer shared by both endpoints:
//! - the closed [`Message`] set carried as tagged JSON
//! - length-prefixed frame encoding and chunk-tolerant decoding

mod frame;
mod message;

pub use frame::{encode_frame, FrameDecoder, LENGTH_PREFIX_SIZE};
pub use message::{CallbackRef, Message, ProxyRef};
