//! AMF serialization
//!
//! RTMP commands are AMF0-encoded RPC calls. Flex messages carry the same
//! AMF0 payload behind a one-byte version prefix, which the dispatcher skips
//! before handing the body to this codec.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfProperty, AmfValue};
