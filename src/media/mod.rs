//! Media handling
//!
//! The FLV tag writer that turns intercepted RTMP media messages into the
//! on-disk container format.

pub mod flv;

pub use flv::{FlvWriter, FLV_HEADER};
