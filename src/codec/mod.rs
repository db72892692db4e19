//! Inbound stream codec
//!
//! Stateless marker detection and hex-text clip decoding, plus the clip
//! assembler that drives it across chunked socket reads.

pub mod clip;
pub mod frame;

pub use clip::{ClipAssembler, ClipProgress};
pub use frame::{append_hex, detect_marker, finalize_clip, find_end_marker};
