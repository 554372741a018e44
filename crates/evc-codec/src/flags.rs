//! Flag bits written alongside every encoded payload.
//!
//! The low byte carries modifiers, the second byte the payload type.

/// Payload bytes are zstd-compressed.
pub const COMPRESSED: u32 = 0x0002;

/// Mask selecting the payload type.
pub const TYPE_MASK: u32 = 0xff00;

pub const TYPE_STRING: u32 = 0x0000;
pub const TYPE_BYTES: u32 = 0x0800;
pub const TYPE_JSON: u32 = 0x0100;
pub const TYPE_BINCODE: u32 = 0x0200;

/// The payload type encoded in `flags`.
pub fn type_of(flags: u32) -> u32 {
    flags & TYPE_MASK
}

pub fn is_compressed(flags: u32) -> bool {
    flags & COMPRESSED != 0
}
