//! Protocol module - RFC 6455 framing.
//!
//! - Header encoding/decoding in the 7/16/64-bit length forms
//! - Payload masking with a runtime-selected strategy
//! - [`FrameWriter`] and [`FrameReader`] for single frames
//! - [`MessageAssembler`] for fragmented messages
//! - Close frame payloads

mod assembler;
mod close;
mod mask;
mod reader;
mod wire_format;
mod writer;

pub use assembler::{Message, MessageAssembler};
pub use close::{encode_close_payload, CloseCode, CloseFrame};
pub use mask::{apply_mask, apply_mask_scalar, apply_mask_with, MaskStrategy};
pub use reader::{FrameReader, ReadState};
pub use wire_format::{
    EncodedHeader, FrameHeader, OpCode, DEFAULT_MAX_FRAGMENT_SIZE, FIN_BIT, LEN16_MARKER,
    LEN64_MARKER, LEN7_MASK, MASK_BIT, MAX_CONTROL_PAYLOAD, MAX_HEADER_SIZE, OPCODE_MASK,
    RSV1_BIT, RSV2_BIT, RSV3_BIT, RSV_MASK,
};
pub use writer::FrameWriter;
