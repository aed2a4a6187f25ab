//! WebSocket protocol core implementation (RFC 6455).

pub mod assembler;
pub mod frame;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, MAX_HEADER_LEN};
pub use mask::{apply_mask, mask_into};
pub use opcode::OpCode;
pub use validation::FrameValidator;
