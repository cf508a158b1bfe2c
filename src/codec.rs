//! Binary framing for service-multiplexed messages.
//!
//! A transport message carries one or more sub-messages, each laid out as
//! `[varint length][service id][message id][payload]`. The length counts the
//! two id bytes plus the payload. [`MessageWriter`] and [`MessageReader`]
//! provide the primitive encoders that services use to build payloads.
//!
//! Reading past the end of a buffer or past a declared length is always an
//! overflow error rather than a soft end-of-stream.

mod error;
mod frame;
mod reader;
pub mod varint;
mod writer;

pub use error::{FrameError, ReadError};
pub use frame::{SubMessage, SubMessages, read_sub_message, sub_message_len, write_sub_message};
pub use reader::MessageReader;
pub use writer::MessageWriter;
