//! Codec Module
//!
//! Translates logical keys and values to their wire form and back.

mod glob;
mod key;
mod value;

pub use glob::{glob_escape, glob_regex};
pub use key::KeyCodec;
pub use value::{CodecError, MessagePackCodec, ValueCodec, ValueSerializer};
