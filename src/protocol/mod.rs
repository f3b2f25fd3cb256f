//! Wire Protocol
//!
//! Requests and responses travel as length-prefixed frames with JSON bodies.
//!
//! ## Modules
//!
//! - `codec`: Frame encoding and the incremental `FrameDecoder`
//! - `types`: `Command`, `Response` and `Reply`
//!
//! ## Example
//!
//! ```
//! use dictkv::protocol::{decode, Command, Decoded};
//! use bytes::BytesMut;
//!
//! // Encoding a request
//! let frame = Command::set("name", "Ariz").encode().unwrap();
//!
//! // Decoding it again
//! let mut buffer = BytesMut::from(&frame[..]);
//! assert!(matches!(decode::<Command>(&mut buffer), Decoded::Complete(_)));
//! ```

pub mod codec;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{
    decode, encode_frame, encode_frame_into, Decoded, FrameDecoder, ProtocolError, HEADER_LEN,
};
pub use types::{Command, Reply, Response, ERROR_BODY};
