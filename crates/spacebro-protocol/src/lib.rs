//! # spacebro-protocol
//!
//! Wire definitions for spacebro clients.
//!
//! This crate defines what travels between a client and a spacebro broker:
//!
//! - `Payload` - event data, boxed scalars and the `_from` / `_to` envelope
//! - `Frame` / `Register` - named events and the registration handshake
//! - `codec` - JSON text or length-prefixed MessagePack encoding
//!
//! ## Example
//!
//! ```rust
//! use spacebro_protocol::{codec, Encoding, Frame, Payload};
//!
//! let payload = Payload::from("hi").with_envelope(Some("alice"), None);
//! let frame = Frame::new("hello", payload);
//!
//! let encoded = codec::encode(&frame, Encoding::Json).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded.payload.sender(), Some("alice"));
//! ```

pub mod codec;
pub mod frames;
pub mod payload;

pub use codec::{decode, encode, Encoding, FrameCodec, ProtocolError, WireMessage};
pub use frames::{ClientInfo, Frame, Register, REGISTER_EVENT};
pub use payload::{Payload, FROM_FIELD, TO_FIELD};
