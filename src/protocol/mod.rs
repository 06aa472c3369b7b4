//! Packet framing and frame bundling
//!
//! The same length-prefix format is used on the wire and inside stored
//! message chunks; bundles carry decoded frame lists across threads.

pub mod bundle;
pub mod framing;
pub mod packet;

pub use bundle::FrameBundle;
pub use framing::{decode_frames, encode_frames};
pub use packet::{Marker, MessageKey, PttFragment, TalkPacket};
