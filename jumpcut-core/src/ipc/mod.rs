//! Types emitted on the controller's observable streams.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! forward them as JSON without mirroring them by hand.

pub mod events;
