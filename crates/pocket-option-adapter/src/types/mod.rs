/*
[INPUT]:  Protocol schema definitions and serde requirements
[OUTPUT]: Typed Rust structs/enums with serialization support
[POS]:    Data layer - type definitions for protocol communication
[UPDATE]: When payload shapes change or new types added
*/

pub mod assets;
pub mod enums;
pub mod models;

pub use assets::*;
pub use enums::*;
pub use models::*;
