// kq-common - Shared errors, types, configuration and wire framing for kq
//
// Nothing in this crate performs IO; it is used by the client and the bench
// harness alike.

pub mod compression;
pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use compression::*;
pub use config::*;
pub use error::*;
pub use protocol::*;
pub use types::*;
