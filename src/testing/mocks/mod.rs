//! In-memory stand-ins for the network-facing traits

pub mod backend;
pub mod remote;

pub use backend::RecordingBackend;
pub use remote::MemoryRemoteSource;
