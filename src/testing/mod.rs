mod memory_network;
mod signer;
mod testing;

pub use memory_network::{MemoryNetwork, MemoryTransport};
pub use signer::FakeSigner;
pub use testing::*;
