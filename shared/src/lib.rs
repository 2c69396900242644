pub mod error;
pub mod hash;
pub mod types;
pub mod wallet;

// Re-exports principais
pub use error::BlockchainError;
pub use hash::{canonical_json, canonical_sha256, sha256_hex};
pub use types::{Address, Amount, BlockId, NodeConfig, NodeId, PeerAddr, Ring, TxId};
pub use wallet::{verify_signature, Wallet};

pub type Result<T> = std::result::Result<T, BlockchainError>;
