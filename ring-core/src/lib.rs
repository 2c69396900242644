pub mod block;
pub mod chain;
pub mod miner;
pub mod state;
pub mod transaction;

// Re-exports principais
pub use block::{Block, GENESIS_PREVIOUS_HASH};
pub use chain::Chain;
pub use miner::Miner;
pub use state::State;
pub use transaction::{Transaction, TransactionData, TxRef, GENESIS_SENDER};

// Re-exports de tipos compartilhados
pub use shared::{BlockchainError, Result};
