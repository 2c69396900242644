use crate::transaction::Transaction;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::{sha256_hex, BlockchainError, BlockId, Result};

/// Hash anterior sentinela do bloco de gênese
pub const GENESIS_PREVIOUS_HASH: &str = "1";

/// Lote ordenado de transações selado por prova de trabalho.
///
/// `current_hash` é o SHA-256 da forma canônica do bloco sem o próprio campo.
/// O timestamp é meramente informativo e não entra em nenhuma decisão.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Posição na cadeia, numerada a partir de 0 no gênese
    pub index: u64,
    pub timestamp: String,
    pub transactions: Vec<Transaction>,
    /// Testemunha da prova de trabalho
    pub nonce: u64,
    pub previous_hash: BlockId,
    pub current_hash: BlockId,
}

impl Block {
    /// Monta um bloco candidato com nonce 0. O hash pré-mineração é apenas
    /// informativo; a mineração irá substituí-lo.
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica falhar
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: BlockId) -> Result<Self> {
        let mut block = Self {
            index,
            timestamp: Utc::now().to_rfc3339(),
            transactions,
            nonce: 0,
            previous_hash,
            current_hash: String::new(),
        };
        block.current_hash = block.compute_hash()?;
        Ok(block)
    }

    /// SHA-256 da forma canônica do bloco sem o campo `current_hash`
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica falhar
    pub fn compute_hash(&self) -> Result<BlockId> {
        let fields = self.hash_fields()?;
        let dump = serde_json::to_string(&fields)
            .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
        Ok(sha256_hex(dump.as_bytes()))
    }

    /// Campos canônicos que entram no hash: o bloco sem `current_hash`.
    /// O minerador reutiliza este mapa variando apenas o nonce.
    pub(crate) fn hash_fields(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut fields)) => {
                fields.remove("current_hash");
                Ok(fields)
            }
            Ok(_) => Err(BlockchainError::SerializationError(
                "o bloco não serializa para um objeto JSON".to_string(),
            )),
            Err(e) => Err(BlockchainError::SerializationError(e.to_string())),
        }
    }

    /// Predicado de dificuldade: `difficulty` caracteres '0' iniciais no hash
    #[must_use]
    pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
        hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    /// Blocos equivalentes: mesmo pai, mesmo índice e mesmo multiconjunto de
    /// transações. Usado para reconhecer colisões entre o bloco minerado
    /// localmente e um bloco estrangeiro no mesmo índice.
    #[must_use]
    pub fn equivalent(&self, other: &Block) -> bool {
        if self.previous_hash != other.previous_hash || self.index != other.index {
            return false;
        }
        let mut ours: Vec<&str> = self.transactions.iter().map(|tx| tx.id.as_str()).collect();
        let mut theirs: Vec<&str> = other.transactions.iter().map(|tx| tx.id.as_str()).collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        ours == theirs
    }
}
