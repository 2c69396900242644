use crate::block::Block;
use shared::{sha256_hex, BlockchainError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Busca de prova de trabalho cooperativa sobre um bloco candidato.
///
/// A flag partilhada com a cadeia permite no máximo um minerador ativo por
/// nó: `Chain::stop_mining` limpa-a de qualquer thread e a busca devolve na
/// iteração seguinte sem escrever um hash válido no bloco.
#[derive(Debug)]
pub struct Miner {
    active: Arc<AtomicBool>,
    difficulty: usize,
}

impl Miner {
    pub(crate) const fn new(active: Arc<AtomicBool>, difficulty: usize) -> Self {
        Self { active, difficulty }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Incrementa o nonce a partir de 0 até o hash canônico satisfazer a
    /// dificuldade, verificando a flag a cada iteração.
    ///
    /// Devolve `true` com `nonce` e `current_hash` gravados no bloco, ou
    /// `false` (bloco intocado) quando a busca foi interrompida.
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica do bloco falhar
    pub fn mine(&self, block: &mut Block) -> Result<bool> {
        self.active.store(true, Ordering::SeqCst);
        let mut fields = block.hash_fields()?;
        let mut nonce: u64 = 0;

        while self.active.load(Ordering::SeqCst) {
            fields.insert("nonce".to_string(), serde_json::Value::from(nonce));
            let dump = serde_json::to_string(&fields)
                .map_err(|e| BlockchainError::SerializationError(e.to_string()))?;
            let hash = sha256_hex(dump.as_bytes());
            if Block::meets_difficulty(&hash, self.difficulty) {
                block.nonce = nonce;
                block.current_hash = hash;
                return Ok(true);
            }
            nonce += 1;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use std::time::Duration;

    #[test]
    fn test_mined_block_satisfies_proof() {
        let chain = Chain::new(1);
        let mut block = chain.create_block(vec![]).unwrap();
        let miner = chain.miner();

        assert!(miner.mine(&mut block).unwrap());
        assert_eq!(block.current_hash, block.compute_hash().unwrap());
        assert!(Block::meets_difficulty(&block.current_hash, 1));
    }

    #[test]
    fn test_preemption_leaves_block_unmined() {
        // dificuldade impossível: a busca só termina por interrupção
        let chain = Chain::new(64);
        let mut block = chain.create_block(vec![]).unwrap();
        let original_hash = block.current_hash.clone();
        let miner = chain.miner();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(50));
                chain.stop_mining();
            });
            assert!(!miner.mine(&mut block).unwrap());
        });

        assert_eq!(block.nonce, 0);
        assert_eq!(block.current_hash, original_hash);
        assert!(!miner.is_active());
    }
}
