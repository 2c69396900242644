use crate::block::{Block, GENESIS_PREVIOUS_HASH};
use crate::miner::Miner;
use crate::state::State;
use crate::transaction::Transaction;
use shared::{BlockchainError, BlockId, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// DAG de blocos indexado por hash, com o ramo mais longo designado.
///
/// Vários blocos podem partilhar o mesmo pai; o topo (`tip_hash`) só avança
/// quando chega um bloco com `index == length`. Para cada bloco instalado
/// fica guardado o estado obtido por reprodução sobre o estado do pai, pelo
/// que qualquer ramo pode ser estendido mais tarde.
#[derive(Debug)]
pub struct Chain {
    blocks: HashMap<BlockId, Block>,
    states: HashMap<BlockId, State>,
    /// Número de blocos no ramo mais longo
    length: u64,
    tip_hash: BlockId,
    difficulty: usize,
    mining_flag: Arc<AtomicBool>,
}

impl Chain {
    #[must_use]
    pub fn new(difficulty: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            states: HashMap::new(),
            length: 0,
            tip_hash: GENESIS_PREVIOUS_HASH.to_string(),
            difficulty,
            mining_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub fn tip_hash(&self) -> &str {
        &self.tip_hash
    }

    #[must_use]
    pub const fn difficulty(&self) -> usize {
        self.difficulty
    }

    #[must_use]
    pub fn block(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    /// Bloco candidato no topo da cadeia; deve ser minerado antes de instalado
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização canônica falhar
    pub fn create_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        Block::new(self.length, transactions, self.tip_hash.clone())
    }

    /// Minerador que partilha a flag de preempção desta cadeia
    #[must_use]
    pub fn miner(&self) -> Miner {
        Miner::new(Arc::clone(&self.mining_flag), self.difficulty)
    }

    /// Interrompe a busca de nonce em curso; seguro de qualquer thread
    pub fn stop_mining(&self) {
        self.mining_flag.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn mining_active(&self) -> bool {
        self.mining_flag.load(Ordering::SeqCst)
    }

    /// O hash do bloco está correto e começa com os zeros exigidos
    #[must_use]
    pub fn validate_block_proof(&self, block: &Block) -> bool {
        match block.compute_hash() {
            Ok(hash) => {
                hash == block.current_hash
                    && Block::meets_difficulty(&block.current_hash, self.difficulty)
            }
            Err(_) => false,
        }
    }

    /// O pai existe no DAG e os índices são consecutivos
    #[must_use]
    pub fn validate_block_previous_hash(&self, block: &Block) -> bool {
        self.blocks
            .get(&block.previous_hash)
            .map_or(false, |parent| parent.index + 1 == block.index)
    }

    /// Reproduzir o bloco sobre o estado do pai tem de ser possível
    #[must_use]
    pub fn validate_block_transactions(&self, block: &Block) -> bool {
        self.states
            .get(&block.previous_hash)
            .map_or(false, |parent| parent.consume_block(block).is_some())
    }

    /// Conjunção das três validações, com o motivo da primeira falha
    ///
    /// # Errors
    ///
    /// `InvalidHash`, `InsufficientProof`, `UnknownParent` ou
    /// `StateReplayFailure` conforme a verificação que reprovou
    pub fn check_block(&self, block: &Block) -> Result<()> {
        if !self.validate_block_proof(block) {
            return match block.compute_hash() {
                Ok(hash) if hash == block.current_hash => {
                    Err(BlockchainError::InsufficientProof)
                }
                _ => Err(BlockchainError::InvalidHash),
            };
        }
        if !self.validate_block_previous_hash(block) {
            return Err(BlockchainError::UnknownParent);
        }
        if !self.validate_block_transactions(block) {
            return Err(BlockchainError::StateReplayFailure);
        }
        Ok(())
    }

    #[must_use]
    pub fn validate_block(&self, block: &Block) -> bool {
        self.check_block(block).is_ok()
    }

    /// Instala o bloco no DAG e guarda o estado obtido por reprodução sobre
    /// o pai (ou sobre o estado vazio quando este é o gênese). O topo avança
    /// apenas quando `index == length`; blocos abaixo do topo continuam
    /// guardados, pois o ramo que iniciam pode vir a ser o mais longo.
    ///
    /// O bloco de gênese é isento de prova e de validação de pai.
    ///
    /// # Errors
    ///
    /// `UnknownParent` se o estado do pai não existir, `StateReplayFailure`
    /// se a reprodução das transações falhar
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        let advances = self.length == block.index;
        let new_length = if advances { self.length + 1 } else { self.length };

        let parent_state = if new_length == 1 {
            State::new()
        } else {
            self.states
                .get(&block.previous_hash)
                .cloned()
                .ok_or(BlockchainError::UnknownParent)?
        };
        let next_state = parent_state
            .consume_block(&block)
            .ok_or(BlockchainError::StateReplayFailure)?;

        self.length = new_length;
        if advances {
            self.tip_hash = block.current_hash.clone();
        }
        info!("bloco {} instalado ({})", block.index, block.current_hash);
        self.states.insert(block.current_hash.clone(), next_state);
        self.blocks.insert(block.current_hash.clone(), block);
        Ok(())
    }

    /// Estado do topo do ramo mais longo; vazio antes do gênese
    #[must_use]
    pub fn tip_state(&self) -> State {
        if self.length == 0 {
            State::new()
        } else {
            self.states.get(&self.tip_hash).cloned().unwrap_or_default()
        }
    }

    /// Transações do bloco no topo; vazio antes do gênese
    #[must_use]
    pub fn tip_transactions(&self) -> Vec<Transaction> {
        self.blocks
            .get(&self.tip_hash)
            .map(|block| block.transactions.clone())
            .unwrap_or_default()
    }

    /// Percorre do topo até ao índice 0 validando cada bloco. O bloco de
    /// gênese é aceito incondicionalmente.
    #[must_use]
    pub fn validate_chain(&self) -> bool {
        let mut hash = self.tip_hash.clone();
        loop {
            let Some(block) = self.blocks.get(&hash) else {
                return false;
            };
            if block.index == 0 {
                return true;
            }
            if !self.validate_block(block) {
                return false;
            }
            hash = block.previous_hash.clone();
        }
    }
}
