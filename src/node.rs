//! Orquestrador do nó: fila de transações, ciclo de mineração, arbitragem
//! de blocos recebidos dos pares e criação do bloco de gênese.

use crate::broadcast::Broadcaster;
use ring_core::{Block, Chain, State, Transaction, TxRef, GENESIS_SENDER};
use shared::{BlockchainError, NodeConfig, PeerAddr, Result, Ring};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::warn;

/// Espera máxima por novas transações antes de minerar um lote parcial
const QUEUE_TIMEOUT: Duration = Duration::from_secs(4);

/// Id sintético da entrada da transação de gênese
const GENESIS_INPUT_ID: &str = "genesis-allotment";

/// Estado protegido pelo único mutex do nó: o par (cadeia, estado do topo)
/// e a projeção usada para validar o lote do próximo bloco.
///
/// `mining_state` é `current_state` avançado pelas transações já aceitas em
/// `mining_transactions` mas ainda não mineradas; transações novas são
/// validadas contra o bloco pretendido, não contra o último instalado.
#[derive(Debug)]
struct Shared {
    chain: Chain,
    current_state: State,
    mining_state: State,
    mining_transactions: Vec<Transaction>,
}

pub struct Node {
    pub config: NodeConfig,
    pub node_id: String,
    pub is_bootstrap: bool,
    shared: Mutex<Shared>,
    queue: UnboundedSender<Transaction>,
    broadcaster: Broadcaster,
    ring: Mutex<Ring>,
    /// BOOTSTRAP: próximo id a atribuir
    next_id: Mutex<u32>,
    has_distributed: AtomicBool,
}

impl Node {
    /// Cria o nó e a fila de transações; o recetor alimenta `process`
    pub fn new(
        config: NodeConfig,
        node_id: String,
        broadcaster: Broadcaster,
    ) -> (Arc<Self>, UnboundedReceiver<Transaction>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let is_bootstrap = config.is_bootstrap();

        let mut ring = Ring::new();
        if is_bootstrap {
            ring.insert(
                "0".to_string(),
                PeerAddr {
                    ip: config.bootstrap_ip.clone(),
                    port: config.bootstrap_port,
                },
            );
        }

        let node = Arc::new(Self {
            shared: Mutex::new(Shared {
                chain: Chain::new(config.difficulty),
                current_state: State::new(),
                mining_state: State::new(),
                mining_transactions: Vec::new(),
            }),
            queue,
            broadcaster,
            ring: Mutex::new(ring),
            next_id: Mutex::new(1),
            has_distributed: AtomicBool::new(false),
            node_id,
            is_bootstrap,
            config,
        });
        (node, receiver)
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }

    #[must_use]
    pub fn has_distributed(&self) -> bool {
        self.has_distributed.load(Ordering::SeqCst)
    }

    /// BOOTSTRAP: regista o par e atribui-lhe o próximo id do anel
    pub fn register_peer(&self, ip: String, port: u16) -> String {
        let mut next_id = self.next_id.lock().unwrap();
        let id = next_id.to_string();
        self.ring.lock().unwrap().insert(id.clone(), PeerAddr { ip, port });
        *next_id += 1;
        id
    }

    /// BOOTSTRAP: difunde o anel quando todos os nós estiverem registados
    ///
    /// # Errors
    ///
    /// `NotReady` enquanto faltar o registo de algum nó
    pub fn distribute(&self) -> Result<&'static str> {
        if self.has_distributed() || *self.next_id.lock().unwrap() != self.config.number_of_nodes {
            return Err(BlockchainError::NotReady(
                "aguarde o registo de todos os nós".to_string(),
            ));
        }
        let ring = self.ring.lock().unwrap().clone();
        self.broadcaster.add_ring(&ring, &self.node_id);
        self.broadcaster.fan_out("/ring", &ring);
        self.has_distributed.store(true, Ordering::SeqCst);
        Ok("Startup finished")
    }

    /// Guarda o anel difundido pelo bootstrap
    ///
    /// # Errors
    ///
    /// `UnauthorizedOrigin` quando a mensagem não vem do bootstrap
    pub fn get_ring(&self, origin_ip: &str, ring: Ring) -> Result<()> {
        if origin_ip != self.config.bootstrap_ip {
            return Err(BlockchainError::UnauthorizedOrigin);
        }
        self.broadcaster.add_ring(&ring, &self.node_id);
        *self.ring.lock().unwrap() = ring;
        self.has_distributed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// BOOTSTRAP: cria e difunde o bloco de gênese com a dotação inicial para
    /// o primeiro utilizador. A transação de inflação tem o remetente
    /// sintético "0" e é instalada sem mineração nem verificação de assinatura.
    ///
    /// # Errors
    ///
    /// Propaga falhas de construção ou instalação do bloco
    pub fn make_genesis_block(&self, original_public_key: &str) -> Result<&'static str> {
        let initial = Transaction::new(
            GENESIS_SENDER,
            original_public_key,
            self.config.total_coins,
            &[TxRef {
                id: GENESIS_INPUT_ID.to_string(),
                recipient: GENESIS_SENDER.to_string(),
                amount: self.config.total_coins,
            }],
        )?;

        let block = {
            let mut shared = self.shared();
            let block = shared.chain.create_block(vec![initial])?;
            shared.chain.add_block(block.clone())?;
            shared.current_state = shared.chain.tip_state();
            shared.mining_state = shared.current_state.clone();
            block
        };

        self.broadcaster.fan_out("/block", &block);
        Ok("Genesis block broadcasted")
    }

    /// Monta uma transação não assinada contra o estado do topo e devolve-a
    /// ao cliente para assinatura. As saídas do remetente são percorridas em
    /// ordem ascendente de id até cobrirem o valor.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` quando o saldo não chega, `InvalidParameters`
    /// para autopagamento ou valor nulo
    pub fn create_transaction(
        &self,
        sender_address: &str,
        recipient_address: &str,
        amount: u64,
    ) -> Result<Transaction> {
        let shared = self.shared();
        if !shared.current_state.check_balance(sender_address, amount) {
            return Err(BlockchainError::InsufficientFunds);
        }
        if sender_address == recipient_address {
            return Err(BlockchainError::InvalidParameters(
                "não é possível enviar moedas para a própria carteira".to_string(),
            ));
        }

        let mut spent_txs: Vec<TxRef> = Vec::new();
        let mut total = 0u64;
        for utxo in shared.current_state.unspent(sender_address) {
            total += utxo.amount;
            spent_txs.push(utxo.clone());
            if total >= amount {
                break;
            }
        }

        Transaction::new(sender_address, recipient_address, amount, &spent_txs)
    }

    /// Coloca a transação (presumivelmente assinada) na fila; a validação
    /// acontece imediatamente antes de entrar num bloco, pois o estado pode
    /// mudar entretanto. Difunde aos pares quando vem de um cliente local.
    ///
    /// # Errors
    ///
    /// Retorna erro se a fila tiver sido encerrada ou a serialização falhar
    pub fn commit_transaction(&self, transaction: Transaction, is_local: bool) -> Result<&'static str> {
        let payload = if is_local {
            Some(serde_json::json!({
                "transaction_json": transaction.to_json()?,
                "is_local": false,
            }))
        } else {
            None
        };

        self.queue
            .send(transaction)
            .map_err(|_| BlockchainError::Other("fila de transações encerrada".to_string()))?;

        if let Some(payload) = payload {
            self.broadcaster.fan_out("/transaction", &payload);
        }
        Ok("Transaction Enqueued")
    }

    /// Ciclo do minerador, num worker dedicado: drena a fila, projeta o
    /// estado de mineração e fecha um bloco quando o lote enche ou o tempo
    /// esgota com transações pendentes.
    pub async fn process(self: Arc<Self>, mut queue: UnboundedReceiver<Transaction>) {
        loop {
            match timeout(QUEUE_TIMEOUT, queue.recv()).await {
                Ok(Some(transaction)) => {
                    if self.accept_transaction(transaction) {
                        if let Err(e) = self.mine().await {
                            warn!("mineração falhou: {e}");
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let pending = !self.shared().mining_transactions.is_empty();
                    if pending {
                        if let Err(e) = self.mine().await {
                            warn!("mineração falhou: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Valida a transação contra a projeção de mineração e junta-a ao lote.
    /// Devolve verdadeiro quando o lote atinge a capacidade.
    fn accept_transaction(&self, transaction: Transaction) -> bool {
        let mut shared = self.shared();
        if shared.mining_state.validate(&transaction) {
            shared.mining_state.update(&transaction);
            shared.mining_transactions.push(transaction);
            shared.mining_transactions.len() == self.config.capacity
        } else {
            warn!("transação rejeitada pelo estado de mineração");
            false
        }
    }

    /// Minera o lote corrente e, se a busca não for interrompida, instala e
    /// difunde o bloco. Em qualquer caso o lote é descartado e a projeção de
    /// mineração volta a partir do estado do topo; transações interrompidas
    /// não são re-enfileiradas.
    async fn mine(&self) -> Result<()> {
        let (block, miner) = {
            let shared = self.shared();
            (
                shared.chain.create_block(shared.mining_transactions.clone())?,
                shared.chain.miner(),
            )
        };

        // A busca de nonce corre fora do lock e fora do executor async
        let (block, _found) = tokio::task::spawn_blocking(move || -> Result<(Block, bool)> {
            let mut block = block;
            let found = miner.mine(&mut block)?;
            Ok((block, found))
        })
        .await
        .map_err(|e| BlockchainError::Other(e.to_string()))??;

        let broadcast = {
            let mut shared = self.shared();
            let mut broadcast = false;
            // a flag ainda ativa significa que nenhum bloco estrangeiro
            // interrompeu a busca
            if shared.chain.mining_active() {
                shared.chain.add_block(block.clone())?;
                shared.current_state = shared.chain.tip_state();
                broadcast = true;
            }
            shared.mining_state = shared.current_state.clone();
            shared.mining_transactions.clear();
            broadcast
        };

        if broadcast {
            self.broadcaster.fan_out("/block", &block);
        }
        Ok(())
    }

    /// Integra um bloco recebido de um par. Com o estado ainda vazio o bloco
    /// é tratado como gênese e instalado sem validação. Caso contrário é
    /// validado; sendo válido, interrompe o minerador local e entra no DAG,
    /// avançando o estado apenas se avançou o topo.
    ///
    /// # Errors
    ///
    /// Propaga o motivo da validação reprovada; o chamador descarta o bloco
    pub fn get_block(&self, block: Block) -> Result<&'static str> {
        let mut shared = self.shared();

        if shared.current_state.empty() {
            shared.chain.add_block(block)?;
            shared.current_state = shared.chain.tip_state();
            shared.mining_state = shared.current_state.clone();
            return Ok("Genesis block added");
        }

        shared.chain.check_block(&block)?;
        shared.chain.stop_mining();
        let index = block.index;
        shared.chain.add_block(block)?;
        if shared.chain.length() - 1 == index {
            shared.current_state = shared.chain.tip_state();
        }
        Ok("Block added")
    }

    /// Saldo de um endereço no estado do topo
    #[must_use]
    pub fn balance_of(&self, address: &str) -> u64 {
        self.shared().current_state.get_balance(address)
    }

    /// Transações do bloco no topo da cadeia
    #[must_use]
    pub fn tip_transactions(&self) -> Vec<Transaction> {
        self.shared().chain.tip_transactions()
    }

    /// Verdadeiro antes do bloco de gênese
    #[must_use]
    pub fn state_empty(&self) -> bool {
        self.shared().current_state.empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use shared::Wallet;

    static ALICE: Lazy<Wallet> = Lazy::new(|| Wallet::generate().unwrap());
    static BOB: Lazy<Wallet> = Lazy::new(|| Wallet::generate().unwrap());

    fn config(difficulty: usize, capacity: usize) -> NodeConfig {
        NodeConfig {
            number_of_nodes: 1,
            difficulty,
            bootstrap_ip: "127.0.0.1".to_string(),
            bootstrap_port: 5000,
            node_port: None,
            capacity,
            total_coins: 100,
        }
    }

    fn test_node(difficulty: usize, capacity: usize) -> Arc<Node> {
        // anel vazio: a difusão não tem destinos e é inócua nos testes
        let (node, _queue) = Node::new(
            config(difficulty, capacity),
            "0".to_string(),
            Broadcaster::new(),
        );
        node
    }

    fn signed_transfer(node: &Node, from: &Wallet, to: &Wallet, amount: u64) -> Transaction {
        let mut transaction = node
            .create_transaction(
                &from.public_key_pem().unwrap(),
                &to.public_key_pem().unwrap(),
                amount,
            )
            .unwrap();
        transaction.sign(from);
        transaction
    }

    #[test]
    fn test_genesis_allotment() {
        let node = test_node(2, 1);
        let alice = ALICE.public_key_pem().unwrap();

        assert!(node.state_empty());
        node.make_genesis_block(&alice).unwrap();

        assert!(!node.state_empty());
        assert_eq!(node.balance_of(&alice), 100);
        assert_eq!(node.shared().chain.length(), 1);
        assert_eq!(node.tip_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_transfer_is_mined_into_a_block() {
        let node = test_node(2, 1);
        let alice = ALICE.public_key_pem().unwrap();
        let bob = BOB.public_key_pem().unwrap();
        node.make_genesis_block(&alice).unwrap();

        let transaction = signed_transfer(&node, &ALICE, &BOB, 30);
        // lote de capacidade 1: a transação fecha o bloco
        assert!(node.accept_transaction(transaction));
        node.mine().await.unwrap();

        assert_eq!(node.balance_of(&alice), 70);
        assert_eq!(node.balance_of(&bob), 30);
        let shared = node.shared();
        assert_eq!(shared.chain.length(), 2);
        assert!(Block::meets_difficulty(shared.chain.tip_hash(), 2));
        assert!(shared.chain.validate_chain());
        assert!(shared.mining_transactions.is_empty());
    }

    #[test]
    fn test_insufficient_funds_is_rejected() {
        let node = test_node(2, 1);
        let alice = ALICE.public_key_pem().unwrap();
        let bob = BOB.public_key_pem().unwrap();
        node.make_genesis_block(&alice).unwrap();

        let result = node.create_transaction(&alice, &bob, 200);
        assert!(matches!(result, Err(BlockchainError::InsufficientFunds)));
        assert_eq!(node.balance_of(&alice), 100);
    }

    #[test]
    fn test_self_payment_is_rejected() {
        let node = test_node(2, 1);
        let alice = ALICE.public_key_pem().unwrap();
        node.make_genesis_block(&alice).unwrap();

        let result = node.create_transaction(&alice, &alice, 10);
        assert!(matches!(result, Err(BlockchainError::InvalidParameters(_))));
    }

    #[test]
    fn test_tampered_transaction_never_enters_a_batch() {
        let node = test_node(2, 1);
        let alice = ALICE.public_key_pem().unwrap();
        node.make_genesis_block(&alice).unwrap();

        let mut transaction = signed_transfer(&node, &ALICE, &BOB, 30);
        transaction.data.amount = 90; // adulterada depois de assinada

        assert!(!node.accept_transaction(transaction));
        assert!(node.shared().mining_transactions.is_empty());
    }

    #[tokio::test]
    async fn test_preempted_batch_is_dropped() {
        // dificuldade impossível: a busca só termina interrompida
        let node = test_node(64, 1);
        let alice = ALICE.public_key_pem().unwrap();
        node.make_genesis_block(&alice).unwrap();

        let transaction = signed_transfer(&node, &ALICE, &BOB, 30);
        assert!(node.accept_transaction(transaction));

        let mining = tokio::spawn({
            let node = Arc::clone(&node);
            async move { node.mine().await }
        });
        // espera a busca arrancar antes de a interromper
        while !node.shared().chain.mining_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        node.shared().chain.stop_mining();
        mining.await.unwrap().unwrap();

        let shared = node.shared();
        assert_eq!(shared.chain.length(), 1); // nada foi instalado
        assert!(shared.mining_transactions.is_empty());
        assert_eq!(shared.mining_state, shared.current_state);
    }

    #[tokio::test]
    async fn test_foreign_block_advances_tip_and_stops_miner() {
        let node_a = test_node(1, 1);
        let node_b = test_node(1, 1);
        let alice = ALICE.public_key_pem().unwrap();

        // os dois nós partilham o mesmo gênese
        node_b.make_genesis_block(&alice).unwrap();
        let genesis = {
            let shared = node_b.shared();
            shared.chain.block(shared.chain.tip_hash()).unwrap().clone()
        };
        node_a.get_block(genesis).unwrap();
        assert_eq!(node_a.balance_of(&alice), 100);

        // B minera o bloco 1 e A integra-o
        let transaction = signed_transfer(&node_b, &ALICE, &BOB, 30);
        assert!(node_b.accept_transaction(transaction));
        node_b.mine().await.unwrap();
        let foreign = {
            let shared = node_b.shared();
            shared.chain.block(shared.chain.tip_hash()).unwrap().clone()
        };

        node_a.get_block(foreign).unwrap();
        assert_eq!(node_a.balance_of(&alice), 70);
        assert_eq!(node_a.shared().chain.length(), 2);
        assert!(!node_a.shared().chain.mining_active());
    }

    #[tokio::test]
    async fn test_fork_blocks_are_stored_without_reorganization() {
        let node_a = test_node(1, 1);
        let node_b = test_node(1, 1);
        let alice = ALICE.public_key_pem().unwrap();

        node_a.make_genesis_block(&alice).unwrap();
        let genesis = {
            let shared = node_a.shared();
            shared.chain.block(shared.chain.tip_hash()).unwrap().clone()
        };
        node_b.get_block(genesis).unwrap();

        // cada nó minera o seu próprio bloco no índice 1
        let transfer_a = signed_transfer(&node_a, &ALICE, &BOB, 30);
        assert!(node_a.accept_transaction(transfer_a));
        node_a.mine().await.unwrap();

        let transfer_b = signed_transfer(&node_b, &ALICE, &BOB, 40);
        assert!(node_b.accept_transaction(transfer_b));
        node_b.mine().await.unwrap();

        let block_b = {
            let shared = node_b.shared();
            shared.chain.block(shared.chain.tip_hash()).unwrap().clone()
        };
        let tip_a = node_a.shared().chain.tip_hash().to_string();

        // o bloco rival entra no DAG mas não desloca o topo de A
        node_a.get_block(block_b.clone()).unwrap();
        let shared = node_a.shared();
        assert_eq!(shared.chain.length(), 2);
        assert_eq!(shared.chain.tip_hash(), tip_a);
        assert!(shared.chain.block(&block_b.current_hash).is_some());
    }

    #[test]
    fn test_invalid_foreign_block_is_rejected() {
        let node = test_node(2, 1);
        let alice = ALICE.public_key_pem().unwrap();
        node.make_genesis_block(&alice).unwrap();

        // bloco cujo hash não corresponde ao conteúdo
        let mut bogus = node.shared().chain.create_block(vec![]).unwrap();
        bogus.current_hash = "f".repeat(64);
        assert!(node.get_block(bogus).is_err());
        assert_eq!(node.shared().chain.length(), 1);
    }

    #[test]
    fn test_ring_from_unauthorized_origin_is_rejected() {
        let (node, _queue) = Node::new(
            NodeConfig {
                node_port: Some(5001),
                ..config(2, 1)
            },
            "1".to_string(),
            Broadcaster::new(),
        );
        let mut ring = Ring::new();
        ring.insert(
            "0".to_string(),
            PeerAddr {
                ip: "127.0.0.1".to_string(),
                port: 5000,
            },
        );

        assert!(matches!(
            node.get_ring("10.9.9.9", ring.clone()),
            Err(BlockchainError::UnauthorizedOrigin)
        ));
        assert!(!node.has_distributed());

        node.get_ring("127.0.0.1", ring).unwrap();
        assert!(node.has_distributed());
    }

    #[tokio::test]
    async fn test_bootstrap_ring_assembly() {
        let node = test_node(2, 1);
        assert_eq!(node.register_peer("127.0.0.1".to_string(), 5001), "1");

        // number_of_nodes é 1 na configuração de teste, 2 registados
        assert!(node.distribute().is_err());

        let (node, _queue) = Node::new(
            NodeConfig {
                number_of_nodes: 2,
                ..config(2, 1)
            },
            "0".to_string(),
            Broadcaster::new(),
        );
        node.register_peer("127.0.0.1".to_string(), 5001);
        assert_eq!(node.distribute().unwrap(), "Startup finished");
        assert!(node.has_distributed());
        // segunda chamada: já distribuído
        assert!(node.distribute().is_err());
    }
}
