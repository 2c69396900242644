use crate::block::Block;
use crate::transaction::{Transaction, TxRef};
use serde::{Deserialize, Serialize};
use shared::{Address, Amount, TxId};
use std::collections::{BTreeMap, HashMap};

/// Estado UTXO da cadeia: duas projeções redundantes do mesmo conjunto de
/// saídas não gastas, ambas indexadas por endereço.
///
/// Invariante: para todo endereço, o saldo em `balances` é a soma dos valores
/// das suas saídas em `utxos`. Entradas com saldo zero e mapas vazios são
/// mantidos em paralelo, pelo que a igualdade entre estados é a igualdade
/// profunda dos dois mapas.
///
/// As transições são puras: `consume_block` devolve um estado novo e nunca
/// altera o recebido. O mapa interno de cada endereço é ordenado por id, o
/// que fixa a seleção de saídas a gastar em ordem ascendente.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    utxos: HashMap<Address, BTreeMap<TxId, TxRef>>,
    balances: HashMap<Address, Amount>,
}

impl State {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verdadeiro antes do bloco de gênese
    #[must_use]
    pub fn empty(&self) -> bool {
        self.utxos.is_empty() || self.balances.is_empty()
    }

    /// O endereço é conhecido, tem saldo suficiente e o valor é positivo
    #[must_use]
    pub fn check_balance(&self, address: &str, amount: Amount) -> bool {
        amount > 0 && self.balances.get(address).map_or(false, |b| *b >= amount)
    }

    /// Saldo do endereço; zero quando desconhecido
    #[must_use]
    pub fn get_balance(&self, address: &str) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Saídas não gastas de um endereço, em ordem ascendente de id
    pub fn unspent<'a>(&'a self, address: &str) -> impl Iterator<Item = &'a TxRef> {
        self.utxos
            .get(address)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Valida a transação contra este estado: saldo do remetente, posse das
    /// entradas gastas e integridade/assinatura da própria transação
    #[must_use]
    pub fn validate(&self, transaction: &Transaction) -> bool {
        if !self.check_balance(&transaction.data.sender_address, transaction.data.amount) {
            return false;
        }
        let Some(owned) = self.utxos.get(&transaction.data.sender_address) else {
            return false;
        };
        if !transaction
            .data
            .input_txs
            .iter()
            .all(|id| owned.contains_key(id))
        {
            return false;
        }
        transaction.verify()
    }

    /// Aplica a transação ao estado; pressupõe `validate`
    pub fn update(&mut self, transaction: &Transaction) {
        let sender = &transaction.data.sender_address;
        let receiver = &transaction.data.receiver_address;
        let amount = transaction.data.amount;

        if let Some(balance) = self.balances.get_mut(sender) {
            *balance -= amount;
        }
        *self.balances.entry(receiver.clone()).or_insert(0) += amount;

        // As entradas gastas saem do conjunto do remetente
        if let Some(owned) = self.utxos.get_mut(sender) {
            for input in &transaction.data.input_txs {
                owned.remove(input);
            }
        }

        // O pagamento entra no conjunto do destinatário; o troco, se houver,
        // volta para o remetente
        if let Some(payment) = transaction.output_txs.first() {
            self.utxos
                .entry(receiver.clone())
                .or_default()
                .insert(payment.id.clone(), payment.clone());
        }
        if let Some(change) = transaction.output_txs.get(1) {
            self.utxos
                .entry(sender.clone())
                .or_default()
                .insert(change.id.clone(), change.clone());
        }
    }

    /// Credita a saída de uma transação de gênese: moedas sem dono anterior.
    /// Como `update`, mas sem debitar o remetente nem remover entradas.
    pub fn inflate(&mut self, transaction: &Transaction) {
        let receiver = &transaction.data.receiver_address;
        *self.balances.entry(receiver.clone()).or_insert(0) += transaction.data.amount;

        if let Some(payment) = transaction.output_txs.first() {
            self.utxos
                .entry(receiver.clone())
                .or_default()
                .insert(payment.id.clone(), payment.clone());
        }
    }

    /// Reproduz o bloco sobre uma cópia deste estado, da esquerda para a
    /// direita. Uma transação aplicada a um estado ainda vazio é tratada como
    /// inflação; qualquer outra é validada e aplicada. Devolve `None` na
    /// primeira transação inválida.
    #[must_use]
    pub fn consume_block(&self, block: &Block) -> Option<State> {
        let mut next = self.clone();
        for transaction in &block.transactions {
            if next.empty() {
                next.inflate(transaction);
            } else if next.validate(transaction) {
                next.update(transaction);
            } else {
                return None;
            }
        }
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::GENESIS_SENDER;
    use once_cell::sync::Lazy;
    use shared::Wallet;

    static ALICE: Lazy<Wallet> = Lazy::new(|| Wallet::generate().unwrap());
    static BOB: Lazy<Wallet> = Lazy::new(|| Wallet::generate().unwrap());

    fn genesis_transaction(receiver: &str, amount: Amount) -> Transaction {
        let allotment = TxRef {
            id: "genesis".to_string(),
            recipient: GENESIS_SENDER.to_string(),
            amount,
        };
        Transaction::new(GENESIS_SENDER, receiver, amount, &[allotment]).unwrap()
    }

    fn state_with_allotment(wallet: &Wallet, amount: Amount) -> (State, String) {
        let address = wallet.public_key_pem().unwrap();
        let mut state = State::new();
        state.inflate(&genesis_transaction(&address, amount));
        (state, address)
    }

    fn transfer(state: &State, from: &Wallet, to: &str, amount: Amount) -> Transaction {
        let sender = from.public_key_pem().unwrap();
        let mut spent = Vec::new();
        let mut total = 0;
        for utxo in state.unspent(&sender) {
            total += utxo.amount;
            spent.push(utxo.clone());
            if total >= amount {
                break;
            }
        }
        let mut transaction = Transaction::new(&sender, to, amount, &spent).unwrap();
        transaction.sign(from);
        transaction
    }

    fn balances_match_utxos(state: &State) -> bool {
        state.balances.iter().all(|(address, balance)| {
            let total: Amount = state
                .utxos
                .get(address)
                .map(|owned| owned.values().map(|tx| tx.amount).sum())
                .unwrap_or(0);
            total == *balance
        })
    }

    #[test]
    fn test_empty_state() {
        let state = State::new();
        assert!(state.empty());
        assert_eq!(state.get_balance("nobody"), 0);
        assert!(!state.check_balance("nobody", 1));
    }

    #[test]
    fn test_inflate_credits_receiver() {
        let (state, alice) = state_with_allotment(&ALICE, 100);
        assert!(!state.empty());
        assert_eq!(state.get_balance(&alice), 100);
        assert!(state.check_balance(&alice, 100));
        assert!(!state.check_balance(&alice, 101));
        assert!(balances_match_utxos(&state));
    }

    #[test]
    fn test_update_moves_value_and_conserves_total() {
        let (mut state, alice) = state_with_allotment(&ALICE, 100);
        let bob = BOB.public_key_pem().unwrap();
        let transaction = transfer(&state, &ALICE, &bob, 30);

        assert!(state.validate(&transaction));
        let total_before: Amount = state.balances.values().sum();
        state.update(&transaction);

        assert_eq!(state.get_balance(&alice), 70);
        assert_eq!(state.get_balance(&bob), 30);
        assert_eq!(state.balances.values().sum::<Amount>(), total_before);
        assert!(balances_match_utxos(&state));
    }

    #[test]
    fn test_double_spend_is_rejected() {
        let (mut state, _alice) = state_with_allotment(&ALICE, 100);
        let bob = BOB.public_key_pem().unwrap();

        // ambas gastam a única saída da Alice
        let first = transfer(&state, &ALICE, &bob, 30);
        let second = transfer(&state, &ALICE, &bob, 40);
        assert_eq!(first.data.input_txs, second.data.input_txs);

        state.update(&first);
        assert!(!state.validate(&second));
    }

    #[test]
    fn test_validate_rejects_unsigned_and_foreign_inputs() {
        let (state, _alice) = state_with_allotment(&ALICE, 100);
        let bob = BOB.public_key_pem().unwrap();

        let mut unsigned = transfer(&state, &ALICE, &bob, 30);
        unsigned.signature = None;
        assert!(!state.validate(&unsigned));

        let mut foreign_input = transfer(&state, &ALICE, &bob, 30);
        foreign_input.data.input_txs = vec!["unknown".to_string()];
        assert!(!state.validate(&foreign_input));
    }

    #[test]
    fn test_consume_block_replays_transactions() {
        let alice = ALICE.public_key_pem().unwrap();
        let bob = BOB.public_key_pem().unwrap();

        let genesis = genesis_transaction(&alice, 100);
        let genesis_block = Block::new(0, vec![genesis], "1".to_string()).unwrap();
        let state = State::new().consume_block(&genesis_block).unwrap();
        assert_eq!(state.get_balance(&alice), 100);

        let transaction = transfer(&state, &ALICE, &bob, 30);
        let block = Block::new(1, vec![transaction], genesis_block.current_hash.clone()).unwrap();
        let next = state.consume_block(&block).unwrap();

        assert_eq!(next.get_balance(&alice), 70);
        assert_eq!(next.get_balance(&bob), 30);
        // o estado de partida não é alterado
        assert_eq!(state.get_balance(&alice), 100);
        assert!(balances_match_utxos(&next));
    }

    #[test]
    fn test_consume_block_rejects_invalid_transaction() {
        let (state, _alice) = state_with_allotment(&ALICE, 100);
        let bob = BOB.public_key_pem().unwrap();

        let mut transaction = transfer(&state, &ALICE, &bob, 30);
        transaction.data.amount = 90; // quebra o id e a assinatura
        let block = Block::new(1, vec![transaction], "parent".to_string()).unwrap();
        assert!(state.consume_block(&block).is_none());
    }

    #[test]
    fn test_spend_selection_order_is_ascending_by_id() {
        let alice = ALICE.public_key_pem().unwrap();
        let mut state = State::new();
        state.inflate(&genesis_transaction(&alice, 10));
        // segunda dotação com outro id, fora de ordem de inserção
        let extra = Transaction::new(
            GENESIS_SENDER,
            &alice,
            5,
            &[TxRef {
                id: "aaa".to_string(),
                recipient: GENESIS_SENDER.to_string(),
                amount: 5,
            }],
        )
        .unwrap();
        state.inflate(&extra);

        let ids: Vec<&str> = state.unspent(&alice).map(|tx| tx.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
