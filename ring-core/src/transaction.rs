use serde::{Deserialize, Serialize};
use shared::{
    canonical_json, canonical_sha256, verify_signature, Address, Amount, BlockchainError, Result,
    TxId, Wallet,
};

/// Endereço sintético do remetente da transação de gênese
pub const GENESIS_SENDER: &str = "0";

/// Uma saída de transação não gasta (UTXO)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    /// Id da transação que criou a saída
    pub id: TxId,
    /// Endereço (chave pública PEM) do dono atual
    pub recipient: Address,
    pub amount: Amount,
}

/// Campos cobertos pelo id e pela assinatura de uma transação
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    pub sender_address: Address,
    pub receiver_address: Address,
    pub amount: Amount,
    /// Ids das saídas do remetente gastas por esta transação, sem duplicados
    pub input_txs: Vec<TxId>,
}

/// Transferência de valor assinada, com id determinístico.
///
/// O id é o SHA-256 da forma canônica de `data`. As saídas em `output_txs`
/// (pagamento e, havendo troco, devolução ao remetente) carregam ambas o id
/// da própria transação; como os mapas de UTXOs são indexados por id dentro
/// de cada endereço e o autopagamento é rejeitado, os ids nunca colidem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub data: TransactionData,
    pub id: TxId,
    pub output_txs: Vec<TxRef>,
    /// Assinatura PSS-SHA256 sobre o id (hex); ausente até o cliente assinar
    pub signature: Option<String>,
}

impl Transaction {
    /// Cria uma transação ainda não assinada
    ///
    /// # Errors
    ///
    /// Retorna `InvalidParameters` quando o valor é zero ou as entradas não
    /// cobrem o valor a transferir
    pub fn new(
        sender_address: &str,
        receiver_address: &str,
        amount: Amount,
        spent_txs: &[TxRef],
    ) -> Result<Self> {
        if amount == 0 {
            return Err(BlockchainError::InvalidParameters(
                "o valor da transação deve ser positivo".to_string(),
            ));
        }
        let input_value: Amount = spent_txs.iter().map(|tx| tx.amount).sum();
        if input_value < amount {
            return Err(BlockchainError::InvalidParameters(
                "as entradas não cobrem o valor da transação".to_string(),
            ));
        }

        let data = TransactionData {
            sender_address: sender_address.to_string(),
            receiver_address: receiver_address.to_string(),
            amount,
            input_txs: spent_txs.iter().map(|tx| tx.id.clone()).collect(),
        };
        let id = canonical_sha256(&data)?;

        let mut output_txs = vec![TxRef {
            id: id.clone(),
            recipient: receiver_address.to_string(),
            amount,
        }];
        if input_value > amount {
            output_txs.push(TxRef {
                id: id.clone(),
                recipient: sender_address.to_string(),
                amount: input_value - amount,
            });
        }

        Ok(Self {
            data,
            id,
            output_txs,
            signature: None,
        })
    }

    /// Assina o id da transação com a chave privada da carteira
    pub fn sign(&mut self, wallet: &Wallet) {
        self.signature = Some(wallet.sign(&self.id));
    }

    /// Integridade do id e autenticidade da assinatura.
    /// A transação de gênese nunca passa por aqui (ver `State::inflate`).
    #[must_use]
    pub fn verify(&self) -> bool {
        match canonical_sha256(&self.data) {
            Ok(expected) if expected == self.id => {}
            _ => return false,
        }
        let Some(signature) = &self.signature else {
            return false;
        };
        verify_signature(&self.data.sender_address, &self.id, signature)
    }

    /// Forma canônica usada no gossip entre nós
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn to_json(&self) -> Result<String> {
        canonical_json(self)
    }

    /// Reconstrói uma transação recebida de um par ou cliente
    ///
    /// # Errors
    ///
    /// Retorna erro se o JSON não representar uma transação
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| BlockchainError::SerializationError(e.to_string()))
    }
}
