//! Cliente de carteira: operações pontuais contra um nó do anel.
//!
//! O nó devolve a transação candidata sem assinatura; o cliente assina com a
//! sua chave privada e submete-a de volta. Quando a transação não é possível
//! a resposta vem em texto simples em vez de JSON.

use ring_core::Transaction;
use shared::{BlockchainError, Result, Wallet};
use std::path::{Path, PathBuf};

pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    #[must_use]
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{ip}:{port}"),
            http: reqwest::Client::new(),
        }
    }

    async fn info(&self) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/info", self.base_url))
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))
    }

    /// Aperto de mão do primeiro arranque: se o anel ainda não foi
    /// distribuído, pede a distribuição ao bootstrap e, sendo este o
    /// primeiro utilizador, reclama a dotação inicial.
    ///
    /// # Errors
    ///
    /// `NotReady` enquanto faltarem registos no bootstrap; erros de rede
    pub async fn first_login(&self, wallet: &Wallet) -> Result<bool> {
        let info = self.info().await?;
        if info
            .get("has_distributed")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return Ok(false);
        }

        let bootstrap_ip = info
            .get("bootstrap_ip")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| BlockchainError::NetworkError("resposta /info incompleta".to_string()))?;
        let bootstrap_port = info
            .get("bootstrap_port")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| BlockchainError::NetworkError("resposta /info incompleta".to_string()))?;
        let bootstrap_url = format!("http://{bootstrap_ip}:{bootstrap_port}");

        let response = self
            .http
            .get(format!("{bootstrap_url}/distribute"))
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(BlockchainError::NotReady(
                "aguarde o registo de todos os nós".to_string(),
            ));
        }

        let payload = serde_json::json!({ "original_public_key": wallet.public_key_pem()? });
        self.http
            .post(format!("{bootstrap_url}/make-genesis"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        Ok(true)
    }

    /// Pede uma transação candidata, assina-a e submete-a
    ///
    /// # Errors
    ///
    /// `InvalidParameters` com a mensagem do nó quando a transação não é
    /// possível; erros de rede
    pub async fn send(&self, wallet: &Wallet, recipient_pem: &str, amount: u64) -> Result<String> {
        let payload = serde_json::json!({
            "sender_address": wallet.public_key_pem()?,
            "recipient_address": recipient_pem,
            "amount": amount,
        });
        let response = self
            .http
            .post(format!("{}/candidate-transaction", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;

        // texto simples = transação recusada pelo nó
        let mut transaction = Transaction::from_json(&body)
            .map_err(|_| BlockchainError::InvalidParameters(body.clone()))?;
        transaction.sign(wallet);

        let payload = serde_json::json!({
            "transaction_json": transaction.to_json()?,
            "is_local": true,
        });
        let response = self
            .http
            .post(format!("{}/transaction", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))
    }

    /// Transações do último bloco da cadeia
    ///
    /// # Errors
    ///
    /// Erros de rede ou de decodificação
    pub async fn view(&self) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/view", self.base_url))
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))
    }

    /// Saldo da carteira, em texto
    ///
    /// # Errors
    ///
    /// Erros de rede
    pub async fn balance(&self, wallet: &Wallet) -> Result<String> {
        let payload = serde_json::json!({ "user_address": wallet.public_key_pem()? });
        let response = self
            .http
            .post(format!("{}/balance", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))
    }
}

/// Gera um par de chaves e grava-o em PEM: `<name>.pub` e `<name>`
///
/// # Errors
///
/// Erros de geração de chave ou de escrita dos ficheiros
pub fn write_wallet(dir: &Path, name: &str) -> Result<(PathBuf, PathBuf)> {
    let wallet = Wallet::generate()?;
    let public_path = dir.join(format!("{name}.pub"));
    let private_path = dir.join(name);
    std::fs::write(&public_path, wallet.public_key_pem()?)
        .map_err(|e| BlockchainError::IoError(e.to_string()))?;
    std::fs::write(&private_path, wallet.private_key_pem()?)
        .map_err(|e| BlockchainError::IoError(e.to_string()))?;
    Ok((public_path, private_path))
}

/// Carrega uma carteira a partir dos ficheiros PEM
///
/// # Errors
///
/// Erros de leitura ou chaves inválidas
pub fn load_wallet(public_path: &Path, private_path: &Path) -> Result<Wallet> {
    let public_pem =
        std::fs::read_to_string(public_path).map_err(|e| BlockchainError::IoError(e.to_string()))?;
    let private_pem = std::fs::read_to_string(private_path)
        .map_err(|e| BlockchainError::IoError(e.to_string()))?;
    Wallet::from_pem(&public_pem, &private_pem)
}
