//! Tipos compartilhados entre os módulos do ringcash

use crate::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alias para endereço de carteira (chave pública em PEM)
pub type Address = String;

/// Alias para identificador único de transação (SHA-256 em hex)
pub type TxId = String;

/// Alias para identificador único de bloco (SHA-256 em hex)
pub type BlockId = String;

/// Alias para valor monetário em RCC
pub type Amount = u64;

/// Alias para identificador de nó atribuído pelo bootstrap
pub type NodeId = String;

/// Endereço de um par do anel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub ip: String,
    pub port: u16,
}

/// O anel: mapa de identificador de nó para endereço.
/// A filiação é fixa e distribuída pelo bootstrap no arranque.
pub type Ring = HashMap<NodeId, PeerAddr>;

/// Configurações globais do nó, lidas do ambiente uma única vez no arranque
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Número total de nós do anel
    pub number_of_nodes: u32,
    /// Número de caracteres hexadecimais '0' iniciais exigidos num hash de bloco
    pub difficulty: usize,
    pub bootstrap_ip: String,
    pub bootstrap_port: u16,
    /// Porta deste nó; ausente quando este processo é o bootstrap
    pub node_port: Option<u16>,
    /// Número máximo de transações por bloco
    pub capacity: usize,
    /// Dotação total criada pela transação de gênese
    pub total_coins: u64,
}

impl NodeConfig {
    /// Lê a configuração das variáveis de ambiente
    ///
    /// # Errors
    ///
    /// Retorna erro se alguma variável obrigatória faltar ou não puder ser
    /// interpretada
    pub fn from_env() -> Result<Self> {
        let node_port = match std::env::var("NODE_PORT") {
            Ok(raw) if !raw.is_empty() => Some(parse_var("NODE_PORT", &raw)?),
            _ => None,
        };
        Ok(Self {
            number_of_nodes: required("NUMBER_OF_NODES")?,
            difficulty: required("DIFFICULTY")?,
            bootstrap_ip: std::env::var("BOOTSTRAP_IP")
                .map_err(|_| BlockchainError::ConfigError("variável BOOTSTRAP_IP em falta".to_string()))?,
            bootstrap_port: required("BOOTSTRAP_PORT")?,
            node_port,
            capacity: required("CAPACITY")?,
            total_coins: required("TOTAL_COINS")?,
        })
    }

    /// Verdadeiro quando este processo é o nó bootstrap
    #[must_use]
    pub const fn is_bootstrap(&self) -> bool {
        self.node_port.is_none()
    }

    /// Porta onde o nó escuta (a do bootstrap quando `node_port` está ausente)
    #[must_use]
    pub fn listen_port(&self) -> u16 {
        self.node_port.unwrap_or(self.bootstrap_port)
    }
}

fn required<T: std::str::FromStr>(name: &str) -> Result<T> {
    let raw = std::env::var(name)
        .map_err(|_| BlockchainError::ConfigError(format!("variável {name} em falta")))?;
    parse_var(name, &raw)
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| BlockchainError::ConfigError(format!("valor inválido para {name}: {raw}")))
}
