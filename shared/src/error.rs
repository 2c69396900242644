use thiserror::Error;

/// Erros relacionados ao nó e à blockchain
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Parâmetros inválidos: {0}")]
    InvalidParameters(String),

    #[error("Fundos insuficientes")]
    InsufficientFunds,

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Hash inválido")]
    InvalidHash,

    #[error("Prova de trabalho insuficiente")]
    InsufficientProof,

    #[error("Bloco anterior desconhecido")]
    UnknownParent,

    #[error("Falha ao reproduzir o estado sobre o bloco anterior")]
    StateReplayFailure,

    #[error("Origem não autorizada")]
    UnauthorizedOrigin,

    #[error("Nó não está pronto: {0}")]
    NotReady(String),

    #[error("Erro de serialização: {0}")]
    SerializationError(String),

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de rede: {0}")]
    NetworkError(String),

    #[error("Erro de configuração: {0}")]
    ConfigError(String),

    #[error("Erro de I/O: {0}")]
    IoError(String),

    #[error("Erro: {0}")]
    Other(String),
}
