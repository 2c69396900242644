//! Carteira RSA-2048 e verificação de assinaturas PSS
//!
//! As chaves viajam pela rede em PEM: SubjectPublicKeyInfo para a chave
//! pública (que é o endereço da carteira) e PKCS#1 para a chave privada.
//! As assinaturas são PSS com MGF1-SHA256 e sal do tamanho do hash,
//! transportadas como hex minúsculo.

use crate::{BlockchainError, Result};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Tamanho das chaves RSA em bits (expoente público 65537)
pub const KEY_BITS: usize = 2048;

/// Par de chaves RSA de um utilizador
#[derive(Debug, Clone)]
pub struct Wallet {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl Wallet {
    /// Gera um novo par de chaves RSA-2048
    ///
    /// # Errors
    ///
    /// Retorna erro se a geração da chave falhar
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Carrega uma carteira a partir das chaves em PEM
    ///
    /// # Errors
    ///
    /// Retorna erro se algum dos PEMs não representar uma chave RSA válida
    pub fn from_pem(public_pem: &str, private_pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(private_pem)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        let public_key = RsaPublicKey::from_public_key_pem(public_pem)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Chave pública em PEM SubjectPublicKeyInfo; é o endereço na rede
    ///
    /// # Errors
    ///
    /// Retorna erro se a codificação falhar
    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))
    }

    /// Chave privada em PEM PKCS#1 (formato TraditionalOpenSSL)
    ///
    /// # Errors
    ///
    /// Retorna erro se a codificação falhar
    pub fn private_key_pem(&self) -> Result<String> {
        Ok(self
            .private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| BlockchainError::CryptographicError(e.to_string()))?
            .to_string())
    }

    /// Assina `message` (o id hex de uma transação) com PSS-SHA256
    #[must_use]
    pub fn sign(&self, message: &str) -> String {
        let signing_key = BlindedSigningKey::<Sha256>::new(self.private_key.clone());
        let mut rng = rand::thread_rng();
        let signature = signing_key.sign_with_rng(&mut rng, message.as_bytes());
        hex::encode(signature.to_bytes())
    }
}

/// Verifica uma assinatura PSS (hex) sobre `message` com a chave pública PEM.
/// Qualquer falha de decodificação conta como assinatura inválida.
#[must_use]
pub fn verify_signature(public_key_pem: &str, message: &str, signature_hex: &str) -> bool {
    let Ok(public_key) = RsaPublicKey::from_public_key_pem(public_key_pem) else {
        return false;
    };
    let Ok(raw) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(raw.as_slice()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(public_key)
        .verify(message.as_bytes(), &signature)
        .is_ok()
}
