//! Difusão de mensagens pelo anel, em melhor esforço.
//!
//! As respostas dos pares não são usadas para correção: a convergência
//! assenta em todos os nós acabarem por receber todos os blocos, e o DAG
//! absorve blocos fora de ordem como ramos laterais.

use serde::Serialize;
use shared::{BlockchainError, Result, Ring};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Envia cargas JSON aos pares do anel por HTTP.
pub struct Broadcaster {
    client: reqwest::Client,
    targets: Mutex<Vec<(String, u16)>>,
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            targets: Mutex::new(Vec::new()),
        }
    }

    /// Regista os destinos do anel, excluindo o próprio nó
    pub fn add_ring(&self, ring: &Ring, own_id: &str) {
        let mut targets = self.targets.lock().unwrap();
        targets.clear();
        for (id, peer) in ring {
            if id != own_id {
                targets.push((peer.ip.clone(), peer.port));
            }
        }
    }

    /// POST único com resposta JSON; usado no registo junto ao bootstrap
    ///
    /// # Errors
    ///
    /// Retorna erro se o pedido falhar ou a resposta não for JSON
    pub async fn send_post<T: Serialize>(
        &self,
        ip: &str,
        port: u16,
        endpoint: &str,
        payload: &T,
    ) -> Result<serde_json::Value> {
        let url = format!("http://{ip}:{port}{endpoint}");
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| BlockchainError::NetworkError(e.to_string()))
    }

    /// Entrega a carga a cada par exatamente uma vez, sem esperar respostas.
    /// Cada envio corre na sua própria task para que um par lento não atrase
    /// os restantes; falhas são apenas registadas.
    pub fn fan_out<T: Serialize>(&self, endpoint: &str, payload: &T) {
        let body = match serde_json::to_value(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("carga não serializável para {endpoint}: {e}");
                return;
            }
        };
        let targets = self.targets.lock().unwrap().clone();
        for (ip, port) in targets {
            let client = self.client.clone();
            let url = format!("http://{ip}:{port}{endpoint}");
            let body = body.clone();
            tokio::spawn(async move {
                if let Err(e) = client.post(&url).json(&body).send().await {
                    debug!("falha ao difundir para {url}: {e}");
                }
            });
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PeerAddr;

    #[test]
    fn test_ring_targets_exclude_self() {
        let broadcaster = Broadcaster::new();
        let mut ring = Ring::new();
        ring.insert(
            "0".to_string(),
            PeerAddr {
                ip: "10.0.0.1".to_string(),
                port: 5000,
            },
        );
        ring.insert(
            "1".to_string(),
            PeerAddr {
                ip: "10.0.0.2".to_string(),
                port: 5001,
            },
        );

        broadcaster.add_ring(&ring, "0");
        let targets = broadcaster.targets.lock().unwrap().clone();
        assert_eq!(targets, vec![("10.0.0.2".to_string(), 5001)]);
    }
}
