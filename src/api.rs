//! Superfície HTTP do nó: operações de cliente e gossip entre pares.
//!
//! Falhas viradas ao utilizador devolvem texto simples; mensagens inválidas
//! vindas de pares são registadas e descartadas sem afetar o ciclo do nó.

use crate::node::Node;
use axum::extract::{ConnectInfo, Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use ring_core::{Block, Transaction};
use serde::Deserialize;
use shared::Ring;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/candidate-transaction", post(candidate_transaction))
        .route("/transaction", post(receive_transaction))
        .route("/view", get(view))
        .route("/balance", post(balance))
        .route("/block", post(receive_block))
        .route("/registration", post(registration))
        .route("/distribute", get(distribute))
        .route("/ring", post(receive_ring))
        .route("/make-genesis", post(make_genesis))
        .with_state(node)
}

/// Arranque de clientes: identidade do nó e parâmetros da rede
async fn info(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "node_id": node.node_id,
        "bootstrap_ip": node.config.bootstrap_ip,
        "bootstrap_port": node.config.bootstrap_port,
        "number_of_nodes": node.config.number_of_nodes,
        "has_distributed": node.has_distributed(),
        "total_coins": node.config.total_coins,
    }))
}

#[derive(Deserialize)]
struct CandidateRequest {
    sender_address: String,
    recipient_address: String,
    amount: u64,
}

/// Monta uma transação não assinada e devolve-a ao cliente para assinar.
/// Quando a transação não é possível a resposta é texto simples, que o
/// cliente reconhece por não decodificar como JSON.
async fn candidate_transaction(
    State(node): State<Arc<Node>>,
    Json(request): Json<CandidateRequest>,
) -> Response {
    match node.create_transaction(
        &request.sender_address,
        &request.recipient_address,
        request.amount,
    ) {
        Ok(transaction) => Json(transaction).into_response(),
        Err(e) => e.to_string().into_response(),
    }
}

#[derive(Deserialize)]
struct TransactionRequest {
    transaction_json: String,
    is_local: bool,
}

/// Recebe uma transação assinada, de um cliente ou de outro nó
async fn receive_transaction(
    State(node): State<Arc<Node>>,
    Json(request): Json<TransactionRequest>,
) -> Response {
    let transaction = match Transaction::from_json(&request.transaction_json) {
        Ok(transaction) => transaction,
        Err(e) => {
            warn!("transação mal formada descartada: {e}");
            return e.to_string().into_response();
        }
    };
    match node.commit_transaction(transaction, request.is_local) {
        Ok(message) => message.into_response(),
        Err(e) => e.to_string().into_response(),
    }
}

/// Transações do bloco no topo da cadeia
async fn view(State(node): State<Arc<Node>>) -> Json<serde_json::Value> {
    let mut result = serde_json::Map::new();
    for transaction in node.tip_transactions() {
        result.insert(
            transaction.id.clone(),
            serde_json::json!({
                "from": transaction.data.sender_address,
                "to": transaction.data.receiver_address,
                "amount": transaction.data.amount,
            }),
        );
    }
    Json(serde_json::Value::Object(result))
}

#[derive(Deserialize)]
struct BalanceRequest {
    user_address: String,
}

async fn balance(State(node): State<Arc<Node>>, Json(request): Json<BalanceRequest>) -> String {
    format!("{} RCC", node.balance_of(&request.user_address))
}

/// Gossip de blocos entre pares
async fn receive_block(State(node): State<Arc<Node>>, Json(block): Json<Block>) -> Response {
    match node.get_block(block) {
        Ok(message) => message.into_response(),
        Err(e) => {
            warn!("bloco estrangeiro rejeitado: {e}");
            "Invalid Block!".into_response()
        }
    }
}

#[derive(Deserialize)]
struct RegistrationRequest {
    port: u16,
}

/// Registo inicial de um par junto ao bootstrap; o ip vem da ligação
async fn registration(
    State(node): State<Arc<Node>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RegistrationRequest>,
) -> Json<serde_json::Value> {
    let node_id = node.register_peer(addr.ip().to_string(), request.port);
    Json(serde_json::json!({ "node_id": node_id }))
}

/// Pedido ao bootstrap para difundir o anel; exige todos os nós registados
async fn distribute(State(node): State<Arc<Node>>) -> Response {
    if !node.is_bootstrap {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    match node.distribute() {
        Ok(message) => message.into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Wait until all nodes have registered.",
        )
            .into_response(),
    }
}

/// Receção do anel; só o bootstrap pode ser a origem
async fn receive_ring(
    State(node): State<Arc<Node>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(ring): Json<Ring>,
) -> Response {
    match node.get_ring(&addr.ip().to_string(), ring.clone()) {
        Ok(()) => Json(ring).into_response(),
        Err(e) => {
            warn!("anel recusado: {e}");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

#[derive(Deserialize)]
struct GenesisRequest {
    original_public_key: String,
}

/// O bootstrap instala a dotação inicial; uma única vez, antes de qualquer bloco
async fn make_genesis(State(node): State<Arc<Node>>, Json(request): Json<GenesisRequest>) -> Response {
    if !node.is_bootstrap || !node.state_empty() {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    match node.make_genesis_block(&request.original_public_key) {
        Ok(message) => message.into_response(),
        Err(e) => e.to_string().into_response(),
    }
}
