use clap::{Args, Parser, Subcommand};
use shared::{BlockchainError, NodeConfig, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

mod api;
mod broadcast;
mod client;
mod node;

use broadcast::Broadcaster;
use client::Client;
use node::Node;

#[derive(Parser)]
#[command(name = "ringcash")]
#[command(about = "Fixed-ring proof-of-work blockchain node")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a ring node (configuration comes from the environment)
    Node,
    /// Generate an RSA-2048 key pair and save it as PEM files
    Wallet(WalletArgs),
    /// Talk to a running node as a wallet client
    Client(ClientArgs),
}

#[derive(Args)]
struct WalletArgs {
    /// Directory for the generated key files
    #[arg(long, default_value = "./")]
    path: PathBuf,

    /// Base name for the key files (<name>.pub and <name>)
    #[arg(long, default_value = "rcc_rsa")]
    name: String,
}

#[derive(Args)]
struct ClientArgs {
    /// Node address, e.g. 127.0.0.1:5000
    #[arg(long)]
    node: String,

    /// Path of the PUBLIC key file
    #[arg(long)]
    public_key: PathBuf,

    /// Path of the PRIVATE key file
    #[arg(long)]
    private_key: PathBuf,

    #[command(subcommand)]
    action: ClientAction,
}

#[derive(Subcommand)]
enum ClientAction {
    /// Send <AMOUNT> RCC to the wallet whose public key is in <RECIPIENT>
    Send { recipient: PathBuf, amount: u64 },
    /// View the transactions in the last block of the chain
    View,
    /// Print the wallet balance
    Balance,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Some(Commands::Wallet(args)) => generate_wallet(&args),
        Some(Commands::Client(args)) => run_client(args).await,
        Some(Commands::Node) | None => run_node().await,
    }
}

fn init_logging(log_level: &str) {
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

async fn run_node() -> Result<()> {
    let config = NodeConfig::from_env()?;
    let broadcaster = Broadcaster::new();

    // Os pares registam-se junto ao bootstrap e recebem o id atribuído
    let node_id = if config.is_bootstrap() {
        "0".to_string()
    } else {
        let payload = serde_json::json!({ "port": config.listen_port() });
        let response = broadcaster
            .send_post(
                &config.bootstrap_ip,
                config.bootstrap_port,
                "/registration",
                &payload,
            )
            .await?;
        response
            .get("node_id")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                BlockchainError::NetworkError("resposta de registo sem node_id".to_string())
            })?
            .to_string()
    };

    let listen_port = config.listen_port();
    let (node, queue) = Node::new(config, node_id, broadcaster);
    info!(
        "🔗 nó {} ({}) a escutar na porta {}",
        node.node_id,
        if node.is_bootstrap { "bootstrap" } else { "par" },
        listen_port
    );

    // Worker dedicado: drena a fila de transações e minera
    tokio::spawn(Arc::clone(&node).process(queue));

    let addr = SocketAddr::from(([0, 0, 0, 0], listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
    axum::serve(
        listener,
        api::router(node).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| BlockchainError::NetworkError(e.to_string()))?;
    Ok(())
}

fn generate_wallet(args: &WalletArgs) -> Result<()> {
    let (public_path, private_path) = client::write_wallet(&args.path, &args.name)?;
    println!("Chave pública gravada em {}", public_path.display());
    println!("Chave privada gravada em {}", private_path.display());
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let (ip, port) = args
        .node
        .split_once(':')
        .ok_or_else(|| {
            BlockchainError::InvalidParameters("endereço do nó deve ser ip:porta".to_string())
        })?;
    let port: u16 = port.parse().map_err(|_| {
        BlockchainError::InvalidParameters(format!("porta inválida: {port}"))
    })?;

    let wallet = client::load_wallet(&args.public_key, &args.private_key)?;
    let client = Client::new(ip, port);

    // O primeiro utilizador a entrar reclama a dotação inicial
    if client.first_login(&wallet).await? {
        println!("Dotação inicial reclamada para esta carteira");
    }

    match args.action {
        ClientAction::Send { recipient, amount } => {
            let recipient_pem = std::fs::read_to_string(&recipient)
                .map_err(|e| BlockchainError::IoError(e.to_string()))?;
            match client.send(&wallet, &recipient_pem, amount).await {
                Ok(message) => println!("{message}"),
                Err(BlockchainError::InvalidParameters(message)) => println!("{message}"),
                Err(e) => return Err(e),
            }
        }
        ClientAction::View => {
            let transactions = client.view().await?;
            if let Some(entries) = transactions.as_object() {
                for (id, data) in entries {
                    println!("ID:     {id}");
                    println!("De:     {}", data["from"]);
                    println!("Para:   {}", data["to"]);
                    println!("Valor:  {}", data["amount"]);
                    println!("{}", "~".repeat(72));
                }
            }
        }
        ClientAction::Balance => {
            println!("{}", client.balance(&wallet).await?);
        }
    }
    Ok(())
}
