use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{
    Address, Block, ChainResponse, ConsensusResolver, Ledger, LedgerError, Transaction,
    TransactionPayload, Wallet,
};

/// Shared ledger handle
pub type LedgerData = web::Data<Ledger>;

/// Shared consensus resolver handle
pub type ResolverData = web::Data<ConsensusResolver>;

/// Address this node pays mining rewards to unless told otherwise
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub address: Address,
}

/// Maps a ledger error to an HTTP response
fn error_response(err: &LedgerError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        LedgerError::StorageError(_) | LedgerError::SystemError(_) => {
            HttpResponse::InternalServerError().json(body)
        }
        LedgerError::StaleHead | LedgerError::MiningCancelled => HttpResponse::Conflict().json(body),
        _ => HttpResponse::BadRequest().json(body),
    }
}

/// Get the full blockchain
///
/// Returns the chain in the shape peers expect from `GET /chain`
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ChainResponse::new(ledger.get_chain()))
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.pending_transactions())
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address, `"0"` for rewards
    pub sender: String,

    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// Signature over the canonical `{amount, recipient, sender}` payload
    pub signature: Option<String>,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Submit a signed transaction
#[utoipa::path(
    post,
    path = "/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction queued", body = TransactionResponse),
        (status = 400, description = "Invalid transaction"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn new_transaction(
    ledger: LedgerData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = request.into_inner();

    match ledger.submit_transaction(
        Address(request.sender),
        Address(request.recipient),
        request.amount,
        request.signature,
    ) {
        Ok(block_index) => HttpResponse::Created().json(TransactionResponse {
            message: format!("Transaction will be added to block {}", block_index),
            block_index,
        }),
        Err(err) => error_response(&err),
    }
}

/// Request for the sign endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SignRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,

    /// Hex encoded private key; used once and never stored
    pub private_key: String,
}

/// Response for the sign endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SignResponse {
    pub signature: String,
}

/// Sign a transaction payload
#[utoipa::path(
    post,
    path = "/transactions/sign",
    request_body = SignRequest,
    responses(
        (status = 200, description = "Payload signed", body = SignResponse),
        (status = 400, description = "Invalid private key")
    )
)]
pub async fn sign_transaction(request: web::Json<SignRequest>) -> impl Responder {
    let request = request.into_inner();
    let payload = TransactionPayload::new(
        Address(request.sender),
        Address(request.recipient),
        request.amount,
    );

    match payload.sign(&request.private_key) {
        Ok(signature) => HttpResponse::Ok().json(SignResponse { signature }),
        Err(err) => error_response(&LedgerError::from(err)),
    }
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// Where to send the reward; defaults to the node's own address
    pub miner_address: Option<String>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly mined block
    pub block: Block,
}

/// Mine a new block
///
/// Solves the proof of work and seals all pending transactions plus the reward
#[utoipa::path(
    post,
    path = "/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 409, description = "Chain changed while mining"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(
    ledger: LedgerData,
    identity: web::Data<NodeIdentity>,
    request: Option<web::Json<MineRequest>>,
) -> impl Responder {
    let miner = request
        .and_then(|r| r.into_inner().miner_address)
        .map(Address)
        .unwrap_or_else(|| identity.address.clone());

    match ledger.mine(miner).await {
        Ok(block) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Forged".to_string(),
            block,
        }),
        Err(err) => error_response(&err),
    }
}

/// Check if the blockchain is valid
#[utoipa::path(
    get,
    path = "/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.is_valid())
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address (public key)
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Create a new wallet
///
/// The private key is returned once and must be stored by the caller
#[utoipa::path(
    post,
    path = "/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet(ledger: LedgerData) -> impl Responder {
    match ledger.create_wallet() {
        Ok(keypair) => HttpResponse::Created().json(WalletResponse {
            address: keypair.address().0.clone(),
            private_key: keypair.private_key_hex(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Get a wallet
#[utoipa::path(
    get,
    path = "/wallet/{address}",
    responses(
        (status = 200, description = "Wallet found", body = Wallet),
        (status = 404, description = "Unknown wallet")
    )
)]
pub async fn get_wallet(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());

    match ledger.get_wallet(&address) {
        Some(wallet) => HttpResponse::Ok().json(wallet),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Wallet {} not found", address)
        })),
    }
}

/// Request for the register nodes endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodesRequest {
    /// Peer addresses, e.g. `http://127.0.0.1:5002`
    pub nodes: Vec<String>,
}

/// Response for the register nodes endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterNodesResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

/// Register peer nodes
#[utoipa::path(
    post,
    path = "/nodes/register",
    request_body = RegisterNodesRequest,
    responses(
        (status = 201, description = "Nodes registered", body = RegisterNodesResponse),
        (status = 400, description = "Invalid node address")
    )
)]
pub async fn register_nodes(
    ledger: LedgerData,
    request: web::Json<RegisterNodesRequest>,
) -> impl Responder {
    if request.nodes.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Please supply a valid list of nodes"
        }));
    }

    for node in &request.nodes {
        if let Err(err) = ledger.register_node(node) {
            return error_response(&err);
        }
    }

    HttpResponse::Created().json(RegisterNodesResponse {
        message: "New nodes have been added".to_string(),
        total_nodes: ledger.nodes().nodes(),
    })
}

/// Response for the resolve endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    pub message: String,
    pub replaced: bool,
    pub chain: Vec<Block>,
}

/// Resolve conflicts with registered peers
///
/// Adopts the longest valid peer chain if it is longer than ours
#[utoipa::path(
    get,
    path = "/nodes/resolve",
    responses(
        (status = 200, description = "Resolution finished", body = ResolveResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn resolve_conflicts(ledger: LedgerData, resolver: ResolverData) -> impl Responder {
    match resolver.resolve_conflicts(&ledger).await {
        Ok(replaced) => {
            let message = if replaced {
                "Our chain was replaced"
            } else {
                "Our chain is authoritative"
            };

            HttpResponse::Ok().json(ResolveResponse {
                message: message.to_string(),
                replaced,
                chain: ledger.get_chain(),
            })
        }
        Err(err) => error_response(&err),
    }
}
