use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use blockchain::{ConsensusResolver, HttpChainSource, Keypair, Ledger};
use config::NodeConfig;

// Open the persistent ledger, falling back to an in-memory one
fn initialize_ledger(config: &NodeConfig) -> Ledger {
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        warn!("Failed to create data directory: {}", e);
    }

    match Ledger::with_storage(&config.data_dir, config.ledger_config()) {
        Ok(ledger) => {
            info!("Loaded ledger from storage at {}", config.data_dir.display());
            ledger
        }
        Err(err) => {
            warn!("Failed to load ledger from storage: {}", err);
            warn!("Creating in-memory ledger instead");
            Ledger::new(config.ledger_config())
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::sign_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::get_wallet,
        api::handlers::register_nodes,
        api::handlers::resolve_conflicts
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Wallet,
            blockchain::Address,
            blockchain::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::SignRequest,
            api::handlers::SignResponse,
            api::handlers::MineRequest,
            api::handlers::MineResponse,
            api::handlers::WalletResponse,
            api::handlers::RegisterNodesRequest,
            api::handlers::RegisterNodesResponse,
            api::handlers::ResolveResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "1.0.0",
        description = "A single-node proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env();

    let ledger = web::Data::new(initialize_ledger(&config));

    let source = HttpChainSource::new(config.peer_timeout).context("building peer client")?;
    let resolver = web::Data::new(ConsensusResolver::new(
        Arc::new(source),
        config.max_concurrent_peers,
    ));

    // The node's own reward address; its private key is only shown once
    let node_keypair = Keypair::generate();
    info!("Node wallet address: {}", node_keypair.address());
    info!("Node wallet private key: {}", node_keypair.private_key_hex());
    let identity = web::Data::new(api::NodeIdentity {
        address: node_keypair.address().clone(),
    });

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    let server_ledger = ledger.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(server_ledger.clone())
            .app_data(resolver.clone())
            .app_data(identity.clone())
            .configure(api::configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("binding {}:{}", config.host, config.port))?
    .run()
    .await?;

    // Abandon any proof search still running on a blocking worker
    ledger.shutdown();
    info!("Server stopped");

    Ok(())
}
