use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// Routes sit at the root so that peers can reach `GET /chain` directly.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/chain", web::get().to(handlers::get_chain))
        .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
        .route("/transactions/new", web::post().to(handlers::new_transaction))
        .route("/transactions/sign", web::post().to(handlers::sign_transaction))
        .route("/mine", web::post().to(handlers::mine_block))
        .route("/validate", web::get().to(handlers::validate_chain))
        .route("/wallet/new", web::post().to(handlers::create_wallet))
        .route("/wallet/{address}", web::get().to(handlers::get_wallet))
        .route("/nodes/register", web::post().to(handlers::register_nodes))
        .route("/nodes/resolve", web::get().to(handlers::resolve_conflicts));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::NodeIdentity;
    use crate::blockchain::consensus::{ChainSource, PeerError};
    use crate::blockchain::{
        Address, ChainResponse, ConsensusResolver, Keypair, Ledger, LedgerConfig, TransactionPayload,
        Wallet,
    };
    use actix_web::{http::StatusCode, test, App};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct OfflinePeers;

    #[async_trait]
    impl ChainSource for OfflinePeers {
        async fn fetch_chain(&self, node: &str) -> Result<ChainResponse, PeerError> {
            Err(PeerError::Timeout(node.to_string()))
        }
    }

    fn app_data() -> (
        web::Data<Ledger>,
        web::Data<ConsensusResolver>,
        web::Data<NodeIdentity>,
    ) {
        (
            web::Data::new(Ledger::new(LedgerConfig::default())),
            web::Data::new(ConsensusResolver::new(Arc::new(OfflinePeers), 2)),
            web::Data::new(NodeIdentity {
                address: Address::from("node"),
            }),
        )
    }

    macro_rules! init_app {
        ($ledger:expr, $resolver:expr, $identity:expr) => {
            test::init_service(
                App::new()
                    .app_data($ledger.clone())
                    .app_data($resolver.clone())
                    .app_data($identity.clone())
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_chain_matches_peer_wire_shape() {
        let (ledger, resolver, identity) = app_data();
        let app = init_app!(ledger, resolver, identity);

        let req = test::TestRequest::get().uri("/chain").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["length"], 1);
        let genesis = &body["chain"][0];
        assert_eq!(genesis["index"], 1);
        assert_eq!(genesis["proof"], 100);
        assert_eq!(genesis["previous_hash"], "1");
        assert!(genesis["timestamp"].is_string());
        assert_eq!(genesis["transactions"], serde_json::json!([]));
    }

    #[actix_web::test]
    async fn test_mine_pays_node_and_transfer_flow() {
        let (ledger, resolver, identity) = app_data();
        let app = init_app!(ledger, resolver, identity);

        let req = test::TestRequest::post().uri("/wallet/new").to_request();
        let wallet: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let address = wallet["address"].as_str().unwrap().to_string();
        let private_key = wallet["private_key"].as_str().unwrap().to_string();
        assert_eq!(Keypair::from_private_key_hex(&private_key).unwrap().address().0, address);

        let req = test::TestRequest::post()
            .uri("/mine")
            .set_json(serde_json::json!({ "miner_address": address }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let payload = TransactionPayload::new(Address(address.clone()), Address::from("bob"), 1.0);
        let signature = payload.sign(&private_key).unwrap();
        let req = test::TestRequest::post()
            .uri("/transactions/new")
            .set_json(serde_json::json!({
                "sender": address,
                "recipient": "bob",
                "amount": 1.0,
                "signature": signature,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        // No body: the reward goes to the node's own address
        let req = test::TestRequest::post().uri("/mine").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/wallet/bob").to_request();
        let bob: Wallet = test::call_and_read_body_json(&app, req).await;
        assert_eq!(bob.balance, 1.0);

        assert_eq!(ledger.get_wallet(&Address::from("node")).unwrap().balance, 1.0);
        assert_eq!(ledger.get_wallet(&Address(address)).unwrap().balance, 0.0);
    }

    #[actix_web::test]
    async fn test_rejected_transaction_is_bad_request() {
        let (ledger, resolver, identity) = app_data();
        let app = init_app!(ledger, resolver, identity);

        let req = test::TestRequest::post()
            .uri("/transactions/new")
            .set_json(serde_json::json!({
                "sender": "nobody",
                "recipient": "bob",
                "amount": 1.0,
                "signature": null,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(ledger.pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_register_and_resolve_with_offline_peer() {
        let (ledger, resolver, identity) = app_data();
        let app = init_app!(ledger, resolver, identity);

        let req = test::TestRequest::post()
            .uri("/nodes/register")
            .set_json(serde_json::json!({ "nodes": ["http://127.0.0.1:5002", "127.0.0.1:5002"] }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total_nodes"], serde_json::json!(["127.0.0.1:5002"]));

        let req = test::TestRequest::post()
            .uri("/nodes/register")
            .set_json(serde_json::json!({ "nodes": ["http://"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/nodes/resolve").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["replaced"], false);
        assert_eq!(body["chain"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_unknown_wallet_is_not_found() {
        let (ledger, resolver, identity) = app_data();
        let app = init_app!(ledger, resolver, identity);

        let req = test::TestRequest::get().uri("/wallet/ghost").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
