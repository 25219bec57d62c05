// API module
//
// HTTP routes over the ledger engine

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use handlers::NodeIdentity;
pub use routes::configure_routes;
