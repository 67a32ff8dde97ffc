pub mod config;
pub mod crypto;
pub mod errors;
pub mod network;
pub mod types;

pub use config::{Config, Timeouts};
pub use crypto::{Identity, Signer, TransactionContext};
pub use errors::GatewayError;
pub use network::{ContractTrait, GatewayTransport, Submitted};
