pub mod config;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod http;
pub mod payment;
pub mod rpc;
pub mod settlement;
pub mod store;
pub mod types;
pub mod weights;

pub use config::{Config, TokenThreshold};
pub use eligibility::{EligibilityResolver, HoldingsLookup};
pub use engine::{
    HealthReport, LedgerClient, OpenBoxEngine, OpenReceipt, PaymentSummary, PreparedPayment,
};
pub use error::{CollabError, EngineError};
pub use payment::{BalanceDelta, LedgerRead, TransferRecord, VerifiedPayment};
pub use rpc::LedgerRpc;
pub use settlement::{InventoryLookup, LedgerWrite, SettlementDispatcher};
pub use store::{ReservedOpen, Storage};
pub use types::*;
pub use weights::{WeightTable, draw_variate};
