//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. The transfer matcher
//! and the planner are plain synchronous code; settlement only reaches the
//! ledger through the per-run `RunContext`.

pub mod acquisition;
pub mod executor;
pub mod identity;
mod maintenance;
pub mod normalize;
pub mod planner;
pub mod run_context;
pub mod settlement;
mod sync;
pub mod transfer;
pub mod watermark;

pub use acquisition::{Acquired, Acquisition, ScrapeJob};
pub use executor::{ActionFailure, LedgerSyncExecutor, PlanAction, SyncReport};
pub use identity::LedgerIndex;
pub use maintenance::{MaintenanceResult, MaintenanceService};
pub use normalize::{IdentityStrategy, Normalizer};
pub use planner::ReconciliationPlanner;
pub use run_context::RunContext;
pub use settlement::{CreditCardPool, SettlementMatcher, SettlementOutcome};
pub use sync::{AccountSyncResult, Classification, SyncOptions, SyncResult, SyncService, TransactionStats};
pub use transfer::{DuplicatePair, InferredTransfer, TransferOutcome, TransferPairMatcher};
pub use watermark::{StartDatePolicy, WatermarkStore, Watermarks, WATERMARK_KEY};
