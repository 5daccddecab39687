//! Persistence implementations

pub mod memory;
#[cfg(feature = "postgres")]
pub mod account_repository;
#[cfg(feature = "postgres")]
pub mod agent_transfer_repository;
#[cfg(feature = "postgres")]
pub mod call_log_repository;
#[cfg(feature = "postgres")]
pub mod call_permission_repository;
#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
pub mod ivr_flow_repository;

pub use memory::{
    MemoryAccountRepository, MemoryAgentDirectory, MemoryAgentTransferRepository, MemoryCallLogRepository,
    MemoryCallPermissionRepository, MemoryIvrFlowRepository,
};

#[cfg(feature = "postgres")]
pub use account_repository::{PgAccountRepository, PgAgentDirectory};
#[cfg(feature = "postgres")]
pub use agent_transfer_repository::PgAgentTransferRepository;
#[cfg(feature = "postgres")]
pub use call_log_repository::PgCallLogRepository;
#[cfg(feature = "postgres")]
pub use call_permission_repository::PgCallPermissionRepository;
#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations};
#[cfg(feature = "postgres")]
pub use ivr_flow_repository::PgIvrFlowRepository;
