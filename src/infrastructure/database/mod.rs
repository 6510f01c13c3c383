//! SQLite persistence: connection pool and repository implementations.

pub mod agent_repo;
pub mod audit_repo;
pub mod connection;
pub mod pool_repo;
pub mod task_repo;
pub mod utils;

pub use agent_repo::AgentRepositoryImpl;
pub use audit_repo::AuditRepositoryImpl;
pub use connection::DatabaseConnection;
pub use pool_repo::PoolRepositoryImpl;
pub use task_repo::TaskRepositoryImpl;
