//! transfer-workflow - Guarded transition engine for property-transfer cases
//!
//! A case moves through a catalog of stages. Every move is checked against
//! the guard on its edge, committed under a per-case lease with an
//! optimistic version check, audited, and followed by the entered stage's
//! hooks and any auto-transitions.
//!
//! ## Flow
//! Catalog YAML -> TransitionGraph + GuardRegistry -> TransitionEvaluator
//! -> WorkflowOrchestrator (commit, hooks, auto-chain) -> BulkRunner
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use transfer_workflow::case::{Actor, NewCase};
//! use transfer_workflow::config::EngineConfig;
//! use transfer_workflow::store::MemoryCaseStore;
//! use transfer_workflow::workflow::{CatalogLoader, LoggingDocumentService, WorkflowOrchestrator};
//!
//! # async fn demo() -> Result<(), transfer_workflow::workflow::WorkflowError> {
//! let catalog = CatalogLoader::load_from_file("config/catalog/property_transfer.yaml".as_ref())?;
//! let orchestrator = WorkflowOrchestrator::from_catalog(
//!     &catalog,
//!     Arc::new(MemoryCaseStore::new()),
//!     Arc::new(LoggingDocumentService),
//!     EngineConfig::default(),
//! )?;
//!
//! let clerk = Actor::new("clerk-1", "CLERK");
//! let case = orchestrator
//!     .open_case(
//!         NewCase {
//!             reference: "PT-2024-0001".into(),
//!             seller_id: "person-1".into(),
//!             buyer_id: "person-2".into(),
//!             plot_id: "plot-9".into(),
//!         },
//!         &clerk,
//!     )
//!     .await?;
//!
//! for option in orchestrator.dry_run(case.case_id, &clerk).await? {
//!     println!("{} -> {}", option.to_stage, option.result.reason);
//! }
//! # Ok(())
//! # }
//! ```

// Case aggregate and audit log
pub mod case;

// Engine configuration
pub mod config;

// Persistence port and backends
pub mod store;

// Catalog, graph, guards, evaluator, orchestrator, bulk runner
pub mod workflow;

pub use config::EngineConfig;
pub use workflow::{WorkflowError, WorkflowOrchestrator};
