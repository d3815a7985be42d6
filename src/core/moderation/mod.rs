// Core moderation module - trust and safety pipeline for the marketplace.
// Models, the storage port and the services that sit on top of it.

pub mod ai_signal;
pub mod audit_service;
pub mod auto_flag;
pub mod enforcement_service;
pub mod moderation_models;
pub mod moderation_store;
pub mod report_service;
pub mod stats_service;
pub mod triage_service;

pub use ai_signal::*;
pub use audit_service::*;
pub use auto_flag::*;
pub use enforcement_service::*;
pub use moderation_models::*;
pub use moderation_store::*;
pub use report_service::ReportService;
pub use stats_service::*;
pub use triage_service::*;
