// Dashboard layer - the API the moderator dashboard talks to.

pub mod bulk_actions;
pub mod triage_api;

pub use bulk_actions::{BulkAction, BulkFailure, BulkOutcome};
pub use triage_api::{EnforcementOutcome, Sanction, SanctionRecord, TriageApi};
