// Marketplace trust & moderation pipeline.
//
// **Architecture Overview:**
// - `core/` = Business logic (models, storage port, services)
// - `infra/` = Implementations of the storage port (fixtures, SQLite)
// - `dashboard/` = The API surface the moderator dashboard calls
//
// The binary in `main.rs` is only the composition root.

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "dashboard/dashboard_layer.rs"]
pub mod dashboard;
#[path = "infra/infra_layer.rs"]
pub mod infra;

pub mod config;
