//! Concrete enrichment tasks registered at startup.

pub mod account_enrichment;
pub mod column_generation;
pub mod lead_generation;

use std::sync::Arc;

use enrich_shared::error::EnrichResult;

use crate::registry::TaskRegistry;

pub use account_enrichment::AccountEnrichmentTask;
pub use column_generation::ColumnGenerationTask;
pub use lead_generation::LeadGenerationTask;

/// Register the built-in tasks
pub fn register_tasks(registry: &TaskRegistry) -> EnrichResult<()> {
    registry.register(Arc::new(AccountEnrichmentTask))?;
    registry.register(Arc::new(LeadGenerationTask))?;
    registry.register(Arc::new(ColumnGenerationTask))?;
    Ok(())
}
