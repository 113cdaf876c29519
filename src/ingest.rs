//! Seam to the external metadata ingestor.
//!
//! The harvester that scans handler sources for annotations lives outside
//! this crate; the engine only fixes the shape of what it returns and
//! stores the records verbatim through the registry.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::model::{ActionConfiguration, ExtendableActionConfiguration, ResourceStructure};

/// The three record lists a harvest produces.
#[derive(Debug, Clone, Default)]
pub struct HarvestedMetadata {
    pub action_configurations: Vec<ActionConfiguration>,
    pub extendable_action_configurations: Vec<ExtendableActionConfiguration>,
    pub resource_structures: Vec<ResourceStructure>,
}

/// External metadata harvester.
#[async_trait]
pub trait MetadataIngestor: Send + Sync {
    /// Scan a directory and return every discovered configuration record.
    async fn harvest(&self, directory: &Path) -> Result<HarvestedMetadata>;
}
