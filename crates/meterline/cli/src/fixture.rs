//! JSON fixtures: source definitions plus readings, loaded into a fresh engine.

use std::path::Path;
use std::sync::Arc;

use meterline_engine::{Clock, EngineConfig, MeterEngine};
use meterline_store::{InMemoryReadingStore, InMemorySourceCatalog};
use meterline_types::{Reading, Source};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CliError, CliResult};

/// Contents of a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Ingested in file order; out-of-order readings exercise late-data handling.
    #[serde(default)]
    pub readings: Vec<Reading>,
}

impl Fixture {
    pub fn load(path: &Path) -> CliResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> CliResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Build an in-memory engine and ingest every reading through it.
    pub async fn into_engine(
        self,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> CliResult<MeterEngine> {
        let source_count = self.sources.len();
        let catalog = InMemorySourceCatalog::with_sources(self.sources)
            .map_err(|e| CliError::InvalidInput(format!("fixture sources: {}", e)))?;
        let engine = MeterEngine::new(
            config,
            Arc::new(catalog),
            Arc::new(InMemoryReadingStore::new()),
        )
        .with_clock(clock);

        let reading_count = self.readings.len();
        for reading in self.readings {
            engine.ingest(reading).await?;
        }

        info!(
            sources = source_count,
            readings = reading_count,
            "Fixture loaded"
        );
        Ok(engine)
    }
}
