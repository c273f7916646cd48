use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use etlflow_core::{BatchProcessor, Emitter, Result, StepOptions};

use crate::client::WikiClient;
use crate::record::CityRecord;

/// Records drained per batch; each city is still fetched with its own request.
const BATCH_SIZE: usize = 10;

/// Attaches the page parse tree to every city name.
///
/// Batches overlap since the work is bound by remote calls.
pub struct FetchParseTree {
    client: Arc<WikiClient>,
}

impl FetchParseTree {
    pub fn new(client: Arc<WikiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchProcessor<CityRecord> for FetchParseTree {
    #[instrument(skip_all, fields(size = batch.len()))]
    async fn process_batch(
        &self,
        batch: Vec<CityRecord>,
        out: &mut Emitter<CityRecord>,
    ) -> Result<()> {
        for city in super::names("parse-tree", batch)? {
            let parsetree = self.client.parse_tree(&city).await?;
            debug!(%city, bytes = parsetree.len(), "fetched parse tree");
            out.emit(CityRecord::Page { city, parsetree });
        }
        Ok(())
    }

    fn options(&self, defaults: StepOptions) -> StepOptions {
        defaults
            .with_max_batch_size(BATCH_SIZE)
            .with_concurrent_batches(true)
    }
}
