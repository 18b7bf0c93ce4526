//! Society-wide (economy) calculation strategy.
//!
//! Economy jobs are long-running and may wait in a server queue. The
//! server reports a queue position while waiting and, once running, the
//! typical duration of similar jobs. When no explicit remaining-time
//! estimate is sent, one is derived from that average and the time this
//! handler has watched the job run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::api::ComputeApi;
use crate::cache::ResultCache;
use crate::handler::{CalculationHandler, HandlerCore};
use crate::meta::{CalcKind, CalculationMeta};
use crate::options::EngineConfig;
use crate::status::CalculationStatus;

/// Handler for society-wide calculations.
pub struct EconomyHandler {
    core: HandlerCore,
    running_since: Mutex<HashMap<CalculationMeta, Instant>>,
}

impl EconomyHandler {
    #[must_use]
    pub fn new(
        cache: Arc<dyn ResultCache>,
        api: Arc<dyn ComputeApi>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            core: HandlerCore::new(CalcKind::Economy, cache, api, config),
            running_since: Mutex::new(HashMap::new()),
        }
    }

    /// Fill `estimated_time_remaining` from `average_time` and observed
    /// running time when the server sent no estimate.
    #[allow(clippy::cast_possible_truncation)]
    fn derive_remaining(&self, meta: &CalculationMeta, status: &mut CalculationStatus) {
        let CalculationStatus::Computing(info) = status else {
            self.running_since.lock().remove(meta);
            return;
        };
        if info.queue_position.is_some() {
            // Still queued; the clock starts when the job leaves the queue.
            self.running_since.lock().remove(meta);
            return;
        }
        let since = *self
            .running_since
            .lock()
            .entry(meta.clone())
            .or_insert_with(Instant::now);

        if info.estimated_time_remaining.is_none() {
            if let Some(average) = info.average_time {
                let elapsed = since.elapsed().as_millis() as u64;
                let remaining = average.saturating_sub(elapsed);
                debug!(
                    average_ms = average,
                    elapsed_ms = elapsed,
                    remaining_ms = remaining,
                    "Derived remaining time"
                );
                info.estimated_time_remaining = Some(remaining);
            }
        }
    }
}

#[async_trait]
impl CalculationHandler for EconomyHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    async fn fetch(&self, meta: &CalculationMeta) -> CalculationStatus {
        let api = self.core.api();
        let mut status = self
            .core
            .request_status("economy", || api.economy_impact(meta))
            .await;
        self.derive_remaining(meta, &mut status);
        status
    }
}
