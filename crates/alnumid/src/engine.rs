use crate::{
    AllocationContext, AllocationKey, Batch, BatchEntry, BatchSink, Catalog, Clock, Error,
    LinkResolver, PersistedBatch, Reconciler, Result, SuffixAllocator, TokenEncoder,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tracing::{error, info};

/// A request to issue `count` identifiers for each listed color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub category: String,
    pub colors: Vec<String>,
    #[serde(default)]
    pub special_code: String,
    pub count: u64,
}

/// A request that passed validation and has been charged to the quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub keys: Vec<AllocationKey>,
    pub special_code: String,
    pub count: u64,
    /// Identifiers charged for the whole request.
    pub charged: u64,
    /// Quota left after the charge.
    pub remaining: u64,
}

/// What happened to one key of a run.
#[derive(Debug)]
pub struct KeyOutcome {
    pub key: AllocationKey,
    pub result: Result<PersistedBatch>,
}

/// The result of a whole run, one outcome per requested color.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<KeyOutcome>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&AllocationKey, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.key, e)))
    }
}

/// Ties the allocation pipeline together.
///
/// [`Engine::admit`] runs synchronously and either rejects the request or
/// charges the quota. [`Engine::run`] then does the long-running part: for
/// every key it positions the cursor, allocates suffixes, encodes tokens,
/// reconciles short links and persists the batch. A failure for one key is
/// logged and reported without stopping the other keys. Concurrent runs
/// touching the same key take turns, one whole batch at a time.
pub struct Engine<E, R, B> {
    context: Arc<AllocationContext>,
    catalog: Arc<Catalog>,
    encoder: E,
    reconciler: Reconciler<R>,
    sink: B,
    clock: Arc<dyn Clock>,
}

impl<E, R, B> Engine<E, R, B>
where
    E: TokenEncoder,
    R: LinkResolver,
    B: BatchSink,
{
    pub fn new(
        context: Arc<AllocationContext>,
        catalog: Arc<Catalog>,
        encoder: E,
        reconciler: Reconciler<R>,
        sink: B,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            context,
            catalog,
            encoder,
            reconciler,
            sink,
            clock,
        }
    }

    pub fn context(&self) -> &AllocationContext {
        &self.context
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Validates `request` and charges `count × colors` to the quota.
    pub fn admit(&self, request: &GenerationRequest) -> Result<Admitted> {
        if request.count == 0 {
            return Err(Error::invalid("count must be greater than 0"));
        }
        let (keys, special_code) =
            self.catalog
                .validate(&request.category, &request.colors, &request.special_code)?;
        let charged = request
            .count
            .checked_mul(keys.len() as u64)
            .ok_or_else(|| Error::invalid("count is too large"))?;
        let category = keys[0].category().to_owned();
        let remaining = self.context.admit(charged, &category, &special_code)?;

        info!(
            %category,
            colors = keys.len(),
            count = request.count,
            charged,
            remaining,
            "generation request admitted"
        );
        Ok(Admitted {
            keys,
            special_code,
            count: request.count,
            charged,
            remaining,
        })
    }

    /// Produces, resolves and persists one batch per admitted key.
    #[tracing::instrument(skip_all, fields(keys = admitted.keys.len(), count = admitted.count))]
    pub async fn run(&self, admitted: Admitted) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::default();
        for key in admitted.keys {
            let result = self
                .run_key(&key, &admitted.special_code, admitted.count)
                .await;
            if let Err(e) = &result {
                error!(%key, error = %e, "run aborted for key");
            }
            report.outcomes.push(KeyOutcome { key, result });
        }
        info!(
            success = report.is_success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        report
    }

    async fn run_key(
        &self,
        key: &AllocationKey,
        special_code: &str,
        count: u64,
    ) -> Result<PersistedBatch> {
        let len = usize::try_from(count).map_err(|_| Error::invalid("count is too large"))?;
        // Released once the batch is on disk, so batches of one key persist
        // in the order their ranges were positioned.
        let _guard = self.context.lock_key(key).await;
        let start = self.context.position(key, count)?;
        info!(%key, %start, count, "allocating");

        let suffixes = {
            let mut allocator = SuffixAllocator::new(key.clone(), start, &*self.context);
            allocator.take(len)?
        };
        let mut entries: Vec<BatchEntry> = suffixes
            .into_iter()
            .map(|suffix| {
                let identifier = key.identifier(special_code, &suffix);
                let token = self.encoder.encode(&identifier);
                BatchEntry {
                    suffix,
                    identifier,
                    token,
                    link: String::new(),
                }
            })
            .collect();

        let tokens: Vec<String> = entries.iter().map(|e| e.token.clone()).collect();
        let mut links = self.reconciler.reconcile(&tokens, HashMap::new()).await?;
        for entry in &mut entries {
            entry.link = links.remove(&entry.token).unwrap_or_default();
        }

        let batch = Batch {
            key: key.clone(),
            special_code: special_code.to_owned(),
            category_name: self
                .catalog
                .category_name(key.category())
                .unwrap_or(key.category())
                .to_owned(),
            color_name: self
                .catalog
                .color_name(key.category(), key.color())
                .unwrap_or(key.color())
                .to_owned(),
            entries,
            issued_at: self.context.quota_policy().schedule.local(self.clock.now()),
        };
        self.sink.persist(&batch)
    }
}
