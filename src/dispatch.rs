//! Validation dispatcher
//!
//! Splits a batch into at most `max_concurrency` chunks, pins one proxy per
//! chunk and runs every item as its own task: validate locally, submit the
//! verdict, report. Every input item yields exactly one outcome, including
//! items whose task panicked or never reported.

use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::oracle::VerdictSink;
use crate::proxy::{ProxyEndpoint, ProxyPool};
use crate::types::{Outcome, PriceAttestation, ValidationVerdict};
use crate::validator::Validator;

/// One chunk of the batch and the proxy its items go through
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub index: usize,
    /// Positions in the original batch
    pub items: Vec<usize>,
    pub proxy: Option<ProxyEndpoint>,
}

/// Partition `len` items into chunks of `ceil(len / max_concurrency)` and
/// assign `pool[i mod pool.len()]` to chunk `i`
pub fn plan_chunks(len: usize, max_concurrency: usize, pool: &ProxyPool) -> Vec<ChunkPlan> {
    if len == 0 {
        return Vec::new();
    }
    let workers = max_concurrency.max(1);
    let chunk_size = len.div_ceil(workers);
    let num_chunks = len.div_ceil(chunk_size);

    (0..num_chunks.min(workers))
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(len);
            ChunkPlan {
                index,
                items: (start..end).collect(),
                proxy: pool.assign(index).cloned(),
            }
        })
        .collect()
}

/// Concurrent validate-and-submit engine
pub struct Dispatcher {
    sink: Arc<dyn VerdictSink>,
    validator: Validator,
    max_concurrency: usize,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn VerdictSink>, validator: Validator, max_concurrency: usize) -> Self {
        Self {
            sink,
            validator,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Validate and submit every attestation; outcomes follow batch order
    pub async fn dispatch(
        &self,
        batch: Vec<PriceAttestation>,
        token: &str,
        pool: &ProxyPool,
    ) -> Vec<Outcome> {
        let total = batch.len();
        if total == 0 {
            return Vec::new();
        }

        let plan = plan_chunks(total, self.max_concurrency, pool);
        info!(
            items = total,
            chunks = plan.len(),
            proxies = pool.len(),
            workers = self.max_concurrency,
            "🚀 Dispatching validations"
        );

        let hashes: Vec<String> = batch.iter().map(|a| a.hash_or_empty().to_string()).collect();
        let proxies: Vec<Option<String>> = {
            let mut by_item = vec![None; total];
            for chunk in &plan {
                for &i in &chunk.items {
                    by_item[i] = chunk.proxy.as_ref().map(|p| p.redacted());
                }
            }
            by_item
        };

        let token: Arc<str> = Arc::from(token);
        let mut slots: Vec<Option<PriceAttestation>> = batch.into_iter().map(Some).collect();
        let mut join_set: JoinSet<(usize, Outcome)> = JoinSet::new();

        for chunk in plan {
            let proxy = chunk.proxy.map(Arc::new);
            for index in chunk.items {
                let Some(attestation) = slots[index].take() else {
                    continue;
                };
                let sink = Arc::clone(&self.sink);
                let token = Arc::clone(&token);
                let proxy = proxy.clone();
                let validator = self.validator;
                let msg_hash = hashes[index].clone();
                let proxy_label = proxies[index].clone();

                join_set.spawn(async move {
                    let unit = run_unit(sink, validator, attestation, token, proxy);
                    let outcome = match AssertUnwindSafe(unit).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(panic) => {
                            let reason = panic_message(&*panic);
                            error!(
                                msg_hash = %short_hash(&msg_hash),
                                reason = %reason,
                                "Execution unit panicked"
                            );
                            Outcome::failed(
                                msg_hash,
                                format!("execution unit panicked: {reason}"),
                                proxy_label,
                            )
                        }
                    };
                    (index, outcome)
                });
            }
        }

        let mut outcomes: Vec<Option<Outcome>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!(error = %e, "Execution unit terminated without reporting"),
            }
        }

        let outcomes: Vec<Outcome> = outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| {
                    Outcome::failed(
                        hashes[index].clone(),
                        "execution unit exited without reporting",
                        proxies[index].clone(),
                    )
                })
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            succeeded,
            total = outcomes.len(),
            "✅ Processed {}/{} validations",
            succeeded,
            outcomes.len()
        );
        outcomes
    }
}

async fn run_unit(
    sink: Arc<dyn VerdictSink>,
    validator: Validator,
    attestation: PriceAttestation,
    token: Arc<str>,
    proxy: Option<Arc<ProxyEndpoint>>,
) -> Outcome {
    let is_valid = validator.validate_now(&attestation);
    let msg_hash = attestation.hash_or_empty().to_string();
    let proxy_label = proxy.as_ref().map(|p| p.redacted());

    match sink
        .submit_verdict(&token, &msg_hash, is_valid, proxy.as_deref())
        .await
    {
        Ok(_) => {
            info!(
                msg_hash = %short_hash(&msg_hash),
                valid = is_valid,
                via = %proxy_label.as_deref().unwrap_or("direct"),
                "✓ Verdict submitted"
            );
            Outcome::submitted(ValidationVerdict {
                msg_hash,
                is_valid,
                source_proxy: proxy_label,
            })
        }
        Err(e) => {
            error!(msg_hash = %short_hash(&msg_hash), error = %e, "✗ Verdict submission failed");
            Outcome::failed(msg_hash, e.to_string(), proxy_label)
        }
    }
}

fn short_hash(msg_hash: &str) -> String {
    let prefix: String = msg_hash.chars().take(10).collect();
    format!("{}...", prefix)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> ProxyPool {
        ProxyPool::new(
            (0..n)
                .map(|i| ProxyEndpoint::parse(&format!("http://p{}:8080", i)).unwrap())
                .collect(),
        )
    }

    #[test]
    fn chunk_size_is_ceiling_of_len_over_workers() {
        let plan = plan_chunks(10, 4, &ProxyPool::default());
        let sizes: Vec<usize> = plan.iter().map(|c| c.items.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert!(plan.iter().all(|c| c.proxy.is_none()));
    }

    #[test]
    fn every_item_is_planned_exactly_once() {
        for len in 1..40 {
            for workers in 1..12 {
                let plan = plan_chunks(len, workers, &ProxyPool::default());
                assert!(plan.len() <= workers);
                let mut seen: Vec<usize> = plan.iter().flat_map(|c| c.items.clone()).collect();
                seen.sort_unstable();
                assert_eq!(seen, (0..len).collect::<Vec<_>>(), "len={len} workers={workers}");
            }
        }
    }

    #[test]
    fn five_chunks_over_three_proxies_wrap() {
        let plan = plan_chunks(5, 5, &pool(3));
        let urls: Vec<&str> = plan
            .iter()
            .map(|c| c.proxy.as_ref().unwrap().url())
            .collect();
        assert_eq!(
            urls,
            vec![
                "http://p0:8080",
                "http://p1:8080",
                "http://p2:8080",
                "http://p0:8080",
                "http://p1:8080"
            ]
        );
    }

    #[test]
    fn zero_workers_is_treated_as_one() {
        let plan = plan_chunks(3, 0, &ProxyPool::default());
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].items, vec![0, 1, 2]);
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn std::any::Any + Send> = Box::new("boom");
        let b: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(a.as_ref()), "boom");
        assert_eq!(panic_message(b.as_ref()), "bang");
    }
}
