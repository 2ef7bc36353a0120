//! Tests for the validation dispatcher

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    use stork_validator::dispatch::Dispatcher;
    use stork_validator::error::{ApiError, SubmitError};
    use stork_validator::oracle::VerdictSink;
    use stork_validator::proxy::{ProxyEndpoint, ProxyPool};
    use stork_validator::types::PriceAttestation;
    use stork_validator::validator::Validator;

    /// Records every submission; fails or panics on configured hashes
    #[derive(Default)]
    struct FakeSink {
        calls: Mutex<Vec<(String, bool, Option<String>)>>,
        fail_on: Vec<String>,
        panic_on: Vec<String>,
    }

    #[async_trait]
    impl VerdictSink for FakeSink {
        async fn submit_verdict(
            &self,
            token: &str,
            msg_hash: &str,
            is_valid: bool,
            proxy: Option<&ProxyEndpoint>,
        ) -> Result<Value, SubmitError> {
            assert_eq!(token, "access-token-dispatch-0000");
            tokio::task::yield_now().await;
            if self.panic_on.iter().any(|h| h == msg_hash) {
                panic!("sink exploded on {}", msg_hash);
            }
            self.calls.lock().unwrap().push((
                msg_hash.to_string(),
                is_valid,
                proxy.map(|p| p.url().to_string()),
            ));
            if self.fail_on.iter().any(|h| h == msg_hash) {
                return Err(SubmitError::Api(ApiError::Status {
                    status: 400,
                    message: Some("already validated".to_string()),
                }));
            }
            Ok(serde_json::json!({ "data": "ok" }))
        }
    }

    fn fresh(hash: &str) -> PriceAttestation {
        PriceAttestation {
            asset: format!("ASSET_{}", hash),
            msg_hash: Some(hash.to_string()),
            price: Some("97000000000000000000000".to_string()),
            timestamp: Some(Utc::now() - Duration::minutes(1)),
            extra: serde_json::Map::new(),
        }
    }

    fn stale(hash: &str) -> PriceAttestation {
        PriceAttestation {
            timestamp: Some(Utc::now() - Duration::minutes(61)),
            ..fresh(hash)
        }
    }

    fn batch(n: usize) -> Vec<PriceAttestation> {
        (0..n).map(|i| fresh(&format!("0xhash{:02}", i))).collect()
    }

    fn pool(n: usize) -> ProxyPool {
        ProxyPool::new(
            (0..n)
                .map(|i| ProxyEndpoint::parse(&format!("http://10.0.0.{}:8080", i)).unwrap())
                .collect(),
        )
    }

    const TOKEN: &str = "access-token-dispatch-0000";

    // ============================================================================
    // Outcome accounting
    // ============================================================================

    #[tokio::test]
    async fn test_every_item_gets_exactly_one_outcome_in_order() {
        let sink = Arc::new(FakeSink::default());
        let dispatcher = Dispatcher::new(sink.clone(), Validator::default(), 4);

        let items = batch(10);
        let expected: Vec<String> = items.iter().map(|a| a.hash_or_empty().to_string()).collect();
        let outcomes = dispatcher.dispatch(items, TOKEN, &ProxyPool::default()).await;

        assert_eq!(outcomes.len(), 10);
        let hashes: Vec<String> = outcomes.iter().map(|o| o.msg_hash.clone()).collect();
        assert_eq!(hashes, expected);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(sink.calls.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_submission_failure_is_isolated() {
        let sink = Arc::new(FakeSink {
            fail_on: vec!["0xhash03".to_string()],
            ..FakeSink::default()
        });
        let dispatcher = Dispatcher::new(sink, Validator::default(), 3);

        let outcomes = dispatcher.dispatch(batch(6), TOKEN, &ProxyPool::default()).await;

        assert_eq!(outcomes.len(), 6);
        assert!(!outcomes[3].success);
        assert!(outcomes[3].error.as_deref().unwrap().contains("400"));
        assert_eq!(outcomes.iter().filter(|o| o.success).count(), 5);
    }

    #[tokio::test]
    async fn test_panicking_unit_still_reports() {
        let sink = Arc::new(FakeSink {
            panic_on: vec!["0xhash01".to_string()],
            ..FakeSink::default()
        });
        let dispatcher = Dispatcher::new(sink.clone(), Validator::default(), 2);

        let outcomes = dispatcher.dispatch(batch(4), TOKEN, &ProxyPool::default()).await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[1].msg_hash, "0xhash01");
        assert!(!outcomes[1].success);
        assert!(outcomes[1].error.as_deref().unwrap().contains("panicked"));
        assert!(outcomes[0].success && outcomes[2].success && outcomes[3].success);
        assert_eq!(sink.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_returns_no_outcomes() {
        let sink = Arc::new(FakeSink::default());
        let dispatcher = Dispatcher::new(sink.clone(), Validator::default(), 10);
        let outcomes = dispatcher.dispatch(Vec::new(), TOKEN, &pool(2)).await;
        assert!(outcomes.is_empty());
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    // ============================================================================
    // Verdicts and proxies
    // ============================================================================

    #[tokio::test]
    async fn test_stale_attestation_is_submitted_as_invalid() {
        let sink = Arc::new(FakeSink::default());
        let dispatcher = Dispatcher::new(sink.clone(), Validator::default(), 2);

        let outcomes = dispatcher
            .dispatch(vec![fresh("0xfresh"), stale("0xstale")], TOKEN, &ProxyPool::default())
            .await;

        assert_eq!(outcomes[0].is_valid, Some(true));
        assert_eq!(outcomes[1].is_valid, Some(false));
        let calls = sink.calls.lock().unwrap();
        assert!(calls.iter().any(|(h, v, _)| h == "0xstale" && !v));
    }

    #[tokio::test]
    async fn test_items_of_a_chunk_share_a_proxy() {
        let sink = Arc::new(FakeSink::default());
        let dispatcher = Dispatcher::new(sink.clone(), Validator::default(), 5);

        // 10 items over 5 workers: chunks of two, proxies wrap after three
        let outcomes = dispatcher.dispatch(batch(10), TOKEN, &pool(3)).await;
        assert_eq!(outcomes.len(), 10);

        let calls = sink.calls.lock().unwrap();
        let proxy_of = |hash: &str| {
            calls
                .iter()
                .find(|(h, _, _)| h == hash)
                .and_then(|(_, _, p)| p.clone())
                .unwrap()
        };
        assert_eq!(proxy_of("0xhash00"), "http://10.0.0.0:8080");
        assert_eq!(proxy_of("0xhash01"), "http://10.0.0.0:8080");
        assert_eq!(proxy_of("0xhash04"), "http://10.0.0.2:8080");
        assert_eq!(proxy_of("0xhash06"), "http://10.0.0.0:8080");
        assert_eq!(proxy_of("0xhash09"), "http://10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_no_proxies_means_direct_submission() {
        let sink = Arc::new(FakeSink::default());
        let dispatcher = Dispatcher::new(sink.clone(), Validator::default(), 3);
        dispatcher.dispatch(batch(3), TOKEN, &ProxyPool::default()).await;
        assert!(sink.calls.lock().unwrap().iter().all(|(_, _, p)| p.is_none()));
    }
}
