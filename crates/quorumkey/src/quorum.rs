//! concurrent node calls with per-node retries
//!
//! every broadcast issues one call per node at once and yields replies in
//! completion order, so callers can stop as soon as they have a quorum.
//! dropping the reply set cancels whatever is still in flight.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{NodeEndpoint, RetryPolicy};
use crate::Result;

/// in-flight calls keyed by node index
pub type Replies<'a, T> = FuturesUnordered<BoxFuture<'a, (u32, Result<T>)>>;

/// run `call` until it succeeds, fails permanently, or attempts run out
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    node: u32,
    op: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                debug!(node, op, attempt, error = %e, "retrying node call");
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// call every node concurrently
pub fn broadcast<'a, T, I, F, Fut>(
    nodes: I,
    policy: RetryPolicy,
    op: &'static str,
    call: F,
) -> Replies<'a, T>
where
    I: IntoIterator<Item = &'a NodeEndpoint>,
    F: Fn(&'a NodeEndpoint) -> Fut + Clone + Send + 'a,
    Fut: Future<Output = Result<T>> + Send + 'a,
    T: Send + 'a,
{
    nodes
        .into_iter()
        .map(|node| {
            let call = call.clone();
            async move {
                let reply = with_retries(policy, node.index, op, move || call(node)).await;
                (node.index, reply)
            }
            .boxed()
        })
        .collect()
}

/// next reply, or `None` once every node answered or the deadline passed
pub async fn next_before<T>(
    replies: &mut Replies<'_, T>,
    deadline: Option<Instant>,
) -> Option<(u32, Result<T>)> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, replies.next()).await.ok().flatten(),
        None => replies.next().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodePublicKey;
    use crate::Error;
    use k256::{ProjectivePoint, Scalar};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }

    fn endpoints(n: u32) -> Vec<NodeEndpoint> {
        (1..=n)
            .map(|i| NodeEndpoint {
                index: i,
                url: format!("local://node-{}", i),
                public_key: NodePublicKey::from_point(
                    ProjectivePoint::GENERATOR * Scalar::from(i as u64),
                )
                .unwrap(),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let result = with_retries(policy(), 1, "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Network("connection refused".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retries(policy(), 1, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Network("down".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_protocol_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_retries(policy(), 1, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Rpc("rejected".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Rpc(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_does_not_wait_for_slow_nodes() {
        let nodes = endpoints(5);
        let mut replies = broadcast(nodes.iter(), policy(), "test", |node: &NodeEndpoint| {
            let index = node.index;
            async move {
                if index > 3 {
                    futures::future::pending::<()>().await;
                }
                Ok(index)
            }
        });

        let mut got = Vec::new();
        while let Some((_, reply)) = next_before(&mut replies, None).await {
            got.push(reply.unwrap());
            if got.len() == 3 {
                break;
            }
        }
        got.sort_unstable();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_collection() {
        let nodes = endpoints(3);
        let mut replies = broadcast(nodes.iter(), policy(), "test", |node: &NodeEndpoint| {
            let index = node.index;
            async move {
                if index != 1 {
                    futures::future::pending::<()>().await;
                }
                Ok(index)
            }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(next_before(&mut replies, Some(deadline)).await.is_some());
        assert!(next_before(&mut replies, Some(deadline)).await.is_none());
    }
}
