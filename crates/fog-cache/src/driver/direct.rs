use std::future::Future;

use serde::Serialize;

use crate::cache::{NextRequest, Received};

use super::{RequestDriver, Responder, Strategy};

/// Runs `fetch` on its own task for every trigger.
///
/// Fetches for different args run independently and may complete in any order.
#[derive(Debug, Clone)]
pub struct Direct<F> {
    fetch: F,
}

impl<F> Direct<F> {
    pub fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

impl<A, D, E, F, Fut> Strategy<A, D, E> for Direct<F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, E>> + Send + 'static,
{
    type Driver = DirectDriver<A, D, E, F>;

    fn bind(self, responder: Responder<A, D, E>) -> Self::Driver {
        DirectDriver {
            fetch: self.fetch,
            responder,
        }
    }
}

pub struct DirectDriver<A, D, E, F> {
    fetch: F,
    responder: Responder<A, D, E>,
}

impl<A, D, E, F, Fut> RequestDriver<A> for DirectDriver<A, D, E, F>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, E>> + Send + 'static,
{
    fn dispatch(&self, request: NextRequest<A>) {
        let NextRequest { args, request_id } = request;
        let future = (self.fetch)(args.clone());
        let responder = self.responder.clone();

        tokio::spawn(async move {
            let result = future.await;
            tracing::trace!(request_id, ok = result.is_ok(), "Fetch completed");
            responder.receive(Received::from_result(args, result));
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::Cache;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_direct_fetch() {
        let cache = Cache::<u32, String, String>::builder("direct").build_with(Direct::new(
            |id: u32| async move {
                tokio::time::sleep(Duration::from_millis(u64::from(id))).await;
                if id % 2 == 0 {
                    Ok(format!("item {id}"))
                } else {
                    Err(format!("no item {id}"))
                }
            },
        ));

        let even = cache.get(&2);
        let odd = cache.get(&3);
        assert!(even.snapshot().loading && odd.snapshot().loading);

        assert_eq!(even.data().await, Ok("item 2".to_owned()));
        let odd = odd.settled().await;
        assert_eq!(odd.error.as_deref(), Some("no item 3"));
    }
}
