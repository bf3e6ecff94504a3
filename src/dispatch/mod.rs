//! Level-triggered reconcile dispatch
//!
//! One watcher per entity kind turns every observed apply or delete into a
//! [`ReconcileRequest`]. Requests run concurrently, each on its own task,
//! but two requests for the same entity never overlap: every attempt holds
//! the entity's lock. Failed attempts are retried with backoff.

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{EntityKind, Outcome, ReconcileRequest, Reconciler};
use crate::crd::{Instance, Microservice, Tenant, TenantMicroservice};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::store::{ObjectKey, StoreObject};
use crate::Result;

/// Runs reconciles for incoming requests
pub struct Dispatcher<R: Reconciler> {
    reconciler: Arc<R>,
    retry: RetryConfig,
    locks: DashMap<ReconcileRequest, Arc<Mutex<()>>>,
}

impl<R: Reconciler + 'static> Dispatcher<R> {
    /// Create a dispatcher
    pub fn new(reconciler: Arc<R>, retry: RetryConfig) -> Self {
        Self {
            reconciler,
            retry,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, request: &ReconcileRequest) -> Arc<Mutex<()>> {
        self.locks
            .entry(request.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of entities with a live lock
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    /// Reconcile one request until it succeeds, fails permanently, runs out
    /// of attempts or is cancelled.
    pub async fn handle(
        &self,
        request: ReconcileRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let lock = self.lock_for(&request);
        let name = request.to_string();

        let result = retry_with_backoff(&self.retry, &name, cancel, || {
            let lock = lock.clone();
            let reconciler = self.reconciler.clone();
            let request = request.clone();
            let cancel = cancel.clone();
            async move {
                let _guard = lock.lock().await;
                reconciler.reconcile(request, cancel).await
            }
        })
        .await;

        drop(lock);
        self.locks
            .remove_if(&request, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Consume requests until the stream ends or `cancel` fires, then wait
    /// for in-flight reconciles to finish.
    pub async fn run<St>(self: Arc<Self>, requests: St, cancel: CancellationToken)
    where
        St: Stream<Item = ReconcileRequest> + Send + Unpin,
    {
        let mut requests = requests;
        let mut tasks = JoinSet::new();

        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                next = requests.next() => match next {
                    Some(request) => request,
                    None => break,
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
            };

            let dispatcher = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                match dispatcher.handle(request.clone(), &cancel).await {
                    Ok(outcome) => debug!(request = %request, ?outcome, "reconciled"),
                    Err(e) => warn!(request = %request, error = %e, "reconcile abandoned"),
                }
            });
        }

        info!(in_flight = tasks.len(), "dispatcher stopping");
        while tasks.join_next().await.is_some() {}
    }
}

fn watch_kind<K: StoreObject>(
    api: Api<K>,
    kind: EntityKind,
) -> BoxStream<'static, ReconcileRequest> {
    watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .filter_map(move |event| async move {
            match event {
                Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) | Ok(Event::Delete(obj)) => {
                    Some(ReconcileRequest::new(kind, ObjectKey::of(&obj)))
                }
                Ok(Event::Init) | Ok(Event::InitDone) => None,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "watch error");
                    None
                }
            }
        })
        .boxed()
}

/// Merged stream of requests from a watcher on every entity kind
pub fn watch_requests(client: Client) -> BoxStream<'static, ReconcileRequest> {
    let streams = EntityKind::ALL.map(|kind| match kind {
        EntityKind::Instance => watch_kind(Api::<Instance>::all(client.clone()), kind),
        EntityKind::Tenant => watch_kind(Api::<Tenant>::all(client.clone()), kind),
        EntityKind::Microservice => watch_kind(Api::<Microservice>::all(client.clone()), kind),
        EntityKind::TenantMicroservice => {
            watch_kind(Api::<TenantMicroservice>::all(client.clone()), kind)
        }
    });
    stream::select_all(streams).boxed()
}
