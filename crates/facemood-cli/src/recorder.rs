use facemood_core::{
    Descriptor, DescriptorError, DescriptorStore, Identity, IdentityResolver, Observation,
    StoreError,
};
use facemood_store::Backend;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error("failed to start recorder thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("recorder thread exited")]
    ChannelClosed,
}

/// Result of appending an observation.
#[derive(Debug, Clone, Serialize)]
pub struct Recorded {
    pub name: String,
    pub observations: usize,
    pub created: bool,
    /// Set when the in-memory store changed but the backend write failed.
    pub persist_error: Option<String>,
}

/// Messages sent from pipeline tasks to the recorder thread.
enum RecorderRequest {
    Resolve {
        descriptor: Descriptor,
        reply: oneshot::Sender<Result<Option<(String, f32)>, RecorderError>>,
    },
    Record {
        name: String,
        descriptor: Option<Descriptor>,
        observation: Observation,
        /// The caller resolved this face as unknown before naming it.
        expect_new: bool,
        reply: oneshot::Sender<Result<Recorded, RecorderError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Identity>>,
    },
}

/// Clone-safe handle to the recorder thread.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<RecorderRequest>,
}

impl RecorderHandle {
    /// Match a descriptor against the current store.
    pub async fn resolve(
        &self,
        descriptor: Descriptor,
    ) -> Result<Option<(String, f32)>, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderRequest::Resolve { descriptor, reply }).await?;
        rx.await.map_err(|_| RecorderError::ChannelClosed)?
    }

    /// Append an observation under `name`, creating the person if needed,
    /// and write the person through the backend.
    pub async fn record(
        &self,
        name: String,
        descriptor: Option<Descriptor>,
        observation: Observation,
        expect_new: bool,
    ) -> Result<Recorded, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderRequest::Record {
            name,
            descriptor,
            observation,
            expect_new,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RecorderError::ChannelClosed)?
    }

    /// Copy of every identity, in store order.
    pub async fn snapshot(&self) -> Result<Vec<Identity>, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.send(RecorderRequest::Snapshot { reply }).await?;
        rx.await.map_err(|_| RecorderError::ChannelClosed)
    }

    async fn send(&self, request: RecorderRequest) -> Result<(), RecorderError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| RecorderError::ChannelClosed)
    }
}

/// Spawn the recorder on a dedicated OS thread.
///
/// The thread owns the store and the backend, so every resolve and mutation
/// is applied one at a time in arrival order. It exits once every handle
/// has been dropped.
pub fn spawn_recorder(
    mut store: DescriptorStore,
    mut backend: Box<dyn Backend>,
    resolver: IdentityResolver,
) -> Result<RecorderHandle, RecorderError> {
    let (tx, mut rx) = mpsc::channel::<RecorderRequest>(16);

    std::thread::Builder::new()
        .name("facemood-recorder".into())
        .spawn(move || {
            tracing::debug!(people = store.len(), "recorder thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    RecorderRequest::Resolve { descriptor, reply } => {
                        let result = resolver
                            .find(&descriptor, &store)
                            .map(|found| found.map(|m| (m.name().to_string(), m.distance)))
                            .map_err(RecorderError::from);
                        let _ = reply.send(result);
                    }
                    RecorderRequest::Record {
                        name,
                        descriptor,
                        observation,
                        expect_new,
                        reply,
                    } => {
                        let result = run_record(
                            &mut store,
                            backend.as_mut(),
                            &name,
                            descriptor,
                            observation,
                            expect_new,
                        );
                        let _ = reply.send(result);
                    }
                    RecorderRequest::Snapshot { reply } => {
                        let _ = reply.send(store.identities().to_vec());
                    }
                }
            }
            tracing::debug!("recorder thread exiting");
        })
        .map_err(RecorderError::Spawn)?;

    Ok(RecorderHandle { tx })
}

fn run_record(
    store: &mut DescriptorStore,
    backend: &mut dyn Backend,
    name: &str,
    descriptor: Option<Descriptor>,
    observation: Observation,
    expect_new: bool,
) -> Result<Recorded, RecorderError> {
    let existed = store.contains(name.trim());
    if existed && expect_new {
        tracing::warn!(
            person = name,
            "name was enrolled by a concurrent observation; appending to existing identity"
        );
    }

    let identity = store.record(name, descriptor, observation)?;

    // The in-memory store stays authoritative when the write fails.
    let persist_error = match backend.upsert(identity) {
        Ok(()) => None,
        Err(err) => {
            tracing::warn!(
                person = %identity.name,
                backend = %backend.describe(),
                error = %err,
                "failed to persist identity; keeping in-memory state"
            );
            Some(err.to_string())
        }
    };

    Ok(Recorded {
        name: identity.name.clone(),
        observations: identity.history.len(),
        created: !existed,
        persist_error,
    })
}
