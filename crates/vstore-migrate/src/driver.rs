use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use tracing::{debug, info, warn};
use vstore_checkpoint::{Checkpoint, CheckpointError, CheckpointStore, Durability};
use vstore_host::{
    Connection, HostError, HostErrorKind, StorageEngine, UpgradeHandler, VersionChange,
};
use vstore_schema::{CallbackOutcome, SchemaModel};

use crate::apply::apply_delta;
use crate::config::DriverConfig;
use crate::error::{StructuralCause, UpgradeError};
use crate::factory::{ConnectionFactory, RequestError, Resume};
use crate::state::UpgradeState;

type Flow<C> = Result<Option<C>, UpgradeError<C>>;

/// Walks a database from its stored version to a target version, one
/// defined delta per version change, running each delta's callbacks after
/// its structural changes commit.
///
/// A failed callback leaves a [`Checkpoint`] behind. Until it is retried or
/// flushed, every upgrade of that database fails with
/// [`UpgradeError::Incomplete`].
pub struct UpgradeDriver<E: StorageEngine> {
    inner: Arc<Inner<E>>,
}

struct Inner<E: StorageEngine> {
    schema: SchemaModel<E::Conn>,
    factory: ConnectionFactory<E>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl<E: StorageEngine> Clone for UpgradeDriver<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: StorageEngine> fmt::Debug for UpgradeDriver<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeDriver")
            .field("latest_version", &self.inner.schema.latest_version())
            .field("factory", &self.inner.factory)
            .field("checkpoints", &self.inner.checkpoints.durability())
            .finish()
    }
}

impl<E: StorageEngine> UpgradeDriver<E> {
    /// Build a driver that requires a durable checkpoint store.
    pub fn new(
        schema: SchemaModel<E::Conn>,
        factory: ConnectionFactory<E>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Self, UpgradeError<E::Conn>> {
        Self::with_config(schema, factory, checkpoints, DriverConfig::default())
    }

    pub fn with_config(
        schema: SchemaModel<E::Conn>,
        factory: ConnectionFactory<E>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: DriverConfig,
    ) -> Result<Self, UpgradeError<E::Conn>> {
        if config.require_durable_checkpoints && checkpoints.durability() == Durability::Volatile {
            return Err(UpgradeError::MissingCapability(
                "the checkpoint store does not survive restarts, so interrupted upgrades \
                 could not be resumed"
                    .into(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                schema,
                factory,
                checkpoints,
            }),
        })
    }

    pub fn schema(&self) -> &SchemaModel<E::Conn> {
        &self.inner.schema
    }

    pub fn factory(&self) -> &ConnectionFactory<E> {
        &self.inner.factory
    }

    /// Upgrade `name` to `target` (the latest defined version if `None`)
    /// and return the open connection.
    ///
    /// Retrying or resuming an error from this call resolves to
    /// `Some(connection)`.
    pub async fn open(
        &self,
        name: &str,
        target: Option<u32>,
    ) -> Result<E::Conn, UpgradeError<E::Conn>> {
        let conn = drive(Arc::clone(&self.inner), name.to_owned(), target, true).await?;
        conn.ok_or_else(|| {
            UpgradeError::Host(HostError::new(
                HostErrorKind::InvalidState,
                "the upgrade finished without a connection",
            ))
        })
    }

    /// Upgrade `name` to `target` (the latest defined version if `None`),
    /// then close the connection.
    ///
    /// Retrying or resuming an error from this call resolves to `None`.
    pub async fn upgrade(&self, name: &str, target: Option<u32>) -> Result<(), UpgradeError<E::Conn>> {
        drive(Arc::clone(&self.inner), name.to_owned(), target, false).await?;
        Ok(())
    }

    /// The checkpoint left by a failed upgrade of `name`, if any.
    pub fn pending_checkpoint(&self, name: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.checkpoints.get(name)
    }

    /// Forget the checkpoint of `name`. The callbacks it was waiting to run
    /// are skipped for good.
    pub fn flush_incomplete(&self, name: &str) -> Result<(), CheckpointError> {
        info!(database = name, "flushing incomplete upgrade");
        self.inner.checkpoints.clear(name)
    }
}

// ── Step bookkeeping ────────────────────────────────────────────────

/// What the version-change handler of one open did. Written inside the
/// handler, read once the open settles.
#[derive(Clone, Default)]
struct StepSlot(Arc<Mutex<StepRecord>>);

#[derive(Default)]
struct StepRecord {
    applied: Option<u32>,
    failure: Option<(u32, StructuralCause)>,
}

impl StepSlot {
    fn lock(&self) -> MutexGuard<'_, StepRecord> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_applied(&self, version: u32) {
        self.lock().applied = Some(version);
    }

    fn record_failure(&self, version: u32, cause: StructuralCause) {
        self.lock().failure = Some((version, cause));
    }

    fn applied(&self) -> Option<u32> {
        self.lock().applied
    }

    fn take_failure(&self) -> Option<(u32, StructuralCause)> {
        self.lock().failure.take()
    }
}

/// What to do with a connection once its open settles.
enum AfterOpen {
    /// Run the callbacks of whatever delta the handler applied.
    Step(StepSlot),
    /// Finish the callbacks `checkpoint` was waiting on.
    Resume {
        slot: StepSlot,
        checkpoint: Checkpoint,
    },
}

impl AfterOpen {
    fn slot(&self) -> &StepSlot {
        match self {
            AfterOpen::Step(slot) | AfterOpen::Resume { slot, .. } => slot,
        }
    }
}

/// Version-change handler applying the first delta above the stored
/// version, provided the open reaches it.
fn step_handler<E: StorageEngine>(inner: Arc<Inner<E>>, slot: StepSlot) -> UpgradeHandler {
    Box::new(move |tx: &mut dyn VersionChange| {
        // Hosts may report a nonsensical old version for a brand-new database.
        let old = u32::try_from(tx.old_version()).unwrap_or(0);
        let Some(delta) = inner
            .schema
            .next_delta_after(old)
            .filter(|delta| delta.version() <= tx.new_version())
        else {
            return Ok(());
        };
        let version = delta.version();
        debug!(database = tx.database(), from = old, version, "applying structural changes");
        match apply_delta(delta, tx) {
            Ok(()) => {
                slot.record_applied(version);
                Ok(())
            }
            Err(cause) => {
                let message = cause.to_string();
                slot.record_failure(version, cause);
                Err(HostError::abort(message))
            }
        }
    })
}

// ── The flow ────────────────────────────────────────────────────────

async fn drive<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    target: Option<u32>,
    keep_open: bool,
) -> Flow<E::Conn> {
    let target = target.unwrap_or_else(|| inner.schema.latest_version());
    if target == 0 {
        return Err(UpgradeError::Validation(
            "the target version must be at least 1".into(),
        ));
    }

    if let Some(checkpoint) = inner.checkpoints.get(&name)? {
        warn!(
            database = %name,
            version = checkpoint.version,
            callback_index = checkpoint.callback_index,
            error = %checkpoint.error,
            "an earlier upgrade did not complete"
        );
        let retry_inner = Arc::clone(&inner);
        let retry_name = name.clone();
        return Err(UpgradeError::Incomplete {
            database: name,
            version: checkpoint.version,
            callback_index: checkpoint.callback_index,
            error: checkpoint.error,
            retry: Box::new(move || resume_boxed(retry_inner, retry_name, target, keep_open)),
        });
    }

    let state = UpgradeState::new(target);
    let slot = StepSlot::default();
    let handler = step_handler(Arc::clone(&inner), slot.clone());
    // Version-less: an existing database is never bumped before the
    // version check below.
    match inner.factory.open(&name, None, Some(handler)).await {
        Ok(conn) => proceed(inner, name, conn, AfterOpen::Step(slot), state, keep_open).await,
        Err(e) => Err(open_failure(inner, name, e, AfterOpen::Step(slot), state, keep_open)),
    }
}

async fn resume<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    target: u32,
    keep_open: bool,
) -> Flow<E::Conn> {
    let Some(checkpoint) = inner.checkpoints.get(&name)? else {
        debug!(database = %name, "checkpoint already gone; running a plain upgrade");
        return drive_boxed(inner, name, Some(target), keep_open).await;
    };

    let state = UpgradeState::new(target);
    let slot = StepSlot::default();
    let handler = step_handler(Arc::clone(&inner), slot.clone());
    let after = AfterOpen::Resume { slot, checkpoint };
    match inner.factory.open(&name, None, Some(handler)).await {
        Ok(conn) => proceed(inner, name, conn, after, state, keep_open).await,
        Err(e) => Err(open_failure(inner, name, e, after, state, keep_open)),
    }
}

async fn continue_blocked<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    pending: Resume<E::Conn>,
    after: AfterOpen,
    state: UpgradeState,
    keep_open: bool,
) -> Flow<E::Conn> {
    match pending.wait().await {
        Ok(conn) => proceed(inner, name, conn, after, state, keep_open).await,
        Err(e) => Err(open_failure(
            inner,
            name,
            RequestError::Host(e),
            after,
            state,
            keep_open,
        )),
    }
}

/// Handle a freshly settled connection, then keep stepping.
async fn proceed<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    conn: E::Conn,
    after: AfterOpen,
    mut state: UpgradeState,
    keep_open: bool,
) -> Flow<E::Conn> {
    if conn.version() > state.target_version {
        let existing = conn.version();
        conn.close();
        return Err(UpgradeError::Version {
            requested: state.target_version,
            existing,
        });
    }

    let slot = match after {
        AfterOpen::Step(slot) => slot,
        AfterOpen::Resume { slot, checkpoint }
            if slot.applied().is_none() && conn.version() == checkpoint.version =>
        {
            if let Some(delta) = inner.schema.delta_at_or_before(checkpoint.version) {
                state = UpgradeState::resume_from(state.target_version, delta.version(), &checkpoint);
            }
            debug!(
                database = %name,
                version = checkpoint.version,
                callback_index = checkpoint.callback_index,
                "resuming callbacks"
            );
            run_callbacks(&inner, &name, &conn, &mut state, keep_open).await?;
            clear_checkpoint(&inner, &name, &conn)?;
            info!(database = %name, version = conn.version(), "incomplete upgrade resumed");
            return advance(inner, name, conn, state, keep_open).await;
        }
        AfterOpen::Resume { slot, checkpoint } => {
            warn!(
                database = %name,
                checkpoint_version = checkpoint.version,
                version = conn.version(),
                "checkpoint no longer matches the database; discarding it"
            );
            clear_checkpoint(&inner, &name, &conn)?;
            slot
        }
    };

    if let Some(version) = slot.applied() {
        state.begin_delta(version);
        run_callbacks(&inner, &name, &conn, &mut state, keep_open).await?;
    }
    advance(inner, name, conn, state, keep_open).await
}

/// Close and reopen one defined delta higher until the target is reached.
async fn advance<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    mut conn: E::Conn,
    mut state: UpgradeState,
    keep_open: bool,
) -> Flow<E::Conn> {
    loop {
        let next = inner
            .schema
            .next_delta_after(conn.version())
            .map(|delta| delta.version())
            .filter(|version| *version <= state.target_version);
        let Some(next) = next else {
            info!(database = %name, version = conn.version(), "upgrade complete");
            if keep_open {
                return Ok(Some(conn));
            }
            conn.close();
            return Ok(None);
        };

        debug!(database = %name, from = conn.version(), to = next, "stepping");
        conn.close();
        let slot = StepSlot::default();
        let handler = step_handler(Arc::clone(&inner), slot.clone());
        conn = match inner.factory.open(&name, Some(next), Some(handler)).await {
            Ok(conn) => conn,
            Err(e) => {
                return Err(open_failure(
                    inner,
                    name,
                    e,
                    AfterOpen::Step(slot),
                    state,
                    keep_open,
                ))
            }
        };
        if let Some(version) = slot.applied() {
            state.begin_delta(version);
            run_callbacks(&inner, &name, &conn, &mut state, keep_open).await?;
        }
    }
}

/// Run the remaining callbacks of the current delta, one after another.
async fn run_callbacks<E: StorageEngine>(
    inner: &Arc<Inner<E>>,
    name: &str,
    conn: &E::Conn,
    state: &mut UpgradeState,
    keep_open: bool,
) -> Result<(), UpgradeError<E::Conn>> {
    let Some(version) = state.last_applied_delta else {
        return Ok(());
    };
    let callbacks = inner
        .schema
        .delta(version)
        .map(|delta| delta.callbacks().to_vec())
        .unwrap_or_default();

    while let Some(callback) = callbacks.get(state.next_callback_index) {
        let index = state.next_callback_index;
        debug!(database = name, version, index, "running callback");
        let result = match callback.invoke(conn) {
            CallbackOutcome::Done(result) => result,
            CallbackOutcome::Pending(pending) => pending.await,
        };
        let Err(source) = result else {
            state.complete_callback();
            continue;
        };

        let checkpoint = state.checkpoint(conn.version(), source.to_string());
        warn!(
            database = name,
            version = checkpoint.version,
            callback_index = index,
            error = %source,
            "callback failed; writing checkpoint"
        );
        let stored = inner.checkpoints.set(name, &checkpoint);
        conn.close();
        stored?;

        let retry_inner = Arc::clone(inner);
        let retry_name = name.to_owned();
        let target = state.target_version;
        return Err(UpgradeError::Callback {
            version,
            callback_index: index,
            source,
            retry: Box::new(move || resume_boxed(retry_inner, retry_name, target, keep_open)),
        });
    }
    Ok(())
}

fn clear_checkpoint<E: StorageEngine>(
    inner: &Inner<E>,
    name: &str,
    conn: &E::Conn,
) -> Result<(), UpgradeError<E::Conn>> {
    inner.checkpoints.clear(name).map_err(|e| {
        conn.close();
        UpgradeError::Checkpoint(e)
    })
}

fn open_failure<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    error: RequestError<E::Conn>,
    after: AfterOpen,
    state: UpgradeState,
    keep_open: bool,
) -> UpgradeError<E::Conn> {
    match error {
        RequestError::Blocked(blocked) => {
            warn!(
                database = %name,
                old_version = blocked.old_version,
                new_version = ?blocked.new_version,
                "upgrade blocked by other open connections"
            );
            let old_version = blocked.old_version;
            let new_version = blocked.new_version;
            let pending = blocked.into_resume();
            let database = name.clone();
            UpgradeError::Blocked {
                database,
                old_version,
                new_version,
                resume: Box::new(move || {
                    continue_blocked_boxed(inner, name, pending, after, state, keep_open)
                }),
            }
        }
        RequestError::Host(e) => match after.slot().take_failure() {
            Some((version, cause)) => {
                warn!(database = %name, version, error = %cause, "structural changes rolled back");
                let target = state.target_version;
                UpgradeError::Structural {
                    version,
                    cause,
                    retry: Box::new(move || drive_boxed(inner, name, Some(target), keep_open)),
                }
            }
            None => UpgradeError::Host(e),
        },
    }
}

// Boxed entry points for continuations. Keeping them out of the async
// bodies keeps the future types finite.

fn drive_boxed<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    target: Option<u32>,
    keep_open: bool,
) -> BoxFuture<'static, Flow<E::Conn>> {
    Box::pin(drive(inner, name, target, keep_open))
}

fn resume_boxed<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    target: u32,
    keep_open: bool,
) -> BoxFuture<'static, Flow<E::Conn>> {
    Box::pin(resume(inner, name, target, keep_open))
}

fn continue_blocked_boxed<E: StorageEngine>(
    inner: Arc<Inner<E>>,
    name: String,
    pending: Resume<E::Conn>,
    after: AfterOpen,
    state: UpgradeState,
    keep_open: bool,
) -> BoxFuture<'static, Flow<E::Conn>> {
    Box::pin(continue_blocked(inner, name, pending, after, state, keep_open))
}
