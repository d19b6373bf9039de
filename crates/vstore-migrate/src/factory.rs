use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use vstore_host::{
    Connection, Deletion, HostError, Key, Request, RequestEvent, StorageEngine, UpgradeHandler,
    VersionChange,
};

use crate::config::FactoryConfig;

/// A host request that reported `Blocked` and is still pending.
pub struct Blocked<T> {
    pub old_version: u32,
    pub new_version: Option<u32>,
    resume: Resume<T>,
}

impl<T> Blocked<T> {
    pub fn into_resume(self) -> Resume<T> {
        self.resume
    }
}

impl<T> fmt::Debug for Blocked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocked")
            .field("old_version", &self.old_version)
            .field("new_version", &self.new_version)
            .finish_non_exhaustive()
    }
}

/// Continuation of a blocked request.
///
/// Waits on the original request rather than issuing a new one, so it
/// settles when the blocking connections close.
pub struct Resume<T> {
    request: Request<T>,
    settle: fn(T) -> T,
}

impl<T> Resume<T> {
    pub async fn wait(mut self) -> Result<T, HostError> {
        loop {
            match self.request.next_event().await {
                Some(RequestEvent::Success(value)) => return Ok((self.settle)(value)),
                Some(RequestEvent::Error(e)) => return Err(e),
                Some(RequestEvent::Blocked { .. }) => continue,
                None => return Err(HostError::abort("the host dropped the request")),
            }
        }
    }
}

impl<T> fmt::Debug for Resume<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resume(..)")
    }
}

/// Failure of a factory request.
pub enum RequestError<T> {
    /// Other connections hold the database; the request is still pending.
    Blocked(Blocked<T>),
    /// The host refused the request.
    Host(HostError),
}

impl<T> fmt::Display for RequestError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked(blocked) => match blocked.new_version {
                Some(v) => write!(
                    f,
                    "blocked by other open connections (version {} to {v})",
                    blocked.old_version
                ),
                None => write!(
                    f,
                    "blocked by other open connections (version {})",
                    blocked.old_version
                ),
            },
            Self::Host(e) => write!(f, "{e}"),
        }
    }
}

impl<T> std::error::Error for RequestError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Blocked(_) => None,
            Self::Host(e) => Some(e),
        }
    }
}

impl<T> From<HostError> for RequestError<T> {
    fn from(e: HostError) -> Self {
        Self::Host(e)
    }
}

impl<T> fmt::Debug for RequestError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked(blocked) => f.debug_tuple("Blocked").field(blocked).finish(),
            Self::Host(e) => f.debug_tuple("Host").field(e).finish(),
        }
    }
}

/// Opens, deletes and compares against a host storage engine, turning its
/// event-style requests into futures.
pub struct ConnectionFactory<E> {
    engine: Arc<E>,
    config: FactoryConfig,
}

impl<E> Clone for ConnectionFactory<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
        }
    }
}

impl<E> fmt::Debug for ConnectionFactory<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: StorageEngine> ConnectionFactory<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self::with_config(engine, FactoryConfig::default())
    }

    pub fn with_config(engine: Arc<E>, config: FactoryConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Open `name`, at `version` if given (0 counts as not given).
    ///
    /// `on_upgrade` runs with the version-change event. If it fails, the
    /// connection is closed and the open fails with its error.
    pub async fn open(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: Option<UpgradeHandler>,
    ) -> Result<E::Conn, RequestError<E::Conn>> {
        let version = version.filter(|v| *v > 0);
        let handler = on_upgrade.map(|handler| -> UpgradeHandler {
            Box::new(move |tx: &mut dyn VersionChange| {
                let result = handler(tx);
                if result.is_err() {
                    tx.close_connection();
                }
                result
            })
        });
        debug!(database = name, ?version, "opening");
        settle(self.engine.open(name, version, handler), std::convert::identity).await
    }

    /// Delete the database called `name`.
    ///
    /// Both a completed deletion and a blocked one report no new version.
    pub async fn del(&self, name: &str) -> Result<Deletion, RequestError<Deletion>> {
        debug!(database = name, "deleting");
        match settle(self.engine.delete_database(name), without_new_version).await {
            Err(RequestError::Blocked(mut blocked)) => {
                blocked.new_version = None;
                Err(RequestError::Blocked(blocked))
            }
            other => other,
        }
    }

    /// Close `conn`, wait out the grace interval, then delete its database.
    pub async fn del_connection(&self, conn: &E::Conn) -> Result<Deletion, RequestError<Deletion>> {
        conn.close();
        tokio::time::sleep(self.config.delete_grace).await;
        self.del(conn.name()).await
    }

    /// The host's key ordering.
    pub fn compare(&self, a: &Key, b: &Key) -> Ordering {
        self.engine.cmp(a, b)
    }
}

fn without_new_version(deletion: Deletion) -> Deletion {
    Deletion {
        new_version: None,
        ..deletion
    }
}

async fn settle<T>(mut request: Request<T>, settle: fn(T) -> T) -> Result<T, RequestError<T>> {
    match request.next_event().await {
        Some(RequestEvent::Success(value)) => Ok(settle(value)),
        Some(RequestEvent::Error(e)) => Err(RequestError::Host(e)),
        Some(RequestEvent::Blocked {
            old_version,
            new_version,
        }) => {
            debug!(old_version, ?new_version, "request blocked");
            Err(RequestError::Blocked(Blocked {
                old_version,
                new_version,
                resume: Resume { request, settle },
            }))
        }
        None => Err(RequestError::Host(HostError::abort(
            "the host dropped the request",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vstore_host::{HostErrorKind, MemoryEngine, StoreParams};

    fn factory() -> (Arc<MemoryEngine>, ConnectionFactory<MemoryEngine>) {
        let engine = Arc::new(MemoryEngine::new());
        let config = FactoryConfig::default().delete_grace(Duration::from_millis(1));
        (Arc::clone(&engine), ConnectionFactory::with_config(engine, config))
    }

    #[tokio::test]
    async fn zero_version_opens_at_stored_version() {
        let (engine, factory) = factory();
        factory.open("db", Some(4), None).await.unwrap().close();
        let conn = factory.open("db", Some(0), None).await.unwrap();
        assert_eq!(conn.version(), 4);
        assert_eq!(engine.database_version("db"), Some(4));
    }

    #[tokio::test]
    async fn failing_handler_closes_and_propagates() {
        let (engine, factory) = factory();
        let handler: UpgradeHandler = Box::new(|tx: &mut dyn VersionChange| {
            tx.create_object_store("a", &StoreParams::default())?;
            Err(HostError::constraint("no thanks"))
        });
        let err = factory.open("db", Some(1), Some(handler)).await.unwrap_err();
        match err {
            RequestError::Host(e) => assert_eq!(e.kind, HostErrorKind::Constraint),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(engine.database_version("db"), None);
        assert_eq!(engine.open_connections("db"), 0);
    }

    #[tokio::test]
    async fn blocked_open_resumes_on_the_same_request() {
        let (engine, factory) = factory();
        let blocker = factory.open("db", None, None).await.unwrap();

        let err = factory.open("db", Some(2), None).await.unwrap_err();
        let RequestError::Blocked(blocked) = err else {
            panic!("expected a blocked error");
        };
        assert_eq!(blocked.old_version, 1);
        assert_eq!(blocked.new_version, Some(2));
        // Still exactly one pending request: nothing was reissued.
        assert_eq!(engine.pending_requests("db"), 1);

        let resume = blocked.into_resume();
        blocker.close();
        let conn = resume.wait().await.unwrap();
        assert_eq!(conn.version(), 2);
    }

    #[tokio::test]
    async fn blocked_delete_reports_no_new_version() {
        let (engine, factory) = factory();
        let blocker = factory.open("db", None, None).await.unwrap();

        let err = factory.del("db").await.unwrap_err();
        let RequestError::Blocked(blocked) = err else {
            panic!("expected a blocked error");
        };
        assert_eq!(blocked.new_version, None);

        blocker.close();
        let deletion = blocked.into_resume().wait().await.unwrap();
        assert_eq!(deletion.old_version, 1);
        assert_eq!(deletion.new_version, None);
        assert!(engine.database_names().is_empty());
    }

    #[tokio::test]
    async fn del_connection_closes_first() {
        let (engine, factory) = factory();
        let conn = factory.open("db", Some(3), None).await.unwrap();
        let deletion = factory.del_connection(&conn).await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(deletion.old_version, 3);
        assert_eq!(engine.database_version("db"), None);
    }

    #[test]
    fn compare_uses_host_ordering() {
        let (_, factory) = factory();
        assert_eq!(factory.compare(&Key::from(1i64), &Key::from("a")), Ordering::Less);
        assert_eq!(factory.compare(&Key::from("b"), &Key::from("a")), Ordering::Greater);
        assert_eq!(factory.compare(&Key::from("a"), &Key::from("a")), Ordering::Equal);
    }
}
