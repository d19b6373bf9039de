use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::HostError;

/// Outcome of a successful database deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub old_version: u32,
    pub new_version: Option<u32>,
}

/// An event fired on a pending host request.
#[derive(Debug)]
pub enum RequestEvent<T> {
    /// Other open connections prevent the request from proceeding. The
    /// request stays pending and may still fire `Success` or `Error` later.
    Blocked {
        old_version: u32,
        new_version: Option<u32>,
    },
    Success(T),
    Error(HostError),
}

/// The caller's side of a pending host request.
///
/// Events arrive in the order the host fires them; a request finishes with
/// exactly one `Success` or `Error`, possibly preceded by `Blocked`.
#[derive(Debug)]
pub struct Request<T> {
    events: mpsc::UnboundedReceiver<RequestEvent<T>>,
}

impl<T> Request<T> {
    /// Create a request and the responder the engine fires events through.
    pub fn channel() -> (Responder<T>, Request<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Responder { events: tx }, Request { events: rx })
    }

    /// Wait for the next event. `None` means the engine dropped the request
    /// without finishing it.
    pub async fn next_event(&mut self) -> Option<RequestEvent<T>> {
        self.events.recv().await
    }
}

/// The engine's side of a pending host request.
#[derive(Debug)]
pub struct Responder<T> {
    events: mpsc::UnboundedSender<RequestEvent<T>>,
}

impl<T> Responder<T> {
    /// `true` once the caller dropped its [`Request`].
    pub fn is_abandoned(&self) -> bool {
        self.events.is_closed()
    }

    // Send failures mean the caller stopped listening; nothing to do.
    pub fn blocked(&self, old_version: u32, new_version: Option<u32>) {
        let _ = self.events.send(RequestEvent::Blocked {
            old_version,
            new_version,
        });
    }

    /// Deliver the result. Returns `false` when nobody is listening any
    /// more; the engine must then undo whatever `value` stands for.
    #[must_use = "an undelivered result has to be rolled back"]
    pub fn succeed(self, value: T) -> bool {
        self.events.send(RequestEvent::Success(value)).is_ok()
    }

    pub fn fail(self, error: HostError) {
        let _ = self.events.send(RequestEvent::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (responder, mut request) = Request::channel();
        responder.blocked(1, Some(2));
        assert!(responder.succeed(7u32));
        assert!(matches!(
            request.next_event().await,
            Some(RequestEvent::Blocked { old_version: 1, new_version: Some(2) })
        ));
        assert!(matches!(request.next_event().await, Some(RequestEvent::Success(7))));
        assert!(request.next_event().await.is_none());
    }

    #[test]
    fn dropped_request_is_abandoned() {
        let (responder, request) = Request::<u32>::channel();
        assert!(!responder.is_abandoned());
        drop(request);
        assert!(responder.is_abandoned());
        assert!(!responder.succeed(1));
    }
}
