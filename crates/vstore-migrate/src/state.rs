use serde::{Deserialize, Serialize};
use vstore_checkpoint::Checkpoint;

/// How far an upgrade has come.
///
/// The driver carries one of these through every suspension point: it names
/// the delta whose callbacks are running and the next callback to run, which
/// is exactly what a [`Checkpoint`] records when a callback fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeState {
    pub target_version: u32,
    /// Version of the most recently applied delta, if any was applied in
    /// this flow.
    pub last_applied_delta: Option<u32>,
    /// Index of the next callback to run in `last_applied_delta`.
    pub next_callback_index: usize,
}

impl UpgradeState {
    pub fn new(target_version: u32) -> Self {
        Self {
            target_version,
            last_applied_delta: None,
            next_callback_index: 0,
        }
    }

    /// Pick up after a checkpoint left in `delta`.
    pub fn resume_from(target_version: u32, delta: u32, checkpoint: &Checkpoint) -> Self {
        Self {
            target_version,
            last_applied_delta: Some(delta),
            next_callback_index: checkpoint.callback_index,
        }
    }

    /// A delta's structural changes committed; its callbacks start from 0.
    pub fn begin_delta(&mut self, version: u32) {
        self.last_applied_delta = Some(version);
        self.next_callback_index = 0;
    }

    pub fn complete_callback(&mut self) {
        self.next_callback_index += 1;
    }

    /// Whether every callback of the current delta has run, given how many
    /// it has.
    pub fn callbacks_done(&self, total: usize) -> bool {
        self.next_callback_index >= total
    }

    /// Record for a failure of the next callback, observed at
    /// `connection_version`.
    pub fn checkpoint(&self, connection_version: u32, error: impl Into<String>) -> Checkpoint {
        Checkpoint::new(connection_version, error, self.next_callback_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_callbacks_within_a_delta() {
        let mut state = UpgradeState::new(3);
        state.begin_delta(2);
        assert!(!state.callbacks_done(2));
        state.complete_callback();
        state.complete_callback();
        assert!(state.callbacks_done(2));

        state.begin_delta(3);
        assert_eq!(state.last_applied_delta, Some(3));
        assert_eq!(state.next_callback_index, 0);
    }

    #[test]
    fn checkpoint_records_the_failing_callback() {
        let mut state = UpgradeState::new(5);
        state.begin_delta(4);
        state.complete_callback();
        let cp = state.checkpoint(4, "bad callback");
        assert_eq!(cp, Checkpoint::new(4, "bad callback", 1));

        let resumed = UpgradeState::resume_from(5, 4, &cp);
        assert_eq!(resumed.last_applied_delta, Some(4));
        assert_eq!(resumed.next_callback_index, 1);
    }

    #[test]
    fn serializes_for_inspection() {
        let mut state = UpgradeState::new(2);
        state.begin_delta(1);
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "target_version": 2,
                "last_applied_delta": 1,
                "next_callback_index": 0
            })
        );
        let back: UpgradeState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
