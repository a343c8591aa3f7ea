//! Ring-specialized Chandy–Lamport snapshot.
//!
//! A tank only has two incoming channels, its left and right
//! neighbours, so a round is tracked as which markers are still awaited.
//! Fish arriving on an edge whose marker is still awaited were in
//! transit when the cut was taken and are added to the recorded count.
//!
//! Once a tank has closed its round, the counts are summed by a
//! collection token that travels leftward from the initiator and back.
//!
//! Markers carry no round number. A round that can no longer finish
//! (lost token, neighbour replaced on an awaited edge) is abandoned, and
//! whatever it left behind is discarded when the next round reaches the
//! tank.

use serde::Serialize;

use crate::AquaProtocolError;

/// Which markers a participating tank is still waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPhase {
    Idle,
    LeftPending,
    RightPending,
    BothPending,
}

/// The edge a message came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
}

/// Called once with the ring-wide total, or with
/// [`AquaProtocolError::SnapshotAbandoned`] if the round never completes.
pub type CompletionCallback = Box<dyn FnOnce(Result<u64, AquaProtocolError>) + Send>;

/// What the tank must do in response to a snapshot transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotAction {
    /// Local state recorded; send a marker to both neighbours.
    SendMarkers,
    /// Pass the collection token to the left neighbour.
    ForwardToken { accumulated: u64 },
    /// This tank took part in a round and recorded `count`.
    Started { count: u64, initiator: bool },
    /// All markers in; `count` includes fish caught in transit.
    Closed { count: u64 },
    /// The collection token returned to the initiator.
    Completed { total: u64 },
    /// An unfinished round was dropped.
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
struct Round {
    phase: SnapshotPhase,
    recorded: u64,
    initiator: bool,
}

impl Round {
    fn participant(from_left: bool, recorded: u64) -> Self {
        let phase = if from_left {
            SnapshotPhase::RightPending
        } else {
            SnapshotPhase::LeftPending
        };
        Self {
            phase,
            recorded,
            initiator: false,
        }
    }

    fn awaits(&self, edge: Edge) -> bool {
        matches!(
            (self.phase, edge),
            (SnapshotPhase::BothPending, _)
                | (SnapshotPhase::LeftPending, Edge::Left)
                | (SnapshotPhase::RightPending, Edge::Right)
        )
    }
}

#[derive(Default)]
pub struct Snapshot {
    round: Option<Round>,
    /// Closed count waiting for the collection token.
    pending_report: Option<u64>,
    /// Collection token that arrived before this tank closed.
    held_token: Option<u64>,
    /// Initiator's own count while its token is out.
    awaiting_return: Option<u64>,
    on_complete: Option<CompletionCallback>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("round", &self.round)
            .field("pending_report", &self.pending_report)
            .field("held_token", &self.held_token)
            .field("awaiting_return", &self.awaiting_return)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SnapshotPhase {
        self.round.map_or(SnapshotPhase::Idle, |r| r.phase)
    }

    /// A round or its collection is still in progress here.
    pub fn is_busy(&self) -> bool {
        self.round.is_some() || self.awaiting_return.is_some()
    }

    /// Start a round as initiator, recording `local_count`.
    ///
    /// Anything left over from an earlier round is abandoned first; its
    /// caller is told so.
    pub fn initiate(
        &mut self,
        local_count: u64,
        on_complete: CompletionCallback,
    ) -> Vec<SnapshotAction> {
        let mut actions: Vec<_> = self.abandon().into_iter().collect();
        self.round = Some(Round {
            phase: SnapshotPhase::BothPending,
            recorded: local_count,
            initiator: true,
        });
        self.on_complete = Some(on_complete);
        actions.push(SnapshotAction::Started {
            count: local_count,
            initiator: true,
        });
        actions.push(SnapshotAction::SendMarkers);
        actions
    }

    /// A marker arrived. `from_left`/`from_right` say which neighbour
    /// addresses matched the sender; both match in rings of one or two.
    pub fn on_marker(
        &mut self,
        from_left: bool,
        from_right: bool,
        local_count: u64,
    ) -> Vec<SnapshotAction> {
        if !from_left && !from_right {
            tracing::warn!("snapshot marker from a non-neighbour, ignoring");
            return Vec::new();
        }

        let Some(round) = self.round.as_mut() else {
            // A new round: drop any collection the last one left behind.
            let actions = self.abandon().into_iter().collect();
            return self.join(actions, from_left, local_count);
        };

        let phase = round.phase;
        match phase {
            SnapshotPhase::BothPending => {
                round.phase = if from_left {
                    SnapshotPhase::RightPending
                } else {
                    SnapshotPhase::LeftPending
                };
                Vec::new()
            }
            SnapshotPhase::LeftPending if from_left => self.close(),
            SnapshotPhase::RightPending if from_right => self.close(),
            phase => {
                // Each neighbour marks an edge once per round, so a second
                // marker on a closed edge belongs to a newer round.
                tracing::warn!("marker on an already closed edge in phase {phase:?}, restarting");
                let actions = self.abandon().into_iter().collect();
                self.join(actions, from_left, local_count)
            }
        }
    }

    /// The neighbour on `edge` was replaced. A round still waiting for
    /// that neighbour's marker can never close and is abandoned.
    pub fn on_neighbour_changed(&mut self, edge: Edge) -> Vec<SnapshotAction> {
        match self.round {
            Some(round) if round.awaits(edge) => self.abandon().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// A fish arrived on `edge`; count it if that channel is still recording.
    pub fn record_arrival(&mut self, edge: Edge) {
        if let Some(round) = self.round.as_mut() {
            if round.awaits(edge) {
                round.recorded += 1;
            }
        }
    }

    /// A collection token arrived carrying `accumulated`.
    pub fn on_token(&mut self, accumulated: u64) -> Vec<SnapshotAction> {
        if let Some(own) = self.awaiting_return.take() {
            return vec![SnapshotAction::Completed {
                total: own + accumulated,
            }];
        }
        if let Some(own) = self.pending_report.take() {
            return vec![SnapshotAction::ForwardToken {
                accumulated: accumulated + own,
            }];
        }
        if self.round.is_some() {
            self.held_token = Some(accumulated);
            return Vec::new();
        }
        tracing::warn!("snapshot token reached a tank outside the round, passing it on");
        vec![SnapshotAction::ForwardToken { accumulated }]
    }

    /// Hand out the completion callback once the round is complete.
    pub fn take_callback(&mut self) -> Option<CompletionCallback> {
        self.on_complete.take()
    }

    /// Drop the round and its collection state. A waiting initiator's
    /// callback receives `SnapshotAbandoned`.
    fn abandon(&mut self) -> Option<SnapshotAction> {
        let unfinished = self.round.take().is_some()
            | self.awaiting_return.take().is_some()
            | self.pending_report.take().is_some()
            | self.held_token.take().is_some();
        if let Some(callback) = self.on_complete.take() {
            callback(Err(AquaProtocolError::SnapshotAbandoned));
        }
        unfinished.then_some(SnapshotAction::Abandoned)
    }

    fn join(
        &mut self,
        mut actions: Vec<SnapshotAction>,
        from_left: bool,
        local_count: u64,
    ) -> Vec<SnapshotAction> {
        self.round = Some(Round::participant(from_left, local_count));
        actions.push(SnapshotAction::Started {
            count: local_count,
            initiator: false,
        });
        actions.push(SnapshotAction::SendMarkers);
        actions
    }

    fn close(&mut self) -> Vec<SnapshotAction> {
        let Some(round) = self.round.take() else {
            return Vec::new();
        };
        let count = round.recorded;
        let mut actions = vec![SnapshotAction::Closed { count }];
        if round.initiator {
            self.awaiting_return = Some(count);
            actions.push(SnapshotAction::ForwardToken { accumulated: 0 });
        } else if let Some(held) = self.held_token.take() {
            actions.push(SnapshotAction::ForwardToken {
                accumulated: held + count,
            });
        } else {
            self.pending_report = Some(count);
        }
        actions
    }
}
