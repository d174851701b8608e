//! The controller-held view of a session: board, turn, presence and
//! restart eligibility.

use std::collections::BTreeSet;
use std::fmt;

use tracing::warn;

use crate::api::SessionState;
use crate::board::Board;
use crate::protocol::{BoardPatch, PartyId, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceStatus {
    /// No snapshot received yet.
    #[default]
    Unknown,
    /// Reflects the latest snapshot on a live link.
    Live,
    /// Link dropped since the last snapshot.
    Stale,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Live => write!(f, "live"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

/// Parties currently in the session's broadcast group. Only ever replaced
/// by a server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    members: BTreeSet<PartyId>,
    status: PresenceStatus,
}

impl PresenceSet {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &PartyId> {
        self.members.iter()
    }

    pub fn contains(&self, party: &str) -> bool {
        self.members.contains(party)
    }

    pub fn status(&self) -> PresenceStatus {
        self.status
    }

    pub fn replace<I>(&mut self, online: I)
    where
        I: IntoIterator<Item = PartyId>,
    {
        self.members = online.into_iter().collect();
        self.status = PresenceStatus::Live;
    }

    pub fn mark_stale(&mut self) {
        if self.status == PresenceStatus::Live {
            self.status = PresenceStatus::Stale;
        }
    }
}

/// Decides whether the restart affordance is offered after a fetch.
pub trait RestartPolicy: Send + Sync + 'static {
    fn restart_eligible(&self, board: &Board, next: Role) -> bool;
}

/// Offer a restart once no empty cell remains.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoardFilled;

impl RestartPolicy for BoardFilled {
    fn restart_eligible(&self, board: &Board, _next: Role) -> bool {
        board.is_full()
    }
}

/// Adapts a closure into a [`RestartPolicy`].
pub struct PolicyFn<F>(pub F);

impl<F> RestartPolicy for PolicyFn<F>
where
    F: Fn(&Board, Role) -> bool + Send + Sync + 'static,
{
    fn restart_eligible(&self, board: &Board, next: Role) -> bool {
        (self.0)(board, next)
    }
}

impl<F> fmt::Debug for PolicyFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PolicyFn(..)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    board: Board,
    next: Option<Role>,
    presence: PresenceSet,
    restart_eligible: bool,
    last_move: Option<BoardPatch>,
}

impl SessionView {
    pub fn new(board_size: usize) -> Self {
        Self {
            board: Board::new(board_size),
            next: None,
            presence: PresenceSet::default(),
            restart_eligible: false,
            last_move: None,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Whose turn it is; `None` until a fetch or update says.
    pub fn next(&self) -> Option<Role> {
        self.next
    }

    pub fn presence(&self) -> &PresenceSet {
        &self.presence
    }

    pub fn joined_count(&self) -> usize {
        self.presence.count()
    }

    pub fn restart_eligible(&self) -> bool {
        self.restart_eligible
    }

    /// The most recent `update` payload, including fields not yet applied.
    pub fn last_move(&self) -> Option<&BoardPatch> {
        self.last_move.as_ref()
    }

    pub(crate) fn presence_mut(&mut self) -> &mut PresenceSet {
        &mut self.presence
    }

    pub(crate) fn begin_fetch(&mut self) {
        self.restart_eligible = false;
    }

    pub(crate) fn apply_state(&mut self, state: SessionState, policy: &dyn RestartPolicy) {
        self.restart_eligible = policy.restart_eligible(&state.board, state.next);
        self.board = state.board;
        self.next = Some(state.next);
    }

    /// Apply the fields of an `update` event that are understood. A board
    /// with the wrong dimension is ignored so the grid never changes shape.
    pub(crate) fn apply_patch(&mut self, patch: BoardPatch) {
        if let Some(code) = patch.next {
            match Role::from_player_code(code) {
                Some(role) => self.next = Some(role),
                None => warn!(next = code, "ignoring update with unknown next player"),
            }
        }
        if let Some(board) = &patch.board {
            if board.size() == self.board.size() {
                self.board = board.clone();
            } else {
                warn!(
                    expected = self.board.size(),
                    actual = board.size(),
                    "ignoring update with wrong board dimension"
                );
            }
        }
        self.last_move = Some(patch);
    }
}
