//! Sans-IO session lifecycle.
//!
//! [`SessionCore`] consumes [`Input`]s and answers with the [`Effect`]s the
//! driver must perform. It never touches the network, so every ordering
//! and teardown rule can be exercised directly.
//!
//! ```text
//! Unvalidated ─► Validating ─┬─► Invalid            (redirect Home)
//!      │                     └─► Validated ─► Subscribed ─┬─► Invalid
//!      └─► Invalid (no entry)                             └─► TornDown
//! ```
//!
//! Every state reaches `TornDown` on dispose; after that all input is
//! discarded.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ApiError, FetchOutcome};
use crate::channel::{ChannelEvent, Outbound};
use crate::protocol::{EntryContext, PresenceIntent, Role, SessionId};
use crate::view::{RestartPolicy, SessionView};

/// Undismissed notices beyond this drop the oldest.
pub const MAX_NOTICES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Unvalidated,
    Validating,
    Invalid,
    Validated,
    Subscribed,
    TornDown,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unvalidated => write!(f, "unvalidated"),
            Self::Validating => write!(f, "validating"),
            Self::Invalid => write!(f, "invalid"),
            Self::Validated => write!(f, "validated"),
            Self::Subscribed => write!(f, "subscribed"),
            Self::TornDown => write!(f, "torn down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// No entry context or no game id in it.
    MissingEntry,
    /// The existence check answered "no".
    SessionMissing,
    /// The existence check could not be answered.
    ExistenceUnknown,
    /// A state fetch reported the session as not found.
    SessionGone,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        from: ControllerState,
        action: &'static str,
    },

    #[error("controller is torn down")]
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home => write!(f, "home"),
        }
    }
}

/// A dismissible, user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub message: String,
}

#[derive(Debug)]
pub enum Input {
    Start,
    ExistenceResolved(Result<bool, ApiError>),
    FetchResolved {
        generation: u64,
        result: Result<FetchOutcome, ApiError>,
    },
    Channel(ChannelEvent),
    DismissNotice(u64),
    Dispose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CheckExistence(SessionId),
    FetchState { game_id: SessionId, generation: u64 },
    Subscribe(SessionId),
    Emit(Outbound),
    /// Drop the subscription after anything already emitted.
    Unsubscribe,
    Redirect(Route),
    Notice(Notice),
}

/// Everything a presentation layer needs to render the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: ControllerState,
    pub game_id: Option<SessionId>,
    pub role: Option<Role>,
    pub view: SessionView,
    pub notices: Vec<Notice>,
    pub invalid_reason: Option<InvalidReason>,
}

pub struct SessionCore {
    entry: Option<EntryContext>,
    state: ControllerState,
    session: Option<(SessionId, Role)>,
    view: SessionView,
    policy: Arc<dyn RestartPolicy>,
    generation: u64,
    joined: bool,
    left: bool,
    subscribed: bool,
    redirected: bool,
    invalid_reason: Option<InvalidReason>,
    notices: Vec<Notice>,
    next_notice: u64,
}

impl SessionCore {
    pub fn new(entry: Option<EntryContext>, board_size: usize, policy: Arc<dyn RestartPolicy>) -> Self {
        Self {
            entry,
            state: ControllerState::Unvalidated,
            session: None,
            view: SessionView::new(board_size),
            policy,
            generation: 0,
            joined: false,
            left: false,
            subscribed: false,
            redirected: false,
            invalid_reason: None,
            notices: Vec::new(),
            next_notice: 1,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            game_id: self.session.as_ref().map(|(id, _)| id.clone()),
            role: self.session.as_ref().map(|(_, role)| *role),
            view: self.view.clone(),
            notices: self.notices.clone(),
            invalid_reason: self.invalid_reason,
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.state == ControllerState::TornDown {
            debug!(?input, "controller torn down, discarding input");
            return Vec::new();
        }

        match input {
            Input::Start => self.start(),
            Input::ExistenceResolved(result) => self.on_existence(result),
            Input::FetchResolved { generation, result } => self.on_fetch(generation, result),
            Input::Channel(event) => self.on_channel(event),
            Input::DismissNotice(id) => {
                self.notices.retain(|n| n.id != id);
                Vec::new()
            }
            Input::Dispose => self.dispose(),
        }
    }

    /// Re-fetch authoritative state. Only meaningful once subscribed.
    pub fn refetch(&mut self) -> Result<Vec<Effect>, TransitionError> {
        match self.state {
            ControllerState::Subscribed => match self.session.clone() {
                Some((id, _)) => Ok(vec![self.begin_fetch(id)]),
                None => Err(TransitionError::InvalidTransition {
                    from: self.state,
                    action: "refetch",
                }),
            },
            ControllerState::TornDown => Err(TransitionError::TornDown),
            from => Err(TransitionError::InvalidTransition {
                from,
                action: "refetch",
            }),
        }
    }

    fn enter(&mut self, to: ControllerState) {
        debug!(from = %self.state, %to, "controller transition");
        self.state = to;
    }

    fn start(&mut self) -> Vec<Effect> {
        if self.state != ControllerState::Unvalidated {
            return Vec::new();
        }
        match EntryContext::resolve(self.entry.as_ref()) {
            Ok((id, role)) => {
                info!(game_id = %id, %role, "validating session");
                self.session = Some((id.clone(), role));
                self.enter(ControllerState::Validating);
                vec![Effect::CheckExistence(id)]
            }
            Err(e) => {
                warn!(error = %e, "invalid entry");
                self.invalidate(InvalidReason::MissingEntry)
            }
        }
    }

    fn on_existence(&mut self, result: Result<bool, ApiError>) -> Vec<Effect> {
        if self.state != ControllerState::Validating {
            return Vec::new();
        }
        let Some((id, role)) = self.session.clone() else {
            return self.invalidate(InvalidReason::MissingEntry);
        };

        match result {
            Ok(true) => {
                self.enter(ControllerState::Validated);
                let fetch = self.begin_fetch(id.clone());
                self.subscribed = true;
                self.joined = true;
                self.enter(ControllerState::Subscribed);
                vec![
                    fetch,
                    Effect::Subscribe(id.clone()),
                    Effect::Emit(Outbound::Join(PresenceIntent::new(&id, role))),
                ]
            }
            Ok(false) => {
                info!(game_id = %id, "session does not exist");
                self.invalidate(InvalidReason::SessionMissing)
            }
            Err(e) => {
                warn!(game_id = %id, error = %e, "existence check failed");
                let mut effects = vec![self.notice(format!("could not check game {id}: {e}"))];
                effects.extend(self.invalidate(InvalidReason::ExistenceUnknown));
                effects
            }
        }
    }

    fn on_fetch(&mut self, generation: u64, result: Result<FetchOutcome, ApiError>) -> Vec<Effect> {
        if self.state != ControllerState::Subscribed {
            return Vec::new();
        }
        if generation != self.generation {
            debug!(generation, current = self.generation, "discarding stale fetch");
            return Vec::new();
        }

        match result {
            Ok(FetchOutcome::Found(state)) => {
                let expected = self.view.board().size();
                if state.board.size() != expected {
                    warn!(
                        expected,
                        got = state.board.size(),
                        "fetched board has the wrong dimension"
                    );
                    return vec![self.notice(format!(
                        "could not load game state: expected a {expected}x{expected} board, got {n}x{n}",
                        n = state.board.size()
                    ))];
                }
                self.view.apply_state(state, self.policy.as_ref());
                Vec::new()
            }
            Ok(FetchOutcome::NotFound) => self.invalidate(InvalidReason::SessionGone),
            Err(e) => {
                warn!(error = %e, "state fetch failed");
                vec![self.notice(format!("could not load game state: {e}"))]
            }
        }
    }

    fn on_channel(&mut self, event: ChannelEvent) -> Vec<Effect> {
        if self.state != ControllerState::Subscribed {
            return Vec::new();
        }
        let Some((id, _)) = &self.session else {
            return Vec::new();
        };

        match event {
            ChannelEvent::LinkUp => debug!(game_id = %id, "presence link up"),
            ChannelEvent::LinkDown { reason } => {
                debug!(game_id = %id, %reason, "presence link down");
                self.view.presence_mut().mark_stale();
            }
            ChannelEvent::Presence { game_id, online } => {
                if &game_id == id {
                    self.view.presence_mut().replace(online);
                } else {
                    debug!(%game_id, "ignoring presence for another session");
                }
            }
            ChannelEvent::BoardChanged(patch) => {
                if patch.game_id.as_ref().is_some_and(|other| other != id) {
                    debug!(game_id = ?patch.game_id, "ignoring update for another session");
                } else {
                    self.view.apply_patch(patch);
                }
            }
        }
        Vec::new()
    }

    fn dispose(&mut self) -> Vec<Effect> {
        let effects = self.release();
        self.enter(ControllerState::TornDown);
        effects
    }

    fn begin_fetch(&mut self, game_id: SessionId) -> Effect {
        self.generation += 1;
        self.view.begin_fetch();
        Effect::FetchState {
            game_id,
            generation: self.generation,
        }
    }

    /// Leave and unsubscribe if still joined.
    fn release(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.joined && !self.left {
            if let Some((id, role)) = &self.session {
                effects.push(Effect::Emit(Outbound::Leave(PresenceIntent::new(id, *role))));
            }
            self.left = true;
        }
        if self.subscribed {
            effects.push(Effect::Unsubscribe);
            self.subscribed = false;
        }
        effects
    }

    fn invalidate(&mut self, reason: InvalidReason) -> Vec<Effect> {
        let mut effects = self.release();
        self.invalid_reason = Some(reason);
        self.enter(ControllerState::Invalid);
        if !self.redirected {
            self.redirected = true;
            effects.push(Effect::Redirect(Route::Home));
        }
        effects
    }

    fn notice(&mut self, message: String) -> Effect {
        let notice = Notice {
            id: self.next_notice,
            message,
        };
        self.next_notice += 1;
        if self.notices.len() >= MAX_NOTICES {
            self.notices.remove(0);
        }
        self.notices.push(notice.clone());
        Effect::Notice(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SessionState;
    use crate::board::{Board, Mark};
    use crate::protocol::{BoardPatch, Mode};
    use crate::view::{BoardFilled, PresenceStatus};

    fn core(mode: Mode) -> SessionCore {
        SessionCore::new(
            Some(EntryContext::new(SessionId::from(42), mode)),
            7,
            Arc::new(BoardFilled),
        )
    }

    fn subscribed(mode: Mode) -> SessionCore {
        let mut core = core(mode);
        core.handle(Input::Start);
        core.handle(Input::ExistenceResolved(Ok(true)));
        assert_eq!(core.state(), ControllerState::Subscribed);
        core
    }

    fn found(next: Role) -> Result<FetchOutcome, ApiError> {
        let mut board = Board::new(7);
        board.set(6, 3, Mark::First).unwrap();
        Ok(FetchOutcome::Found(SessionState { board, next }))
    }

    fn intent(player: u8) -> PresenceIntent {
        PresenceIntent {
            game_id: SessionId::from(42),
            player,
        }
    }

    fn presence(online: &[&str]) -> Input {
        Input::Channel(ChannelEvent::Presence {
            game_id: SessionId::from(42),
            online: online.iter().map(|s| s.to_string()).collect(),
        })
    }

    #[test]
    fn start_checks_existence_first() {
        let mut core = core(Mode::Create);
        assert_eq!(
            core.handle(Input::Start),
            vec![Effect::CheckExistence(SessionId::from(42))]
        );
        assert_eq!(core.state(), ControllerState::Validating);
        assert!(core.handle(Input::Start).is_empty());
    }

    #[test]
    fn missing_entry_redirects_without_network() {
        for entry in [
            None,
            Some(EntryContext {
                game_id: None,
                mode: Some(Mode::Create),
            }),
        ] {
            let mut core = SessionCore::new(entry, 7, Arc::new(BoardFilled));
            assert_eq!(core.handle(Input::Start), vec![Effect::Redirect(Route::Home)]);
            let snap = core.snapshot();
            assert_eq!(snap.state, ControllerState::Invalid);
            assert_eq!(snap.invalid_reason, Some(InvalidReason::MissingEntry));
            assert!(snap.notices.is_empty());
        }
    }

    #[test]
    fn existing_session_fetches_subscribes_and_joins() {
        let mut core = core(Mode::Create);
        core.handle(Input::Start);
        let effects = core.handle(Input::ExistenceResolved(Ok(true)));
        assert_eq!(
            effects,
            vec![
                Effect::FetchState {
                    game_id: SessionId::from(42),
                    generation: 1,
                },
                Effect::Subscribe(SessionId::from(42)),
                Effect::Emit(Outbound::Join(intent(1))),
            ]
        );
        assert_eq!(core.state(), ControllerState::Subscribed);
    }

    #[test]
    fn missing_session_redirects_once_without_fetch() {
        let mut core = core(Mode::Join);
        core.handle(Input::Start);
        let effects = core.handle(Input::ExistenceResolved(Ok(false)));
        assert_eq!(effects, vec![Effect::Redirect(Route::Home)]);
        assert_eq!(core.state(), ControllerState::Invalid);
        assert!(core.handle(Input::ExistenceResolved(Ok(true))).is_empty());
        assert!(core.handle(Input::Dispose).is_empty());
    }

    #[test]
    fn unanswerable_existence_redirects_with_notice() {
        let mut core = core(Mode::Join);
        core.handle(Input::Start);
        let effects = core.handle(Input::ExistenceResolved(Err(ApiError::Unavailable)));
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], Effect::Notice(_)));
        assert_eq!(effects[1], Effect::Redirect(Route::Home));
        assert_eq!(
            core.snapshot().invalid_reason,
            Some(InvalidReason::ExistenceUnknown)
        );
    }

    #[test]
    fn fetch_maps_turn_and_copies_board() {
        let mut core = subscribed(Mode::Create);
        core.handle(Input::FetchResolved {
            generation: 1,
            result: found(Role::Joiner),
        });
        assert_eq!(core.view().next(), Some(Role::Joiner));
        assert_eq!(core.view().board().get(6, 3), Some(Mark::First));

        core.refetch().unwrap();
        core.handle(Input::FetchResolved {
            generation: 2,
            result: found(Role::Initiator),
        });
        assert_eq!(core.view().next(), Some(Role::Initiator));
    }

    #[test]
    fn not_found_fetch_leaves_and_redirects() {
        let mut core = subscribed(Mode::Join);
        let effects = core.handle(Input::FetchResolved {
            generation: 1,
            result: Ok(FetchOutcome::NotFound),
        });
        assert_eq!(
            effects,
            vec![
                Effect::Emit(Outbound::Leave(intent(2))),
                Effect::Unsubscribe,
                Effect::Redirect(Route::Home),
            ]
        );
        assert!(core.view().board().is_clear());
        assert_eq!(core.snapshot().invalid_reason, Some(InvalidReason::SessionGone));
        // Already left; dispose has nothing more to send
        assert!(core.handle(Input::Dispose).is_empty());
        assert_eq!(core.state(), ControllerState::TornDown);
    }

    #[test]
    fn transport_failure_on_fetch_is_a_notice_only() {
        let mut core = subscribed(Mode::Create);
        let effects = core.handle(Input::FetchResolved {
            generation: 1,
            result: Err(ApiError::Timeout),
        });
        assert!(matches!(effects.as_slice(), [Effect::Notice(_)]));
        assert_eq!(core.state(), ControllerState::Subscribed);
        assert!(core.view().board().is_clear());

        let id = core.snapshot().notices[0].id;
        core.handle(Input::DismissNotice(id));
        assert!(core.snapshot().notices.is_empty());
    }

    #[test]
    fn fetched_board_of_another_size_is_rejected() {
        let mut core = subscribed(Mode::Create);
        let effects = core.handle(Input::FetchResolved {
            generation: 1,
            result: Ok(FetchOutcome::Found(SessionState {
                board: Board::new(3),
                next: Role::Joiner,
            })),
        });
        assert!(matches!(effects.as_slice(), [Effect::Notice(_)]));
        assert_eq!(core.view().board().size(), 7);
        assert_eq!(core.view().next(), None);
        assert_eq!(core.state(), ControllerState::Subscribed);
    }

    #[test]
    fn undismissed_notices_are_capped() {
        let mut core = subscribed(Mode::Create);
        for _ in 0..MAX_NOTICES + 3 {
            core.refetch().unwrap();
            let generation = core.generation;
            core.handle(Input::FetchResolved {
                generation,
                result: Err(ApiError::Timeout),
            });
        }
        let notices = core.snapshot().notices;
        assert_eq!(notices.len(), MAX_NOTICES);
        // oldest dropped first
        assert_eq!(notices[0].id, 4);
        assert_eq!(notices[MAX_NOTICES - 1].id, (MAX_NOTICES + 3) as u64);
    }

    #[test]
    fn padded_numeric_id_still_matches_server_events() {
        let entry = EntryContext::new(SessionId::parse("042").unwrap(), Mode::Create);
        let mut core = SessionCore::new(Some(entry), 7, Arc::new(BoardFilled));
        core.handle(Input::Start);
        let effects = core.handle(Input::ExistenceResolved(Ok(true)));
        assert!(effects.contains(&Effect::Emit(Outbound::Join(intent(1)))));

        core.handle(presence(&["p1"]));
        assert_eq!(core.view().joined_count(), 1);
    }

    #[test]
    fn stale_generation_is_ignored() {
        let mut core = subscribed(Mode::Create);
        core.refetch().unwrap();
        core.handle(Input::FetchResolved {
            generation: 1,
            result: found(Role::Joiner),
        });
        assert_eq!(core.view().next(), None);
    }

    #[test]
    fn presence_snapshots_replace_count() {
        let mut core = subscribed(Mode::Create);
        core.handle(presence(&["a", "b", "c"]));
        assert_eq!(core.view().joined_count(), 3);
        core.handle(presence(&["a"]));
        assert_eq!(core.view().joined_count(), 1);
    }

    #[test]
    fn presence_for_other_session_is_ignored() {
        let mut core = subscribed(Mode::Create);
        core.handle(Input::Channel(ChannelEvent::Presence {
            game_id: SessionId::from(7),
            online: vec!["x".to_string()],
        }));
        assert_eq!(core.view().joined_count(), 0);
    }

    #[test]
    fn link_down_marks_presence_stale() {
        let mut core = subscribed(Mode::Create);
        core.handle(presence(&["a", "b"]));
        core.handle(Input::Channel(ChannelEvent::LinkDown {
            reason: "reset".to_string(),
        }));
        assert_eq!(core.view().presence().status(), PresenceStatus::Stale);
        assert_eq!(core.view().joined_count(), 2);
        core.handle(presence(&["a"]));
        assert_eq!(core.view().presence().status(), PresenceStatus::Live);
    }

    #[test]
    fn channel_update_before_fetch_applies() {
        let mut core = subscribed(Mode::Create);
        core.handle(Input::Channel(ChannelEvent::BoardChanged(BoardPatch {
            next: Some(2),
            ..Default::default()
        })));
        assert_eq!(core.view().next(), Some(Role::Joiner));
    }

    #[test]
    fn restart_eligibility_resets_on_refetch() {
        let mut core = SessionCore::new(
            Some(EntryContext::new(SessionId::from(42), Mode::Create)),
            7,
            Arc::new(crate::view::PolicyFn(|_: &Board, _: Role| true)),
        );
        core.handle(Input::Start);
        core.handle(Input::ExistenceResolved(Ok(true)));
        core.handle(Input::FetchResolved {
            generation: 1,
            result: found(Role::Initiator),
        });
        assert!(core.view().restart_eligible());
        core.refetch().unwrap();
        assert!(!core.view().restart_eligible());
    }

    #[test]
    fn dispose_leaves_once_and_discards_later_input() {
        let mut core = subscribed(Mode::Create);
        assert_eq!(
            core.handle(Input::Dispose),
            vec![Effect::Emit(Outbound::Leave(intent(1))), Effect::Unsubscribe]
        );
        assert!(core.handle(Input::Dispose).is_empty());
        assert!(core
            .handle(Input::FetchResolved {
                generation: 1,
                result: found(Role::Joiner),
            })
            .is_empty());
        assert!(core.handle(presence(&["a"])).is_empty());
        assert_eq!(core.view().next(), None);
        assert_eq!(core.view().joined_count(), 0);
        assert_eq!(core.refetch(), Err(TransitionError::TornDown));
    }

    #[test]
    fn dispose_before_validation_emits_nothing() {
        let mut core = core(Mode::Create);
        core.handle(Input::Start);
        assert!(core.handle(Input::Dispose).is_empty());
        assert!(core.handle(Input::ExistenceResolved(Ok(true))).is_empty());
    }

    #[test]
    fn refetch_requires_subscription() {
        let mut core = core(Mode::Create);
        assert_eq!(
            core.refetch(),
            Err(TransitionError::InvalidTransition {
                from: ControllerState::Unvalidated,
                action: "refetch",
            })
        );
    }
}
