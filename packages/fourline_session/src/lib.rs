//! fourline session - client-side sync for a two-party grid game
//!
//! A [`SessionController`] validates that a session exists, fetches its
//! board and turn, joins the session's presence group, and keeps a
//! [`SessionView`] current from the realtime channel until it is disposed.
//! The three collaborators sit behind traits ([`ExistenceCheck`],
//! [`StateFetcher`], [`PresenceChannel`]); [`HttpGameApi`] and
//! [`SocketIoChannel`] are the network implementations.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fourline_session::{
//!     ApiConfig, ChannelConfig, ControllerEvent, EntryContext, HttpGameApi, Mode, SessionController,
//!     SessionId, SocketIoChannel,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let api = Arc::new(HttpGameApi::new(&ApiConfig::default()).unwrap());
//!     let channel = Arc::new(SocketIoChannel::new(ChannelConfig::default()));
//!     let controller = SessionController::new(api.clone(), api, channel);
//!
//!     let entry = EntryContext::new(SessionId::from(42), Mode::Create);
//!     let mut handle = controller.start(Some(entry));
//!
//!     let mut state = handle.watch();
//!     loop {
//!         tokio::select! {
//!             Ok(()) = state.changed() => {
//!                 let snap = state.borrow().clone();
//!                 println!("Joined: {}", snap.view.joined_count());
//!                 println!("{}", snap.view.board());
//!             }
//!             Some(event) = handle.next_event() => {
//!                 if let ControllerEvent::Redirect(route) = event {
//!                     println!("returning {route}");
//!                     break;
//!                 }
//!             }
//!         }
//!     }
//!
//!     handle.dispose().await;
//! }
//! ```

pub mod api;
pub mod board;
pub mod channel;
mod controller;
pub mod engine_io;
mod machine;
pub mod protocol;
mod socket;
mod view;

pub use api::{ApiConfig, ApiError, ExistenceCheck, FetchOutcome, HttpGameApi, SessionState, StateFetcher};
pub use board::{Board, BoardError, DEFAULT_BOARD_SIZE, Mark};
pub use channel::{ChannelEvent, Outbound, PresenceChannel, Subscription, SubscriptionRemote};
pub use controller::{ControllerEvent, SessionController, SessionHandle};
pub use machine::{
    ControllerState, Effect, Input, InvalidReason, MAX_NOTICES, Notice, Route, SessionCore, SessionSnapshot,
    TransitionError,
};
pub use protocol::{EntryContext, EntryError, Mode, PartyId, PresenceIntent, Role, SessionId};
pub use socket::{ChannelConfig, ChannelError, SocketIoChannel};
pub use view::{BoardFilled, PolicyFn, PresenceSet, PresenceStatus, RestartPolicy, SessionView};
