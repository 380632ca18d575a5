//! Live collection updates.
//!
//! A [`ChangeTransport`] reports that a table changed; a [`ChangeFeed`]
//! reacts by re-reading the whole collection through the
//! [`QuizStore`](crate::QuizStore) and passing the result to handlers.
//!
//! Transports:
//! - [`ChangeBroadcaster`]: in-process push, used by the memory backend
//! - [`PollingTransport`]: snapshot comparison for any backend
//! - [`RealtimeTransport`](crate::RealtimeTransport): the hosted service's
//!   websocket channel
//! - [`FallbackTransport`]: a push transport with polling behind it
//!
//! # Example
//!
//! ```ignore
//! let feed = ChangeFeed::new(store.clone(), transport);
//!
//! let questions = feed
//!     .subscribe_questions(|questions| println!("{} questions", questions.len()))
//!     .await?;
//!
//! // later
//! questions.close();
//! ```

mod feed;
mod manager;
mod transport;
mod types;

pub use feed::{ChangeFeed, FeedSubscription};
pub use manager::{ChangeBroadcaster, DEFAULT_BUFFER_SIZE};
pub use transport::{ChangeTransport, FallbackTransport, PollingTransport};
pub use types::{ChangeEvent, ChangeKind, ChangeStream, SubscriptionId};
