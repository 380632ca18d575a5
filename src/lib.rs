//! # Quiz Store
//!
//! Data access for a live quiz: questions, participants and their answers,
//! a single quiz-mode switch, live change notifications and question images.
//!
//! ## Core Concepts
//!
//! - **Records**: typed rows over a hosted table service; questions and users
//!   are soft-deleted, never removed
//! - **Quiz mode**: one shared row, created lazily and idempotently
//! - **Change feed**: any change to a table re-reads the whole collection and
//!   hands it to subscribers
//! - **Media**: validated uploads to object storage plus local compression
//!
//! ## Example
//!
//! ```ignore
//! use quiz_store::{QuizClient, QuestionDraft, QuestionOption, StoreConfig};
//!
//! let client = QuizClient::connect(&StoreConfig::from_env()?)?;
//!
//! let question = client
//!     .store()
//!     .create_question(
//!         QuestionDraft::new(1, "2 + 2?", vec![
//!             QuestionOption::text("3"),
//!             QuestionOption::text("4"),
//!         ])
//!         .with_correct_answer(1),
//!     )
//!     .await?;
//!
//! let live = client
//!     .feed()
//!     .subscribe_questions(|questions| println!("{} questions", questions.len()))
//!     .await?;
//!
//! client.store().start_quiz().await?;
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod media;
pub mod records;
pub mod stats;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use backend::{Backend, BlobBackend, MemoryBackend, RealtimeTransport, RestBackend};
pub use client::QuizClient;
pub use config::{ChangeSource, StoreConfig};
pub use error::{MediaError, MediaResult, Result, StoreError};
pub use media::{
    compress_and_encode, estimate_size, generate_thumbnail, process_many, to_base64,
    validate_image, CompressOptions, MediaFile, MediaLimits, MediaStore,
};
pub use records::{Filter, Query, UpsertMode};
pub use stats::{accuracy, compute_user_stats};
pub use store::QuizStore;
pub use subscriptions::{
    ChangeBroadcaster, ChangeEvent, ChangeFeed, ChangeKind, ChangeStream, ChangeTransport,
    FallbackTransport, FeedSubscription, PollingTransport, SubscriptionId,
};
pub use types::*;
