//! Drive an interactive proof checker over a stream of source chunks.
//!
//! A [`Driver`] takes chunks of a proof script, feeds them to the checker
//! (Coq through SerAPI's `sertop`, or `lean --server` for Lean 3), and
//! returns each chunk cut into [`Fragment`]s: plain text, and sentences
//! annotated with the messages and goals the checker reported for them.
//! Concatenating a chunk's fragments gives back the chunk byte for byte.
//!
//! Statements the checker rejects do not abort a run. They are reported to
//! an [`Observer`] and the run goes on; only configuration and protocol
//! faults come back as a [`DriverError`].
//!
//! ```rust,no_run
//! use prover_session::{Chunk, Driver, SerapiConfig, Sertop};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut sertop = Sertop::new(SerapiConfig::default())?;
//! let annotated = sertop
//!     .annotate(vec![Chunk::new("Check 1.")])
//!     .await?;
//! for fragment in &annotated[0] {
//!     println!("{fragment:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod config;
pub mod document;
pub mod driver;
pub mod gensym;
pub mod lean3;
pub mod mocks;
pub mod observer;
pub mod serapi;
pub mod text;
pub mod transport;
pub mod types;

pub use assembler::{assemble, StatementBackend};
pub use config::{Lean3Config, SerapiConfig};
pub use driver::Driver;
pub use gensym::{Gensym, GensymTable};
pub use lean3::{Lean3, Lean3Session};
pub use observer::{CollectingObserver, Level, Notification, Observer, StderrObserver};
pub use serapi::{SerapiSession, Sertop};
pub use text::TextView;
pub use transport::{ProcessTransport, Transport};
pub use types::{
    fragments_text, Anchor, Chunk, DriverError, Fragment, GeneratorInfo, Goal, Hypothesis,
    Message, Position, Range, StatementId,
};
