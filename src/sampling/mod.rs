//! Sampling window engine
//!
//! A [`SamplingSession`] collects raw numeric samples from the live line
//! stream while armed, enforces the capacity and minimum of its
//! [`SamplingProfile`](crate::config::SamplingProfile), and reduces the
//! finished window to a [`WindowSummary`].
//!
//! Sessions do not touch the transport. They observe lines through a
//! subscription and keep their own state, so stopping a session never
//! interrupts telemetry.
//!
//! # Example
//!
//! ```ignore
//! use labdaq::config::SamplingProfile;
//! use labdaq::sampling::SamplingSession;
//!
//! let lines = frontend.subscribe_lines();
//! let mut session = SamplingSession::new(SamplingProfile::period_blocks());
//! session.start();
//!
//! while session.state() == SessionState::Armed {
//!     session.pump(&lines);
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//!
//! let summary = session.finalize()?;
//! println!("block sums: {:?}", summary.block_sums);
//! ```

pub mod extract;
pub mod window;

pub use extract::{first_number, numbers};
pub use window::{SampleWindow, SamplingSession, SessionState, WindowSummary};
