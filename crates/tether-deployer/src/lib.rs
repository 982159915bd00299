// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Runs a workload in a short-lived Pod and attaches to it.
//!
//! A [`Session`] connects to the cluster, submits one Pod through the
//! [`PodController`], follows it with a [`PhaseWatcher`] until the main
//! container runs, and hands out a [`DuplexChannel`] wired to that
//! container's standard streams. The Pod is deleted exactly once on every
//! exit path.
//!
//! # Usage
//!
//! ```ignore
//! let config = tether_config::load_config_with_file("session.toml")?;
//! let mut session = Session::run(&config, Workload::default(), CancellationToken::new()).await?;
//! let mut output = Vec::new();
//! session.channel().unwrap().read_to_end(&mut output).await?;
//! let outcome = session.finish().await?;
//! ```

mod controller;
mod error;
mod phase;
mod pod;
mod release;
mod session;
mod transport;
mod types;
mod watch;

pub use controller::{
	DeleteResult, Deployment, DeploymentState, PhaseTransition, PodController,
	WATCH_FAILURE_BUDGET,
};
pub use error::{
	AttachError, AttachErrorKind, DeleteError, SessionError, SubmitError, SubmitErrorKind,
	TransportBrokenError, WatchError, WatchErrorKind,
};
pub use phase::{observe, ContainerSnapshot, ContainerStateSnapshot, Observation, Phase};
pub use pod::{MANAGED_LABEL, SESSION_ID_LABEL};
pub use release::{PodRelease, ReleaseOutcome};
pub use session::Session;
pub use transport::{attach, ChannelReader, ChannelWriter, DuplexChannel};
pub use types::{Diagnostics, SessionId, SessionOutcome, StderrMode, Workload};
pub use watch::PhaseWatcher;
