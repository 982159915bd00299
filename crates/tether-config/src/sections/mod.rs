// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod connection;
mod logging;
mod pod;
mod timeouts;

pub use connection::*;
pub use logging::*;
pub use pod::*;
pub use timeouts::*;
