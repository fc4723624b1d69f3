// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

mod error;
pub mod time;
pub mod tracing_setup;

pub use crate::error::{bail, err, msg, source, Error, ErrorKind, ResultExt};
