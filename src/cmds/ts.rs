// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `ts`: prints the timecode the formatter would produce for an instant and
//! rate. Grounded in moonfire-nvr's `cmds::ts`, repurposed here for this
//! crate's own Timecode Formatter rather than a recording-database lookup.

use base::time::Instant;
use base::Error;
use bpaf::Bpaf;

use crate::timecode;

/// Print the HH:MM:SS.FF timecode for an instant at a given frame rate.
#[derive(Bpaf, Debug)]
#[bpaf(command("ts"))]
pub struct Args {
    /// Instant to format: nanoseconds since the epoch, an RFC-3339-like
    /// string, or `now`.
    #[bpaf(positional("TIME"))]
    time: String,

    /// Frame rate to format against.
    #[bpaf(positional("RATE"))]
    rate: u32,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let instant = if args.time == "now" {
        Instant::now()
    } else {
        Instant::parse(&args.time)?
    };
    println!("{}", timecode::format(instant, args.rate));
    Ok(0)
}
