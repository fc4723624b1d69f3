// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `remux`: the primary subcommand. Reads one or more UBV files, writes
//! elementary streams next to (or under) them, and optionally invokes the
//! muxer.

use std::path::PathBuf;

use base::Error;
use bpaf::Bpaf;
use tracing::info;

use crate::orchestrate::{self, OutputFolder, RemuxOptions};

/// Extract elementary streams from UBV recordings and mux them into MP4.
#[derive(Bpaf, Debug)]
#[bpaf(command("remux"))]
pub struct Args {
    /// Extract the audio track.
    #[bpaf(argument("BOOL"), fallback(true))]
    with_audio: bool,

    /// Extract the video track.
    #[bpaf(argument("BOOL"), fallback(true))]
    with_video: bool,

    /// Track id to treat as video: 7 for H.264, 1003 for HEVC.
    #[bpaf(argument("ID"), fallback(7))]
    video_track: u32,

    /// Override the video track's inferred frame rate.
    #[bpaf(argument("FPS"))]
    force_rate: Option<u32>,

    /// Destination directory, or SRC-FOLDER to write alongside each input.
    #[bpaf(argument("DIR"), fallback("SRC-FOLDER".to_string()))]
    output_folder: String,

    /// Invoke the external muxer after extraction.
    #[bpaf(argument("BOOL"), fallback(true))]
    mp4: bool,

    /// UBV files to process.
    #[bpaf(positional("FILE"), some("at least one FILE is required"))]
    files: Vec<PathBuf>,
}

pub fn run(args: Args) -> Result<i32, Error> {
    let output_folder = if args.output_folder == "SRC-FOLDER" {
        OutputFolder::AlongsideInput
    } else {
        OutputFolder::Dir(PathBuf::from(args.output_folder))
    };
    let opts = RemuxOptions {
        with_audio: args.with_audio,
        with_video: args.with_video,
        video_track: args.video_track,
        force_rate: args.force_rate,
        output_folder,
        mp4: args.mp4,
    };
    for file in &args.files {
        info!(file = %file.display(), "remuxing");
        orchestrate::remux_one(file, &opts)?;
    }
    Ok(0)
}
