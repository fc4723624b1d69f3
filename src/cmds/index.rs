// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `index`: dumps a file's parsed `UbvIndex` for diagnosis. No side effects
//! beyond stdout, in the style of moonfire-nvr's `cmds::ts`.

use std::path::PathBuf;

use base::Error;
use bpaf::Bpaf;
use serde::Serialize;

use crate::sidecar;

/// Parse a UBV file's sidecar index and print it.
#[derive(Bpaf, Debug)]
#[bpaf(command("index"))]
pub struct Args {
    /// Print as JSON rather than a human-readable table.
    #[bpaf(switch)]
    json: bool,

    /// Track id to treat as video when the analyzer must be invoked.
    #[bpaf(argument("ID"), fallback(7))]
    video_track: u32,

    #[bpaf(positional("FILE"))]
    file: PathBuf,
}

#[derive(Serialize)]
struct TrackView {
    track_id: u32,
    kind: &'static str,
    rate: u32,
    frame_count: u64,
    start_tc: String,
    last_tc: String,
}

#[derive(Serialize)]
struct PartitionView {
    index: u32,
    frame_count: u64,
    video_track_count: u32,
    audio_track_count: u32,
    tracks: Vec<TrackView>,
}

#[derive(Serialize)]
struct IndexView {
    filename: String,
    complete: bool,
    partitions: Vec<PartitionView>,
}

pub fn run(args: Args) -> Result<i32, Error> {
    // `with_audio: true` so the dump shows every track regardless of what
    // a later `remux` invocation would request.
    let index = sidecar::read_index(&args.file, args.video_track, true)?;

    let view = IndexView {
        filename: index.filename.display().to_string(),
        complete: index.complete,
        partitions: index
            .partitions
            .iter()
            .map(|p| PartitionView {
                index: p.index,
                frame_count: p.frame_count,
                video_track_count: p.video_track_count,
                audio_track_count: p.audio_track_count,
                tracks: p
                    .tracks
                    .values()
                    .map(|t| TrackView {
                        track_id: t.track_id,
                        kind: match t.kind {
                            crate::index::TrackKind::Video => "video",
                            crate::index::TrackKind::Audio => "audio",
                        },
                        rate: t.rate,
                        frame_count: t.frame_count,
                        start_tc: t.start_tc.to_string(),
                        last_tc: t.last_tc.to_string(),
                    })
                    .collect(),
            })
            .collect(),
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&view)
                .map_err(|e| base::err!(Internal, base::msg("serializing index: {e}")))?
        );
    } else {
        println!("{}  complete={}", view.filename, view.complete);
        for p in &view.partitions {
            println!(
                "  partition {}: {} frames, {} video track(s), {} audio track(s)",
                p.index, p.frame_count, p.video_track_count, p.audio_track_count
            );
            for t in &p.tracks {
                println!(
                    "    track {} ({}): rate={} frames={} start={} last={}",
                    t.track_id, t.kind, t.rate, t.frame_count, t.start_tc, t.last_tc
                );
            }
        }
    }
    Ok(0)
}
