// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The Index Reader: turns a `ubnt_ubvinfo` sidecar dump (cached on disk or
//! produced by spawning the analyzer) into a [`UbvIndex`].
//!
//! This module never touches the UBV file's essence bytes; that's
//! [`crate::essence`]'s job. It only reads the analyzer's textual output.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use base::time::Instant;
use base::{bail, err, msg, Error, ErrorKind, ResultExt};
use tracing::warn;

use crate::index::{classify_track, Partition, Track, TrackKind, UbvIndex, RATE_PROBE_WINDOW_LEN};

const ANALYZER_NAME: &str = "ubnt_ubvinfo";
const ANALYZER_FALLBACK: &str = "/usr/share/unifi-protect/app/node_modules/.bin/ubnt_ubvinfo";

/// Locates the `ubnt_ubvinfo` analyzer: first on `PATH`, then at Protect's
/// well-known install location. Not cached across calls; this runs once per
/// input file at most, so the lookup cost is noise next to spawning it.
pub fn find_analyzer() -> Result<PathBuf, Error> {
    if let Some(path_var) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(ANALYZER_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    let fallback = PathBuf::from(ANALYZER_FALLBACK);
    if fallback.is_file() {
        return Ok(fallback);
    }
    bail!(
        NotFound,
        msg("{ANALYZER_NAME} not found on PATH or at {ANALYZER_FALLBACK}")
    );
}

/// Where the sidecar's `<ubv>.txt` dump would live next to a UBV file.
fn sidecar_path(ubv_path: &Path) -> PathBuf {
    let mut name: OsString = ubv_path.as_os_str().to_owned();
    name.push(".txt");
    PathBuf::from(name)
}

/// Spawns the analyzer and drains its stdout synchronously, in full, before
/// calling `wait()`. There's no cancellation path in this core other than
/// killing the child process out of band; this function blocks until the
/// child exits.
fn spawn_analyzer(
    analyzer: &Path,
    ubv_path: &Path,
    video_track_id: u32,
    with_audio: bool,
) -> Result<String, Error> {
    let mut cmd = Command::new(analyzer);
    cmd.arg("-P");
    if !with_audio {
        // Restricting to the video track is a pure optimization: it lets
        // the analyzer skip decoding the audio track's frame table.
        cmd.arg("-t").arg(video_track_id.to_string());
    }
    cmd.arg("-f").arg(ubv_path);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd
        .spawn()
        .map_err(|e| err!(Unavailable, msg("spawning {}: {e}", analyzer.display())))?;
    let stdout = child
        .stdout
        .take()
        .expect("stdout was requested as piped");
    let mut text = String::new();
    for line in BufReader::new(stdout).lines() {
        let line = line.err_kind(ErrorKind::DataLoss)?;
        text.push_str(&line);
        text.push('\n');
    }
    let status = child
        .wait()
        .map_err(|e| err!(Internal, msg("waiting on {}: {e}", analyzer.display())))?;
    if !status.success() {
        bail!(
            Unavailable,
            msg("{} exited with {status}", analyzer.display())
        );
    }
    Ok(text)
}

/// Builds the index for `ubv_path`: prefers a cached `<ubv>.txt` sidecar if
/// present, otherwise spawns the analyzer.
pub fn read_index(ubv_path: &Path, video_track_id: u32, with_audio: bool) -> Result<UbvIndex, Error> {
    let cached = sidecar_path(ubv_path);
    let text = if cached.is_file() {
        std::fs::read_to_string(&cached)
            .map_err(|e| err!(Internal, msg("reading {}: {e}", cached.display())))?
    } else {
        let analyzer = find_analyzer()?;
        spawn_analyzer(&analyzer, ubv_path, video_track_id, with_audio)?
    };
    parse_sidecar_text(&text, ubv_path.to_path_buf())
}

const PARTITION_MARKER: &str = "----------- PARTITION START -----------";

/// Parses an already-retrieved sidecar dump. Split out from [`read_index`]
/// so tests can exercise the grammar against literal fixtures without an
/// analyzer or a filesystem.
pub fn parse_sidecar_text(text: &str, filename: PathBuf) -> Result<UbvIndex, Error> {
    let mut index = UbvIndex::new(filename);
    let mut current: Option<Partition> = None;

    for line in text.lines() {
        if line.trim() == PARTITION_MARKER {
            if let Some(p) = current.take() {
                index.partitions.push(finalize_partition(p)?);
            }
            current = Some(Partition::new(index.partitions.len() as u32));
            continue;
        }
        if !line.starts_with(' ') && !line.starts_with('\t') {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() <= 8 {
            continue;
        }
        let partition = current
            .as_mut()
            .ok_or_else(|| err!(DataLoss, msg("frame row appeared before any partition marker")))?;
        parse_frame_row(&tokens, partition)?;
    }
    if let Some(p) = current.take() {
        index.partitions.push(finalize_partition(p)?);
    }
    index.complete = true;
    Ok(index)
}

fn parse_col<T: std::str::FromStr>(tokens: &[&str], col: usize, name: &str) -> Result<T, Error> {
    tokens
        .get(col)
        .ok_or_else(|| err!(DataLoss, msg("missing column {name}")))?
        .parse()
        .map_err(|_| err!(DataLoss, msg("invalid column {name}: {:?}", tokens.get(col))))
}

fn parse_frame_row(tokens: &[&str], partition: &mut Partition) -> Result<(), Error> {
    let track_id: u32 = parse_col(tokens, 1, "TID")?;
    let offset: u64 = parse_col(tokens, 3, "OFFSET")?;
    let size: u32 = parse_col(tokens, 4, "SIZE")?;
    let wc: u64 = parse_col(tokens, 7, "WC")?;
    let wc_tbc: u64 = parse_col(tokens, 8, "WC_TBC")?;

    let kind =
        classify_track(track_id).ok_or_else(|| err!(DataLoss, msg("unrecognized track id {track_id}")))?;
    let tc = Instant::from_ticks(wc, wc_tbc)
        .ok_or_else(|| err!(DataLoss, msg("track {track_id}: zero timebase (WC_TBC=0)")))?;

    let is_new = !partition.tracks.contains_key(&track_id);
    let track = partition
        .tracks
        .entry(track_id)
        .or_insert_with(|| Track::new(track_id, kind, tc));

    if is_new {
        match kind {
            TrackKind::Audio => {
                // The sidecar's WC_TBC column is already the track's sample
                // rate in Hz for audio; no probing needed.
                track.rate = u32::try_from(wc_tbc)
                    .map_err(|_| err!(DataLoss, msg("audio track {track_id}: WC_TBC {wc_tbc} out of range")))?;
                partition.audio_track_count += 1;
            }
            TrackKind::Video => partition.video_track_count += 1,
        }
    } else {
        track.last_tc = tc;
    }

    if kind == TrackKind::Video {
        if let Some(prev_wc) = track.probe_last_wc {
            if wc > prev_wc && track.rate_probe_window.len() < RATE_PROBE_WINDOW_LEN {
                let delta = wc - prev_wc;
                if let Ok(ratio) = u32::try_from(wc_tbc / delta) {
                    track.rate_probe_window.push(ratio);
                }
            }
        }
        track.probe_last_wc = Some(wc);
    }

    track.frame_count += 1;
    partition.frame_count += 1;
    partition.frames.push(crate::index::Frame {
        track_id,
        offset,
        size,
    });
    Ok(())
}

/// The range a probed rate must fall in to be accepted outright (spec §4.1
/// step 3). A mode of exactly 0 is handled separately as the timelapse
/// case; a mode at or above this range fails fatally.
const ACCEPTED_RATE_RANGE: std::ops::Range<u32> = 1..76;

fn infer_video_rate(track_id: u32, window: &[u32]) -> Result<(u32, bool), Error> {
    if window.is_empty() {
        // A single frame on this track, or every delta overflowed: nothing
        // to probe. Assume a still/timelapse track rather than fail the
        // whole remux over it.
        return Ok((1, true));
    }
    let mut counts: BTreeMap<u32, u32> = BTreeMap::new();
    for &ratio in window {
        *counts.entry(ratio).or_insert(0) += 1;
    }
    // Ties broken towards the smaller value, so a handful of noisy zero
    // samples alongside a clear majority rate don't flip the outcome.
    let (mode, _) = counts
        .into_iter()
        .max_by_key(|&(value, count)| (count, std::cmp::Reverse(value)))
        .expect("window is non-empty");

    if mode == 0 {
        return Ok((1, true));
    }
    if ACCEPTED_RATE_RANGE.contains(&mode) {
        return Ok((mode, false));
    }
    bail!(
        FailedPrecondition,
        msg("could not infer frame rate for track {track_id}: probe mode {mode} out of range; pass --force-rate")
    )
}

fn finalize_partition(mut partition: Partition) -> Result<Partition, Error> {
    let video_ids: Vec<u32> = partition
        .tracks
        .values()
        .filter(|t| t.kind == TrackKind::Video)
        .map(|t| t.track_id)
        .collect();
    for track_id in video_ids {
        let window = partition.tracks[&track_id].rate_probe_window.clone();
        let (rate, warned) = infer_video_rate(track_id, &window)?;
        if warned {
            warn!(track_id, "could not determine a frame rate; assuming 1 fps");
        }
        partition.tracks.get_mut(&track_id).unwrap().rate = rate;
    }
    Ok(partition)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_line(tid: u32, offset: u64, size: u32, wc: u64, wc_tbc: u64) -> String {
        format!("    {tid} 0 0 {offset} {size} 0 0 {wc} {wc_tbc}")
    }

    #[test]
    fn parses_single_partition_video_only() {
        // WC_TBC=90000, WC advancing by 3000 per frame -> ratio 90000/3000 = 30 fps.
        let mut text = String::from("ubnt_ubvinfo v1\n----------- PARTITION START -----------\n");
        let mut wc = 0u64;
        for i in 0..5 {
            text.push_str(&frame_line(7, i * 1000, 500, wc, 90000));
            text.push('\n');
            wc += 3000;
        }
        let idx = parse_sidecar_text(&text, "cam.ubv".into()).unwrap();
        assert!(idx.complete);
        assert_eq!(idx.partitions.len(), 1);
        let p = &idx.partitions[0];
        assert_eq!(p.frame_count, 5);
        assert_eq!(p.video_track_count, 1);
        assert_eq!(p.tracks[&7].rate, 30);
    }

    #[test]
    fn unknown_track_id_is_fatal() {
        let text = format!(
            "----------- PARTITION START -----------\n{}\n",
            frame_line(42, 0, 10, 0, 30)
        );
        let err = parse_sidecar_text(&text, "cam.ubv".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
    }

    #[test]
    fn zero_timebase_is_fatal() {
        let text = format!(
            "----------- PARTITION START -----------\n{}\n",
            frame_line(7, 0, 10, 0, 0)
        );
        let err = parse_sidecar_text(&text, "cam.ubv".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
    }

    #[test]
    fn single_frame_video_track_assumes_one_fps() {
        let text = format!(
            "----------- PARTITION START -----------\n{}\n",
            frame_line(7, 0, 10, 0, 30)
        );
        let idx = parse_sidecar_text(&text, "cam.ubv".into()).unwrap();
        assert_eq!(idx.partitions[0].tracks[&7].rate, 1);
    }

    #[test]
    fn multiple_partitions_tracked_separately() {
        let mut text = String::new();
        for _ in 0..2 {
            text.push_str("----------- PARTITION START -----------\n");
            text.push_str(&frame_line(7, 0, 10, 0, 30));
            text.push('\n');
            text.push_str(&frame_line(7, 10, 10, 30, 30));
            text.push('\n');
        }
        let idx = parse_sidecar_text(&text, "cam.ubv".into()).unwrap();
        assert_eq!(idx.partitions.len(), 2);
    }

    #[test]
    fn marker_must_match_the_whole_line_exactly() {
        // A line that merely mentions the marker text, without being the
        // marker line itself, must not start a new partition.
        let text = format!(
            "note: look for PARTITION START below\n----------- PARTITION START -----------\n{}\n",
            frame_line(7, 0, 10, 0, 30)
        );
        let idx = parse_sidecar_text(&text, "cam.ubv".into()).unwrap();
        assert_eq!(idx.partitions.len(), 1);
        assert_eq!(idx.partitions[0].frame_count, 1);
    }

    #[test]
    fn rate_probe_mode_zero_assumes_one_fps_with_warning() {
        // WC advances in much larger steps than WC_TBC, so every probe
        // ratio floors to 0: a genuine timelapse track, not noise.
        let mut text = String::from("----------- PARTITION START -----------\n");
        let mut offset = 0u64;
        let mut wc = 0u64;
        for _ in 0..5 {
            text.push_str(&frame_line(7, offset, 10, wc, 1));
            text.push('\n');
            offset += 10;
            wc += 5;
        }
        let idx = parse_sidecar_text(&text, "cam.ubv".into()).unwrap();
        assert_eq!(idx.partitions[0].tracks[&7].rate, 1);
    }

    #[test]
    fn rate_probe_mode_above_range_is_fatal() {
        let mut text = String::from("----------- PARTITION START -----------\n");
        let mut wc = 0u64;
        for _ in 0..5 {
            text.push_str(&frame_line(7, wc, 10, wc, 100));
            text.push('\n');
            wc += 1;
        }
        let err = parse_sidecar_text(&text, "cam.ubv".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    }

    #[test]
    fn audio_rate_is_wc_tbc_of_first_frame() {
        let text = format!(
            "----------- PARTITION START -----------\n{}\n",
            frame_line(1000, 0, 10, 0, 48000)
        );
        let idx = parse_sidecar_text(&text, "cam.ubv".into()).unwrap();
        assert_eq!(idx.partitions[0].tracks[&1000].rate, 48000);
    }
}
