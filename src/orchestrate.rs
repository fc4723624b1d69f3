// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The thin orchestrator tying the Index Reader, Essence Extractor, and
//! Timecode Formatter together into the `remux` operation (spec §4.4).

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use base::{err, msg, Error};
use tracing::{info, warn};

use crate::essence::{self, Sink};
use crate::{sidecar, timecode};

/// The flags the `remux` subcommand passes down; the core never parses
/// strings itself (SPEC_FULL §2, "Configuration").
pub struct RemuxOptions {
    pub with_audio: bool,
    pub with_video: bool,
    pub video_track: u32,
    pub force_rate: Option<u32>,
    pub output_folder: OutputFolder,
    pub mp4: bool,
}

pub enum OutputFolder {
    /// The literal `SRC-FOLDER` sentinel: write alongside the input.
    AlongsideInput,
    Dir(PathBuf),
}

/// Processes one UBV file end to end: index, optional rate override,
/// per-partition extraction, and (if requested) a muxer invocation.
pub fn remux_one(ubv_path: &Path, opts: &RemuxOptions) -> Result<(), Error> {
    let mut index = sidecar::read_index(ubv_path, opts.video_track, opts.with_audio)?;
    if let Some(rate) = opts.force_rate {
        index.override_video_rates(rate);
    }

    let dest_dir = match &opts.output_folder {
        OutputFolder::AlongsideInput => ubv_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        OutputFolder::Dir(dir) => dir.clone(),
    };

    let mut ubv = File::open(ubv_path)
        .map_err(|e| err!(NotFound, msg("opening {}: {e}", ubv_path.display())))?;

    let stem = ubv_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "partition".to_string());

    for partition in &index.partitions {
        extract_one_partition(&mut ubv, partition, &dest_dir, &stem, opts)?;
    }
    Ok(())
}

fn extract_one_partition(
    ubv: &mut File,
    partition: &crate::index::Partition,
    dest_dir: &Path,
    stem: &str,
    opts: &RemuxOptions,
) -> Result<(), Error> {
    let video_track = partition.video_track(opts.video_track).filter(|_| opts.with_video);
    let audio_track = partition.audio_track().filter(|_| opts.with_audio);

    if video_track.is_none() && audio_track.is_none() {
        info!(partition = partition.index, "no requested tracks present, skipping");
        return Ok(());
    }

    // Captured before the sinks borrow `video_track`/`audio_track` away.
    let video_start_rate = video_track.map(|t| (t.start_tc, t.rate));
    let audio_start = audio_track.map(|t| t.start_tc);

    let video_path = dest_dir.join(format!("{stem}.p{}.h264", partition.index));
    let audio_path = dest_dir.join(format!("{stem}.p{}.aac", partition.index));

    // Sink creation follows the requested flags, not track presence: a
    // requested-but-absent kind still gets its (empty, or 4-byte for video)
    // stub file, per spec's boundary behavior. Only a partition with zero
    // frames of *every* requested kind is skipped entirely, above.
    let mut video_sink = opts
        .with_video
        .then(|| Sink::create_video(&video_path))
        .transpose()?;
    let mut audio_sink = opts
        .with_audio
        .then(|| Sink::create(&audio_path))
        .transpose()?;

    essence::extract_partition(
        ubv,
        partition,
        opts.video_track,
        video_sink.as_mut(),
        audio_sink.as_mut(),
    )?;
    let had_video = video_sink.is_some();
    let had_audio = audio_sink.is_some();
    if let Some(sink) = video_sink {
        sink.finish()?;
    }
    if let Some(sink) = audio_sink {
        sink.finish()?;
    }

    if opts.mp4 {
        invoke_muxer(
            partition.index,
            had_video.then_some(video_path.as_path()),
            had_audio.then_some(audio_path.as_path()),
            video_start_rate,
            audio_start,
        )?;
    }
    Ok(())
}

/// Computes the `(video_start - audio_start)` offset in seconds (SPEC_FULL
/// §4.4's resolution of spec.md §9's second open question) and invokes the
/// external muxer. The argument vector itself is an implementation
/// choice: only the elementary-stream paths and the start timecode are
/// contractual (spec.md §6).
fn invoke_muxer(
    partition_index: u32,
    video_path: Option<&Path>,
    audio_path: Option<&Path>,
    video_start_rate: Option<(base::time::Instant, u32)>,
    audio_start: Option<base::time::Instant>,
) -> Result<(), Error> {
    let mut cmd = Command::new("ubv-mux");
    if let Some(p) = video_path {
        cmd.arg("--video").arg(p);
    }
    if let Some(p) = audio_path {
        cmd.arg("--audio").arg(p);
    }
    if let (Some((video_start, _)), Some(audio_start)) = (video_start_rate, audio_start) {
        let offset = (video_start - audio_start).as_secs_f64();
        cmd.arg("--av-offset").arg(format!("{offset:.6}"));
    }
    if let Some((video_start, rate)) = video_start_rate {
        cmd.arg("--start-timecode").arg(timecode::format(video_start, rate));
    }

    let status = cmd
        .status()
        .map_err(|e| err!(Unavailable, msg("spawning muxer: {e}")))?;
    if !status.success() {
        warn!(partition = partition_index, %status, "muxer exited non-zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::ErrorKind;

    fn nal(payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn frame_line(tid: u32, offset: u64, size: u32, wc: u64, wc_tbc: u64) -> String {
        format!("    {tid} 0 0 {offset} {size} 0 0 {wc} {wc_tbc}")
    }

    fn count_start_codes(bytes: &[u8]) -> usize {
        bytes.windows(4).filter(|w| *w == [0, 0, 0, 1]).count()
    }

    /// Scenario 1: video-only single partition, many frames.
    #[test]
    fn video_only_single_partition() {
        let dir = tempfile::tempdir().unwrap();
        let ubv_path = dir.path().join("cam.ubv");

        let frames: Vec<Vec<u8>> = (0..900u64).map(|i| nal(&[(i % 256) as u8])).collect();
        let mut ubv_bytes = Vec::new();
        let mut sidecar = String::from("ubnt_ubvinfo\n----------- PARTITION START -----------\n");
        let mut wc = 0u64;
        for frame in &frames {
            let offset = ubv_bytes.len() as u64;
            sidecar.push_str(&frame_line(7, offset, frame.len() as u32, wc, 90000));
            sidecar.push('\n');
            ubv_bytes.extend_from_slice(frame);
            wc += 3000;
        }
        std::fs::write(&ubv_path, &ubv_bytes).unwrap();
        // read_index looks for `<ubv_path>.txt`, i.e. "cam.ubv.txt".
        std::fs::write(format!("{}.txt", ubv_path.display()), &sidecar).unwrap();

        let opts = RemuxOptions {
            with_audio: false,
            with_video: true,
            video_track: 7,
            force_rate: None,
            output_folder: OutputFolder::AlongsideInput,
            mp4: false,
        };
        remux_one(&ubv_path, &opts).unwrap();

        let out = std::fs::read(dir.path().join("cam.p0.h264")).unwrap();
        assert_eq!(&out[..4], &[0, 0, 0, 1]);
        assert_eq!(count_start_codes(&out), 901);
    }

    /// Scenario 3: a forced rate is reflected by the timecode formatter.
    #[test]
    fn forced_rate_overrides_inferred_rate() {
        let dir = tempfile::tempdir().unwrap();
        let ubv_path = dir.path().join("cam.ubv");
        let frame = nal(&[1, 2, 3]);
        std::fs::write(&ubv_path, &frame).unwrap();
        // WC/WC_TBC = 1/2 places the frame 500ms into its second, so the
        // formatted frame number actually depends on the rate in force: a
        // single frame otherwise falls back to rate=1, which force-rate
        // overrides.
        let sidecar = format!(
            "header\n----------- PARTITION START -----------\n{}\n",
            frame_line(7, 0, frame.len() as u32, 1, 2)
        );
        std::fs::write(format!("{}.txt", ubv_path.display()), &sidecar).unwrap();

        let mut index = sidecar::read_index(&ubv_path, 7, false).unwrap();
        assert_eq!(index.partitions[0].tracks[&7].rate, 1);
        let start_tc = index.partitions[0].tracks[&7].start_tc;
        // At the inferred rate=1, every instant within a second formats as
        // frame 1 -- this is the degenerate case force-rate exists to fix.
        assert!(timecode::format(start_tc, 1).ends_with(".01"));

        index.override_video_rates(30);
        assert_eq!(index.partitions[0].tracks[&7].rate, 30);
        let formatted = timecode::format(start_tc, index.partitions[0].tracks[&7].rate);
        assert!(formatted.ends_with(".16"), "got {formatted}");
    }

    /// Scenario 4: a cached sidecar is preferred over spawning the analyzer.
    #[test]
    fn cached_sidecar_is_preferred_over_analyzer() {
        let dir = tempfile::tempdir().unwrap();
        let ubv_path = dir.path().join("cam.ubv");
        let frame = nal(&[9, 9]);
        std::fs::write(&ubv_path, &frame).unwrap();
        let sidecar = format!(
            "header\n----------- PARTITION START -----------\n{}\n",
            frame_line(7, 0, frame.len() as u32, 0, 30)
        );
        std::fs::write(format!("{}.txt", ubv_path.display()), &sidecar).unwrap();

        // If the cached sidecar weren't preferred, this would try (and fail)
        // to spawn a nonexistent analyzer, since PATH search will not find
        // "ubnt_ubvinfo" inside an empty, isolated directory.
        std::env::set_var("PATH", dir.path());
        let result = sidecar::read_index(&ubv_path, 7, true);
        assert!(result.is_ok());
    }

    /// Scenario 5: an unrecognized track id is fatal and leaves no output.
    #[test]
    fn unknown_track_id_produces_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let ubv_path = dir.path().join("cam.ubv");
        let frame = nal(&[0]);
        std::fs::write(&ubv_path, &frame).unwrap();
        let sidecar = format!(
            "header\n----------- PARTITION START -----------\n{}\n",
            frame_line(42, 0, frame.len() as u32, 0, 30)
        );
        std::fs::write(format!("{}.txt", ubv_path.display()), &sidecar).unwrap();

        let opts = RemuxOptions {
            with_audio: false,
            with_video: true,
            video_track: 7,
            force_rate: None,
            output_folder: OutputFolder::AlongsideInput,
            mp4: false,
        };
        let err = remux_one(&ubv_path, &opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataLoss);
        assert!(!dir.path().join("cam.p0.h264").exists());
    }

    /// Scenario 6: a rate-probe mode of 0 (spec.md §8) warns and falls back
    /// to rate=1 instead of failing, and extraction still succeeds.
    #[test]
    fn rate_probe_timelapse_falls_back_to_one_fps() {
        let dir = tempfile::tempdir().unwrap();
        let ubv_path = dir.path().join("cam.ubv");
        let frames: Vec<Vec<u8>> = (0..4).map(|_| nal(&[7])).collect();
        let mut ubv_bytes = Vec::new();
        let mut sidecar = String::from("header\n----------- PARTITION START -----------\n");
        // WC advances in much larger steps than WC_TBC, so every probe
        // ratio floors to 0.
        let mut wc = 0u64;
        for frame in &frames {
            let offset = ubv_bytes.len() as u64;
            sidecar.push_str(&frame_line(7, offset, frame.len() as u32, wc, 1));
            sidecar.push('\n');
            ubv_bytes.extend_from_slice(frame);
            wc += 5;
        }
        std::fs::write(&ubv_path, &ubv_bytes).unwrap();
        std::fs::write(format!("{}.txt", ubv_path.display()), &sidecar).unwrap();

        let index = sidecar::read_index(&ubv_path, 7, false).unwrap();
        assert_eq!(index.partitions[0].tracks[&7].rate, 1);

        let opts = RemuxOptions {
            with_audio: false,
            with_video: true,
            video_track: 7,
            force_rate: None,
            output_folder: OutputFolder::AlongsideInput,
            mp4: false,
        };
        remux_one(&ubv_path, &opts).unwrap();
        assert!(dir.path().join("cam.p0.h264").exists());
    }

    /// A requested-but-absent kind still gets a stub output file, distinct
    /// from the "both kinds absent" case that skips the partition outright.
    #[test]
    fn requested_but_absent_kind_gets_a_stub_file() {
        let dir = tempfile::tempdir().unwrap();
        let ubv_path = dir.path().join("cam.ubv");
        let audio_frame = vec![0xCC, 0xDD, 0xEE];
        std::fs::write(&ubv_path, &audio_frame).unwrap();
        let sidecar = format!(
            "header\n----------- PARTITION START -----------\n{}\n",
            frame_line(1000, 0, audio_frame.len() as u32, 0, 48000)
        );
        std::fs::write(format!("{}.txt", ubv_path.display()), &sidecar).unwrap();

        let opts = RemuxOptions {
            with_audio: true,
            with_video: true,
            video_track: 7,
            force_rate: None,
            output_folder: OutputFolder::AlongsideInput,
            mp4: false,
        };
        remux_one(&ubv_path, &opts).unwrap();

        // No video frames were present, but video was requested: the file
        // exists with just the opening start code, not absent entirely.
        let video_bytes = std::fs::read(dir.path().join("cam.p0.h264")).unwrap();
        assert_eq!(video_bytes, [0, 0, 0, 1]);

        let audio_bytes = std::fs::read(dir.path().join("cam.p0.aac")).unwrap();
        assert_eq!(audio_bytes, audio_frame);
    }
}
