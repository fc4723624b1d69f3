// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The structural index of a UBV file: partitions, tracks, and the frame
//! table, as derived by the Index Reader (see [`crate::sidecar`]).
//!
//! This module owns only the data; it never reads a sidecar or a UBV file
//! itself. `UbvIndex` is built once and is read-only from then on, except
//! for the single permitted mutation in [`UbvIndex::override_video_rates`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use base::time::Instant;

/// The closed set of track ids the core understands (spec §3).
pub const TRACK_VIDEO_H264: u32 = 7;
pub const TRACK_VIDEO_HEVC: u32 = 1003;
pub const TRACK_AUDIO_AAC: u32 = 1000;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Classifies a track id, or `None` if it's outside the closed set this
/// core recognizes. An unrecognized id is always a fatal parse error
/// (spec §3, §9): new ids are interesting data about an under-documented
/// format, not something to silently ignore.
pub fn classify_track(track_id: u32) -> Option<TrackKind> {
    match track_id {
        TRACK_VIDEO_H264 | TRACK_VIDEO_HEVC => Some(TrackKind::Video),
        TRACK_AUDIO_AAC => Some(TrackKind::Audio),
        _ => None,
    }
}

/// A single frame record as it appeared in the sidecar dump, in file order.
#[derive(Clone, Copy, Debug)]
pub struct Frame {
    pub track_id: u32,
    pub offset: u64,
    pub size: u32,
}

/// The number of frames to probe when inferring a video track's rate
/// (spec §4.1 step 1).
pub const RATE_PROBE_WINDOW_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct Track {
    pub track_id: u32,
    pub kind: TrackKind,
    pub start_tc: Instant,
    pub last_tc: Instant,
    pub rate: u32,
    pub frame_count: u64,

    /// Inter-frame `WC_TBC / ΔWC` samples collected so far, video tracks
    /// only. Consumed (and left populated) once [`Track::rate`] has been
    /// derived; the Index Reader is the only writer.
    pub(crate) rate_probe_window: Vec<u32>,

    /// The `WC` of the previous frame seen on this track, used to compute
    /// the next probe sample. Video tracks only.
    pub(crate) probe_last_wc: Option<u64>,
}

impl Track {
    pub(crate) fn new(track_id: u32, kind: TrackKind, tc: Instant) -> Self {
        Track {
            track_id,
            kind,
            start_tc: tc,
            last_tc: tc,
            rate: 0,
            frame_count: 0,
            rate_probe_window: Vec::new(),
            probe_last_wc: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Partition {
    pub index: u32,
    pub tracks: BTreeMap<u32, Track>,
    pub frames: Vec<Frame>,
    pub video_track_count: u32,
    pub audio_track_count: u32,
    pub frame_count: u64,
}

impl Partition {
    pub(crate) fn new(index: u32) -> Self {
        Partition {
            index,
            ..Default::default()
        }
    }

    /// The track that would receive frames under `video_track_id`, if any.
    pub fn video_track(&self, video_track_id: u32) -> Option<&Track> {
        self.tracks
            .get(&video_track_id)
            .filter(|t| t.kind == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&Track> {
        self.tracks.values().find(|t| t.kind == TrackKind::Audio)
    }

    /// The byte size of the largest frame in this partition, used to size
    /// the Essence Extractor's scratch buffer (spec §4.2 "Buffer sizing").
    pub fn max_frame_size(&self) -> u32 {
        self.frames.iter().map(|f| f.size).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
pub struct UbvIndex {
    pub filename: PathBuf,
    pub partitions: Vec<Partition>,
    pub complete: bool,
}

impl UbvIndex {
    pub(crate) fn new(filename: PathBuf) -> Self {
        UbvIndex {
            filename,
            partitions: Vec::new(),
            complete: false,
        }
    }

    /// Overrides every video track's rate across all partitions (spec
    /// §4.4, the `force-rate` flag). Must run after index construction and
    /// before any extraction; the core does not otherwise mutate a
    /// finalized index.
    pub fn override_video_rates(&mut self, rate: u32) {
        for partition in &mut self.partitions {
            for track in partition.tracks.values_mut() {
                if track.kind == TrackKind::Video {
                    track.rate = rate;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_track_closed_set() {
        assert_eq!(classify_track(7), Some(TrackKind::Video));
        assert_eq!(classify_track(1003), Some(TrackKind::Video));
        assert_eq!(classify_track(1000), Some(TrackKind::Audio));
        assert_eq!(classify_track(42), None);
    }

    #[test]
    fn override_video_rates_only_touches_video() {
        let mut idx = UbvIndex::new("x.ubv".into());
        let mut p = Partition::new(0);
        let mut v = Track::new(7, TrackKind::Video, Instant::EPOCH);
        v.rate = 25;
        let mut a = Track::new(1000, TrackKind::Audio, Instant::EPOCH);
        a.rate = 48000;
        p.tracks.insert(7, v);
        p.tracks.insert(1000, a);
        idx.partitions.push(p);

        idx.override_video_rates(30);
        assert_eq!(idx.partitions[0].tracks[&7].rate, 30);
        assert_eq!(idx.partitions[0].tracks[&1000].rate, 48000);
    }

    #[test]
    fn max_frame_size_of_empty_partition_is_zero() {
        let p = Partition::new(0);
        assert_eq!(p.max_frame_size(), 0);
    }
}
