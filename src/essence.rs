// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The Essence Extractor: copies frame payloads out of a UBV file into
//! elementary-stream sinks, re-framing video NAL units from length-prefixed
//! to Annex-B along the way.
//!
//! This is the mirror image of moonfire-nvr's `h264::transform_sample_data`,
//! which goes the other direction (Annex-B in, length-prefixed out) when
//! recording from an RTSP source.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use base::{bail, err, msg, Error, ErrorKind};
use byteorder::{BigEndian, ByteOrder};

use crate::index::{Frame, Partition, TrackKind};

/// The Annex-B start code: one opens the video stream, and one follows
/// every NAL payload.
const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// A write sink for one track's elementary stream, buffered so the many
/// small `write_all` calls per frame don't each hit the filesystem.
pub struct Sink {
    writer: BufWriter<File>,
}

impl Sink {
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path)
            .map_err(|e| err!(Internal, msg("creating {}: {e}", path.display())))?;
        Ok(Sink {
            writer: BufWriter::new(file),
        })
    }

    /// Creates a video elementary-stream sink and immediately writes the
    /// opening start code (spec §4.2): the output file begins with one
    /// `00 00 00 01` before any NAL payload, independent of how many
    /// frames follow.
    pub fn create_video(path: &Path) -> Result<Self, Error> {
        let mut sink = Self::create(path)?;
        sink.write_all(&START_CODE)?;
        Ok(sink)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.writer
            .write_all(buf)
            .map_err(|e| err!(Internal, msg("writing essence: {e}")))
    }

    /// Flushes and closes the sink, surfacing any buffered I/O error.
    /// Deliberately not done in `Drop`, which can't return `Err`.
    pub fn finish(mut self) -> Result<(), Error> {
        self.writer
            .flush()
            .map_err(|e| err!(Internal, msg("flushing essence: {e}")))
    }
}

/// Reads the length-prefixed NAL units that make up one video frame and
/// rewrites each as its payload followed by an Annex-B start code (spec
/// §4.2: the start code trails the payload it terminates; the start code
/// that *opens* the stream is written once, at sink creation, not here).
fn transform_video_frame(buf: &[u8], frame_size: u32, sink: &mut Sink) -> Result<(), Error> {
    let frame_size = frame_size as usize;
    let mut cursor = 0usize;
    while cursor < frame_size {
        if cursor + 4 > frame_size {
            bail!(DataLoss, msg("truncated NAL length prefix at offset {cursor}"));
        }
        let nal_len = BigEndian::read_u32(&buf[cursor..cursor + 4]) as usize;
        cursor += 4;
        if cursor + nal_len > frame_size {
            bail!(
                DataLoss,
                msg("NAL of length {nal_len} at offset {cursor} overruns frame of size {frame_size}")
            );
        }
        sink.write_all(&buf[cursor..cursor + nal_len])?;
        sink.write_all(&START_CODE)?;
        cursor += nal_len;
    }
    Ok(())
}

/// Extracts every frame of `partition` from `ubv` into the sinks selected
/// by the caller: `video_track_id` picks which video track (if any) goes
/// to `video_sink`, and `audio_sink` receives the partition's single audio
/// track, if present and requested.
///
/// `ubv` is read unbuffered at absolute offsets; frames are not assumed to
/// be in any particular order relative to other tracks; only `video_sink`
/// gets the Annex-B transform; `audio_sink` receives AAC frames verbatim.
pub fn extract_partition(
    ubv: &mut File,
    partition: &Partition,
    video_track_id: u32,
    video_sink: Option<&mut Sink>,
    audio_sink: Option<&mut Sink>,
) -> Result<(), Error> {
    let mut video_sink = video_sink;
    let mut audio_sink = audio_sink;
    let mut scratch = vec![0u8; partition.max_frame_size() as usize];

    for frame in &partition.frames {
        let Some(track) = partition.tracks.get(&frame.track_id) else {
            continue;
        };
        let route: Option<&mut Sink> = match track.kind {
            TrackKind::Video if frame.track_id == video_track_id => {
                video_sink.as_mut().map(|s| &mut **s)
            }
            TrackKind::Video => None,
            TrackKind::Audio => audio_sink.as_mut().map(|s| &mut **s),
        };
        let Some(sink) = route else { continue };

        let buf = &mut scratch[..frame.size as usize];
        read_frame(ubv, frame, buf)?;

        match track.kind {
            TrackKind::Video => transform_video_frame(buf, frame.size, sink)?,
            TrackKind::Audio => sink.write_all(buf)?,
        }
    }
    Ok(())
}

fn read_frame(ubv: &mut File, frame: &Frame, buf: &mut [u8]) -> Result<(), Error> {
    ubv.seek(SeekFrom::Start(frame.offset))
        .map_err(|e| err!(Internal, msg("seeking to frame at offset {}: {e}", frame.offset)))?;
    ubv.read_exact(buf)
        .map_err(|e| err!(DataLoss, msg("reading frame at offset {}: {e}", frame.offset)))
}
