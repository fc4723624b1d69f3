// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The Timecode Formatter: renders an [`Instant`] at a given frame rate as
//! `HH:MM:SS.FF`, the convention editors expect for frame-accurate seeking.

use base::time::Instant;

/// Formats `t` as `HH:MM:SS.FF`, where `FF` is the 1-based frame number
/// within the current second at `rate` frames per second.
///
/// The time-of-day part is rendered in UTC, not the process's local zone:
/// unlike `Instant`'s `Display` impl (which is meant for human-readable
/// logs), this is muxer-facing metadata and must be reproducible
/// regardless of where the tool runs.
///
/// `FF` is clamped to `rate - 1` rather than letting it reach `rate`: a
/// frame landing exactly on the second boundary would otherwise format as
/// `FF == rate`, one past the displayed range `[1, rate]` callers expect.
pub fn format(t: Instant, rate: u32) -> String {
    let zoned = jiff::Zoned::new(t.to_timestamp(), jiff::tz::TimeZone::UTC);
    let subsec_nanos = zoned.datetime().subsec_nanosecond() as u64;
    let rate = rate.max(1);

    let frame = (subsec_nanos * u64::from(rate)) / 1_000_000_000;
    let frame = frame.min(u64::from(rate) - 1) + 1;

    format!("{}.{:02}", zoned.strftime("%H:%M:%S"), frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_second() {
        let t = Instant::parse("2023-05-16T11:58:26Z").unwrap();
        assert_eq!(format(t, 30), "11:58:26.01");
    }

    #[test]
    fn matches_documented_example() {
        // format(2023-05-16T11:58:26.500Z, 30) == "11:58:26.16".
        let t = Instant::from_nanos_since_epoch(1_684_238_306_500_000_000);
        assert_eq!(format(t, 30), "11:58:26.16");
    }

    #[test]
    fn clamps_frame_at_rate_minus_one() {
        // 999_999_999 ns into the second, at rate 30: raw frame would be 30.
        let t = Instant::from_nanos_since_epoch(1_684_238_306_999_999_999);
        assert_eq!(format(t, 30), "11:58:26.30");
    }

    #[test]
    fn length_is_eleven_for_rates_up_to_99() {
        let t = Instant::from_nanos_since_epoch(1_684_238_306_000_000_000);
        for rate in 1..100 {
            assert_eq!(format(t, rate).len(), 11, "rate {rate}");
        }
    }
}
