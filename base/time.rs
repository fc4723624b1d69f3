// This file is part of a UBV-to-MP4 remuxing tool.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Wall-clock instants, at nanosecond precision, as used throughout the
//! core: the sidecar's `WC`/`WC_TBC` columns resolve to an [`Instant`], and
//! the Timecode Formatter turns one back into `HH:MM:SS.FF`.

use crate::{err, msg, Error};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::combinator::{map, map_res, opt};
use nom::sequence::{preceded, tuple};
use std::fmt;
use std::ops;
use std::str::FromStr;

/// The time zone used to render [`Instant`]s as local wall-clock strings.
///
/// Assigned once from `jiff::tz::TimeZone::system()` at startup; tests pin
/// it to a fixed political zone so formatter tests are reproducible.
static GLOBAL_ZONE: std::sync::OnceLock<jiff::tz::TimeZone> = std::sync::OnceLock::new();

pub fn init_zone<F: FnOnce() -> jiff::tz::TimeZone>(f: F) {
    GLOBAL_ZONE.get_or_init(f);
}

pub fn global_zone() -> jiff::tz::TimeZone {
    GLOBAL_ZONE
        .get_or_init(jiff::tz::TimeZone::system)
        .clone()
}

/// A wall-clock instant, stored as nanoseconds since the Unix epoch.
///
/// This is deliberately a plain `i128` rather than `jiff::Timestamp`: the
/// sidecar's `WC * 1_000_000_000 / WC_TBC` computation (spec §4.1) can
/// overflow `i64` nanoseconds for large `WC` before the division lands back
/// in range, so the intermediate arithmetic needs the wider type.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Instant {
    nanos_since_epoch: i128,
}

/// A duration between two [`Instant`]s, in nanoseconds.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Duration {
    nanos: i128,
}

impl Instant {
    pub const EPOCH: Instant = Instant {
        nanos_since_epoch: 0,
    };

    pub fn from_nanos_since_epoch(nanos: i128) -> Self {
        Instant {
            nanos_since_epoch: nanos,
        }
    }

    /// Computes the instant of a sidecar frame from its `WC` and `WC_TBC`
    /// columns (spec §4.1): `unix_epoch + (WC * 1e9) / WC_TBC` nanoseconds.
    ///
    /// Returns `None` if `wc_tbc` is zero; callers turn that into a fatal
    /// parse error with the track id attached.
    pub fn from_ticks(wc: u64, wc_tbc: u64) -> Option<Self> {
        if wc_tbc == 0 {
            return None;
        }
        let nanos = (i128::from(wc) * 1_000_000_000) / i128::from(wc_tbc);
        Some(Instant::from_nanos_since_epoch(nanos))
    }

    pub fn nanos_since_epoch(&self) -> i128 {
        self.nanos_since_epoch
    }

    pub fn now() -> Self {
        Instant::from_nanos_since_epoch(i128::from(jiff::Timestamp::now().as_nanosecond()))
    }

    /// Converts to a `jiff::Timestamp`, saturating to its representable range.
    pub fn to_timestamp(&self) -> jiff::Timestamp {
        let secs = self.nanos_since_epoch.div_euclid(1_000_000_000);
        let subsec = self.nanos_since_epoch.rem_euclid(1_000_000_000) as i32;
        let secs = i64::try_from(secs).unwrap_or(if secs > 0 { i64::MAX } else { i64::MIN });
        jiff::Timestamp::new(secs, subsec).unwrap_or(jiff::Timestamp::MIN)
    }

    /// Parses either an integer count of nanoseconds since the epoch, or an
    /// RFC-3339-like string, matching the ergonomics of moonfire-nvr's
    /// `db::recording::Time::parse` (used here for the `ts` subcommand).
    pub fn parse(input: &str) -> Result<Self, Error> {
        if let Ok(n) = i128::from_str(input) {
            return Ok(Instant::from_nanos_since_epoch(n));
        }
        let (remaining, ((year, month, day), opt_time, opt_zone)) = tuple((
            parse_datepart,
            opt(preceded(tag("T"), parse_timepart)),
            opt(parse_zone),
        ))(input)
        .map_err(|e| err!(InvalidArgument, msg("invalid timestamp {input:?}: {e}")))?;
        if !remaining.is_empty() {
            return Err(err!(
                InvalidArgument,
                msg("unexpected suffix {remaining:?} following timestamp")
            ));
        }
        let (hour, min, sec, nanos) = opt_time.unwrap_or((0, 0, 0, 0));
        let dt = jiff::civil::DateTime::new(year, month, day, hour, min, sec, nanos)
            .map_err(|e| err!(InvalidArgument, msg("invalid timestamp: {e}")))?;
        let tz = match opt_zone {
            Some(off) => jiff::tz::TimeZone::fixed(
                jiff::tz::Offset::from_seconds(off)
                    .map_err(|e| err!(InvalidArgument, msg("invalid time zone offset: {e}")))?,
            ),
            None => global_zone(),
        };
        let ts = tz
            .into_ambiguous_zoned(dt)
            .compatible()
            .map_err(|e| err!(InvalidArgument, msg("ambiguous local time: {e}")))?
            .timestamp();
        Ok(Instant::from_nanos_since_epoch(i128::from(ts.as_nanosecond())))
    }
}

fn fixed_len_num<'a, T: FromStr>(
    len: usize,
) -> impl FnMut(&'a str) -> nom::IResult<&'a str, T> {
    map_res(
        nom::bytes::complete::take_while_m_n(len, len, |c: char| c.is_ascii_digit()),
        |s: &str| s.parse(),
    )
}

fn parse_datepart(input: &str) -> nom::IResult<&str, (i16, i8, i8)> {
    tuple((
        fixed_len_num(4),
        preceded(tag("-"), fixed_len_num(2)),
        preceded(tag("-"), fixed_len_num(2)),
    ))(input)
}

fn parse_timepart(input: &str) -> nom::IResult<&str, (i8, i8, i8, i32)> {
    let (input, (hour, _, min)) = tuple((fixed_len_num(2), tag(":"), fixed_len_num(2)))(input)?;
    let (input, rest) = opt(tuple((
        preceded(tag(":"), fixed_len_num(2)),
        opt(preceded(
            tag("."),
            nom::bytes::complete::take_while1(|c: char| c.is_ascii_digit()),
        )),
    )))(input)?;
    let (sec, frac) = rest.unwrap_or((0, None));
    let nanos = frac
        .map(|f: &str| {
            let mut digits = f.to_string();
            digits.truncate(9);
            while digits.len() < 9 {
                digits.push('0');
            }
            digits.parse::<i32>().unwrap_or(0)
        })
        .unwrap_or(0);
    Ok((input, (hour, min, sec, nanos)))
}

fn parse_zone(input: &str) -> nom::IResult<&str, i32> {
    alt((
        nom::combinator::value(0, tag("Z")),
        map(
            tuple((
                opt(nom::character::complete::one_of("+-")),
                fixed_len_num::<i32>(2),
                tag(":"),
                fixed_len_num::<i32>(2),
            )),
            |(sign, hr, _, min)| {
                let off = hr * 3600 + min * 60;
                if sign == Some('-') {
                    -off
                } else {
                    off
                }
            },
        ),
    ))(input)
}

impl FromStr for Instant {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Instant::parse(s)
    }
}

impl ops::Sub for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        Duration {
            nanos: self.nanos_since_epoch - rhs.nanos_since_epoch,
        }
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant::from_nanos_since_epoch(self.nanos_since_epoch + rhs.nanos)
    }
}

impl Duration {
    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / 1_000_000_000.0
    }
}

impl fmt::Debug for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} /* {} ns since epoch */", self, self.nanos_since_epoch)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let zoned = jiff::Zoned::new(self.to_timestamp(), global_zone());
        write!(f, "{}", zoned.strftime("%FT%T.%f%:z"))
    }
}

pub mod testutil {
    pub fn init_zone() {
        super::init_zone(|| {
            jiff::tz::TimeZone::get("America/Los_Angeles")
                .expect("America/Los_Angeles should exist")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ticks_matches_spec_formula() {
        // WC=90, WC_TBC=90 -> 1 second since epoch.
        let t = Instant::from_ticks(90, 90).unwrap();
        assert_eq!(t.nanos_since_epoch(), 1_000_000_000);
    }

    #[test]
    fn from_ticks_rejects_zero_timebase() {
        assert!(Instant::from_ticks(90, 0).is_none());
    }

    #[test]
    fn parse_accepts_integer_nanos() {
        let t = Instant::parse("1000000000").unwrap();
        assert_eq!(t.nanos_since_epoch(), 1_000_000_000);
    }

    #[test]
    fn parse_accepts_rfc3339() {
        testutil::init_zone();
        let t = Instant::parse("2023-05-16T11:58:26Z").unwrap();
        assert_eq!(t.to_timestamp().as_second(), 1684238306);
    }

    #[test]
    fn ordering_and_subtraction() {
        let a = Instant::from_nanos_since_epoch(5_000_000_000);
        let b = Instant::from_nanos_since_epoch(3_000_000_000);
        assert!(a > b);
        assert_eq!((a - b).as_secs_f64(), 2.0);
    }
}
