//! Failed-login Extraction
//!
//! Parses sshd lines from a syslog-style auth log. Two shapes are recognised,
//! tried in order:
//!
//! ```text
//! ... message repeated 4 times: [ Failed password for root from 87.241.1.186 port 58263 ssh2]
//! ... Failed password for invalid user steam from 64.225.102.125 port 36144 ssh2
//! ```
//!
//! Syslog stamps carry no year. Lines are dated in the year of the scan start;
//! a stamp that would then lie well after the scan start belongs to the
//! previous year (December lines read in January).

use super::types::FailedLogin;
use crate::Result;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::net::Ipv4Addr;

/// Turns raw log lines into [`FailedLogin`] events
pub struct EventExtractor {
    timestamp: Regex,
    repeated: Regex,
    single: Regex,
    /// Lines stamped after this are not part of the scan
    scan_start: NaiveDateTime,
}

impl EventExtractor {
    /// Stamps up to this many days past the scan start are lines written
    /// during the scan, not last year's
    const CLOCK_SLACK_DAYS: i64 = 1;

    /// Create an extractor for a scan that started at `scan_start`
    pub fn new(scan_start: NaiveDateTime) -> Result<Self> {
        Ok(Self {
            timestamp: Regex::new(r"^([A-Z][a-z]{2})\s+(\d{1,2})\s+(\d{2}:\d{2}:\d{2})")?,
            repeated: Regex::new(
                r"message repeated (\d+) times: \[ Failed password for (?:invalid user )?(\S+) from (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
            )?,
            single: Regex::new(
                r"Failed password for (?:invalid user )?(\S+) from (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
            )?,
            scan_start,
        })
    }

    /// Parse the leading `Mon DD HH:MM:SS` stamp
    pub fn parse_timestamp(&self, line: &str) -> Option<NaiveDateTime> {
        let caps = self.timestamp.captures(line)?;
        let month = month_number(&caps[1])?;
        let day: u32 = caps[2].parse().ok()?;
        let time = NaiveTime::parse_from_str(&caps[3], "%H:%M:%S").ok()?;

        let year = self.scan_start.year();
        let stamp = NaiveDate::from_ymd_opt(year, month, day).map(|date| date.and_time(time));
        match stamp {
            Some(stamp) if stamp <= self.scan_start + Duration::days(Self::CLOCK_SLACK_DAYS) => {
                Some(stamp)
            }
            // Last year's line, or Feb 29 read in a non-leap year
            _ => NaiveDate::from_ymd_opt(year - 1, month, day).map(|date| date.and_time(time)),
        }
    }

    /// Extract a failed login from one line, ignoring the scan floor
    pub fn parse_line(&self, line: &str) -> Option<FailedLogin> {
        let timestamp = self.parse_timestamp(line)?;
        self.match_shape(line, timestamp)
    }

    /// Extract a failed login only if the line is strictly newer than `floor`
    /// and not newer than the scan start. Later lines belong to the next run.
    pub fn parse_line_after(&self, line: &str, floor: NaiveDateTime) -> Option<FailedLogin> {
        let timestamp = self.parse_timestamp(line)?;
        if timestamp <= floor || timestamp > self.scan_start {
            return None;
        }
        self.match_shape(line, timestamp)
    }

    fn match_shape(&self, line: &str, timestamp: NaiveDateTime) -> Option<FailedLogin> {
        // Repeated form must win: its payload also contains the single form
        if let Some(caps) = self.repeated.captures(line) {
            let count: u64 = caps[1].parse().ok()?;
            let ip: Ipv4Addr = caps[3].parse().ok()?;
            return Some(FailedLogin {
                timestamp,
                ip,
                username: caps[2].to_string(),
                count,
            });
        }

        let caps = self.single.captures(line)?;
        let ip: Ipv4Addr = caps[2].parse().ok()?;
        Some(FailedLogin {
            timestamp,
            ip,
            username: caps[1].to_string(),
            count: 1,
        })
    }
}

fn month_number(abbrev: &str) -> Option<u32> {
    let month = match abbrev {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    Some(month)
}
