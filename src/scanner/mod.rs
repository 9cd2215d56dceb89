//! Audit Log Scanner
//!
//! Streams the auth log and aggregates failed logins newer than the run floor.

pub mod parser;
pub mod types;

pub use parser::EventExtractor;
pub use types::{FailedLogin, ScanTally};

use crate::Result;
use anyhow::Context;
use chrono::NaiveDateTime;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Scan `path` for failures strictly after `floor`.
///
/// Lines are decoded lossily so stray binary in the log cannot abort a scan.
pub async fn scan_file(
    path: &Path,
    extractor: &EventExtractor,
    floor: NaiveDateTime,
) -> Result<ScanTally> {
    info!("Processing {}", path.display());

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open audit log: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut tally = ScanTally::new();
    let mut buf = Vec::with_capacity(512);

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .with_context(|| format!("Failed to read audit log: {}", path.display()))?;
        if read == 0 {
            break;
        }

        tally.lines_read += 1;
        let line = String::from_utf8_lossy(&buf);
        if let Some(event) = extractor.parse_line_after(line.trim_end(), floor) {
            debug!(ip = %event.ip, user = %event.username, count = event.count, "Failed login");
            tally.record(&event);
        }
    }

    info!(
        "Read {} lines, {} matched, {} distinct IPs",
        tally.lines_read,
        tally.lines_matched,
        tally.ips.len()
    );

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_scan_file_aggregates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Jun  1 00:00:05 host sshd[1]: Failed password for root from 10.0.0.5 port 1 ssh2").unwrap();
        writeln!(file, "Jun  1 00:00:06 host sshd[1]: Failed password for admin from 10.0.0.5 port 2 ssh2").unwrap();
        file.write_all(b"Jun  1 00:00:07 host sshd[1]: \xff\xfe binary junk\n").unwrap();
        writeln!(file, "Jun  1 00:00:08 host sshd[1]: message repeated 25 times: [ Failed password for invalid user a from 10.0.0.9 port 3 ssh2]").unwrap();
        file.flush().unwrap();

        let scan_start = NaiveDate::from_ymd_opt(2024, 6, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let extractor = EventExtractor::new(scan_start).unwrap();
        let floor = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        let tally = scan_file(file.path(), &extractor, floor).await.unwrap();

        assert_eq!(tally.lines_read, 4);
        assert_eq!(tally.lines_matched, 3);
        assert_eq!(tally.failures_for(Ipv4Addr::new(10, 0, 0, 5)), 2);
        assert_eq!(tally.failures_for(Ipv4Addr::new(10, 0, 0, 9)), 25);
        assert_eq!(tally.users.get("a"), Some(&25));
    }

    #[tokio::test]
    async fn test_scan_missing_file_errors() {
        let extractor = EventExtractor::new(NaiveDateTime::default()).unwrap();
        let floor = NaiveDateTime::default();
        let result = scan_file(Path::new("/nonexistent/auth.log"), &extractor, floor).await;
        assert!(result.is_err());
    }
}
