use std::fmt;

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

/// RFC 3339 timestamps in UTC, e.g. `2026-10-19T08:15:02.118Z`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcRfc3339;

impl FormatTime for UtcRfc3339 {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        match OffsetDateTime::now_utc().format(&Rfc3339) {
            Ok(ts) => write!(w, "{ts}"),
            Err(_) => w.write_str("<invalid-time>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_utc_timestamp() {
        let mut out = String::new();
        UtcRfc3339.format_time(&mut Writer::new(&mut out)).unwrap();
        assert!(out.ends_with('Z'), "{out}");
        assert!(OffsetDateTime::parse(&out, &Rfc3339).is_ok(), "{out}");
    }
}
