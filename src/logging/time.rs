use chrono::{DateTime, SecondsFormat, Utc};

/// 将 UTC 时间转换为 ISO-8601 / RFC3339（UTC, `Z`，毫秒精度）
pub fn to_iso8601_utc_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_utc_with_z_suffix() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        assert_eq!(to_iso8601_utc_string(&dt), "2024-05-01T08:30:00.000Z");
    }
}
