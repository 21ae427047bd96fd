pub type MetricDateTime = hifitime::Epoch;

pub trait MetricDateTimeExt {
    fn to_unix_milliseconds_i64(&self) -> i64;
}

impl MetricDateTimeExt for MetricDateTime {
    fn to_unix_milliseconds_i64(&self) -> i64 {
        self.to_unix_milliseconds().floor() as i64
    }
}

/// Current wall-clock time as Unix milliseconds.
pub fn now_unix_milliseconds() -> i64 {
    match MetricDateTime::now() {
        Ok(now) => now.to_unix_milliseconds_i64(),
        // hifitime could not read the system clock, ask std directly
        Err(_) => std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or_default(),
    }
}
