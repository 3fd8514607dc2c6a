use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use lazy_static::lazy_static;

lazy_static! {
    pub static ref CONFIG: Config = Config::load();
}

/// One century of access is the longest enrollment handed out.
const ENROLLMENT_DAYS: RangeInclusive<i64> = 1..=36_500;
/// Between one second and one week.
const SWEEP_SECS: RangeInclusive<u64> = 1..=604_800;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub database_url: String,
    pub certificate_dir: PathBuf,
    pub payment_secret: String,
    pub enrollment_days: i64,
    pub sweep_secs: u64,
}

impl Config {
    pub fn load() -> Self {
        Self::from_source(|key| env::var(key).ok())
    }

    pub fn from_source<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            addr: try_load(&lookup, "OPENCOURSE_ADDR", "127.0.0.1:3000"),
            database_url: try_load(&lookup, "DATABASE_URL", "postgres://localhost/opencourse"),
            certificate_dir: try_load(&lookup, "OPENCOURSE_CERT_DIR", "certificates"),
            payment_secret: try_load(&lookup, "OPENCOURSE_PAYMENT_SECRET", ""),
            enrollment_days: within(
                "OPENCOURSE_ENROLLMENT_DAYS",
                try_load(&lookup, "OPENCOURSE_ENROLLMENT_DAYS", "180"),
                ENROLLMENT_DAYS,
                180,
            ),
            sweep_secs: within(
                "OPENCOURSE_SWEEP_SECS",
                try_load(&lookup, "OPENCOURSE_SWEEP_SECS", "86400"),
                SWEEP_SECS,
                86_400,
            ),
        }
    }

    pub fn enrollment_period(&self) -> Duration {
        Duration::days(self.enrollment_days)
    }
}

fn try_load<T: FromStr, F>(lookup: &F, key: &str, default: &str) -> T
where
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| {
        log::info!("{} not set, using default: {}", key, default);
        default.to_string()
    });
    parse_or_default(key, &raw, default)
}

fn parse_or_default<T: FromStr>(key: &str, raw: &str, default: &str) -> T
where
    T::Err: Display,
{
    match raw.parse() {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Invalid {} value `{}`: {}, using default", key, raw, err);
            match default.parse() {
                Ok(value) => value,
                // defaults are literals above
                Err(err) => panic!("Default for {} does not parse: {}", key, err),
            }
        }
    }
}

fn within<T: PartialOrd + Display>(key: &str, value: T, range: RangeInclusive<T>, default: T) -> T {
    if range.contains(&value) {
        value
    } else {
        log::warn!(
            "{} value {} is outside {}..={}, using default: {}",
            key,
            value,
            range.start(),
            range.end(),
            default
        );
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(key: &'static str, value: &'static str) -> Config {
        Config::from_source(move |k| (k == key).then(|| value.to_string()))
    }

    #[test]
    fn falls_back_on_garbage() {
        let days: i64 = parse_or_default("OPENCOURSE_ENROLLMENT_DAYS", "half a year", "180");
        assert_eq!(days, 180);
        let addr: SocketAddr = parse_or_default("OPENCOURSE_ADDR", "0.0.0.0:8080", "127.0.0.1:3000");
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn period_is_in_days() {
        let config = with("OPENCOURSE_ENROLLMENT_DAYS", "30");
        assert_eq!(config.enrollment_days, 30);
        assert_eq!(config.enrollment_period().num_days(), 30);
    }

    #[test]
    fn zero_sweep_interval_uses_default() {
        assert_eq!(with("OPENCOURSE_SWEEP_SECS", "0").sweep_secs, 86_400);
        assert_eq!(with("OPENCOURSE_SWEEP_SECS", "60").sweep_secs, 60);
    }

    #[test]
    fn enrollment_days_out_of_range_use_default() {
        for raw in ["0", "-5", "10000000000000"] {
            let config = with("OPENCOURSE_ENROLLMENT_DAYS", raw);
            assert_eq!(config.enrollment_days, 180, "for {}", raw);
            assert_eq!(config.enrollment_period().num_days(), 180);
        }
    }
}
