//! Environment helpers: typed config overrides and tracing setup.

use std::{
    env,
    fmt::Debug,
    str::FromStr,
    time::Duration,
};

use tracing_subscriber::EnvFilter;

/// Reads an override for a tunable from the environment, falling back to the
/// given default when unset or unparseable.
pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Parses a duration string of the form `500ms`, `30s` or `5m`. A bare
/// number is taken as milliseconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    s.parse().ok().map(Duration::from_millis)
}

/// Reads a duration knob (`500ms`-style strings) from the environment.
pub fn env_duration(name: &str, default: Duration) -> Duration {
    let Ok(var_s) = env::var(name) else {
        return default;
    };
    match parse_duration(&var_s) {
        Some(d) => d,
        None => {
            tracing::warn!("Invalid duration {var_s} for {name}, falling back to {default:?}");
            default
        },
    }
}

/// Call this from services at startup. The `RUST_LOG` filter wins over the
/// `PROFILE`-based default.
pub fn config_service() {
    let default_directive = match env::var("PROFILE").as_deref() {
        Ok("test") => "warn",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::parse_duration;

    #[test]
    fn duration_strings() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("soon"), None);
    }
}
