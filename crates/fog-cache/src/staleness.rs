use std::fmt;
use std::time::{Duration, TryFromFloatSecsError};

use serde::{Deserialize, Deserializer, de};
use tokio::time::Instant;

/// How long received data stays fresh before a `get` refetches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Staleness {
    /// Data is never considered stale.
    #[default]
    Never,
    /// Data is always stale, every `get` refetches.
    Always,
    /// Data becomes stale once it is older than the given duration.
    After(Duration),
}

impl Staleness {
    /// Whether data received at `time` is stale by now.
    pub fn is_stale(self, time: Instant) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::After(duration) => time.elapsed() > duration,
        }
    }

    /// Converts the numeric convention: negative means never, zero always, positive seconds.
    ///
    /// Fails for positive values too large for a [`Duration`] and for NaN.
    pub fn try_from_secs_f64(secs: f64) -> Result<Self, TryFromFloatSecsError> {
        if secs < 0.0 {
            Ok(Self::Never)
        } else if secs == 0.0 {
            Ok(Self::Always)
        } else {
            Duration::try_from_secs_f64(secs).map(Self::After)
        }
    }
}

impl From<Duration> for Staleness {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Always
        } else {
            Self::After(duration)
        }
    }
}

#[derive(Debug)]
struct StalenessVisitor;

impl<'de> de::Visitor<'de> for StalenessVisitor {
    type Value = Staleness;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#""never", "always", a duration like "30s", or a number of seconds"#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "never" => Ok(Staleness::Never),
            "always" => Ok(Staleness::Always),
            _ => humantime::parse_duration(v)
                .map(Staleness::from)
                .map_err(de::Error::custom),
        }
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Staleness::try_from_secs_f64(v as f64)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Staleness::try_from_secs_f64(v as f64)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Unsigned(v), &self))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match Staleness::try_from_secs_f64(v) {
            Ok(staleness) if v.is_finite() => Ok(staleness),
            _ => Err(de::Error::invalid_value(de::Unexpected::Float(v), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for Staleness {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(StalenessVisitor)
    }
}
