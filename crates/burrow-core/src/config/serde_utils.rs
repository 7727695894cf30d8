//! Serde helpers shared by configuration types

/// `Duration` written as a number of seconds
///
/// Accepts integers and fractions (`5`, `0.5`). Negative, non-finite and
/// out-of-range values are rejected.
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct Config {
///     #[serde(with = "burrow_core::config::serde_utils::duration_secs")]
///     api_timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|e| {
            D::Error::custom(format!("invalid number of seconds {}: {}", secs, e))
        })
    }
}
