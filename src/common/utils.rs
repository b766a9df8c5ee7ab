//! Utility functions for ringkv

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use rand::Rng;

/// Percent-encoding set for keys (includes /, %, and control chars)
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&');

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Encode a key for URL usage
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| crate::Error::InvalidConfig(format!("missing unit: {}", s)))?;
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let secs_per_unit = match unit {
        "ms" => return Ok(std::time::Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    let secs = num
        .checked_mul(secs_per_unit)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("duration too large: {}", s)))?;
    Ok(std::time::Duration::from_secs(secs))
}

/// Retry retryable errors with exponential backoff plus up to 25% jitter
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_retries => {
                attempt += 1;
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    delay
                );
                let jitter = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
                tokio::time::sleep(delay + std::time::Duration::from_millis(jitter)).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Validate key (must be non-empty, reasonable length, no control chars)
pub fn validate_key(key: &str) -> crate::Result<()> {
    if key.is_empty() {
        return Err(crate::Error::InvalidKey("key cannot be empty".into()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(crate::Error::InvalidKey(format!(
            "key too long (max {} bytes)",
            MAX_KEY_LEN
        )));
    }

    if key.chars().any(|c| c.is_control()) {
        return Err(crate::Error::InvalidKey(
            "key contains invalid characters".into(),
        ));
    }

    Ok(())
}
