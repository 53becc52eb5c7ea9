use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub fn rfc3339_from_unix(secs: i64) -> String {
    OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

/// Stable short digest of a recipient address, for logs.
pub fn redact(user_ref: &str) -> String {
    let mut digest = sha256_hex(user_ref.as_bytes());
    digest.truncate(12);
    format!("user:{digest}")
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Str(s) => s.trim().to_string(),
            StringOrNumber::Num(n) => n.to_string(),
        }
    }
}

/// Ids arrive as JSON strings or bare numbers depending on the sender.
pub fn de_string_or_number<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    StringOrNumber::deserialize(d).map(String::from)
}

pub fn de_opt_string_or_number<'de, D>(d: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrNumber>::deserialize(d)?
        .map(String::from)
        .filter(|s| !s.is_empty()))
}
