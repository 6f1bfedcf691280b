//! Server-mode classification.
//!
//! Synchronous mode is the default fast path used on every scan; async
//! mode cross-checks each sampled id against Minetools then PlayerDB and is
//! reserved for the coordinator's full-scan mode, since it costs one or two
//! extra HTTP round-trips per sampled player.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::net::tunnel::Tunnel;
use crate::slp::PlayerSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Online,
    Cracked,
    Unknown,
}

fn strict_uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .unwrap()
    })
}

/// A player id is "malformed" cracked-mode evidence when it starts with the
/// all-zero prefix that offline-mode UUID derivation tends to produce.
/// This also flags some legitimate Bedrock-crossplay UUIDs; left as-is
/// rather than special-cased.
fn looks_cracked(id: &str) -> bool {
    id.starts_with("00000000")
}

/// Synchronous classification: inspect `players.sample[].id` only.
pub fn classify_sync(sample: &[PlayerSample]) -> ServerMode {
    if sample.is_empty() {
        return ServerMode::Unknown;
    }
    let re = strict_uuid_re();
    let all_valid = sample.iter().all(|p| re.is_match(&p.id));
    if all_valid {
        return ServerMode::Online;
    }
    let any_cracked = sample.iter().any(|p| looks_cracked(&p.id));
    let all_malformed = sample.iter().all(|p| !re.is_match(&p.id));
    if all_malformed && any_cracked {
        return ServerMode::Cracked;
    }
    ServerMode::Unknown
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LookupOutcome {
    Valid,
    Invalid,
    Error,
}

async fn lookup_minetools(tunnel: &Tunnel, uuid: &str) -> LookupOutcome {
    let url = format!("https://api.minetools.eu/uuid/{uuid}");
    match tunnel.https_get_json(&url).await {
        Ok(v) => {
            if v.get("id").and_then(|x| x.as_str()).is_some() {
                LookupOutcome::Valid
            } else {
                LookupOutcome::Invalid
            }
        }
        Err(_) => LookupOutcome::Error,
    }
}

async fn lookup_playerdb(tunnel: &Tunnel, uuid: &str) -> LookupOutcome {
    let url = format!("https://playerdb.co/api/player/minecraft/{uuid}");
    match tunnel.https_get_json(&url).await {
        Ok(v) => {
            if v.get("success").and_then(|x| x.as_bool()).unwrap_or(false) {
                LookupOutcome::Valid
            } else {
                LookupOutcome::Invalid
            }
        }
        Err(_) => LookupOutcome::Error,
    }
}

/// Async classification: verify each id against Minetools, falling back to
/// PlayerDB on a non-conclusive answer. Classifies from the aggregate set
/// of `{valid, invalid, error}` outcomes across all sampled ids.
pub async fn classify_async(tunnel: &Tunnel, sample: &[PlayerSample]) -> ServerMode {
    if sample.is_empty() {
        return ServerMode::Unknown;
    }

    let mut outcomes = Vec::with_capacity(sample.len());
    for p in sample {
        let mut outcome = lookup_minetools(tunnel, &p.id).await;
        if outcome == LookupOutcome::Error {
            outcome = lookup_playerdb(tunnel, &p.id).await;
        }
        outcomes.push(outcome);
    }

    let errored = outcomes.iter().filter(|o| **o == LookupOutcome::Error).count();
    if errored * 2 > outcomes.len() {
        return ServerMode::Unknown;
    }

    let valid = outcomes.iter().filter(|o| **o == LookupOutcome::Valid).count();
    let invalid = outcomes.iter().filter(|o| **o == LookupOutcome::Invalid).count();

    if valid > 0 && invalid == 0 {
        ServerMode::Online
    } else if invalid > 0 && valid == 0 {
        ServerMode::Cracked
    } else {
        ServerMode::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> PlayerSample {
        PlayerSample {
            name: "Player".into(),
            id: id.into(),
        }
    }

    #[test]
    fn all_valid_is_online() {
        let s = vec![
            sample("3b9f1234-5678-4abc-9def-0123456789ab"),
            sample("aaaaaaaa-bbbb-4ccc-8ddd-eeeeeeeeeeee"),
        ];
        assert_eq!(classify_sync(&s), ServerMode::Online);
    }

    #[test]
    fn all_zero_prefixed_is_cracked() {
        let s = vec![
            sample("00000000-0000-0000-0000-000000000001"),
            sample("00000000-0000-0000-0000-000000000002"),
        ];
        assert_eq!(classify_sync(&s), ServerMode::Cracked);
    }

    #[test]
    fn mixed_is_unknown() {
        let s = vec![
            sample("3b9f1234-5678-4abc-9def-0123456789ab"),
            sample("00000000-0000-0000-0000-000000000001"),
        ];
        assert_eq!(classify_sync(&s), ServerMode::Unknown);
    }

    #[test]
    fn empty_sample_is_unknown() {
        assert_eq!(classify_sync(&[]), ServerMode::Unknown);
    }
}
