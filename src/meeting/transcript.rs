//! Provider transcripts: line-delimited JSON utterances, annotated with the
//! speaker's display name.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, error};

use crate::db::{directory::speakers_by_id, Database, SpeakerKind, SpeakerRecord};
use crate::gateway::{avatar_url, AvatarStyle};

pub const UNKNOWN_SPEAKER: &str = "Unknown";

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_TRANSCRIPT_BYTES: usize = 16 * 1024 * 1024;

/// One utterance. Offsets are relative to the start of the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub speaker_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub start_ts: f64,
    #[serde(default)]
    pub stop_ts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedItem {
    #[serde(flatten)]
    pub item: TranscriptItem,
    pub user: Speaker,
}

pub fn parse_jsonl(raw: &str) -> Result<Vec<TranscriptItem>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid transcript line {}", index + 1))
        })
        .collect()
}

/// Distinct speaker ids in first-seen order.
pub fn speaker_ids(items: &[TranscriptItem]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.speaker_id.as_str()))
        .map(|item| item.speaker_id.clone())
        .collect()
}

/// Attach a display name to every item; unmatched ids become "Unknown".
///
/// With `with_images`, each speaker also gets an image: the stored one, or a
/// generated avatar.
pub fn annotate(
    items: Vec<TranscriptItem>,
    speakers: &HashMap<String, SpeakerRecord>,
    with_images: bool,
) -> Vec<AnnotatedItem> {
    items
        .into_iter()
        .map(|item| {
            let user = match speakers.get(&item.speaker_id) {
                Some(speaker) => Speaker {
                    name: speaker.name.clone(),
                    image: with_images.then(|| speaker_image(speaker)),
                },
                None => Speaker {
                    name: UNKNOWN_SPEAKER.to_string(),
                    image: with_images
                        .then(|| avatar_url(AvatarStyle::Initials, UNKNOWN_SPEAKER)),
                },
            };
            AnnotatedItem { item, user }
        })
        .collect()
}

fn speaker_image(speaker: &SpeakerRecord) -> String {
    match (&speaker.image, speaker.kind) {
        (Some(image), _) => image.clone(),
        (None, SpeakerKind::Agent) => avatar_url(AvatarStyle::BotttsNeutral, &speaker.name),
        (None, SpeakerKind::User) => avatar_url(AvatarStyle::Initials, &speaker.name),
    }
}

/// HTTP client for transcript downloads; every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .timeout(timeout)
        .build()
        .context("Failed to build transcript HTTP client")
}

pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<String> {
    fetch_capped(client, url, MAX_TRANSCRIPT_BYTES).await
}

async fn fetch_capped(client: &reqwest::Client, url: &str, max_bytes: usize) -> Result<String> {
    let mut response = client
        .get(url)
        .send()
        .await
        .context("Failed to fetch transcript")?;

    let status = response.status();
    if !status.is_success() {
        error!("Transcript fetch failed with status {}: {}", status, url);
        anyhow::bail!("Transcript fetch failed with status {}", status);
    }

    if let Some(length) = response.content_length() {
        if length > max_bytes as u64 {
            anyhow::bail!("Transcript is {} bytes, limit is {}", length, max_bytes);
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .context("Failed to read transcript body")?
    {
        if body.len() + chunk.len() > max_bytes {
            anyhow::bail!("Transcript exceeds {} bytes", max_bytes);
        }
        body.extend_from_slice(&chunk);
    }

    let body = String::from_utf8(body).context("Transcript is not valid UTF-8")?;
    debug!("Fetched transcript ({} bytes)", body.len());
    Ok(body)
}

pub async fn lookup_speakers(
    db: &Database,
    items: &[TranscriptItem],
) -> Result<HashMap<String, SpeakerRecord>> {
    let ids = speaker_ids(items);
    db.call(move |conn| speakers_by_id(conn, &ids)).await
}

/// Fetch, parse and annotate the transcript at `url` for display.
pub async fn load_annotated(
    db: &Database,
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<AnnotatedItem>> {
    let raw = fetch(client, url).await?;
    let items = parse_jsonl(&raw)?;
    let speakers = lookup_speakers(db, &items).await?;
    Ok(annotate(items, &speakers, true))
}
