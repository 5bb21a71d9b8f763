//! Plan files: the JSON list of items a batch is built from

use anyhow::Context;
use app_core::{Action, ActionKind, EpisodeRef, Item, ItemList, MissingItem};
use serde::Deserialize;
use std::path::Path;

/// One entry of a plan file.
///
/// ```json
/// [
///   { "action": { "op": "rename", "from": "/tv/a.mkv", "to": "/tv/A - S01E01.mkv", "episode": "a:1/1" } },
///   { "missing": { "episode": "a:1/2", "expected_path": "/tv/A - S01E02.mkv" } }
/// ]
/// ```
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntry {
    Action {
        #[serde(default)]
        episode: Option<EpisodeRef>,
        #[serde(flatten)]
        kind: ActionKind,
    },
    Missing(MissingItem),
}

impl From<PlanEntry> for Item {
    fn from(entry: PlanEntry) -> Self {
        match entry {
            PlanEntry::Action {
                episode: Some(episode),
                kind,
            } => Action::for_episode(kind, episode).into(),
            PlanEntry::Action {
                episode: None,
                kind,
            } => Action::new(kind).into(),
            PlanEntry::Missing(missing) => Item::Missing(missing),
        }
    }
}

pub fn parse(json: &str) -> anyhow::Result<ItemList> {
    let entries: Vec<PlanEntry> = serde_json::from_str(json)?;
    Ok(entries.into_iter().map(Item::from).collect())
}

pub fn load(path: &Path) -> anyhow::Result<ItemList> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let items = parse(&json).with_context(|| format!("invalid plan {}", path.display()))?;
    tracing::info!("Loaded {} items from {}", items.len(), path.display());
    Ok(items)
}
