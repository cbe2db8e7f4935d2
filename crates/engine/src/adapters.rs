//! Playlist import boundary.
//!
//! Providers are behind one capability trait; whatever shape a source has,
//! it is normalized to canonical `Track`/`ImportMeta` values here, before
//! the core ever sees it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::path::PathBuf;

use shared::domain::{ImportMeta, PlaylistId, Provider, Track, TrackId, TrackKind};

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Source file for file-based providers.
    pub source: Option<PathBuf>,
    pub playlist_id: Option<PlaylistId>,
}

#[derive(Debug, Clone)]
pub struct AdapterResult {
    pub tracks: Vec<Track>,
    pub meta: ImportMeta,
    pub title: String,
}

#[async_trait]
pub trait PlaylistImporter: Send + Sync {
    fn provider(&self) -> Provider;
    async fn import(&self, options: &ImportOptions) -> Result<AdapterResult>;
}

/// Built-in read-only fixture playlist. Annotations against it are blocked
/// by the reducer's read-only guard and nothing from it is ever synced.
pub struct DemoImporter;

#[async_trait]
impl PlaylistImporter for DemoImporter {
    fn provider(&self) -> Provider {
        Provider::Demo
    }

    async fn import(&self, _options: &ImportOptions) -> Result<AdapterResult> {
        let tracks = vec![
            demo_track("demo-1", "Windmills", "The Paper Kites"),
            demo_track("demo-2", "Holocene", "Bon Iver"),
            demo_track("demo-3", "Night Owl", "Galimatias"),
        ];
        Ok(AdapterResult {
            tracks,
            meta: ImportMeta {
                provider: Provider::Demo,
                playlist_id: Some(PlaylistId::from("demo")),
                imported_at: Some(Utc::now()),
            },
            title: "Demo playlist".to_string(),
        })
    }
}

fn demo_track(id: &str, title: &str, artist: &str) -> Track {
    Track {
        id: TrackId::from(id),
        title: title.to_string(),
        artist: artist.to_string(),
        kind: TrackKind::Music,
    }
}

#[derive(Debug, Deserialize)]
struct ExportFile {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    id: Option<String>,
    tracks: Vec<ExportTrack>,
}

#[derive(Debug, Deserialize)]
struct ExportTrack {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    kind: Option<TrackKind>,
}

/// Imports a JSON playlist export from disk.
pub struct FileImporter;

#[async_trait]
impl PlaylistImporter for FileImporter {
    fn provider(&self) -> Provider {
        Provider::FileImport
    }

    async fn import(&self, options: &ImportOptions) -> Result<AdapterResult> {
        let path = options
            .source
            .as_ref()
            .context("file import requires a source path")?;
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read playlist export '{}'", path.display()))?;
        let export: ExportFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid playlist export '{}'", path.display()))?;

        let tracks = export
            .tracks
            .into_iter()
            .map(|t| Track {
                id: t.id.map(|id| TrackId(id)).unwrap_or_else(TrackId::random),
                title: t.title,
                artist: t.artist.unwrap_or_default(),
                kind: t.kind.unwrap_or(TrackKind::Music),
            })
            .collect();

        let playlist_id = options
            .playlist_id
            .clone()
            .or_else(|| export.id.map(PlaylistId))
            .unwrap_or_else(PlaylistId::random);

        Ok(AdapterResult {
            tracks,
            meta: ImportMeta {
                provider: Provider::FileImport,
                playlist_id: Some(playlist_id),
                imported_at: Some(Utc::now()),
            },
            title: export.title.unwrap_or_else(|| "Imported playlist".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_import_is_read_only_with_fixture_tracks() {
        let result = DemoImporter
            .import(&ImportOptions::default())
            .await
            .expect("demo import");
        assert_eq!(result.meta.provider, Provider::Demo);
        assert!(result.meta.provider.is_read_only());
        assert_eq!(result.tracks.len(), 3);
        assert_eq!(result.meta.playlist_id, Some(PlaylistId::from("demo")));
    }

    #[tokio::test]
    async fn file_import_without_a_source_path_errors() {
        let err = FileImporter
            .import(&ImportOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("source path"));
    }
}
