use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::warn;

use engine::{
    adapters::{DemoImporter, FileImporter},
    Action, AnnotationEngine, DispatchOutcome, EngineConfig, HttpRemoteStore, ImportOptions,
};
use shared::domain::{Note, NoteId, PlaylistId, TrackId};
use storage::LocalStateStore;

mod config;

#[derive(Parser, Debug)]
#[command(name = "linernote", about = "Playlist annotation and sync")]
struct Cli {
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,
    /// Overrides the configured server url.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Establishes (or shows) this installation's anonymous identity.
    Bootstrap,
    /// Reassociates this installation with an existing identity.
    Restore { recovery_code: String },
    /// Rotates the recovery code; prints the fresh one exactly once.
    Rotate {
        #[arg(long)]
        csrf_token: String,
    },
    /// Loads the built-in read-only demo playlist.
    ImportDemo,
    /// Imports a JSON playlist export from disk.
    ImportFile {
        path: PathBuf,
        #[arg(long)]
        playlist_id: Option<String>,
    },
    /// Adds a note to a track.
    NoteAdd {
        track_id: String,
        body: String,
        #[arg(long)]
        timestamp_ms: Option<u64>,
        #[arg(long)]
        tag: Vec<String>,
    },
    NoteDelete {
        track_id: String,
        note_id: String,
    },
    /// Restores a recently deleted note while the undo window is open.
    NoteUndo { note_id: String },
    TagAdd {
        track_id: String,
        tag: String,
    },
    TagRemove {
        track_id: String,
        tag: String,
    },
    /// Fetches remote notes, merges them in, and flushes pending queues.
    Sync,
    /// Prints the current playlist, notes, and tags.
    Show,
    Recents,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut settings = config::load_settings();
    let cli = Cli::parse();
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }

    let store = LocalStateStore::new(&settings.database_url).await?;
    let remote = Arc::new(HttpRemoteStore::new(settings.server_url));
    let engine = AnnotationEngine::new(store, remote, EngineConfig::default()).await?;

    match cli.command {
        Command::Bootstrap => {
            let outcome = engine.identity().bootstrap().await?;
            println!("device_id={}", outcome.identity.device_id);
            println!("anon_id={}", outcome.identity.anon_id);
            match outcome.recovery_code {
                Some(code) => {
                    println!("recovery_code={code}");
                    println!("write this code down; it will not be shown again");
                }
                None => println!("identity already established on this installation"),
            }
        }
        Command::Restore { recovery_code } => {
            let identity = engine.identity().restore(&recovery_code).await?;
            println!("restored anon_id={}", identity.anon_id);
        }
        Command::Rotate { csrf_token } => {
            let rotated = engine.identity().rotate(&csrf_token).await?;
            println!("recovery_code={}", rotated.recovery_code);
            println!("write this code down; the previous one no longer works");
        }
        Command::ImportDemo => {
            engine.import(&DemoImporter, &ImportOptions::default()).await?;
            println!("loaded demo playlist (read-only)");
        }
        Command::ImportFile { path, playlist_id } => {
            let options = ImportOptions {
                source: Some(path),
                playlist_id: playlist_id.map(PlaylistId),
            };
            engine.import(&FileImporter, &options).await?;
            let state = engine.state().await;
            println!("imported {} tracks", state.tracks.len());
        }
        Command::NoteAdd {
            track_id,
            body,
            timestamp_ms,
            tag,
        } => {
            let note = Note {
                id: NoteId::random(),
                track_id: TrackId(track_id),
                body,
                timestamp_ms,
                timestamp_end_ms: None,
                tags: tag,
                created_at: Utc::now(),
                device_id: engine
                    .identity()
                    .current()
                    .await?
                    .map(|identity| identity.device_id),
            };
            report(engine.dispatch(Action::AddNote { note }).await?)?;
            settle_background_work().await;
        }
        Command::NoteDelete { track_id, note_id } => {
            report(
                engine
                    .dispatch(Action::DeleteNote {
                        track_id: TrackId(track_id),
                        note_id: NoteId(note_id.clone()),
                    })
                    .await?,
            )?;
            println!("note {note_id} deleted; `note-undo {note_id}` restores it for 10 minutes");
        }
        Command::NoteUndo { note_id } => match engine.undo_delete(&NoteId(note_id)).await? {
            Some(note) => println!("restored note on track {}", note.track_id),
            None => println!("nothing to undo; the window may have expired"),
        },
        Command::TagAdd { track_id, tag } => {
            report(
                engine
                    .dispatch(Action::AddTag {
                        track_id: TrackId(track_id),
                        tag,
                    })
                    .await?,
            )?;
            settle_background_work().await;
        }
        Command::TagRemove { track_id, tag } => {
            report(
                engine
                    .dispatch(Action::RemoveTag {
                        track_id: TrackId(track_id),
                        tag,
                    })
                    .await?,
            )?;
            settle_background_work().await;
        }
        Command::Sync => match engine.sync().await? {
            Some(flush) => {
                let state = engine.state().await;
                println!(
                    "synced: {} tracks, {} annotated",
                    state.tracks.len(),
                    state.notes_by_track.len()
                );
                if flush.total() > 0 {
                    println!(
                        "deletions: {} completed, {} already gone, {} kept for retry, {} dropped",
                        flush.completed,
                        flush.already_gone,
                        flush.retryable,
                        flush.unauthorized + flush.failed
                    );
                }
            }
            None => warn!("sync superseded by a newer request"),
        },
        Command::Show => {
            let state = engine.state().await;
            println!(
                "provider={:?} playlist={:?}",
                state.import_meta.provider,
                state.import_meta.playlist_id.as_ref().map(|p| p.as_str())
            );
            for track in &state.tracks {
                println!("{}  {} - {}", track.id, track.artist, track.title);
                if let Some(tags) = state.tags_by_track.get(&track.id) {
                    println!("    tags: {}", tags.join(", "));
                }
                for note in state.notes_by_track.get(&track.id).into_iter().flatten() {
                    match note.timestamp_ms {
                        Some(ms) => println!("    [{}] {}  ({})", ms / 1000, note.body, note.id),
                        None => println!("    {}  ({})", note.body, note.id),
                    }
                }
            }
        }
        Command::Recents => {
            let state = engine.state().await;
            for recent in &state.recent_playlists {
                println!("{:?}  {}  {}", recent.provider, recent.playlist_id, recent.title);
            }
        }
    }

    Ok(())
}

fn report(outcome: DispatchOutcome) -> Result<()> {
    match outcome {
        DispatchOutcome::Applied => Ok(()),
        DispatchOutcome::ReadOnlyIgnored => {
            warn!("this playlist is read-only; nothing was changed");
            Ok(())
        }
        DispatchOutcome::Rejected(reason) => bail!("rejected: {reason}"),
    }
}

/// The debounced tag upsert and the background note push both outlive the
/// dispatch call; give them a moment before the process exits.
async fn settle_background_work() {
    tokio::time::sleep(engine::sync::DEFAULT_QUIET_PERIOD + Duration::from_millis(150)).await;
}
