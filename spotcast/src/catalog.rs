//! Media lookup
//!
//! A [`MediaCatalog`] turns song and effect names into [`MediaRef`]s and opens
//! them as byte sources. [`FsCatalog`] serves a songs directory and an effects
//! directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::BoxedReader;

/// A resolved media file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Name the media was resolved from (file name for effects)
    pub id: String,
    pub path: PathBuf,
    /// Size in bytes
    pub len: u64,
}

#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// Resolve a song by its exact file name
    async fn song(&self, name: &str) -> Result<MediaRef>;

    /// Resolve an effect by case-insensitive substring of its file name
    async fn find_effect(&self, name: &str) -> Result<MediaRef>;

    /// Open a resolved media for reading from its first byte
    async fn open(&self, media: &MediaRef) -> Result<BoxedReader>;
}

/// File-system catalog
#[derive(Debug, Clone)]
pub struct FsCatalog {
    songs_dir: PathBuf,
    fx_dir: PathBuf,
}

impl FsCatalog {
    pub fn new(songs_dir: impl Into<PathBuf>, fx_dir: impl Into<PathBuf>) -> Self {
        Self {
            songs_dir: songs_dir.into(),
            fx_dir: fx_dir.into(),
        }
    }

    pub fn songs_dir(&self) -> &Path {
        &self.songs_dir
    }

    pub fn fx_dir(&self) -> &Path {
        &self.fx_dir
    }

    async fn resolve(id: &str, path: PathBuf) -> Result<MediaRef> {
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::from_media_io(id, e))?;
        if !meta.is_file() {
            return Err(Error::SourceNotFound(id.to_string()));
        }
        Ok(MediaRef {
            id: id.to_string(),
            path,
            len: meta.len(),
        })
    }
}

/// A bare file name, no separators and no `..`
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[async_trait]
impl MediaCatalog for FsCatalog {
    async fn song(&self, name: &str) -> Result<MediaRef> {
        if !is_plain_name(name) {
            return Err(Error::SourceNotFound(name.to_string()));
        }
        Self::resolve(name, self.songs_dir.join(name)).await
    }

    async fn find_effect(&self, name: &str) -> Result<MediaRef> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::SourceNotFound(name.to_string()));
        }

        let mut entries = tokio::fs::read_dir(&self.fx_dir)
            .await
            .map_err(|e| Error::from_media_io(self.fx_dir.display().to_string(), e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                if let Some(file_name) = entry.file_name().to_str() {
                    names.push(file_name.to_string());
                }
            }
        }
        names.sort();

        let found = names
            .into_iter()
            .find(|n| n.to_lowercase().contains(&needle))
            .ok_or_else(|| Error::SourceNotFound(name.to_string()))?;

        debug!(query = %name, effect = %found, "Effect resolved");
        let path = self.fx_dir.join(&found);
        Self::resolve(&found, path).await
    }

    async fn open(&self, media: &MediaRef) -> Result<BoxedReader> {
        let file = tokio::fs::File::open(&media.path)
            .await
            .map_err(|e| Error::from_media_io(media.id.clone(), e))?;
        Ok(Box::pin(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn catalog_with(
        files: &[(&str, &str)],
        effects: &[(&str, &str)],
    ) -> (tempfile::TempDir, FsCatalog) {
        let dir = tempfile::tempdir().unwrap();
        let songs = dir.path().join("songs");
        let fx = dir.path().join("fx");
        std::fs::create_dir_all(&songs).unwrap();
        std::fs::create_dir_all(&fx).unwrap();
        for (name, data) in files {
            std::fs::write(songs.join(name), data).unwrap();
        }
        for (name, data) in effects {
            std::fs::write(fx.join(name), data).unwrap();
        }
        (dir, FsCatalog::new(songs, fx))
    }

    #[tokio::test]
    async fn test_song_resolves_and_opens() {
        let (_dir, catalog) = catalog_with(&[("conversation.mp3", "abcdef")], &[]);

        let song = catalog.song("conversation.mp3").await.unwrap();
        assert_eq!(song.len, 6);

        let mut reader = catalog.open(&song).await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"abcdef");
    }

    #[tokio::test]
    async fn test_missing_song_is_not_found() {
        let (_dir, catalog) = catalog_with(&[], &[]);
        assert!(matches!(
            catalog.song("nope.mp3").await,
            Err(Error::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_song_name_cannot_escape_directory() {
        let (_dir, catalog) = catalog_with(&[("a.mp3", "x")], &[]);
        assert!(matches!(
            catalog.song("../songs/a.mp3").await,
            Err(Error::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_effect_substring_match_is_case_insensitive() {
        let (_dir, catalog) = catalog_with(
            &[],
            &[("Applause.mp3", "clap"), ("airhorn.mp3", "honk")],
        );

        let fx = catalog.find_effect("APPLA").await.unwrap();
        assert_eq!(fx.id, "Applause.mp3");
        assert_eq!(fx.len, 4);

        let fx = catalog.find_effect("horn").await.unwrap();
        assert_eq!(fx.id, "airhorn.mp3");
    }

    #[tokio::test]
    async fn test_effect_first_sorted_match_wins() {
        let (_dir, catalog) =
            catalog_with(&[], &[("laugh2.mp3", "2"), ("laugh1.mp3", "1")]);
        let fx = catalog.find_effect("laugh").await.unwrap();
        assert_eq!(fx.id, "laugh1.mp3");
    }

    #[tokio::test]
    async fn test_unknown_effect_is_not_found() {
        let (_dir, catalog) = catalog_with(&[], &[("applause.mp3", "clap")]);
        assert!(matches!(
            catalog.find_effect("drumroll").await,
            Err(Error::SourceNotFound(_))
        ));
        assert!(matches!(
            catalog.find_effect("   ").await,
            Err(Error::SourceNotFound(_))
        ));
    }
}
