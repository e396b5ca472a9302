use crate::backend::{swap_red_blue, ChannelOrder, FaceBackend};
use crate::config::MultiFacePolicy;
use crate::embed::Embedding;
use crate::read_rgb_image;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("Cannot read gallery directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A known person: name plus the embedding of their reference face
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Returns false and leaves the gallery unchanged if the
    /// name is already present.
    pub fn insert(&mut self, name: impl Into<String>, embedding: Embedding) -> bool {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return false;
        }
        self.entries.push(GalleryEntry { name, embedding });
        true
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a reference image did not make it into the gallery
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum SkipReason {
    Unreadable(String),
    NoFace,
    MultipleFaces(usize),
    Backend(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Unreadable(e) => write!(f, "unreadable image ({})", e),
            SkipReason::NoFace => write!(f, "no face detected"),
            SkipReason::MultipleFaces(n) => write!(f, "{} faces detected, expected one", n),
            SkipReason::Backend(e) => write!(f, "face analysis failed ({})", e),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedReference {
    pub name: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct GalleryBuild {
    pub gallery: Gallery,
    pub skipped: Vec<SkippedReference>,
}

/// Find reference images in `dir` with the given extension (case-insensitive).
///
/// Each file stem becomes a person's name. Not recursive.
pub fn discover<P: AsRef<Path>>(
    dir: P,
    extension: &str,
) -> Result<BTreeMap<String, PathBuf>, GalleryError> {
    let dir = dir.as_ref();
    let wanted = extension.trim_start_matches('.');
    let io_err = |source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
        })
        .collect();
    paths.sort();

    let mut references: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            log::warn!("Skipping {}: file name is not valid UTF-8", path.display());
            continue;
        };
        if let Some(existing) = references.get(&name) {
            log::warn!(
                "Skipping {}: name {:?} already taken by {}",
                path.display(),
                name,
                existing.display()
            );
            continue;
        }
        references.insert(name, path);
    }

    log::debug!("Found {} reference images in {}", references.len(), dir.display());
    Ok(references)
}

/// Build a gallery from `{name -> image path}`.
///
/// Unusable reference images are logged and reported in
/// [`GalleryBuild::skipped`]; they never abort the build.
pub fn build<B: FaceBackend>(
    backend: &mut B,
    references: &BTreeMap<String, PathBuf>,
    policy: MultiFacePolicy,
) -> GalleryBuild {
    let mut result = GalleryBuild::default();

    for (name, path) in references {
        match embed_reference(backend, path, policy) {
            Ok(embedding) => {
                log::info!("Loaded reference face for {}", name);
                result.gallery.insert(name.clone(), embedding);
            }
            Err(reason) => {
                match &reason {
                    SkipReason::Unreadable(_) | SkipReason::Backend(_) => {
                        log::error!("Failed to load reference image {}: {}", path.display(), reason)
                    }
                    SkipReason::NoFace | SkipReason::MultipleFaces(_) => {
                        log::warn!("Skipping reference image {}: {}", path.display(), reason)
                    }
                }
                result.skipped.push(SkippedReference {
                    name: name.clone(),
                    path: path.clone(),
                    reason,
                });
            }
        }
    }

    result
}

fn embed_reference<B: FaceBackend>(
    backend: &mut B,
    path: &Path,
    policy: MultiFacePolicy,
) -> Result<Embedding, SkipReason> {
    let mut image = read_rgb_image(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    if backend.channel_order() == ChannelOrder::Bgr {
        swap_red_blue(&mut image);
    }

    let detections = backend
        .detect_and_embed(&image)
        .map_err(|e| SkipReason::Backend(e.to_string()))?;

    let count = detections.len();
    let first = detections.into_iter().next().ok_or(SkipReason::NoFace)?;
    if count > 1 {
        match policy {
            MultiFacePolicy::Reject => return Err(SkipReason::MultipleFaces(count)),
            MultiFacePolicy::MostProminent => {
                log::warn!(
                    "{} faces in {}, keeping the most prominent",
                    count,
                    path.display()
                );
            }
        }
    }

    Ok(first.embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_dir, write_marker_image, ScriptedBackend};
    use ndarray::arr1;

    #[test]
    fn test_insert_rejects_duplicate_names() {
        let mut gallery = Gallery::new();
        assert!(gallery.insert("alice", arr1(&[1.0, 0.0])));
        assert!(!gallery.insert("alice", arr1(&[0.0, 1.0])));
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery.entries()[0].embedding[0], 1.0);
    }

    #[test]
    fn test_discover_filters_by_extension() {
        let dir = scratch_dir("discover");
        write_marker_image(&dir.join("bob.jpg"), 1);
        write_marker_image(&dir.join("alice.JPG"), 2);
        write_marker_image(&dir.join("carol.png"), 3);
        fs::write(dir.join("notes.txt"), "not an image").unwrap();
        fs::create_dir_all(dir.join("nested.jpg")).unwrap();

        let refs = discover(&dir, "jpg").unwrap();
        let names: Vec<&str> = refs.keys().map(String::as_str).collect();
        assert_eq!(names, ["alice", "bob"]);

        let refs = discover(&dir, ".png").unwrap();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains_key("carol"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_discover_name_collision_keeps_first_path() {
        let dir = scratch_dir("collision");
        write_marker_image(&dir.join("dana.JPG"), 1);
        write_marker_image(&dir.join("dana.jpg"), 2);

        let refs = discover(&dir, "jpg").unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs["dana"], dir.join("dana.JPG"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_discover_missing_directory() {
        let root = scratch_dir("missing");
        assert!(matches!(
            discover(root.join("nope"), "jpg"),
            Err(GalleryError::Io { .. })
        ));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_build_skips_unusable_references() {
        let dir = scratch_dir("build");
        write_marker_image(&dir.join("alice.jpg"), 1);
        write_marker_image(&dir.join("nobody.jpg"), 2);
        write_marker_image(&dir.join("crowd.jpg"), 3);
        fs::write(dir.join("broken.jpg"), b"definitely not a jpeg").unwrap();

        let mut backend = ScriptedBackend::new()
            .with_faces(1, &[[1.0, 0.0, 0.0]])
            .with_faces(3, &[[0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

        let refs = discover(&dir, "jpg").unwrap();
        let built = build(&mut backend, &refs, MultiFacePolicy::Reject);

        assert_eq!(built.gallery.names().collect::<Vec<_>>(), ["alice"]);
        assert_eq!(built.skipped.len(), 3);

        let reason = |name: &str| {
            built
                .skipped
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.reason.clone())
                .unwrap()
        };
        assert!(matches!(reason("broken"), SkipReason::Unreadable(_)));
        assert_eq!(reason("crowd"), SkipReason::MultipleFaces(2));
        assert_eq!(reason("nobody"), SkipReason::NoFace);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_most_prominent_policy_keeps_first_face() {
        let dir = scratch_dir("prominent");
        write_marker_image(&dir.join("crowd.jpg"), 3);

        let mut backend =
            ScriptedBackend::new().with_faces(3, &[[0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        let refs = discover(&dir, "jpg").unwrap();
        let built = build(&mut backend, &refs, MultiFacePolicy::MostProminent);

        assert!(built.skipped.is_empty());
        assert_eq!(built.gallery.entries()[0].embedding, arr1(&[0.0, 1.0, 0.0]));

        let _ = fs::remove_dir_all(&dir);
    }
}
