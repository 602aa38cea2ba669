//! Injection of a finished metafile into the configured torrent client.
//!
//! One injection runs its steps in a fixed order, each consuming what the
//! previous one chose: resolve the path pair, stage the content, build fast
//! resume data where the client needs it, then hand everything to the
//! backend. Nothing created along the way is cleaned up on failure.
use std::io;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};

use crate::client::{self, Adapter, Backend, InjectRequest, Overrides};
use crate::conf::{ClientConf, ClientKind, Conf, LinkMode};
use crate::error::link::LinkError;
use crate::error::{InjectError, Result};
use crate::link::{Linker, StageRequest};
use crate::metainfo::Metainfo;
use crate::path_map;
use crate::resume;
use crate::reuse::ContentDescriptor;
use crate::search::tracker_id::TrackerPatterns;
use crate::search::Searcher;

/// One metafile to inject for one tracker.
#[derive(Debug, Clone)]
pub struct Injection {
    pub tracker: String,
    /// The finished metafile, conventionally `[<tracker>].torrent`.
    pub metafile_path: PathBuf,
    pub content: ContentDescriptor,
    /// The user asked not to seed.
    pub no_seed: bool,
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSeed,
    /// Injection is disabled with the `none` client.
    NoClient,
    MissingMetafile,
}

#[derive(Debug)]
pub enum InjectOutcome {
    Added {
        tracker: String,
        /// The path the client seeds from.
        seed_path: PathBuf,
        linked: bool,
        /// A link that could not be created; the client seeds from the
        /// original content instead.
        link_warning: Option<LinkError>,
    },
    Skipped {
        tracker: String,
        reason: SkipReason,
    },
}

impl InjectOutcome {
    pub fn tracker(&self) -> &str {
        match self {
            InjectOutcome::Added { tracker, .. } | InjectOutcome::Skipped { tracker, .. } => {
                tracker
            }
        }
    }

    fn skipped(injection: &Injection, reason: SkipReason) -> Self {
        log::info!("Not adding {} to the client: {:?}", injection.tracker, reason);
        InjectOutcome::Skipped {
            tracker: injection.tracker.clone(),
            reason,
        }
    }
}

/// The staging result a backend works from.
struct Seed {
    path: PathBuf,
    tracker_dir: Option<PathBuf>,
    linked: bool,
    warning: Option<LinkError>,
}

pub struct Injector {
    conf: ClientConf,
    backend: Backend,
    linker: Linker,
    patterns: TrackerPatterns,
}

impl Injector {
    pub fn new(conf: ClientConf) -> client::Result<Self> {
        let backend = Backend::from_conf(&conf)?;
        Ok(Self {
            conf,
            backend,
            linker: Linker::default(),
            patterns: TrackerPatterns::default(),
        })
    }

    pub fn with_linker(mut self, linker: Linker) -> Self {
        self.linker = linker;
        self
    }

    /// Replaces the built in comment patterns used by [`Injector::searcher`],
    /// usually with [`Conf::tracker_patterns`].
    pub fn with_tracker_patterns(mut self, patterns: TrackerPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn conf(&self) -> &ClientConf {
        &self.conf
    }

    /// A searcher over this client's torrents, exporting into `scratch_dir`.
    pub fn searcher(&self, scratch_dir: impl Into<PathBuf>) -> Searcher<'_> {
        Searcher::new(&self.conf, self.backend.as_source(), scratch_dir)
            .with_patterns(self.patterns.clone())
    }

    /// Adds the injection's metafile to the client and starts seeding.
    pub async fn add_to_client(&self, injection: &Injection) -> Result<InjectOutcome> {
        let tracker = injection.tracker.as_str();
        if injection.no_seed {
            return Ok(InjectOutcome::skipped(injection, SkipReason::NoSeed));
        }
        let metafile = match tokio::fs::read(&injection.metafile_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(InjectOutcome::skipped(injection, SkipReason::MissingMetafile));
            }
            Err(source) => {
                return Err(InjectError::Io {
                    tracker: tracker.to_string(),
                    source,
                })
            }
        };
        let metainfo = Metainfo::from_bytes(&metafile).map_err(|source| InjectError::Metafile {
            tracker: tracker.to_string(),
            source,
        })?;

        let paths = path_map::resolve(&self.conf.path_maps(), &injection.content.path);
        log::debug!(
            "Adding {} to {:?} with path map {} -> {}",
            tracker,
            self.conf.kind,
            paths.local,
            paths.remote
        );

        let seed = self.stage(injection).await?;

        let (metafile, metafile_path) = if self.conf.kind.needs_fast_resume() {
            self.write_resume(tracker, metafile, &injection.metafile_path, &seed.path)
                .await?
        } else {
            (metafile, injection.metafile_path.clone())
        };

        let req = InjectRequest {
            tracker,
            metafile: &metafile,
            metafile_path: &metafile_path,
            info_hash: &metainfo.info_hash,
            content: &injection.content,
            seed_path: &seed.path,
            tracker_dir: seed.tracker_dir.as_deref(),
            paths: &paths,
            overrides: &injection.overrides,
        };
        self.backend
            .inject(&req)
            .await
            .map_err(|e| InjectError::from_client(tracker, e))?;

        log::info!("Added {} to {:?}", tracker, self.conf.kind);
        Ok(InjectOutcome::Added {
            tracker: tracker.to_string(),
            seed_path: seed.path,
            linked: seed.linked,
            link_warning: seed.warning,
        })
    }

    /// Injects every item, at most `concurrency` at a time. A failure only
    /// affects its own item.
    pub async fn add_all(
        &self,
        injections: &[Injection],
        concurrency: usize,
    ) -> Vec<Result<InjectOutcome>> {
        stream::iter(injections)
            .map(|injection| self.add_to_client(injection))
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    async fn stage(&self, injection: &Injection) -> Result<Seed> {
        let source = injection.content.source_path();
        let unlinked = Seed {
            path: source.to_path_buf(),
            tracker_dir: None,
            linked: false,
            warning: None,
        };
        // the watch folder client never sees a save path
        if self.conf.kind == ClientKind::Watch || self.conf.linking == LinkMode::None {
            return Ok(unlinked);
        }

        let staged = self
            .linker
            .stage(&StageRequest {
                source,
                mode: self.conf.linking,
                linked_folders: &self.conf.linked_folders,
                tracker: &injection.tracker,
            })
            .await
            .map_err(|e| InjectError::from_link(&injection.tracker, e))?;

        Ok(match staged {
            Some(staged) if staged.linked => Seed {
                path: staged.path,
                tracker_dir: Some(staged.tracker_dir),
                linked: true,
                warning: staged.warning,
            },
            Some(staged) => Seed {
                warning: staged.warning,
                ..unlinked
            },
            None => unlinked,
        })
    }

    /// Builds the resume augmented metafile and writes it beside the
    /// original, returning its bytes and path.
    async fn write_resume(
        &self,
        tracker: &str,
        metafile: Vec<u8>,
        metafile_path: &Path,
        content_path: &Path,
    ) -> Result<(Vec<u8>, PathBuf)> {
        let content_path = content_path.to_path_buf();
        let augmented = tokio::task::spawn_blocking(move || resume::augment(&metafile, &content_path))
            .await
            .map_err(|e| InjectError::Io {
                tracker: tracker.to_string(),
                source: io::Error::new(io::ErrorKind::Other, e),
            })?
            .map_err(|source| {
                log::error!("Cannot build fast resume data for {}: {}", tracker, source);
                InjectError::Resume {
                    tracker: tracker.to_string(),
                    source,
                }
            })?;

        let side_file = resume::side_file_path(metafile_path);
        tokio::fs::write(&side_file, &augmented)
            .await
            .map_err(|source| InjectError::Io {
                tracker: tracker.to_string(),
                source,
            })?;
        log::debug!("Wrote fast resume metafile {:?}", side_file);
        Ok((augmented, side_file))
    }
}

/// Injects into the client named `client`, or the default client, unless
/// injection is disabled.
pub async fn add_to_client(
    conf: &Conf,
    client: Option<&str>,
    injection: &Injection,
) -> Result<InjectOutcome> {
    if injection.no_seed {
        return Ok(InjectOutcome::skipped(injection, SkipReason::NoSeed));
    }
    let Some(client_conf) = conf.client(client)? else {
        return Ok(InjectOutcome::skipped(injection, SkipReason::NoClient));
    };
    let injector = Injector::new(client_conf.clone())
        .map_err(|e| InjectError::from_client(&injection.tracker, e))?
        .with_tracker_patterns(conf.tracker_patterns()?);
    injector.add_to_client(injection).await
}
