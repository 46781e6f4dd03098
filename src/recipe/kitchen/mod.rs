// src/recipe/kitchen/mod.rs

//! Kitchen: where recipes are cooked into installed kegs
//!
//! The Kitchen drives one recipe through the pipeline:
//! - Resolve a bottle for the configured platform
//! - Pour the bottle, or fetch, patch and build the source
//! - Verify every archive before it is used
//! - Install into a staged keg and promote it
//! - Taste: run the smoke test, rolling the install back on failure

pub mod archive;
mod config;
mod cook;
pub mod keg;
pub mod locate;
pub mod patch;
pub mod process;
mod state;
pub mod store;
pub mod taste;
pub mod toolchain;

pub use archive::{DefaultFetcher, Fetcher, HttpFetcher, LocalFetcher};
pub use config::{default_cache_dir, CookResult, KitchenConfig, DEFAULT_PREFIX};
pub use cook::Cook;
pub use keg::{InstallOrigin, InstallReceipt, InstalledArtifact, Layout};
pub use locate::{DependencyLocator, PrefixLocator, StaticLocator};
pub use state::{CookFailure, CookState};
pub use store::{ArchiveKey, ArchiveStore, DirArchiveStore};
pub use taste::TestFailure;

use crate::error::{Error, Result};
use crate::hash::{self, Hash};
use crate::recipe::bottle::{self, BottleMatch, NoBottle, ResolvedArtifact};
use crate::recipe::format::{CellarPolicy, Recipe};
use keg::{PromotedKeg, StagedKeg};
use state::Pipeline;
use std::sync::Arc;
use toolchain::CompilerMatcher;
use tracing::{debug, info, warn};

/// The Kitchen: where recipes are cooked
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    fetcher: Arc<dyn Fetcher>,
    pub(crate) locator: Arc<dyn DependencyLocator>,
    store: Arc<dyn ArchiveStore>,
    pub(crate) matcher: CompilerMatcher,
}

/// Outcome of [`Kitchen::fetch`]
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub url: String,
    pub key: ArchiveKey,
    pub size: usize,
    pub from_cache: bool,
}

impl Kitchen {
    /// Create a Kitchen with the default collaborators for `config`
    ///
    /// Archives are fetched over HTTP(S) or from local paths, cached under
    /// `cache_dir`, and dependencies are located under `dependency_roots`.
    pub fn new(config: KitchenConfig) -> Result<Self> {
        let fetcher = Arc::new(DefaultFetcher::new()?);
        let locator = Arc::new(PrefixLocator::new(config.dependency_roots.clone()));
        let store = Arc::new(DirArchiveStore::new(config.cache_dir.clone()));

        Ok(Self {
            config,
            fetcher,
            locator,
            store,
            matcher: CompilerMatcher::default(),
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn DependencyLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ArchiveStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_compiler_matcher(mut self, matcher: CompilerMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.config.prefix)
    }

    /// Resolve the artifact to install for the configured platform and prefix
    pub fn resolve(&self, recipe: &Recipe) -> Result<ResolvedArtifact> {
        if self.config.build_from_source {
            self.config.platform.require_concrete()?;
            return Ok(ResolvedArtifact::BuildFromSource(NoBottle::Requested));
        }
        bottle::resolve_for_prefix(recipe, &self.config.platform, &self.config.prefix)
    }

    /// Cook a recipe into an installed, tested keg
    ///
    /// ## Pipeline
    /// 1. **ResolvingBottle**: exact platform lookup in the bottle table
    /// 2. **UsingBottle** or **Fetching**: obtain the archive (cache first)
    /// 3. **Verifying**: checksum gate; nothing is unpacked before it passes
    /// 4. **Patching** and **Building** (source path only): unpack, patch,
    ///    run the build steps into a staged keg
    /// 5. **Installing**: inventory, receipt, atomic promotion
    /// 6. **Testing**: smoke test; failure rolls the promotion back
    ///
    /// A failure in any stage ends the run with a [`CookFailure`] naming it.
    /// Nothing is retried.
    pub fn cook(&self, recipe: &Recipe) -> std::result::Result<CookResult, CookFailure> {
        info!(
            "Cooking {} version {}",
            recipe.package.name, recipe.package.version
        );

        let mut pipeline = Pipeline::new();
        let resolved = pipeline.run(CookState::ResolvingBottle, || self.resolve(recipe))?;

        let mut log = String::new();
        let mut warnings = Vec::new();
        let mut patches = patch::PatchReport::default();
        let keg_path = self
            .layout()
            .keg_path(&recipe.package.name, &recipe.package.version);

        let (payload, origin) = match resolved {
            ResolvedArtifact::Bottle(found) => {
                info!("Pouring bottle for {}", found.platform);
                let bytes = self.obtain_bottle(&mut pipeline, recipe, &found)?;
                let origin = InstallOrigin::Bottle {
                    platform: found.platform.to_string(),
                    rebuild: found.rebuild,
                };
                log.push_str(&format!("Poured bottle for {}\n", found.platform));
                (Payload::Bottle { bytes, found }, origin)
            }
            ResolvedArtifact::BuildFromSource(reason) => {
                info!("Building {} from source ({})", recipe.package.name, reason);
                let archive = pipeline.run(CookState::Fetching, || self.obtain_source(recipe))?;
                pipeline.run(CookState::Verifying, || {
                    self.verify_archive(
                        &archive.key,
                        &archive.bytes,
                        &recipe.source.checksum,
                        archive.from_cache,
                    )
                })?;

                let mut cook = pipeline.run(CookState::Patching, || {
                    let mut cook = Cook::new(self, recipe)?;
                    cook.unpack(&archive.bytes)?;
                    patches = cook.patch()?;
                    Ok(cook)
                })?;

                let staged = pipeline.run(CookState::Building, || {
                    let deps = cook.locate_dependencies()?;
                    let staged = StagedKeg::new(&self.config.prefix)?;
                    cook.simmer(&staged, &keg_path, &deps)?;
                    Ok(staged)
                })?;

                log.push_str(&cook.log);
                warnings.append(&mut cook.warnings);
                (Payload::Built(staged), InstallOrigin::Source)
            }
        };

        let (promoted, installed) = pipeline.run(CookState::Installing, || {
            let staged = match payload {
                Payload::Built(staged) => staged,
                Payload::Bottle { bytes, found } => {
                    let mut staged = StagedKeg::new(&self.config.prefix)?;
                    staged.pour_bottle(&bytes, &recipe.package.name, &recipe.package.version)?;
                    if found.cellar == CellarPolicy::Any {
                        staged.relocate(&self.config.prefix)?;
                    }
                    staged
                }
            };

            let installed = staged.inventory()?;
            let receipt = InstallReceipt::new(
                &recipe.package.name,
                &recipe.package.version,
                &self.config.platform.to_string(),
                origin.clone(),
                installed.clone(),
            );
            let promoted = staged.promote(&receipt, &keg_path, self.config.force)?;
            Ok((promoted, installed))
        })?;

        if let Err(failure) = self.taste_promoted(&mut pipeline, recipe, &promoted, &mut warnings) {
            if let Err(e) = promoted.rollback() {
                warn!("Failed to roll back {}: {}", keg_path.display(), e);
            }
            return Err(failure);
        }

        pipeline.enter(CookState::Done)?;
        debug!("Pipeline reached {}", pipeline.state());
        let link = self.layout().opt_link(&recipe.package.name);
        let keg = promoted.path().to_path_buf();
        if let Err(e) = promoted.commit(&link) {
            warn!("Failed to link {}: {}", link.display(), e);
            warnings.push(format!("Keg installed but {} was not updated: {}", link.display(), e));
        }

        info!(
            "Cooked {} {} into {}",
            recipe.package.name,
            recipe.package.version,
            keg.display()
        );

        Ok(CookResult {
            name: recipe.package.name.clone(),
            version: recipe.package.version.clone(),
            keg,
            installed,
            origin,
            trace: pipeline.trace().to_vec(),
            patches,
            log,
            warnings,
        })
    }

    /// Fetch and verify the source archive without building
    ///
    /// Warms the archive cache so a later cook needs no network access.
    pub fn fetch(&self, recipe: &Recipe) -> std::result::Result<FetchReport, CookFailure> {
        let mut trace = vec![CookState::Fetching];
        let archive = self
            .obtain_source(recipe)
            .map_err(|e| CookFailure::new(CookState::Fetching, e, trace.clone()))?;

        trace.push(CookState::Verifying);
        self.verify_archive(
            &archive.key,
            &archive.bytes,
            &recipe.source.checksum,
            archive.from_cache,
        )
        .map_err(|e| CookFailure::new(CookState::Verifying, e, trace.clone()))?;

        info!(
            "Fetched {} ({} bytes{})",
            archive.url,
            archive.bytes.len(),
            if archive.from_cache { ", cached" } else { "" }
        );

        Ok(FetchReport {
            url: archive.url,
            key: archive.key,
            size: archive.bytes.len(),
            from_cache: archive.from_cache,
        })
    }

    /// Re-run the smoke test against the installed keg
    pub fn test(&self, recipe: &Recipe) -> std::result::Result<(), CookFailure> {
        let fail = |e: Error| CookFailure::new(CookState::Testing, e, vec![CookState::Testing]);
        let keg = self
            .layout()
            .keg_path(&recipe.package.name, &recipe.package.version);
        if !keg.is_dir() {
            return Err(fail(Error::InstallFailed(format!(
                "{} {} is not installed",
                recipe.package.name, recipe.package.version
            ))));
        }

        match &recipe.test {
            Some(test) => {
                taste::taste(recipe, test, &keg, self.config.test_timeout).map_err(fail)
            }
            None => {
                warn!("{} has no test section", recipe.package.name);
                Ok(())
            }
        }
    }

    /// UsingBottle + Verifying: bottle bytes from the cache or the fetcher
    fn obtain_bottle(
        &self,
        pipeline: &mut Pipeline,
        recipe: &Recipe,
        found: &BottleMatch,
    ) -> std::result::Result<Vec<u8>, CookFailure> {
        let key = ArchiveKey::Bottle {
            name: recipe.package.name.clone(),
            version: recipe.package.version.clone(),
            platform: found.platform.clone(),
            rebuild: found.rebuild,
        };

        let (bytes, from_cache) = pipeline.run(CookState::UsingBottle, || {
            if let Some(bytes) = self.cached(&key, &found.checksum)? {
                info!("Using cached {}", key);
                return Ok((bytes, true));
            }
            let url = found.url.as_deref().ok_or_else(|| {
                Error::DownloadError(format!(
                    "No root_url for the {} bottle and none cached",
                    found.platform
                ))
            })?;
            info!("Downloading bottle: {}", url);
            Ok((self.fetcher.fetch(url)?, false))
        })?;

        pipeline.run(CookState::Verifying, || {
            self.verify_archive(&key, &bytes, &found.checksum, from_cache)
        })?;
        Ok(bytes)
    }

    /// Source bytes from the cache or the fetcher
    fn obtain_source(&self, recipe: &Recipe) -> Result<SourceArchive> {
        let url = recipe.source_url()?;
        let key = ArchiveKey::source(&recipe.source.checksum);

        if let Some(bytes) = self.cached(&key, &recipe.source.checksum)? {
            info!("Using cached source for {}", recipe.package.name);
            return Ok(SourceArchive {
                url,
                key,
                bytes,
                from_cache: true,
            });
        }

        info!("Downloading: {}", url);
        let bytes = self.fetcher.fetch(&url)?;
        Ok(SourceArchive {
            url,
            key,
            bytes,
            from_cache: false,
        })
    }

    /// A cached archive that still matches `checksum`
    ///
    /// An entry that does not match is evicted and reported as a miss, so the
    /// caller falls back to downloading it.
    fn cached(&self, key: &ArchiveKey, checksum: &str) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(None);
        };
        if hash::verify(&bytes, &expected_hash(checksum)?).is_err() {
            warn!("Cached {} does not match {}, evicting", key, checksum);
            self.store.evict(key)?;
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    /// Checksum gate for any archive
    ///
    /// Fresh bytes are cached only after they pass.
    fn verify_archive(
        &self,
        key: &ArchiveKey,
        bytes: &[u8],
        checksum: &str,
        from_cache: bool,
    ) -> Result<()> {
        let expected = expected_hash(checksum)?;
        hash::verify(bytes, &expected)?;
        debug!("Verified {} ({})", key, expected);

        if !from_cache && let Err(e) = self.store.put(key, bytes) {
            // Don't fail the install just because caching failed
            warn!("Failed to cache {}: {}", key, e);
        }
        Ok(())
    }

    fn taste_promoted(
        &self,
        pipeline: &mut Pipeline,
        recipe: &Recipe,
        promoted: &PromotedKeg,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<(), CookFailure> {
        pipeline.run(CookState::Testing, || match &recipe.test {
            Some(test) => taste::taste(recipe, test, promoted.path(), self.config.test_timeout),
            None => {
                warn!("{} has no test section, skipping", recipe.package.name);
                warnings.push("No test section; install was not smoke-tested".to_string());
                Ok(())
            }
        })
    }
}

fn expected_hash(checksum: &str) -> Result<Hash> {
    Hash::parse_prefixed(checksum)
        .map_err(|e| Error::ParseError(format!("Invalid checksum {}: {}", checksum, e)))
}

/// What Installing turns into a keg
enum Payload {
    Bottle { bytes: Vec<u8>, found: BottleMatch },
    Built(StagedKeg),
}

struct SourceArchive {
    url: String,
    key: ArchiveKey,
    bytes: Vec<u8>,
    from_cache: bool,
}
