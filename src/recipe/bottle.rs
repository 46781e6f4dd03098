// src/recipe/bottle.rs

//! Bottle resolution: pick a prebuilt artifact for the running platform
//!
//! Lookup is an exact match on the platform identifier. A miss is not an
//! error; it is the signal to build from source.

use crate::error::Result;
use crate::platform::Platform;
use crate::recipe::format::{CellarPolicy, Recipe};
use std::fmt;
use std::path::Path;

/// A bottle table entry selected for the current platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleMatch {
    pub platform: Platform,
    pub checksum: String,
    pub rebuild: u32,
    /// Download URL, when the recipe declares a `root_url`
    pub url: Option<String>,
    pub cellar: CellarPolicy,
}

/// Why no bottle was selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoBottle {
    /// The recipe has no bottle table
    NoTable,
    /// The table has no entry for this platform
    PlatformNotListed(Platform),
    /// The bottle was built for a different fixed prefix
    PrefixMismatch { required: String },
    /// Source build forced by configuration
    Requested,
}

impl fmt::Display for NoBottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTable => write!(f, "recipe declares no bottles"),
            Self::PlatformNotListed(p) => write!(f, "no bottle for {}", p),
            Self::PrefixMismatch { required } => {
                write!(f, "bottle requires prefix {}", required)
            }
            Self::Requested => write!(f, "build from source requested"),
        }
    }
}

/// Outcome of bottle resolution, consumed once by the kitchen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedArtifact {
    Bottle(BottleMatch),
    BuildFromSource(NoBottle),
}

impl ResolvedArtifact {
    pub fn is_bottle(&self) -> bool {
        matches!(self, Self::Bottle(_))
    }
}

/// Look up the bottle for `platform`
///
/// `platform` must be concrete. Any identifier absent from the table yields
/// `BuildFromSource`; there is no fallback across architectures or tags.
pub fn resolve(recipe: &Recipe, platform: &Platform) -> Result<ResolvedArtifact> {
    platform.require_concrete()?;

    let Some(section) = &recipe.bottle else {
        return Ok(ResolvedArtifact::BuildFromSource(NoBottle::NoTable));
    };
    if section.platforms.is_empty() {
        return Ok(ResolvedArtifact::BuildFromSource(NoBottle::NoTable));
    }

    let entries = section.entries()?;
    let Some(entry) = entries.get(platform) else {
        return Ok(ResolvedArtifact::BuildFromSource(NoBottle::PlatformNotListed(
            platform.clone(),
        )));
    };

    let tag = entry.tag.clone().unwrap_or_else(|| platform.to_string());
    let url = section.root_url.as_deref().map(|root| {
        bottle_url(
            root,
            &recipe.package.name,
            &recipe.package.version,
            &tag,
            entry.rebuild,
        )
    });

    Ok(ResolvedArtifact::Bottle(BottleMatch {
        platform: platform.clone(),
        checksum: entry.checksum.clone(),
        rebuild: entry.rebuild,
        url,
        cellar: section.cellar.clone(),
    }))
}

/// Resolve, then check that the bottle can be poured under `prefix`
pub fn resolve_for_prefix(
    recipe: &Recipe,
    platform: &Platform,
    prefix: &Path,
) -> Result<ResolvedArtifact> {
    let resolved = resolve(recipe, platform)?;

    if let ResolvedArtifact::Bottle(bottle) = &resolved
        && let CellarPolicy::Path(required) = &bottle.cellar
        && Path::new(required) != prefix
    {
        return Ok(ResolvedArtifact::BuildFromSource(NoBottle::PrefixMismatch {
            required: required.clone(),
        }));
    }

    Ok(resolved)
}

/// Conventional bottle location: `{root}/{name}-{version}.{tag}.bottle[.{rebuild}].tar.gz`
///
/// `tag` is the entry's upstream tag (`x86_64_linux`, `high_sierra`) or,
/// when it has none, the platform identifier itself.
pub fn bottle_url(root: &str, name: &str, version: &str, tag: &str, rebuild: u32) -> String {
    let rebuild_suffix = if rebuild > 0 {
        format!(".{}", rebuild)
    } else {
        String::new()
    };
    format!(
        "{}/{}-{}.{}.bottle{}.tar.gz",
        root.trim_end_matches('/'),
        name,
        version,
        tag,
        rebuild_suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::recipe::parser::parse_recipe;

    fn quantor() -> Recipe {
        parse_recipe(
            r#"
[package]
name = "quantor"
version = "3.2"

[source]
url = "http://fmv.jku.at/quantor/quantor-3.2.tar.gz"
checksum = "sha256:7a82ebfd1c8ecc250325f311e725f6263bf69b412edcc2b600db2a25937d1189"

[bottle]
root_url = "https://dl.bintray.com/touist/bottles-touist/"
rebuild = 1

[bottle.platforms]
"macos-x86_64-high_sierra" = { checksum = "sha256:e44188a9ccabc1b21a3370891c6bdb2e8927e15f42b6e137d4754f56319f4e84", tag = "high_sierra" }
"macos-x86_64-sierra" = "sha256:e44188a9ccabc1b21a3370891c6bdb2e8927e15f42b6e137d4754f56319f4e84"
"macos-x86_64-el_capitan" = "sha256:674f3d0997ab993b65ff058986e46247c39870bc9e22a57a2c0870ae0db828d4"
"linux-x86_64" = { checksum = "sha256:33db76fa3a93976e6068e5fce9a871803da23cac44be4682c078860cb5a0faf8", tag = "x86_64_linux" }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_every_listed_platform_matches_its_entry() {
        let recipe = quantor();
        let entries = recipe.bottle.as_ref().unwrap().entries().unwrap();

        for (platform, entry) in &entries {
            match resolve(&recipe, platform).unwrap() {
                ResolvedArtifact::Bottle(m) => {
                    assert_eq!(&m.platform, platform);
                    assert_eq!(m.checksum, entry.checksum);
                    assert_eq!(m.rebuild, 1);
                }
                other => panic!("expected bottle for {}, got {:?}", platform, other),
            }
        }
    }

    #[test]
    fn test_unlisted_platforms_never_match() {
        let recipe = quantor();
        for id in [
            "linux-aarch64",
            "macos-x86_64",
            "macos-arm64-high_sierra",
            "macos-x86_64-mojave",
            "linux-x86_64-musl",
        ] {
            let platform = Platform::parse(id).unwrap();
            assert_eq!(
                resolve(&recipe, &platform).unwrap(),
                ResolvedArtifact::BuildFromSource(NoBottle::PlatformNotListed(platform.clone())),
                "{} must not match",
                id
            );
        }
    }

    #[test]
    fn test_wildcard_platform_rejected() {
        let recipe = quantor();
        let platform = Platform::parse("linux-*").unwrap();
        assert!(matches!(
            resolve(&recipe, &platform),
            Err(Error::InvalidPlatform(_))
        ));
    }

    #[test]
    fn test_no_table() {
        let mut recipe = quantor();
        recipe.bottle = None;
        assert_eq!(
            resolve(&recipe, &Platform::parse("linux-x86_64").unwrap()).unwrap(),
            ResolvedArtifact::BuildFromSource(NoBottle::NoTable)
        );
    }

    #[test]
    fn test_bottle_url() {
        let recipe = quantor();
        let platform = Platform::parse("linux-x86_64").unwrap();
        let ResolvedArtifact::Bottle(m) = resolve(&recipe, &platform).unwrap() else {
            panic!("expected bottle");
        };
        assert_eq!(
            m.url.as_deref(),
            Some("https://dl.bintray.com/touist/bottles-touist/quantor-3.2.x86_64_linux.bottle.1.tar.gz")
        );
        assert_eq!(
            bottle_url("https://x", "a", "1", "linux-x86_64", 0),
            "https://x/a-1.linux-x86_64.bottle.tar.gz"
        );
    }

    #[test]
    fn test_untagged_entry_names_file_after_platform() {
        let recipe = quantor();
        let ResolvedArtifact::Bottle(tagged) =
            resolve(&recipe, &Platform::parse("macos-x86_64-high_sierra").unwrap()).unwrap()
        else {
            panic!("expected bottle");
        };
        assert!(tagged.url.unwrap().ends_with("/quantor-3.2.high_sierra.bottle.1.tar.gz"));

        let ResolvedArtifact::Bottle(untagged) =
            resolve(&recipe, &Platform::parse("macos-x86_64-sierra").unwrap()).unwrap()
        else {
            panic!("expected bottle");
        };
        assert!(untagged
            .url
            .unwrap()
            .ends_with("/quantor-3.2.macos-x86_64-sierra.bottle.1.tar.gz"));
    }

    #[test]
    fn test_prefix_gate() {
        let mut recipe = quantor();
        recipe.bottle.as_mut().unwrap().cellar = CellarPolicy::Path("/opt/cellar".to_string());
        let platform = Platform::parse("linux-x86_64").unwrap();

        assert!(resolve_for_prefix(&recipe, &platform, Path::new("/opt/cellar"))
            .unwrap()
            .is_bottle());
        assert_eq!(
            resolve_for_prefix(&recipe, &platform, Path::new("/home/me/cellar")).unwrap(),
            ResolvedArtifact::BuildFromSource(NoBottle::PrefixMismatch {
                required: "/opt/cellar".to_string()
            })
        );
    }
}
