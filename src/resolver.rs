/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::resolver
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Reconcile installed composer packages against the public
    registry to determine the newest stable release compatible
    with every declared dependency constraint.

  Security / Safety Notes:
    Reads project manifests and performs read-only registry
    lookups; never mutates the dependency tree.

  Dependencies:
    semver for ordering and range evaluation, serde_json for
    manifest parsing.

  Operational Scope:
    Consumed by the bridge layer when reporting site status;
    exposed on the CLI for standalone package inspection.

  Revision History:
    2025-06-19 COD  Authored constraint-aware resolver.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Constraint conjunction with no partial credit
    - Stable-only upgrade candidates
    - Registry failures degrade, never block
============================================================*/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::{Version, VersionReq};
use serde::Serialize;

use crate::composer::strip_version_prefix;
use crate::config::RegistryConfig;
use crate::error::Result;
use crate::logger::Logger;
use crate::packagist::{PackagistClient, RegistryVersion};

/// Display record for one installed package and its upgrade outlook.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PackageStatus {
    pub name: String,
    pub code: String,
    pub version: String,
    pub new_version: Option<String>,
    pub last_available_version: Option<String>,
}

/// A package found in composer's installed manifest.
#[derive(Debug, Clone)]
struct DetectedPackage {
    name: String,
    version: String,
}

/// Latest stable releases computed from one registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct LatestVersions {
    compatible: Option<String>,
    available: Option<String>,
}

/// Constraint-aware version resolver over the local installation.
pub struct Resolver {
    packages: Vec<DetectedPackage>,
    constraints: HashMap<String, Vec<String>>,
    client: PackagistClient,
    logger: Arc<Logger>,
}

impl Resolver {
    /// Detect the installed set and constraint index for a project
    /// root and bind a registry client to them.
    pub fn new(project_root: &Path, registry: &RegistryConfig, logger: Arc<Logger>) -> Result<Self> {
        let document = installed_document(project_root);
        let packages = detect_installed(document.as_ref());
        let constraints = detect_constraints(document.as_ref(), project_root);

        Ok(Self {
            packages,
            constraints,
            client: PackagistClient::new(registry)?,
            logger,
        })
    }

    /// Resolve one installed package to its display record, or None
    /// when the package is not part of the local installation.
    pub async fn get_package(&self, name: &str) -> Option<PackageStatus> {
        let package = self.packages.iter().find(|package| package.name == name)?;

        let current = strip_version_prefix(&package.version);
        let constraints = self
            .constraints
            .get(&package.name)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let latest = match self.client.fetch_versions(&package.name).await {
            Ok(versions) => select_latest(&versions, constraints),
            Err(err) => {
                self.logger.warn(
                    "REGISTRY",
                    format!("No upgrade data for {}: {err}", package.name),
                );
                LatestVersions::default()
            }
        };

        let not_current = |candidate: Option<String>| candidate.filter(|version| version != &current);

        Some(PackageStatus {
            name: short_name(&package.name),
            code: package.name.clone(),
            version: current.clone(),
            new_version: not_current(latest.compatible),
            last_available_version: not_current(latest.available),
        })
    }
}

/// Compute the highest stable release overall and the highest stable
/// release satisfying every constraint. When both maxima coincide the
/// available side is cleared; there is nothing extra to report.
fn select_latest(versions: &[RegistryVersion], constraints: &[String]) -> LatestVersions {
    let mut last_available: Option<(Version, String)> = None;
    let mut last_compatible: Option<(Version, String)> = None;

    for candidate in versions {
        let raw = strip_version_prefix(&candidate.version);
        let Some(parsed) = normalize_version(&raw) else {
            continue;
        };

        // only use stable version numbers
        if !parsed.pre.is_empty() {
            continue;
        }

        if last_available
            .as_ref()
            .map_or(true, |(best, _)| parsed >= *best)
        {
            last_available = Some((parsed.clone(), raw.clone()));
        }

        if constraints.is_empty() {
            last_compatible = last_available.clone();
            continue;
        }

        if last_compatible
            .as_ref()
            .map_or(true, |(best, _)| parsed >= *best)
            && check_constraints(&parsed, constraints)
        {
            last_compatible = Some((parsed, raw));
        }
    }

    if last_compatible == last_available {
        last_available = None;
    }

    LatestVersions {
        compatible: last_compatible.map(|(_, raw)| raw),
        available: last_available.map(|(_, raw)| raw),
    }
}

/// A candidate satisfies the set iff every constraint holds. Strings
/// outside semver range syntax (VCS branches and the like) carry no
/// range meaning and are non-binding.
fn check_constraints(version: &Version, constraints: &[String]) -> bool {
    constraints.iter().all(|constraint| {
        match VersionReq::parse(constraint) {
            Ok(req) => req.matches(version),
            Err(_) => true,
        }
    })
}

/// Lenient semver parsing: strip the `v` prefix and pad short numeric
/// cores such as `2.1` to three components before giving up.
pub(crate) fn normalize_version(raw: &str) -> Option<Version> {
    let stripped = raw.strip_prefix('v').unwrap_or(raw);

    if let Ok(version) = Version::parse(stripped) {
        return Some(version);
    }

    let split_at = stripped
        .find(['-', '+'])
        .unwrap_or(stripped.len());
    let (core, suffix) = stripped.split_at(split_at);

    let components: Vec<&str> = core.split('.').collect();
    if components.is_empty()
        || components.len() >= 3
        || components
            .iter()
            .any(|part| part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = components.join(".");
    for _ in components.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    Version::parse(&padded).ok()
}

fn short_name(code: &str) -> String {
    match code.split_once('/') {
        Some((_, rest)) => rest.to_string(),
        None => code.to_string(),
    }
}

fn installed_document(project_root: &Path) -> Option<serde_json::Value> {
    let path = project_root.join("vendor/composer/installed.json");
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Composer v2 nests the package list under `packages`; v1 manifests
/// are a bare array.
fn manifest_packages(document: Option<&serde_json::Value>) -> Vec<serde_json::Value> {
    let Some(document) = document else {
        return Vec::new();
    };

    match document.get("packages").and_then(|value| value.as_array()) {
        Some(packages) => packages.clone(),
        None => document.as_array().cloned().unwrap_or_default(),
    }
}

fn detect_installed(document: Option<&serde_json::Value>) -> Vec<DetectedPackage> {
    manifest_packages(document)
        .iter()
        .filter_map(|package| {
            let name = package.get("name")?.as_str()?.to_string();
            let version = package.get("version")?.as_str()?.to_string();
            Some(DetectedPackage { name, version })
        })
        .collect()
}

/// Union of constraint strings per package: every installed package's
/// `require` map plus the application's own composer.json.
fn detect_constraints(
    document: Option<&serde_json::Value>,
    project_root: &Path,
) -> HashMap<String, Vec<String>> {
    let mut requirement_maps: Vec<serde_json::Value> = manifest_packages(document)
        .iter()
        .filter_map(|package| package.get("require").cloned())
        .collect();

    if let Some(app) = app_composer_document(project_root) {
        if let Some(require) = app.get("require").cloned() {
            requirement_maps.push(require);
        }
    }

    let mut constraints: HashMap<String, Vec<String>> = HashMap::new();
    for map in requirement_maps {
        let Some(entries) = map.as_object() else {
            continue;
        };
        for (package, constraint) in entries {
            if !package.contains('/') {
                continue;
            }
            let Some(constraint) = constraint.as_str() else {
                continue;
            };
            constraints
                .entry(package.clone())
                .or_default()
                .push(constraint.to_string());
        }
    }

    constraints
}

fn app_composer_document(project_root: &Path) -> Option<serde_json::Value> {
    let path: PathBuf = project_root.join("composer.json");
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}
