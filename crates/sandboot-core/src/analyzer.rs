//! Project analyzer - classify a mounted project and plan its bootstrap.
//!
//! The analyzer inspects the workspace root listing (plus a selective read
//! of `package.json`) and produces a [`ProjectAnalysis`]: the project type,
//! the install/start commands, and the package-manager strategy. It never
//! mutates the sandbox and never fails - anything unexpected is downgraded
//! to an `Unknown` classification with a diagnostic reason.

use sandboot_runtime::SandboxRuntime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// The bootstrap plan for one project, produced once per bootstrap attempt.
///
/// Immutable after creation; a retry supersedes the previous analysis
/// rather than updating it. `detected_files` and `reason` are diagnostics
/// for the UI log and never drive control flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysis {
    pub project_type: ProjectType,
    pub install_command: Option<CommandSpec>,
    pub pre_install_commands: Vec<CommandSpec>,
    pub start_command: Option<CommandSpec>,
    pub package_manager: Option<PackageManager>,
    pub should_remove_lockfile: bool,
    pub detected_files: Vec<String>,
    pub reason: String,
}

impl ProjectAnalysis {
    /// An analysis with no commands and no classification.
    pub fn empty() -> Self {
        Self {
            project_type: ProjectType::Unknown,
            install_command: None,
            pre_install_commands: Vec::new(),
            start_command: None,
            package_manager: None,
            should_remove_lockfile: false,
            detected_files: Vec::new(),
            reason: String::new(),
        }
    }
}

/// Classification outcome for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Node,
    Static,
    Python,
    Docker,
    Unknown,
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Node => "node",
            Self::Static => "static",
            Self::Python => "python",
            Self::Docker => "docker",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Supported node package managers, in lockfile-detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Bun,
    Pnpm,
    Yarn,
    Npm,
}

impl PackageManager {
    /// The lockfile names that identify this manager.
    pub fn lockfiles(&self) -> &'static [&'static str] {
        match self {
            Self::Bun => &["bun.lockb", "bun.lock"],
            Self::Pnpm => &["pnpm-lock.yaml"],
            Self::Yarn => &["yarn.lock"],
            Self::Npm => &["package-lock.json"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bun => "bun",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Npm => "npm",
        }
    }

    /// Build the install command for this manager.
    ///
    /// Flags force non-interactive, low-noise installation; npm additionally
    /// tolerates legacy peer dependencies, prefers offline caches, and skips
    /// lifecycle scripts.
    pub fn install_command(&self) -> CommandSpec {
        match self {
            Self::Npm => CommandSpec::new(
                "npm",
                &[
                    "install",
                    "--yes",
                    "--no-audit",
                    "--no-fund",
                    "--legacy-peer-deps",
                    "--prefer-offline",
                    "--ignore-scripts",
                ],
            ),
            Self::Yarn => CommandSpec::new("yarn", &["install", "--non-interactive"]),
            Self::Pnpm => CommandSpec::new("pnpm", &["install", "--no-frozen-lockfile"]),
            Self::Bun => CommandSpec::new("bun", &["install"]),
        }
    }
}

/// All package managers in detection priority order (bun > pnpm > yarn > npm).
pub const PACKAGE_MANAGER_PRIORITY: [PackageManager; 4] = [
    PackageManager::Bun,
    PackageManager::Pnpm,
    PackageManager::Yarn,
    PackageManager::Npm,
];

/// Lockfiles removed before install when `should_remove_lockfile` is set.
///
/// Stale or host-generated lockfiles cause slow integrity verification
/// inside the sandbox, so node installs start from a clean slate.
pub const KNOWN_LOCKFILES: [&str; 5] = [
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "bun.lock",
];

/// An executable plus its argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Detect the package manager from the lockfiles present in the listing.
///
/// Returns the single highest-priority match; a project with multiple
/// lockfiles still resolves to exactly one manager.
pub fn detect_package_manager(entries: &[String]) -> Option<PackageManager> {
    PACKAGE_MANAGER_PRIORITY.into_iter().find(|manager| {
        manager
            .lockfiles()
            .iter()
            .any(|lockfile| entries.iter().any(|e| e == lockfile))
    })
}

/// Pick the start script from a manifest's `scripts` map.
///
/// Priority: `dev` > `start` > `preview` > first declared script. Defaults
/// to `dev` when no scripts are declared.
pub fn pick_start_script(scripts: Option<&serde_json::Map<String, serde_json::Value>>) -> String {
    let Some(scripts) = scripts else {
        return "dev".to_string();
    };
    for preferred in ["dev", "start", "preview"] {
        if scripts.contains_key(preferred) {
            return preferred.to_string();
        }
    }
    scripts
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| "dev".to_string())
}

/// Classify a project from its root listing and an optional pre-read
/// manifest.
///
/// Pure decision table, first match wins:
/// 1. `package.json` → node
/// 2. `requirements.txt` → python (informational, execution unsupported)
/// 3. any name containing "dockerfile" → docker (informational)
/// 4. `index.html` → static
/// 5. otherwise → unknown
pub fn classify(entries: &[String], manifest: Option<&str>) -> ProjectAnalysis {
    if entries.iter().any(|e| e == "package.json") {
        return classify_node(entries, manifest);
    }

    if entries.iter().any(|e| e == "requirements.txt") {
        return ProjectAnalysis {
            project_type: ProjectType::Python,
            detected_files: vec!["requirements.txt".to_string()],
            reason: "python project detected; execution is not supported in the sandbox"
                .to_string(),
            ..ProjectAnalysis::empty()
        };
    }

    if let Some(dockerfile) = entries
        .iter()
        .find(|e| e.to_lowercase().contains("dockerfile"))
    {
        return ProjectAnalysis {
            project_type: ProjectType::Docker,
            detected_files: vec![dockerfile.clone()],
            reason: "docker project detected; containers cannot run inside the sandbox"
                .to_string(),
            ..ProjectAnalysis::empty()
        };
    }

    if entries.iter().any(|e| e == "index.html") {
        return ProjectAnalysis {
            project_type: ProjectType::Static,
            start_command: Some(CommandSpec::new("npx", &["--yes", "serve", "-l", "3000", "."])),
            detected_files: vec!["index.html".to_string()],
            reason: "static site detected; serving index.html".to_string(),
            ..ProjectAnalysis::empty()
        };
    }

    ProjectAnalysis {
        project_type: ProjectType::Unknown,
        reason: format!(
            "no recognizable project markers in {} root entries",
            entries.len()
        ),
        ..ProjectAnalysis::empty()
    }
}

fn classify_node(entries: &[String], manifest: Option<&str>) -> ProjectAnalysis {
    // A present-but-unreadable manifest (read error upstream) still counts
    // as a node project with the default script; a syntactically broken one
    // downgrades the whole classification.
    let script = match manifest {
        Some(source) => match serde_json::from_str::<serde_json::Value>(source) {
            Ok(value) => pick_start_script(
                value.get("scripts").and_then(serde_json::Value::as_object),
            ),
            Err(e) => {
                return ProjectAnalysis {
                    project_type: ProjectType::Unknown,
                    reason: format!("failed to parse package.json: {e}"),
                    detected_files: vec!["package.json".to_string()],
                    ..ProjectAnalysis::empty()
                };
            }
        },
        None => "dev".to_string(),
    };

    let manager = detect_package_manager(entries).unwrap_or(PackageManager::Npm);

    let mut detected_files = vec!["package.json".to_string()];
    if let Some(lockfile) = manager
        .lockfiles()
        .iter()
        .find(|l| entries.iter().any(|e| e.as_str() == **l))
    {
        detected_files.push(lockfile.to_string());
    }

    let pre_install_commands = match manager {
        PackageManager::Yarn | PackageManager::Pnpm => {
            vec![CommandSpec::new("corepack", &["enable"])]
        }
        _ => Vec::new(),
    };

    ProjectAnalysis {
        project_type: ProjectType::Node,
        install_command: Some(manager.install_command()),
        pre_install_commands,
        // Start always goes through npm regardless of the detected manager;
        // the detected manager drives install only.
        start_command: Some(CommandSpec::new("npm", &["run", &script])),
        package_manager: Some(manager),
        should_remove_lockfile: true,
        detected_files,
        reason: format!("node project, {} install, start script '{script}'", manager.as_str()),
    }
}

/// Analyze the mounted project through the sandbox runtime.
///
/// Lists the workspace root and reads `package.json` if present, then
/// delegates to [`classify`]. Runtime failures are absorbed: a failed
/// listing yields an `Unknown` analysis with a non-empty reason, and a
/// failed manifest read falls back to the default start script.
pub async fn analyze(runtime: &dyn SandboxRuntime, root: &Path) -> ProjectAnalysis {
    let entries = match runtime.read_dir(root).await {
        Ok(entries) => entries
            .into_iter()
            .map(|e| e.name)
            .collect::<Vec<String>>(),
        Err(e) => {
            return ProjectAnalysis {
                project_type: ProjectType::Unknown,
                reason: format!("failed to list workspace root: {e}"),
                ..ProjectAnalysis::empty()
            };
        }
    };

    let manifest = if entries.iter().any(|e| e == "package.json") {
        match runtime.read_file(&root.join("package.json")).await {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).to_string()),
            Err(e) => {
                debug!(error = %e, "package.json present but unreadable");
                None
            }
        }
    } else {
        None
    };

    let analysis = classify(&entries, manifest.as_deref());
    debug!(
        project_type = %analysis.project_type,
        reason = %analysis.reason,
        "Project analyzed"
    );
    analysis
}
