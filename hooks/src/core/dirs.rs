//! Filesystem layout of the build container.
//!
//! A handful of roots are configurable; everything else is derived from them
//! by joining fixed suffixes, so the layout stays consistent with the roots.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const BUILD_ROOT: &str = "/data";
pub const DEPLOY_ROOT: &str = "/mnt/deploy";
pub const CACHE_ROOT: &str = "/mnt/cache";
pub const ENGINE_ROOT: &str = "/opt/engines";
pub const SHARE_ROOT: &str = "/share";
pub const CODE_ROOT: &str = "/code";
pub const PLATFORM_ROOT: &str = "/opt/gonano";

/// System directories appended after the build and platform bins.
const SYSTEM_PATH: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// Configurable roots of the layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Roots {
    pub build: PathBuf,
    pub deploy: PathBuf,
    pub cache: PathBuf,
    pub engines: PathBuf,
    pub share: PathBuf,
    pub code: PathBuf,
    /// Platform tooling; its `sbin` and `bin` are on the script search path.
    pub platform: PathBuf,
}

impl Default for Roots {
    fn default() -> Self {
        Self {
            build: PathBuf::from(BUILD_ROOT),
            deploy: PathBuf::from(DEPLOY_ROOT),
            cache: PathBuf::from(CACHE_ROOT),
            engines: PathBuf::from(ENGINE_ROOT),
            share: PathBuf::from(SHARE_ROOT),
            code: PathBuf::from(CODE_ROOT),
            platform: PathBuf::from(PLATFORM_ROOT),
        }
    }
}

impl Roots {
    /// Roots that are not absolute, by name.
    pub fn relative_roots(&self) -> Vec<&'static str> {
        [
            ("build", &self.build),
            ("deploy", &self.deploy),
            ("cache", &self.cache),
            ("engines", &self.engines),
            ("share", &self.share),
            ("code", &self.code),
            ("platform", &self.platform),
        ]
        .into_iter()
        .filter(|(_, path)| !path.is_absolute())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Every directory the hooks read from or write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySet {
    pub build: PathBuf,
    pub code: PathBuf,
    pub deploy: PathBuf,
    pub cache: PathBuf,
    pub engines: PathBuf,
    pub share: PathBuf,
    pub code_live: PathBuf,
    pub engine_live: PathBuf,
    pub etc: PathBuf,
    pub env: PathBuf,
    pub platform: PathBuf,
}

impl Default for DirectorySet {
    fn default() -> Self {
        Self::from_roots(&Roots::default())
    }
}

impl DirectorySet {
    pub fn from_roots(roots: &Roots) -> Self {
        let etc = roots.build.join("etc");
        Self {
            build: roots.build.clone(),
            code: roots.code.clone(),
            deploy: roots.deploy.clone(),
            cache: roots.cache.clone(),
            engines: roots.engines.clone(),
            share: roots.share.clone(),
            code_live: roots.share.join("code"),
            engine_live: roots.share.join("engines"),
            env: etc.join("environment.d"),
            etc,
            platform: roots.platform.clone(),
        }
    }

    /// `<engines>/<engine>/bin`, the working directory for engine scripts.
    pub fn engine_bin(&self, engine: &str) -> PathBuf {
        self.engines.join(engine).join("bin")
    }

    pub fn engine_script(&self, engine: &str, script: &str) -> PathBuf {
        self.engine_bin(engine).join(script)
    }

    /// Package database left behind by pkgin during the build.
    pub fn pkgin_db(&self) -> PathBuf {
        self.build.join("var").join("db").join("pkgin")
    }

    pub fn pkgin_cache(&self) -> PathBuf {
        self.cache.join("pkgin")
    }

    /// Ordered search path for engine scripts.
    pub fn script_path(&self) -> Vec<PathBuf> {
        let mut path = vec![
            self.code.clone(),
            self.code.join("bin"),
            self.build.join("sbin"),
            self.build.join("bin"),
            self.platform.join("sbin"),
            self.platform.join("bin"),
        ];
        path.extend(SYSTEM_PATH.iter().map(PathBuf::from));
        path
    }
}

/// `path` with a trailing separator, so rsync copies the directory's contents.
pub fn contents_of(path: &Path) -> String {
    let mut display = path.display().to_string();
    if !display.ends_with('/') {
        display.push('/');
    }
    display
}
