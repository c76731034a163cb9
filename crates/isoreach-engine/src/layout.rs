//! On-disk layout of the engine directory.

use isoreach_core::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Mount point of the data root inside the engine container.
pub const CONTAINER_DATA_ROOT: &str = "/data";

/// Paths of the engine's files under the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLayout {
    data_root: PathBuf,
    engine_dir: PathBuf,
}

impl EngineLayout {
    /// `engine_dir` must lie inside `data_root`.
    pub fn new(data_root: impl Into<PathBuf>, engine_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_root = data_root.into();
        let engine_dir = engine_dir.into();
        if !engine_dir.starts_with(&data_root) {
            return Err(Error::Config(format!(
                "engine directory {} is outside the data root {}",
                engine_dir.display(),
                data_root.display()
            )));
        }
        Ok(Self {
            data_root,
            engine_dir,
        })
    }

    /// Layout with the engine directory at `{data_root}/engine`.
    pub fn under(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        let engine_dir = data_root.join("engine");
        Self {
            data_root,
            engine_dir,
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn engine_dir(&self) -> &Path {
        &self.engine_dir
    }

    /// Source YAML template.
    pub fn template_path(&self) -> PathBuf {
        self.engine_dir.join("config.src.yml")
    }

    /// Rendered YAML the engine is started with.
    pub fn config_path(&self) -> PathBuf {
        self.engine_dir.join("config.yml")
    }

    pub fn applied_config_path(&self) -> PathBuf {
        self.engine_dir.join("applied-config.json")
    }

    pub fn factor_cache_path(&self) -> PathBuf {
        self.engine_dir.join("factor-cache.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.engine_dir.join("lockfile.json")
    }

    pub fn graph_cache_dir(&self) -> PathBuf {
        self.engine_dir.join("graph-cache")
    }

    /// Translate a host path under the data root into its container path.
    pub fn to_container(&self, host: &Path) -> Result<String> {
        let relative = host.strip_prefix(&self.data_root).map_err(|_| {
            Error::Config(format!(
                "{} is outside the data root {}",
                host.display(),
                self.data_root.display()
            ))
        })?;

        let mut out = String::from(CONTAINER_DATA_ROOT);
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    out.push('/');
                    out.push_str(&part.to_string_lossy());
                }
                Component::CurDir => {}
                _ => {
                    return Err(Error::Config(format!(
                        "unsupported path component in {}",
                        host.display()
                    )));
                }
            }
        }
        Ok(out)
    }

    /// `host:container` bind for the data root.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.data_root.display(), CONTAINER_DATA_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_container() {
        let layout = EngineLayout::under("/srv/isoreach");
        assert_eq!(
            layout
                .to_container(Path::new("/srv/isoreach/osm/2973.osm.pbf"))
                .unwrap(),
            "/data/osm/2973.osm.pbf"
        );
        assert_eq!(
            layout.to_container(&layout.graph_cache_dir()).unwrap(),
            "/data/engine/graph-cache"
        );
        assert!(layout.to_container(Path::new("/etc/passwd")).is_err());
        assert!(
            layout
                .to_container(Path::new("/srv/isoreach/../etc"))
                .is_err()
        );
    }

    #[test]
    fn test_engine_dir_must_be_inside_root() {
        assert!(EngineLayout::new("/srv/a", "/srv/a/gh").is_ok());
        assert!(EngineLayout::new("/srv/a", "/srv/b").is_err());
    }
}
