use std::path::{Path, PathBuf};

use strata_blocks::CATALOG_FILE;

pub const ASSETS_ENV: &str = "STRATA_ASSETS";
const TEXTURES_DIR: &str = "textures";

pub fn resolve_assets_root(cli: Option<&Path>) -> PathBuf {
    // Precedence: CLI flag -> STRATA_ASSETS env -> search nearby dirs -> CWD
    if let Some(p) = cli {
        if p.exists() {
            return p.to_path_buf();
        }
        log::warn!("assets root {} does not exist, searching", p.display());
    }
    if let Ok(p) = std::env::var(ASSETS_ENV) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return pb;
        }
    }
    // Search candidates: CWD, executable dir, crate root; climb up to 5 parents
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.to_path_buf());
        }
    }
    candidates.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")));

    for base in candidates {
        if let Some(found) = search_upward(&base, 5) {
            return found;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// First of `base` and its parents, up to `depth` levels, that holds a
/// texture catalog.
fn search_upward(base: &Path, depth: usize) -> Option<PathBuf> {
    let mut cur = base.to_path_buf();
    for _ in 0..depth {
        if catalog_path(&cur).exists() {
            return Some(cur);
        }
        cur = cur.parent()?.to_path_buf();
    }
    None
}

pub fn textures_dir(root: &Path) -> PathBuf {
    root.join(TEXTURES_DIR)
}

pub fn catalog_path(root: &Path) -> PathBuf {
    textures_dir(root).join(CATALOG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn explicit_root_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_assets_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn search_climbs_to_the_catalog() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(textures_dir(dir.path())).unwrap();
        fs::write(catalog_path(dir.path()), "").unwrap();
        let deep = dir.path().join("a").join("b");
        fs::create_dir_all(&deep).unwrap();
        assert_eq!(search_upward(&deep, 5).as_deref(), Some(dir.path()));
        assert_eq!(search_upward(&deep, 2), None);
    }
}
