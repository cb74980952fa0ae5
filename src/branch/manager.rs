use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::branch::{validate_branch_name, Branch, BranchInfo, BRANCHES_DIR, BRANCH_META_FILE, MASTER};
use crate::chunk::ChunkSequence;
use crate::meta::{read_json, write_json};
use crate::{Error, Result};

/// One step of a branch's ancestor list.
#[derive(Debug, Clone)]
pub struct Level {
    pub branch: String,
    /// Branching timestamp; `None` for the root.
    pub fork: Option<i64>,
    pub chunks: ChunkSequence,
}

impl Level {
    pub fn is_root(&self) -> bool {
        self.fork.is_none()
    }
}

/// Loads, creates and looks up branches of one store.
pub struct BranchManager {
    dir: PathBuf,
    branches: RwLock<BTreeMap<String, Arc<Branch>>>,
}

impl BranchManager {
    /// Load every branch under `<root>/branches`, creating `master` if absent.
    pub fn open(root: &Path, created_at: i64) -> Result<Self> {
        let dir = root.join(BRANCHES_DIR);
        std::fs::create_dir_all(&dir)?;

        let mut branches = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let branch_dir = entry.path();
            let meta_path = branch_dir.join(BRANCH_META_FILE);
            if !meta_path.exists() {
                log::warn!("ignoring {}: no {BRANCH_META_FILE}", branch_dir.display());
                continue;
            }
            let info: BranchInfo = read_json(&meta_path)?;
            let chunks = ChunkSequence::load(&branch_dir)?;
            log::debug!(
                "loaded branch {} ({} chunks, now {})",
                info.name,
                chunks.chunks().len(),
                info.now
            );
            branches.insert(info.name.clone(), Arc::new(Branch::new(info, branch_dir, chunks)));
        }

        for branch in branches.values() {
            if let Some(parent) = branch.parent() {
                if !branches.contains_key(parent) {
                    return Err(Error::CorruptState(format!(
                        "branch {} has unknown parent {parent}",
                        branch.name()
                    )));
                }
            }
        }

        let manager = Self {
            dir,
            branches: RwLock::new(branches),
        };
        if manager.get(MASTER).is_err() {
            let info = BranchInfo {
                name: MASTER.to_string(),
                parent: None,
                branching_timestamp: 0,
                now: 0,
            };
            manager.insert_new(info, created_at)?;
        }
        Ok(manager)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Branch>> {
        let branches = self
            .branches
            .read()
            .map_err(|_| Error::Closed("branch registry lock poisoned"))?;
        branches
            .get(name)
            .cloned()
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))
    }

    pub fn names(&self) -> Result<Vec<String>> {
        let branches = self
            .branches
            .read()
            .map_err(|_| Error::Closed("branch registry lock poisoned"))?;
        Ok(branches.keys().cloned().collect())
    }

    pub fn infos(&self) -> Result<Vec<BranchInfo>> {
        let branches: Vec<Arc<Branch>> = {
            let map = self
                .branches
                .read()
                .map_err(|_| Error::Closed("branch registry lock poisoned"))?;
            map.values().cloned().collect()
        };
        branches.iter().map(|branch| branch.info()).collect()
    }

    fn insert_new(&self, info: BranchInfo, created_at: i64) -> Result<Arc<Branch>> {
        let mut branches = self
            .branches
            .write()
            .map_err(|_| Error::Closed("branch registry lock poisoned"))?;
        if branches.contains_key(&info.name) {
            return Err(Error::BranchExists(info.name));
        }
        let branch_dir = self.dir.join(&info.name);
        let chunks = ChunkSequence::create(&branch_dir, info.branching_timestamp, created_at)?;
        write_json(&branch_dir.join(BRANCH_META_FILE), &info)?;
        log::info!(
            "created branch {} from {:?} at {}",
            info.name,
            info.parent,
            info.branching_timestamp
        );
        let branch = Arc::new(Branch::new(info, branch_dir, chunks));
        branches.insert(branch.name().to_string(), Arc::clone(&branch));
        Ok(branch)
    }

    /// Fork `name` from `parent` at `branching_timestamp`.
    ///
    /// The timestamp must lie within `[parent fork, parent now]`, so that no
    /// later parent commit can change what the new branch sees.
    pub fn create(
        &self,
        name: &str,
        parent: &str,
        branching_timestamp: i64,
        created_at: i64,
    ) -> Result<Arc<Branch>> {
        validate_branch_name(name)?;
        let parent_branch = self.get(parent)?;
        let parent_now = parent_branch.now()?;
        if branching_timestamp < parent_branch.branching_timestamp() || branching_timestamp > parent_now {
            return Err(Error::precondition(format!(
                "branching timestamp {branching_timestamp} outside [{}, {parent_now}] of {parent}",
                parent_branch.branching_timestamp()
            )));
        }
        let info = BranchInfo {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            branching_timestamp,
            now: branching_timestamp,
        };
        self.insert_new(info, created_at)
    }

    /// `name` followed by its ancestors up to the root.
    pub fn ancestry(&self, name: &str) -> Result<Vec<Level>> {
        let limit = self.names()?.len();
        let mut levels = Vec::new();
        let mut next = Some(name.to_string());
        while let Some(current) = next {
            if levels.len() >= limit {
                return Err(Error::CorruptState(format!("branch ancestry of {name} has a cycle")));
            }
            let branch = self.get(&current)?;
            levels.push(Level {
                branch: current,
                fork: branch.parent().map(|_| branch.branching_timestamp()),
                chunks: branch.chunks()?,
            });
            next = branch.parent().map(str::to_string);
        }
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_master_created_and_reloaded() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        {
            let manager = BranchManager::open(dir.path(), 1)?;
            assert_eq!(manager.names()?, vec![MASTER.to_string()]);
            manager.get(MASTER)?.advance_now(100)?;
            manager.create("dev", MASTER, 50, 101)?;
        }
        let manager = BranchManager::open(dir.path(), 2)?;
        assert_eq!(manager.names()?, vec!["dev".to_string(), MASTER.to_string()]);
        let dev = manager.get("dev")?;
        assert_eq!(dev.parent(), Some(MASTER));
        assert_eq!(dev.branching_timestamp(), 50);
        assert_eq!(dev.now()?, 50);
        assert_eq!(manager.get(MASTER)?.now()?, 100);
        Ok(())
    }

    #[test]
    fn test_create_validates() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let manager = BranchManager::open(dir.path(), 1)?;
        manager.get(MASTER)?.advance_now(100)?;

        assert!(manager.create("a/b", MASTER, 10, 1).unwrap_err().is_precondition());
        assert!(manager.create("late", MASTER, 101, 1).unwrap_err().is_precondition());
        assert!(matches!(manager.create("x", "nope", 10, 1), Err(Error::BranchNotFound(_))));
        manager.create("x", MASTER, 10, 1)?;
        assert!(matches!(manager.create("x", MASTER, 10, 1), Err(Error::BranchExists(_))));
        // a child of x cannot fork before x itself
        manager.get("x")?.advance_now(20)?;
        assert!(manager.create("y", "x", 5, 1).unwrap_err().is_precondition());
        Ok(())
    }

    #[test]
    fn test_ancestry_is_branch_first() -> Result<()> {
        let dir = tempdir().expect("tempdir");
        let manager = BranchManager::open(dir.path(), 1)?;
        manager.get(MASTER)?.advance_now(100)?;
        manager.create("a", MASTER, 40, 1)?;
        manager.get("a")?.advance_now(60)?;
        manager.create("b", "a", 55, 1)?;

        let levels = manager.ancestry("b")?;
        let names: Vec<&str> = levels.iter().map(|l| l.branch.as_str()).collect();
        assert_eq!(names, vec!["b", "a", MASTER]);
        assert_eq!(levels[0].fork, Some(55));
        assert_eq!(levels[1].fork, Some(40));
        assert!(levels[2].is_root());
        assert_eq!(levels[0].chunks.first().valid_from, 55);
        Ok(())
    }
}
