use super::{git_protocol::RefMap, Error, Result, GIT_DIR};
use std::fs;
use std::path::{Component, Path};
use tracing::{debug, info};

/// Writes `.git/HEAD` and one file per advertised ref under `root`.
pub fn write_layout<P: AsRef<Path>>(root: P, head_symref: &str, refs: &RefMap) -> Result<()> {
    let git_dir = root.as_ref().join(GIT_DIR);

    fs::create_dir_all(git_dir.join("objects"))?;
    fs::create_dir_all(git_dir.join("refs").join("heads"))?;
    fs::create_dir_all(git_dir.join("refs").join("tags"))?;

    if head_symref.is_empty() {
        return Err(Error::Layout(
            "cannot write HEAD file: symbolic ref is empty".into(),
        ));
    }
    fs::write(git_dir.join("HEAD"), format!("ref: {head_symref}"))?;

    for (name, hash) in refs {
        let relative = Path::new(name);
        if !is_contained(relative) {
            return Err(Error::Layout(format!("refusing to write ref {name:?}")));
        }

        let path = git_dir.join(relative);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, hash)?;
        debug!(name = name.as_str(), hash = hash.as_str(), "wrote ref");
    }

    info!(head = head_symref, refs = refs.len(), "wrote repository layout");
    Ok(())
}

// Only plain components, so a ref can never land outside the git directory.
fn is_contained(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HASH: &str = "3b1031798a00fdf9b574b5857b1721bc4b0e6bac";

    #[test]
    fn it_writes_head_and_refs() {
        let dir = TempDir::new().unwrap();
        let mut refs = RefMap::new();
        refs.insert("refs/heads/master".into(), HASH.into());
        refs.insert("refs/pull/1/head".into(), HASH.into());

        write_layout(dir.path(), "refs/heads/master", &refs).unwrap();

        let git_dir = dir.path().join(".git");
        assert_eq!(
            fs::read_to_string(git_dir.join("HEAD")).unwrap(),
            "ref: refs/heads/master"
        );
        assert_eq!(
            fs::read_to_string(git_dir.join("refs/heads/master")).unwrap(),
            HASH
        );
        assert_eq!(
            fs::read_to_string(git_dir.join("refs/pull/1/head")).unwrap(),
            HASH
        );
        assert!(git_dir.join("objects").is_dir());
        assert!(git_dir.join("refs/tags").is_dir());
    }

    #[test]
    fn it_refuses_empty_head() {
        let dir = TempDir::new().unwrap();
        let err = write_layout(dir.path(), "", &RefMap::new()).unwrap_err();
        assert!(matches!(err, Error::Layout(_)));
        assert!(!dir.path().join(".git/HEAD").exists());
    }

    #[test]
    fn it_refuses_refs_outside_git_dir() {
        let dir = TempDir::new().unwrap();
        let mut refs = RefMap::new();
        refs.insert("../../escape".into(), HASH.into());

        assert!(write_layout(dir.path(), "refs/heads/main", &refs).is_err());
        assert!(!dir.path().join("escape").exists());
    }
}
