//! Project-boundary containment for filesystem side effects.
//!
//! Every destructive or write-introducing path operation performed on behalf
//! of container-side state must target a path inside the project root. The
//! check resolves symbolic links and `..` components before comparing, so a
//! link inside the project pointing elsewhere does not count as inside.
//!
//! [`contain`] is the only way to obtain a [`ContainedPath`]; backends that
//! override path operations receive one and therefore cannot skip the check.

use crate::engine::{EngineError, Result};
use crate::project::Project;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Symbolic links followed before resolution gives up.
const MAX_SYMLINK_DEPTH: usize = 40;

/// A path proven to lie within a project root.
///
/// Holds the resolved path; operations act on it rather than on the path the
/// caller passed, so a link swapped in afterwards is not followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainedPath {
    resolved: PathBuf,
    root: PathBuf,
}

impl ContainedPath {
    /// The resolved absolute path.
    pub fn as_path(&self) -> &Path {
        &self.resolved
    }

    /// The resolved project root the path lies within.
    pub fn project_root(&self) -> &Path {
        &self.root
    }

    /// The path relative to the project root; empty for the root itself.
    pub fn relative(&self) -> &Path {
        self.resolved
            .strip_prefix(&self.root)
            .unwrap_or_else(|_| Path::new(""))
    }
}

/// Resolve `path` to an absolute path without symlinks or `.`/`..` components.
///
/// Unlike [`fs::canonicalize`] the path does not need to exist: the existing
/// prefix is resolved through the filesystem, the rest lexically.
pub fn resolve(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    resolve_absolute(&absolute, 0)
}

fn resolve_absolute(path: &Path, depth: usize) -> io::Result<PathBuf> {
    if depth > MAX_SYMLINK_DEPTH {
        return Err(io::Error::other(format!(
            "too many levels of symbolic links resolving {}",
            path.display()
        )));
    }

    let mut resolved = PathBuf::new();
    let mut missing = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let candidate = resolved.join(name);
                if missing {
                    resolved = candidate;
                    continue;
                }
                match fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        let target = fs::read_link(&candidate)?;
                        let target = if target.is_absolute() {
                            target
                        } else {
                            resolved.join(target)
                        };
                        resolved = resolve_absolute(&target, depth + 1)?;
                    }
                    Ok(_) => resolved = candidate,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        missing = true;
                        resolved = candidate;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(resolved)
}

/// True iff `path` resolves to the project root or a descendant of it.
///
/// Paths that cannot be resolved are treated as outside.
pub fn path_in_project(path: &Path, project: &Project) -> bool {
    match (resolve(path), resolve(&project.root)) {
        (Ok(path), Ok(root)) => path.starts_with(&root),
        _ => false,
    }
}

/// Prove that `path` lies within `project`, or fail with [`EngineError::Permission`].
pub fn contain(path: &Path, project: &Project) -> Result<ContainedPath> {
    let root = resolve(&project.root)?;
    let resolved = resolve(path)?;
    if !resolved.starts_with(&root) {
        warn!(
            "Rejected path {:?} outside of project '{}' ({:?})",
            path, project.name, root
        );
        return Err(EngineError::Permission(format!(
            "{} is not within project '{}'",
            path.display(),
            project.name
        )));
    }
    Ok(ContainedPath { resolved, root })
}

/// Delete a file or directory tree. A missing path is not an error.
pub fn remove(path: &ContainedPath) -> Result<()> {
    let target = path.as_path();
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {
            debug!("Removing directory tree {:?}", target);
            fs::remove_dir_all(target)?;
        }
        Ok(_) => {
            debug!("Removing file {:?}", target);
            fs::remove_file(target)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("Nothing to remove at {:?}", target);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Copy a file or directory tree from `from` to `to`. `to` must not exist.
pub fn copy(from: &Path, to: &ContainedPath) -> Result<()> {
    let target = to.as_path();
    match fs::symlink_metadata(target) {
        Ok(_) => return Err(EngineError::DestinationExists(target.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!("Copying {:?} to {:?}", from, target);
    copy_recursive(from, target)?;
    Ok(())
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    if meta.file_type().is_symlink() {
        copy_symlink(from, to)
    } else if meta.is_dir() {
        fs::create_dir(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        fs::set_permissions(to, meta.permissions())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project_in(dir: &Path) -> Project {
        Project::new("guarded", dir)
    }

    #[test]
    fn test_root_and_descendants_are_inside() {
        let dir = TempDir::new().unwrap();
        let project = project_in(dir.path());

        assert!(path_in_project(dir.path(), &project));
        assert!(path_in_project(&dir.path().join("a/b/c.txt"), &project));
        assert!(path_in_project(&dir.path().join("a/../b"), &project));
    }

    #[test]
    fn test_parent_escape_is_outside() {
        let dir = TempDir::new().unwrap();
        let project = project_in(dir.path());

        assert!(!path_in_project(&dir.path().join(".."), &project));
        assert!(!path_in_project(&dir.path().join("a/../../x"), &project));
        assert!(!path_in_project(Path::new("/"), &project));
    }

    #[test]
    fn test_sibling_with_common_prefix_is_outside() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("proj");
        let sibling = parent.path().join("proj2");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&sibling).unwrap();

        assert!(!path_in_project(&sibling, &project_in(&root)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_outside() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let project = project_in(dir.path());

        assert!(!path_in_project(&dir.path().join("link"), &project));
        assert!(!path_in_project(&dir.path().join("link/file"), &project));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_root_is_resolved() {
        let real = TempDir::new().unwrap();
        let holder = TempDir::new().unwrap();
        let alias = holder.path().join("alias");
        std::os::unix::fs::symlink(real.path(), &alias).unwrap();

        let project = project_in(&alias);
        assert!(path_in_project(&real.path().join("x"), &project));
        assert!(path_in_project(&alias.join("x"), &project));
    }

    #[test]
    fn test_contain_rejects_with_permission_error() {
        let dir = TempDir::new().unwrap();
        let project = project_in(dir.path());

        let err = contain(&dir.path().join("../elsewhere"), &project).unwrap_err();
        assert!(matches!(err, EngineError::Permission(_)));

        let contained = contain(&dir.path().join("sub/file"), &project).unwrap();
        assert_eq!(contained.relative(), Path::new("sub/file"));
    }

    #[test]
    fn test_remove_file_dir_and_missing() {
        let dir = TempDir::new().unwrap();
        let project = project_in(dir.path());
        fs::create_dir_all(dir.path().join("tree/deep")).unwrap();
        fs::write(dir.path().join("tree/deep/f"), b"x").unwrap();
        fs::write(dir.path().join("single"), b"x").unwrap();

        remove(&contain(&dir.path().join("tree"), &project).unwrap()).unwrap();
        remove(&contain(&dir.path().join("single"), &project).unwrap()).unwrap();
        remove(&contain(&dir.path().join("never-existed"), &project).unwrap()).unwrap();

        assert!(!dir.path().join("tree").exists());
        assert!(!dir.path().join("single").exists());
    }

    #[test]
    fn test_copy_tree_and_refuse_existing() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/file.txt"), b"content").unwrap();
        fs::write(src.path().join("top.txt"), b"top").unwrap();

        let dir = TempDir::new().unwrap();
        let project = project_in(dir.path());
        let to = contain(&dir.path().join("copy"), &project).unwrap();
        copy(src.path(), &to).unwrap();

        assert_eq!(
            fs::read(dir.path().join("copy/a/b/file.txt")).unwrap(),
            b"content"
        );
        assert_eq!(fs::read(dir.path().join("copy/top.txt")).unwrap(), b"top");

        let err = copy(src.path(), &to).unwrap_err();
        assert!(matches!(err, EngineError::DestinationExists(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_fails_when_destination_cannot_be_checked() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        fs::write(src.path().join("file.txt"), b"new").unwrap();
        let dir = TempDir::new().unwrap();
        let project = project_in(dir.path());
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("file.txt"), b"old").unwrap();
        let to = contain(&locked.join("file.txt"), &project).unwrap();

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let checkable = fs::symlink_metadata(locked.join("file.txt")).is_ok();
        let result = copy(&src.path().join("file.txt"), &to);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        // root can stat regardless of mode bits
        if checkable {
            assert!(matches!(result, Err(EngineError::DestinationExists(_))));
        } else {
            assert!(matches!(
                result,
                Err(EngineError::Io(ref e)) if e.kind() == io::ErrorKind::PermissionDenied
            ));
        }
        assert_eq!(fs::read(locked.join("file.txt")).unwrap(), b"old");
    }
}
