//! Lexical classification of filesystem paths.

use crate::event::EventField;

/// Name of the directory listing every stored event.
pub const EVENTS_DIR: &str = "e";

/// What a path points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Root,
    EventCollection,
    EventDir(String),
    EventField(String, EventField),
    Unresolved,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Root | Node::EventCollection | Node::EventDir(_))
    }
}

/// Classify an absolute `/`-separated path without touching the store.
///
/// Empty components from trailing or repeated separators are ignored.
/// Relative paths and `.`/`..` components do not resolve.
pub fn resolve(path: &str) -> Node {
    if !path.starts_with('/') {
        return Node::Unresolved;
    }
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.iter().any(|c| *c == "." || *c == "..") {
        return Node::Unresolved;
    }
    match components.as_slice() {
        [] => Node::Root,
        [dir] if *dir == EVENTS_DIR => Node::EventCollection,
        [dir, id] if *dir == EVENTS_DIR => Node::EventDir((*id).to_string()),
        [dir, id, name] if *dir == EVENTS_DIR => match EventField::from_name(name) {
            Some(field) => Node::EventField((*id).to_string(), field),
            None => Node::Unresolved,
        },
        _ => Node::Unresolved,
    }
}

/// Path of the entry `name` inside directory `parent`.
#[cfg_attr(not(feature = "fuse"), allow(dead_code))]
pub fn join(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{parent}/{name}")
}

/// Directory containing `path`; the root is its own parent.
#[cfg_attr(not(feature = "fuse"), allow(dead_code))]
pub fn parent(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((dir, _)) if !dir.trim_end_matches('/').is_empty() => {
            dir.trim_end_matches('/').to_string()
        }
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_collection() {
        assert_eq!(resolve("/"), Node::Root);
        assert_eq!(resolve("//"), Node::Root);
        assert_eq!(resolve("/e"), Node::EventCollection);
        assert_eq!(resolve("/e/"), Node::EventCollection);
        assert_eq!(resolve("//e//"), Node::EventCollection);
    }

    #[test]
    fn event_dir_and_fields() {
        assert_eq!(resolve("/e/abc"), Node::EventDir("abc".into()));
        assert_eq!(resolve("/e/abc/"), Node::EventDir("abc".into()));
        for field in EventField::ALL {
            let path = format!("/e/abc/{}", field.name());
            assert_eq!(resolve(&path), Node::EventField("abc".into(), field));
        }
        assert_eq!(
            resolve("/e//abc///content/"),
            Node::EventField("abc".into(), EventField::Content)
        );
    }

    #[test]
    fn unknown_paths() {
        assert_eq!(resolve(""), Node::Unresolved);
        assert_eq!(resolve("e"), Node::Unresolved);
        assert_eq!(resolve("/x"), Node::Unresolved);
        assert_eq!(resolve("/x/abc"), Node::Unresolved);
        assert_eq!(resolve("/e/abc/created_at"), Node::Unresolved);
        assert_eq!(resolve("/e/abc/content/more"), Node::Unresolved);
        assert_eq!(resolve("/e/../e"), Node::Unresolved);
        assert_eq!(resolve("/e/./abc"), Node::Unresolved);
    }

    #[test]
    fn directories() {
        assert!(resolve("/").is_dir());
        assert!(resolve("/e").is_dir());
        assert!(resolve("/e/abc").is_dir());
        assert!(!resolve("/e/abc/sig").is_dir());
        assert!(!resolve("/nope").is_dir());
    }

    #[test]
    fn join_paths() {
        assert_eq!(join("/", "e"), "/e");
        assert_eq!(join("/e", "abc"), "/e/abc");
        assert_eq!(join("/e/abc/", "kind"), "/e/abc/kind");
    }

    #[test]
    fn parent_paths() {
        assert_eq!(parent("/"), "/");
        assert_eq!(parent("/e"), "/");
        assert_eq!(parent("/e/"), "/");
        assert_eq!(parent("/e/abc"), "/e");
        assert_eq!(parent("/e/abc/kind"), "/e/abc");
        assert_eq!(parent("/e//abc"), "/e");
    }
}
