use crate::errors::{EntryNameError, EntryPathError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A nonempty, forward-slash-separated UTF-8 relative path of a file or
/// directory within a Zarr archive.
///
/// Object storage keys are not normalized, so unlike a filesystem path an
/// `EntryPath` never contains empty, `.`, or `..` components, and it neither
/// begins nor ends with a slash.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryPath(Vec<String>);

impl EntryPath {
    /// Return the basename of the path
    pub fn file_name(&self) -> &str {
        self.0
            .last()
            .expect("Invariant violated: EntryPath is empty")
    }

    /// Return an iterator over the parent paths of the path, starting at the
    /// first component and stopping before the file name
    ///
    /// ```
    /// # use zarr_checksum_tree::zarr::EntryPath;
    /// let path = EntryPath::try_from("foo/bar/baz").unwrap();
    /// let mut parents = path.parents();
    /// assert_eq!(parents.next().unwrap().to_string(), "foo");
    /// assert_eq!(parents.next().unwrap().to_string(), "foo/bar");
    /// assert_eq!(parents.next(), None);
    /// ```
    pub fn parents(&self) -> Parents<'_> {
        Parents {
            parts: &self.0,
            i: 0,
        }
    }

    /// Return the path of the directory containing this entry
    pub fn parent(&self) -> DirPath {
        match self.0.split_last() {
            Some((_, [])) | None => DirPath::Root,
            Some((_, init)) => DirPath::Path(EntryPath(init.to_vec())),
        }
    }

    /// Number of components in the path
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn join1(&self, s: &str) -> Result<EntryPath, EntryNameError> {
        if is_path_name(s) {
            let mut parts = self.0.clone();
            parts.push(String::from(s));
            Ok(EntryPath(parts))
        } else {
            Err(EntryNameError(String::from(s)))
        }
    }
}

impl fmt::Debug for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", part.escape_debug())?;
        }
        f.write_str("\"")?;
        Ok(())
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

impl TryFrom<&str> for EntryPath {
    type Error = EntryPathError;

    fn try_from(path: &str) -> Result<EntryPath, EntryPathError> {
        let mut output = Vec::new();
        for part in path.split('/') {
            if !is_path_name(part) {
                return Err(EntryPathError(path.into()));
            }
            output.push(String::from(part));
        }
        Ok(EntryPath(output))
    }
}

impl TryFrom<String> for EntryPath {
    type Error = EntryPathError;

    fn try_from(path: String) -> Result<EntryPath, EntryPathError> {
        EntryPath::try_from(path.as_str())
    }
}

impl From<EntryPath> for String {
    fn from(path: EntryPath) -> String {
        path.to_string()
    }
}

/// The path of a directory within a Zarr archive: either the archive root or
/// a nonempty [`EntryPath`]
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DirPath {
    Root,
    Path(EntryPath),
}

impl DirPath {
    pub fn join1(&self, s: &str) -> Result<EntryPath, EntryNameError> {
        match self {
            DirPath::Root if is_path_name(s) => Ok(EntryPath(vec![String::from(s)])),
            DirPath::Path(ep) => ep.join1(s),
            DirPath::Root => Err(EntryNameError(String::from(s))),
        }
    }

    /// Return the directory containing this one, or `None` for the root
    pub fn parent(&self) -> Option<DirPath> {
        match self {
            DirPath::Root => None,
            DirPath::Path(ep) => Some(ep.parent()),
        }
    }

    /// Return the name under which this directory is listed in its parent,
    /// or `None` for the root
    pub fn name(&self) -> Option<&str> {
        match self {
            DirPath::Root => None,
            DirPath::Path(ep) => Some(ep.file_name()),
        }
    }

    /// Number of components in the path; the root has depth 0
    pub fn depth(&self) -> usize {
        match self {
            DirPath::Root => 0,
            DirPath::Path(ep) => ep.depth(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, DirPath::Root)
    }

    /// Return this directory followed by each of its ancestors, ending with
    /// the root
    pub fn ancestry(&self) -> Vec<DirPath> {
        let mut chain = vec![self.clone()];
        while let Some(parent) = chain.last().and_then(DirPath::parent) {
            chain.push(parent);
        }
        chain
    }

    /// Append the `/`-joined path components to `prefix`, or leave `prefix`
    /// as is for the root
    pub(crate) fn under(&self, prefix: &str) -> String {
        match self {
            DirPath::Root => String::from(prefix),
            DirPath::Path(ep) => format!("{prefix}/{ep}"),
        }
    }
}

impl fmt::Display for DirPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirPath::Root => f.write_str("<root>"),
            DirPath::Path(ep) => <EntryPath as fmt::Display>::fmt(ep, f),
        }
    }
}

impl From<EntryPath> for DirPath {
    fn from(ep: EntryPath) -> DirPath {
        DirPath::Path(ep)
    }
}

/// Iterator over the parent paths of an [`EntryPath`]
///
/// The iterator's items are themselves [`EntryPath`]s.
///
/// This struct is returned by [`EntryPath::parents()`].
#[derive(Clone, Debug)]
pub struct Parents<'a> {
    parts: &'a [String],
    i: usize,
}

impl Iterator for Parents<'_> {
    type Item = EntryPath;

    fn next(&mut self) -> Option<EntryPath> {
        if self.i + 1 < self.parts.len() {
            self.i += 1;
            Some(EntryPath(self.parts[0..self.i].to_vec()))
        } else {
            None
        }
    }
}

pub(crate) fn is_path_name(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parents() {
        let path = EntryPath::try_from("foo/bar/baz").unwrap();
        let mut parents = path.parents();
        assert_eq!(parents.next().unwrap().to_string(), "foo");
        assert_eq!(parents.next().unwrap().to_string(), "foo/bar");
        assert_eq!(parents.next(), None);
    }

    #[test]
    fn test_parents_len_1() {
        let path = EntryPath::try_from("foo").unwrap();
        let mut parents = path.parents();
        assert_eq!(parents.next(), None);
    }

    #[rstest]
    #[case("foo", "<root>")]
    #[case("foo/bar", "foo")]
    #[case("foo/bar/baz.txt", "foo/bar")]
    fn test_parent(#[case] path: &str, #[case] parent: &str) {
        let path = EntryPath::try_from(path).unwrap();
        assert_eq!(path.parent().to_string(), parent);
    }

    #[test]
    fn test_ancestry() {
        let dir = DirPath::from(EntryPath::try_from("a/b/c").unwrap());
        let chain = dir
            .ancestry()
            .into_iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>();
        assert_eq!(chain, ["a/b/c", "a/b", "a", "<root>"]);
        assert_eq!(DirPath::Root.ancestry(), [DirPath::Root]);
    }

    #[test]
    fn test_root_sorts_first() {
        let dir = DirPath::from(EntryPath::try_from("a").unwrap());
        assert!(DirPath::Root < dir);
    }

    #[test]
    fn test_under() {
        assert_eq!(DirPath::Root.under("zarr/abc"), "zarr/abc");
        let dir = DirPath::from(EntryPath::try_from("foo/bar").unwrap());
        assert_eq!(dir.under("zarr/abc"), "zarr/abc/foo/bar");
    }

    #[rstest]
    #[case("foo", r#""foo""#)]
    #[case("foo/bar", r#""foo/bar""#)]
    #[case("foo\n/\tbar", r#""foo\n/\tbar""#)]
    #[case("foo\x1B\u{2014}\u{1F410}bar", "\"foo\\u{1b}\u{2014}\u{1F410}bar\"")]
    fn test_debug(#[case] path: &str, #[case] repr: &str) {
        let path = EntryPath::try_from(path).unwrap();
        assert_eq!(format!("{path:?}"), repr);
    }

    #[rstest]
    #[case("foo")]
    #[case("foo/bar")]
    #[case(".zgroup")]
    #[case("arr_0/0.0.1")]
    #[case("foo/.../bar")]
    fn test_entrypath_try_from(#[case] path: &str) {
        assert_eq!(EntryPath::try_from(path).unwrap().to_string(), path);
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("/")]
    #[case("/foo")]
    #[case("foo/")]
    #[case("foo//bar")]
    #[case("./foo")]
    #[case("foo/./bar")]
    #[case("foo/..")]
    #[case("../foo")]
    #[case("foo/../bar")]
    fn test_entrypath_try_from_err(#[case] path: &str) {
        assert_eq!(
            EntryPath::try_from(path),
            Err(EntryPathError(String::from(path)))
        );
    }

    #[test]
    fn test_join1() {
        let path = DirPath::Root.join1("foo").unwrap();
        assert_eq!(path.to_string(), "foo");
        assert_eq!(path.join1("bar").unwrap().to_string(), "foo/bar");
        assert_eq!(
            DirPath::Root.join1("a/b"),
            Err(EntryNameError(String::from("a/b")))
        );
        assert_eq!(path.join1(".."), Err(EntryNameError(String::from(".."))));
    }

    #[test]
    fn test_serde_as_string() {
        let path = EntryPath::try_from("foo/bar.txt").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#""foo/bar.txt""#);
        let back: EntryPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<EntryPath>(r#""foo/../bar""#).is_err());
    }
}
