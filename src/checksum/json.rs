use super::nodes::{Checksum, DirChecksum, FileChecksum};
use std::fmt::{Error, Write};

/// Serialize the entries of a directory listing in canonical form.  Both
/// slices must already be sorted by name.
pub(super) fn get_checksum_json(files: &[FileChecksum], directories: &[DirChecksum]) -> String {
    let collection = ChecksumCollection {
        directories: directories.iter().map(ChecksumEntry::new).collect(),
        files: files.iter().map(ChecksumEntry::new).collect(),
    };
    let mut buf = String::new();
    collection
        .write_json(&mut buf)
        .expect("writing to a String should not fail");
    buf
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ChecksumEntry<'a> {
    name: &'a str,
    digest: &'a str,
    size: u64,
}

impl<'a> ChecksumEntry<'a> {
    fn new<C: Checksum>(chksum: &'a C) -> Self {
        ChecksumEntry {
            name: chksum.name(),
            digest: chksum.digest(),
            size: chksum.size(),
        }
    }

    fn write_json<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_str(r#"{"digest":"#)?;
        write_json_str(self.digest, writer)?;
        writer.write_str(r#","name":"#)?;
        write_json_str(self.name, writer)?;
        write!(writer, r#","size":{}}}"#, self.size)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct ChecksumCollection<'a> {
    directories: Vec<ChecksumEntry<'a>>,
    files: Vec<ChecksumEntry<'a>>,
}

impl ChecksumCollection<'_> {
    fn write_json<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        writer.write_str(r#"{"directories":["#)?;
        for (i, d) in self.directories.iter().enumerate() {
            if i > 0 {
                writer.write_char(',')?;
            }
            d.write_json(writer)?;
        }
        writer.write_str(r#"],"files":["#)?;
        for (i, f) in self.files.iter().enumerate() {
            if i > 0 {
                writer.write_char(',')?;
            }
            f.write_json(writer)?;
        }
        writer.write_str("]}")?;
        Ok(())
    }
}

fn write_json_str<W: Write>(s: &str, writer: &mut W) -> Result<(), Error> {
    writer.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => writer.write_str("\\\"")?,
            '\\' => writer.write_str(r"\\")?,
            '\x08' => writer.write_str("\\b")?,
            '\x0C' => writer.write_str("\\f")?,
            '\n' => writer.write_str("\\n")?,
            '\r' => writer.write_str("\\r")?,
            '\t' => writer.write_str("\\t")?,
            ' '..='~' => writer.write_char(c)?,
            c => {
                let mut buf = [0u16; 2];
                for b in c.encode_utf16(&mut buf) {
                    write!(writer, "\\u{b:04x}")?;
                }
            }
        }
    }
    writer.write_char('"')?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("foobar", r#""foobar""#)]
    #[case("foo / bar", r#""foo / bar""#)]
    #[case("foo\"bar", r#""foo\"bar""#)]
    #[case("foo\\bar", r#""foo\\bar""#)]
    #[case("foo\x08\x0C\n\r\tbar", r#""foo\b\f\n\r\tbar""#)]
    #[case("foo\x0B\x1B\x7Fbar", r#""foo\u000b\u001b\u007fbar""#)]
    #[case("foo\u{2014}bar", r#""foo\u2014bar""#)]
    #[case("foo\u{1F410}bar", r#""foo\ud83d\udc10bar""#)]
    fn test_write_json_str(#[case] s: &str, #[case] json: String) {
        let mut buf = String::new();
        write_json_str(s, &mut buf).unwrap();
        assert_eq!(buf, json);
    }

    #[test]
    fn test_get_checksum_json() {
        let files = [
            FileChecksum::new("bar", "abcdef0123456789abcdef0123456789", 42).unwrap(),
            FileChecksum::new("foo", "0123456789abcdef0123456789abcdef", 69105).unwrap(),
        ];
        let directories = [DirChecksum::from_digest(
            "quux",
            "0987654321fedcba0987654321fedcba-23--65537",
        )
        .unwrap()];
        let json = get_checksum_json(&files, &directories);
        assert_eq!(
            json,
            r#"{"directories":[{"digest":"0987654321fedcba0987654321fedcba-23--65537","name":"quux","size":65537}],"files":[{"digest":"abcdef0123456789abcdef0123456789","name":"bar","size":42},{"digest":"0123456789abcdef0123456789abcdef","name":"foo","size":69105}]}"#
        );
    }

    #[test]
    fn test_get_checksum_json_empty() {
        assert_eq!(get_checksum_json(&[], &[]), r#"{"directories":[],"files":[]}"#);
    }
}
