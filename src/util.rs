use fs_err::File;
use md5::{Digest, Md5};
use std::io;
use std::path::Path;

pub(crate) fn md5_string(s: &str) -> String {
    md5_bytes(s.as_bytes())
}

pub(crate) fn md5_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

pub(crate) fn md5_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_md5_string() {
        assert_eq!(
            md5_string(r#"{"directories":[],"files":[]}"#),
            "481a2f77ab786a0f45aafd5db0971caa"
        );
    }

    #[test]
    fn test_md5_file_matches_md5_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"Some fascinating zarr content.\n").unwrap();
        tmp.flush().unwrap();
        assert_eq!(md5_file(tmp.path()).unwrap(), "4047c27f3c0c64f29c48361443fb1397");
        assert_eq!(
            md5_bytes(b"Some fascinating zarr content.\n"),
            "4047c27f3c0c64f29c48361443fb1397"
        );
    }
}
