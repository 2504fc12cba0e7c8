// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Utility methods.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const GZ_BUF_SIZE: usize = 1 << 22;

/// Open a (possibly gzipped) file into a BufReader.
/// Concatenated gzip members are read as one stream.
pub fn open_with_gz(p: impl AsRef<Path>) -> Result<Box<dyn BufRead>> {
    let r = File::open(p.as_ref()).with_context(|| format!("error opening {:?}", p.as_ref()))?;

    if p.as_ref().extension().map_or(false, |ext| ext == "gz") {
        let gz = MultiGzDecoder::new(r);
        Ok(Box::new(BufReader::with_capacity(GZ_BUF_SIZE, gz)))
    } else {
        Ok(Box::new(BufReader::with_capacity(32 * 1024, r)))
    }
}

/// Copy the file or directory `src` into the directory `dest_dir`, keeping its name.
/// Directories are copied recursively, merging into an existing target.
pub fn copy_into(src: &Path, dest_dir: &Path) -> Result<()> {
    let name = src
        .file_name()
        .with_context(|| format!("cannot copy {:?}: no file name", src))?;
    let target = dest_dir.join(name);

    if src.is_dir() {
        copy_dir(src, &target)
    } else {
        std::fs::copy(src, &target)
            .with_context(|| format!("error copying {:?} to {:?}", src, target))?;
        Ok(())
    }
}

fn copy_dir(src: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).with_context(|| format!("error creating {:?}", target))?;
    for entry in std::fs::read_dir(src)? {
        let path = entry?.path();
        copy_into(&path, target)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};

    #[test]
    fn gz_round_trip_and_member_concatenation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.txt.gz");
        let b = dir.path().join("b.txt.gz");
        for (path, text) in &[(&a, "first\n"), (&b, "second\n")] {
            let mut w = GzEncoder::new(File::create(path)?, Compression::default());
            w.write_all(text.as_bytes())?;
            w.finish()?;
        }

        // byte-level concatenation of two gzip files is a valid gzip stream
        let mut joined = std::fs::read(&a)?;
        joined.extend(std::fs::read(&b)?);
        let ab = dir.path().join("ab.txt.gz");
        std::fs::write(&ab, joined)?;

        let mut text = String::new();
        open_with_gz(&ab)?.read_to_string(&mut text)?;
        assert_eq!(text, "first\nsecond\n");
        Ok(())
    }

    #[test]
    fn copy_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("InterOp");
        std::fs::create_dir_all(src.join("nested"))?;
        std::fs::write(src.join("QMetricsOut.bin"), b"q")?;
        std::fs::write(src.join("nested/x.bin"), b"x")?;
        let dest = dir.path().join("qc");
        std::fs::create_dir(&dest)?;

        copy_into(&src, &dest)?;
        assert_eq!(std::fs::read(dest.join("InterOp/QMetricsOut.bin"))?, b"q");
        assert_eq!(std::fs::read(dest.join("InterOp/nested/x.bin"))?, b"x");
        Ok(())
    }
}
