// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Concatenate grouped per-tile files and strip reads that failed the
//! sequencer's pass-filter.

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;

use crate::error::PostRunError;
use crate::group::FileGroup;
use crate::shell::Shell;
use crate::utils::open_with_gz;

lazy_static! {
    /// CASAVA 1.8 read header: `@<instrument>:...:<x>:<y> <read>:<is filtered>:<control>:<index>`
    static ref FILTER_HEADER_REGEX: Regex = Regex::new(r"^@.*\d+:([NY]):\d+:.*$").unwrap();
}

/// Read counts from one pass of the pass-filter filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterCounts {
    pub total: usize,
    pub kept: usize,
}

/// Concatenate each group's members, in tile order, into its output file.
/// Gzip members concatenate into a valid gzip stream, so no decompression
/// is needed. A missing member is logged and the group is skipped.
pub fn cat_files(groups: &[FileGroup], shell: &Shell) -> Result<()> {
    for group in groups {
        let paths = group.paths();
        if !shell.check_exists(&paths) {
            continue;
        }

        let inputs: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        let cmd = format!("cat {} > {}", inputs.join(" "), group.output_path.display());
        let res = shell.perform(cmd, || concatenate(&paths, &group.output_path));
        if let Err(e) = res {
            shell.log_failure(&e);
        }
    }
    Ok(())
}

fn concatenate(inputs: &[&Path], output: &Path) -> Result<()> {
    let f = File::create(output).with_context(|| format!("error creating {:?}", output))?;
    let mut w = BufWriter::new(f);
    for p in inputs {
        let mut r = File::open(p).with_context(|| format!("error opening {:?}", p))?;
        io::copy(&mut r, &mut w).with_context(|| format!("error copying {:?}", p))?;
    }
    w.flush()?;
    Ok(())
}

/// Copy the 4-line FASTQ records of `input` to `output`, dropping those whose
/// header flags them as filtered (`Y`). A header that doesn't carry the flag
/// is fatal: there is no safe way to find where the next record starts.
pub fn filter_pass_reads<R: BufRead, W: Write>(input: R, mut output: W) -> Result<FilterCounts> {
    let mut counts = FilterCounts::default();
    let mut lines = input.lines();
    let mut line_num = 0;

    while let Some(header) = lines.next() {
        let header = header?;
        line_num += 1;
        let keep = match FILTER_HEADER_REGEX.captures(&header) {
            Some(cap) => &cap[1] == "N",
            None => {
                return Err(PostRunError::InvalidFastqHeader {
                    line: line_num,
                    header,
                }
                .into())
            }
        };

        let mut record = [header, String::new(), String::new(), String::new()];
        for slot in record.iter_mut().skip(1) {
            match lines.next() {
                Some(l) => *slot = l?,
                None => bail!("ERROR: truncated fastq record starting at line {}", line_num),
            }
        }
        line_num += 3;

        counts.total += 1;
        if keep {
            counts.kept += 1;
            for l in &record {
                writeln!(output, "{}", l)?;
            }
        }
    }
    output.flush()?;
    Ok(counts)
}

/// Filter each group's current file into `output_dir/<group name>` and
/// point the group at the filtered file. The unfiltered file is kept.
pub fn filter_fastq_files(
    mut groups: Vec<FileGroup>,
    output_dir: &Path,
    shell: &Shell,
) -> Result<Vec<FileGroup>> {
    shell.log(format!("# Creating path: {}", output_dir.display()));
    shell.mkdir_p(output_dir)?;

    for group in &mut groups {
        let filtered = output_dir.join(&group.group_name);
        let cmd = format!(
            "zcat {} | fastq_filter | gzip -c > {}",
            group.output_path.display(),
            filtered.display()
        );

        if shell.check_exists(&[&group.output_path]) {
            shell.perform(cmd, || {
                let counts = filter_file(&group.output_path, &filtered)?;
                shell.log(format!(
                    "# {}: kept {} of {} reads",
                    group.group_name, counts.kept, counts.total
                ));
                Ok(())
            })?;
        }
        group.output_path = filtered;
    }
    Ok(groups)
}

fn filter_file(input: &Path, output: &Path) -> Result<FilterCounts> {
    let r = open_with_gz(input)?;
    let f = File::create(output).with_context(|| format!("error creating {:?}", output))?;
    let mut gz = GzEncoder::new(BufWriter::new(f), Compression::default());
    let counts =
        filter_pass_reads(r, &mut gz).with_context(|| format!("error filtering {:?}", input))?;
    gz.finish()?.flush()?;
    Ok(counts)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filenames::FileRecord;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::io::Read;
    use std::path::PathBuf;

    fn record(i: usize, flag: char) -> String {
        format!(
            "@HWI-ST1234:8:1101:{}:2000 1:{}:0:ACTTGA\nACGTACGT\n+\nIIIIIIII\n",
            1000 + i,
            flag
        )
    }

    #[test]
    fn keeps_unfiltered_reads() -> Result<()> {
        let input = [record(0, 'N'), record(1, 'Y'), record(2, 'N')].concat();
        let mut out = Vec::new();
        let counts = filter_pass_reads(input.as_bytes(), &mut out)?;

        assert_eq!(counts, FilterCounts { total: 3, kept: 2 });
        assert_eq!(String::from_utf8(out)?, [record(0, 'N'), record(2, 'N')].concat());
        Ok(())
    }

    #[test]
    fn bad_header_is_fatal() {
        let input = format!("{}garbage\nACGT\n+\nIIII\n", record(0, 'N'));
        let err = filter_pass_reads(input.as_bytes(), io::sink()).unwrap_err();
        assert!(err.to_string().contains("line 5"), "{}", err);

        let truncated = "@HWI:1:2:3 1:N:0:A\nACGT\n";
        assert!(filter_pass_reads(truncated.as_bytes(), io::sink()).is_err());
    }

    proptest! {
        #[test]
        fn filter_round_trip(flags in prop::collection::vec(any::<bool>(), 0..100)) {
            let input: String = flags
                .iter()
                .enumerate()
                .map(|(i, &pass)| record(i, if pass { 'N' } else { 'Y' }))
                .collect();
            let expected: String = flags
                .iter()
                .enumerate()
                .filter(|(_, &pass)| pass)
                .map(|(i, _)| record(i, 'N'))
                .collect();

            let mut out = Vec::new();
            let counts = filter_pass_reads(input.as_bytes(), &mut out).unwrap();
            prop_assert_eq!(counts.total, flags.len());
            prop_assert_eq!(counts.kept, flags.iter().filter(|&&p| p).count());
            prop_assert_eq!(String::from_utf8(out).unwrap(), expected);
        }
    }

    fn write_gz(path: &Path, text: &str) -> Result<()> {
        let mut gz = GzEncoder::new(File::create(path)?, Compression::default());
        gz.write_all(text.as_bytes())?;
        gz.finish()?;
        Ok(())
    }

    fn group_of(dir: &Path, members: &[&str]) -> FileGroup {
        FileGroup {
            group_name: "s_1_1_ACTTGA.fastq.gz".to_string(),
            output_path: dir.join("all/s_1_1_ACTTGA.fastq.gz"),
            sample_name: "s1".to_string(),
            lane: 1,
            read: 1,
            barcode: "ACTTGA".to_string(),
            member_files: members
                .iter()
                .enumerate()
                .map(|(i, m)| FileRecord {
                    base_name: m.to_string(),
                    full_path: dir.join(m),
                    sample_name: "s1".to_string(),
                    barcode: "ACTTGA".to_string(),
                    lane: 1,
                    read: 1,
                    tile_set: i + 1,
                })
                .collect(),
        }
    }

    #[test]
    fn cat_then_filter() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("all"))?;
        let members = ["s1_ACTTGA_L001_R1_001.fastq.gz", "s1_ACTTGA_L001_R1_002.fastq.gz"];
        write_gz(&dir.path().join(members[0]), &(record(0, 'N') + &record(1, 'Y')))?;
        write_gz(&dir.path().join(members[1]), &record(2, 'N'))?;

        let shell = Shell::new(false);
        let groups = vec![group_of(dir.path(), &members)];
        cat_files(&groups, &shell)?;

        let filter_dir = dir.path().join("all/filter");
        let filtered = filter_fastq_files(groups.clone(), &filter_dir, &shell)?;
        assert_eq!(filtered[0].output_path, filter_dir.join("s_1_1_ACTTGA.fastq.gz"));
        // combined file is left in place
        assert!(groups[0].output_path.exists());

        let mut text = String::new();
        open_with_gz(&filtered[0].output_path)?.read_to_string(&mut text)?;
        assert_eq!(text, record(0, 'N') + &record(2, 'N'));
        Ok(())
    }

    #[test]
    fn dry_run_logs_commands_only() -> Result<()> {
        let dir = PathBuf::from("/run");
        let shell = Shell::new(true);
        let groups = vec![group_of(&dir, &["a_ACTTGA_L001_R1_001.fastq.gz"])];
        cat_files(&groups, &shell)?;
        let filtered = filter_fastq_files(groups, Path::new("/run/all/filter"), &shell)?;
        assert_eq!(filtered[0].output_path, PathBuf::from("/run/all/filter/s_1_1_ACTTGA.fastq.gz"));

        let lines = shell.transcript().lines();
        assert!(lines.contains(
            &"cat /run/a_ACTTGA_L001_R1_001.fastq.gz > /run/all/s_1_1_ACTTGA.fastq.gz".to_string()
        ));
        assert!(lines.contains(
            &"zcat /run/all/s_1_1_ACTTGA.fastq.gz | fastq_filter | gzip -c \
              > /run/all/filter/s_1_1_ACTTGA.fastq.gz"
                .to_string()
        ));
        Ok(())
    }
}
