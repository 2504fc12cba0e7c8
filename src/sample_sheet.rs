// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Reader for the sectioned `SampleSheet.csv` written for bcl2fastq / MiSeq runs.
//! Only the `[Header]` and `[Data]` sections are interpreted.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// One row of the `[Data]` section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleSheetRow {
    /// 1-based position in the `[Data]` section, i.e. the `S<n>` number of its files
    pub number: usize,
    pub fields: BTreeMap<String, String>,
}

impl SampleSheetRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Name used by bcl2fastq for the sample's files: `Sample_Name`, or
    /// `Sample_ID` when no name is given.
    pub fn name(&self) -> Option<&str> {
        self.get("Sample_Name").or_else(|| self.get("Sample_ID"))
    }

    pub fn index(&self) -> Option<&str> {
        self.get("index")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleSheet {
    pub header: BTreeMap<String, String>,
    pub samples: Vec<SampleSheetRow>,
}

impl SampleSheet {
    pub fn from_path(path: impl AsRef<Path>) -> Result<SampleSheet> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("ERROR: no SampleSheet.csv file found at {:?}", path))?;
        if text.trim().is_empty() {
            bail!("ERROR: no sample sheet data in {:?}", path);
        }
        SampleSheet::parse(&text).with_context(|| format!("error parsing sample sheet {:?}", path))
    }

    pub fn parse(text: &str) -> Result<SampleSheet> {
        let mut header = BTreeMap::new();
        for line in section("Header", text) {
            let mut kv = line.split(',');
            if let Some(key) = kv.next().filter(|k| !k.is_empty()) {
                header.insert(key.to_string(), kv.next().unwrap_or("").to_string());
            }
        }

        let data = section("Data", text).join("\n");
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(data.as_bytes());
        let titles = rdr.headers()?.clone();

        let mut samples = Vec::new();
        for (idx, record) in rdr.records().enumerate() {
            let record = record?;
            let fields = titles
                .iter()
                .zip(record.iter())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            samples.push(SampleSheetRow {
                number: idx + 1,
                fields,
            });
        }

        Ok(SampleSheet { header, samples })
    }

    /// Row for the 1-based sample number `n`.
    pub fn sample(&self, n: usize) -> Option<&SampleSheetRow> {
        n.checked_sub(1).and_then(|i| self.samples.get(i))
    }
}

/// Lines after a `[name]` marker, up to the first blank line or next section.
fn section<'a>(name: &str, text: &'a str) -> Vec<&'a str> {
    let marker = format!("[{}]", name);
    text.lines()
        .map(|l| l.trim_end_matches('\r'))
        .skip_while(|l| !l.contains(&marker))
        .skip(1)
        .take_while(|l| !l.trim_matches(',').trim().is_empty() && !l.starts_with('['))
        .collect()
}
