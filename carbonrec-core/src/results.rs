//! CSV result accumulation.
//!
//! Each run produces one flat record that is appended to a per-pair CSV file.
//! The header row is written only when the file is created.

use crate::error::{CarbonError, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An ordered key/value record. Keys keep their first insertion position.
///
/// Serializes as a map; deserializing keeps the source map's key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRecord {
    entries: Vec<(String, Value)>,
}

impl ResultRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tag the record with the emissions run id and the project name.
    pub fn with_run(self, run_id: &str, project_name: &str) -> Self {
        self.with("run_id", run_id).with("project_name", project_name)
    }

    /// Build a record from a JSON object, keeping the object's iteration order.
    pub fn from_json_object(map: &serde_json::Map<String, Value>) -> Self {
        map.iter().fold(Self::new(), |rec, (k, v)| rec.with(k.clone(), v.clone()))
    }

    fn header(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    fn row(&self) -> Vec<String> {
        self.entries.iter().map(|(_, v)| render_cell(v)).collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ResultRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |rec, (k, v)| rec.with(k, v))
    }
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResultRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = ResultRecord;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of result fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ResultRecord, A::Error> {
                let mut record = ResultRecord::new();
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    record.insert(k, v);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// Render a value as a single CSV cell.
fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Append `record` to the CSV file at `path`.
///
/// A missing file is created with a header row of the record's keys. An
/// existing file only gets a values row; its header is not checked.
pub fn append_record(path: &Path, record: &ResultRecord) -> Result<()> {
    let fresh = !path.is_file();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if fresh {
        writer.write_record(record.header())?;
    }
    writer.write_record(record.row())?;
    writer.flush()?;
    debug!(path = %path.display(), fresh, fields = record.len(), "Appended result record");
    Ok(())
}

/// Appender that remembers the header written for each path and refuses
/// records whose key set differs from it.
#[derive(Debug, Default)]
pub struct ResultLog {
    headers: HashMap<PathBuf, Vec<String>>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, path: &Path, record: &ResultRecord) -> Result<()> {
        let found = record.header();
        let expected = match self.headers.get(path) {
            Some(h) => Some(h.clone()),
            None if path.is_file() => read_header(path)?,
            None => None,
        };
        if let Some(expected) = expected {
            if expected != found {
                return Err(CarbonError::HeaderMismatch {
                    path: path.to_path_buf(),
                    expected,
                    found,
                });
            }
        }
        append_record(path, record)?;
        self.headers.insert(path.to_path_buf(), found);
        Ok(())
    }
}

fn read_header(path: &Path) -> Result<Option<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    match reader.records().next() {
        Some(row) => Ok(Some(row?.iter().map(str::to_string).collect())),
        None => Ok(None),
    }
}
