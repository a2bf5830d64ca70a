use crate::error::{Error, Result};
use crate::metadata::AttributeValue;
use grib::codetables::grib2::Table4_4;
use grib::codetables::{Code, CodeTable4_2, ConversionError, Lookup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Bumped whenever the on-disk index layout changes; caches written by an
/// older build are ignored and rebuilt.
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Default template for the index cache path, expanded next to the source
/// file. An empty template disables caching entirely.
pub const DEFAULT_INDEXPATH: &str = "{path}.{short_hash}.idx";

/// Metadata extracted from one GRIB2 submessage during the scan pass.
///
/// Everything needed to group messages into variables, filter them by key,
/// and locate the message again for decoding lives here, so reopening a file
/// with a warm cache skips the header walk entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Position of the submessage within the file, as reported by the
    /// message iterator.
    pub message_index: (usize, usize),
    pub discipline: u8,
    pub parameter_category: Option<u8>,
    pub parameter_number: Option<u8>,
    /// WMO description of the parameter, when the code tables know it.
    pub parameter_name: Option<String>,
    pub generating_process: Option<u8>,
    /// Forecast period in the unit the file declares.
    pub forecast_time: Option<u32>,
    /// Forecast period converted to hours. `None` when the declared unit
    /// has no fixed hour equivalent (months, years, reserved codes).
    pub step_hours: Option<f64>,
    pub step_unit: Option<String>,
    /// First fixed surface type, skipping the "missing" code 255.
    pub level_type: Option<u8>,
    pub level_value: Option<f64>,
    pub grid_ni: Option<usize>,
    pub grid_nj: Option<usize>,
    pub num_points: u32,
}

/// Identity under which messages are grouped into a single variable: same
/// parameter, same kind of level, same grid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VariableKey {
    pub discipline: u8,
    pub parameter_category: Option<u8>,
    pub parameter_number: Option<u8>,
    pub level_type: Option<u8>,
    pub grid_ni: Option<usize>,
    pub grid_nj: Option<usize>,
}

/// Keys accepted in `filter_by_keys` and `read_keys`. Anything else is
/// rejected with [`Error::UnsupportedKey`] rather than silently matching
/// nothing.
pub const KNOWN_KEYS: &[&str] = &[
    "discipline",
    "parameterCategory",
    "parameterNumber",
    "shortName",
    "name",
    "generatingProcessIdentifier",
    "forecastTime",
    "step",
    "stepUnits",
    "typeOfFirstFixedSurface",
    "level",
    "Ni",
    "Nj",
    "numberOfDataPoints",
];

pub fn is_known_key(key: &str) -> bool {
    KNOWN_KEYS.contains(&key)
}

impl MessageRecord {
    pub fn variable_key(&self) -> VariableKey {
        VariableKey {
            discipline: self.discipline,
            parameter_category: self.parameter_category,
            parameter_number: self.parameter_number,
            level_type: self.level_type,
            grid_ni: self.grid_ni,
            grid_nj: self.grid_nj,
        }
    }

    /// Identifier-safe variable name: the lowercased WMO description with
    /// runs of punctuation collapsed to `_`, or a numeric fallback when the
    /// code tables have no entry.
    pub fn short_name(&self) -> String {
        if let Some(name) = &self.parameter_name {
            let sanitized = sanitize_name(name);
            if !sanitized.is_empty() {
                return sanitized;
            }
        }
        format!(
            "param_{}_{}_{}",
            self.discipline,
            self.parameter_category.unwrap_or(255),
            self.parameter_number.unwrap_or(255)
        )
    }

    /// Looks up a GRIB key on this record. `None` means the key is known
    /// but this message carries no value for it.
    pub fn key_value(&self, key: &str) -> Option<AttributeValue> {
        use AttributeValue as A;
        match key {
            "discipline" => Some(A::Integer(i64::from(self.discipline))),
            "parameterCategory" => self.parameter_category.map(|v| A::Integer(i64::from(v))),
            "parameterNumber" => self.parameter_number.map(|v| A::Integer(i64::from(v))),
            "shortName" => Some(A::String(self.short_name())),
            "name" => self.parameter_name.clone().map(A::String),
            "generatingProcessIdentifier" => {
                self.generating_process.map(|v| A::Integer(i64::from(v)))
            }
            "forecastTime" => self.forecast_time.map(|v| A::Integer(i64::from(v))),
            "step" => self.step_hours.map(A::Number),
            "stepUnits" => self.step_unit.clone().map(A::String),
            "typeOfFirstFixedSurface" => self.level_type.map(|v| A::Integer(i64::from(v))),
            "level" => self.level_value.map(A::Number),
            "Ni" => self.grid_ni.map(|v| A::Integer(v as i64)),
            "Nj" => self.grid_nj.map(|v| A::Integer(v as i64)),
            "numberOfDataPoints" => Some(A::Integer(i64::from(self.num_points))),
            _ => None,
        }
    }

    /// Whether this record satisfies every key/value pair in `filters`.
    /// A known key the message carries no value for is a non-match; an
    /// unknown key is an error.
    pub fn matches(&self, filters: &BTreeMap<String, String>) -> Result<bool> {
        for (key, wanted) in filters {
            if !is_known_key(key) {
                return Err(Error::UnsupportedKey(key.clone()));
            }
            match self.key_value(key) {
                Some(value) => {
                    if !value_matches(&value, wanted) {
                        return Ok(false);
                    }
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }
}

fn value_matches(value: &AttributeValue, wanted: &str) -> bool {
    if let (Some(have), Ok(want)) = (value.as_f64(), wanted.parse::<f64>()) {
        return have == want;
    }
    value.to_string() == wanted
}

fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn unit_label(unit: &Code<Table4_4, u8>) -> String {
    match unit {
        Code::Name(name) => name
            .short_expr()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{name:?}")),
        Code::Num(num) => format!("code {num}"),
    }
}

/// Looks up the WMO name of a parameter in code table 4.2, or `None` when
/// the tables carry no entry for the code. Reserved codes render as empty
/// strings in the generated tables and are treated as absent too.
fn parameter_description(discipline: u8, category: u8, number: u8) -> Option<String> {
    let name = CodeTable4_2::new(discipline, category)
        .lookup(usize::from(number))
        .to_string();
    let unimplemented = ConversionError::Unimplemented(usize::from(number)).to_string();
    (!name.is_empty() && name != unimplemented).then_some(name)
}

fn hours_from(unit: &Code<Table4_4, u8>, value: u32) -> Option<f64> {
    let v = f64::from(value);
    match unit {
        Code::Name(Table4_4::Minute) => Some(v / 60.0),
        Code::Name(Table4_4::Hour) => Some(v),
        Code::Name(Table4_4::Day) => Some(v * 24.0),
        Code::Name(Table4_4::ThreeHours) => Some(v * 3.0),
        Code::Name(Table4_4::SixHours) => Some(v * 6.0),
        Code::Name(Table4_4::TwelveHours) => Some(v * 12.0),
        Code::Name(Table4_4::Second) => Some(v / 3600.0),
        _ => None,
    }
}

/// The scanned contents of one GRIB2 file, plus the source signature the
/// scan was taken against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIndex {
    pub format_version: u32,
    pub source_len: u64,
    pub source_mtime: u64,
    pub records: Vec<MessageRecord>,
}

impl FileIndex {
    /// Walks every submessage in the file and extracts one record per
    /// message. Only headers are touched; no field data is decoded.
    pub fn scan<R>(grib: &grib::Grib2<R>, source_len: u64, source_mtime: u64) -> Self {
        let mut records = Vec::new();
        for (message_index, submessage) in grib.iter() {
            let discipline = submessage.indicator().discipline;
            let prod = submessage.prod_def();
            let parameter_category = prod.parameter_category();
            let parameter_number = prod.parameter_number();
            let parameter_name = parameter_category
                .zip(parameter_number)
                .and_then(|(c, n)| parameter_description(discipline, c, n));

            let (forecast_time, step_hours, step_unit) = match prod.forecast_time() {
                Some(ft) => (
                    Some(ft.value),
                    hours_from(&ft.unit, ft.value),
                    Some(unit_label(&ft.unit)),
                ),
                None => (None, None, None),
            };
            let (level_type, level_value) = match prod.fixed_surfaces() {
                Some((first, _)) if first.surface_type != 255 => {
                    let value = (!first.value_is_nan()).then(|| first.value());
                    (Some(first.surface_type), value)
                }
                _ => (None, None),
            };
            let grid_shape = submessage.grid_shape().ok();

            records.push(MessageRecord {
                message_index,
                discipline,
                parameter_category,
                parameter_number,
                parameter_name,
                generating_process: prod.generating_process(),
                forecast_time,
                step_hours,
                step_unit,
                level_type,
                level_value,
                grid_ni: grid_shape.map(|(ni, _)| ni),
                grid_nj: grid_shape.map(|(_, nj)| nj),
                num_points: submessage.grid_def().num_points(),
            });
        }
        Self {
            format_version: INDEX_FORMAT_VERSION,
            source_len,
            source_mtime,
            records,
        }
    }

    /// Drops every record that does not satisfy `filters`. Unknown keys
    /// abort the open instead of filtering everything out.
    pub fn apply_filters(&mut self, filters: &BTreeMap<String, String>) -> Result<()> {
        if filters.is_empty() {
            return Ok(());
        }
        let mut kept = Vec::with_capacity(self.records.len());
        for record in std::mem::take(&mut self.records) {
            if record.matches(filters)? {
                kept.push(record);
            }
        }
        self.records = kept;
        Ok(())
    }

    /// Reads a cached index, returning `None` when the cache is missing,
    /// unreadable, from another format version, or taken against a source
    /// file that has since changed.
    pub fn load(path: &Path, source_len: u64, source_mtime: u64) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        let index: FileIndex = match serde_json::from_slice(&bytes) {
            Ok(index) => index,
            Err(err) => {
                debug!(path = %path.display(), %err, "ignoring unreadable index cache");
                return None;
            }
        };
        if index.format_version != INDEX_FORMAT_VERSION
            || index.source_len != source_len
            || index.source_mtime != source_mtime
        {
            debug!(path = %path.display(), "index cache is stale, rescanning");
            return None;
        }
        debug!(path = %path.display(), records = index.records.len(), "loaded index cache");
        Some(index)
    }

    /// Writes the index cache. Failure to write is logged and otherwise
    /// ignored; the open proceeds with the in-memory index.
    pub fn save(&self, path: &Path) {
        let payload = match serde_json::to_vec(self) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(path = %path.display(), %err, "could not serialize index cache");
                return;
            }
        };
        if let Err(err) = std::fs::write(path, payload) {
            warn!(path = %path.display(), %err, "could not write index cache");
        }
    }
}

/// File length and modification time, the pair that invalidates the cache
/// when the source changes.
pub fn source_signature(path: &Path) -> Result<(u64, u64)> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok((meta.len(), mtime))
}

/// Eight hex digits derived from the source signature, embedded in the
/// cache file name so a rewritten source gets a fresh cache path.
pub fn short_hash(source_len: u64, source_mtime: u64) -> String {
    let mut hasher = DefaultHasher::new();
    source_len.hash(&mut hasher);
    source_mtime.hash(&mut hasher);
    format!("{:08x}", hasher.finish() as u32)
}

/// Expands the index-path template for a source file. An empty template
/// means caching is disabled.
pub fn cache_path(
    template: &str,
    source: &Path,
    source_len: u64,
    source_mtime: u64,
) -> Option<PathBuf> {
    if template.is_empty() {
        return None;
    }
    let expanded = template
        .replace("{path}", &source.to_string_lossy())
        .replace("{short_hash}", &short_hash(source_len, source_mtime));
    Some(PathBuf::from(expanded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MessageRecord {
        MessageRecord {
            message_index: (0, 0),
            discipline: 0,
            parameter_category: Some(0),
            parameter_number: Some(0),
            parameter_name: Some("Temperature".to_string()),
            generating_process: Some(2),
            forecast_time: Some(6),
            step_hours: Some(6.0),
            step_unit: Some("h".to_string()),
            level_type: Some(100),
            level_value: Some(85000.0),
            grid_ni: Some(4),
            grid_nj: Some(3),
            num_points: 12,
        }
    }

    #[test]
    fn test_parameter_description_lookup() {
        assert_eq!(
            parameter_description(0, 0, 0),
            Some("Temperature".to_string())
        );
        // Reserved-for-local-use codes have no table entry.
        assert_eq!(parameter_description(0, 0, 250), None);
        assert_eq!(parameter_description(200, 0, 0), None);
    }

    #[test]
    fn test_short_name_from_description() {
        let mut rec = record();
        assert_eq!(rec.short_name(), "temperature");

        rec.parameter_name = Some("u-component of wind".to_string());
        assert_eq!(rec.short_name(), "u_component_of_wind");

        rec.parameter_name = None;
        assert_eq!(rec.short_name(), "param_0_0_0");
    }

    #[test]
    fn test_matches_numeric_and_string_filters() {
        let rec = record();

        let mut filters = BTreeMap::new();
        filters.insert("level".to_string(), "85000".to_string());
        filters.insert("shortName".to_string(), "temperature".to_string());
        assert!(rec.matches(&filters).unwrap());

        filters.insert("level".to_string(), "50000".to_string());
        assert!(!rec.matches(&filters).unwrap());
    }

    #[test]
    fn test_matches_rejects_unknown_key() {
        let rec = record();
        let mut filters = BTreeMap::new();
        filters.insert("gribEdition".to_string(), "2".to_string());
        let err = rec.matches(&filters).unwrap_err();
        assert!(matches!(err, Error::UnsupportedKey(key) if key == "gribEdition"));
    }

    #[test]
    fn test_known_key_without_value_is_a_non_match() {
        let mut rec = record();
        rec.level_value = None;
        let mut filters = BTreeMap::new();
        filters.insert("level".to_string(), "85000".to_string());
        assert!(!rec.matches(&filters).unwrap());
    }

    #[test]
    fn test_apply_filters_keeps_matching_records() {
        let mut other = record();
        other.level_value = Some(50000.0);
        other.message_index = (1, 0);
        let mut index = FileIndex {
            format_version: INDEX_FORMAT_VERSION,
            source_len: 100,
            source_mtime: 200,
            records: vec![record(), other],
        };

        let mut filters = BTreeMap::new();
        filters.insert("level".to_string(), "50000".to_string());
        index.apply_filters(&filters).unwrap();
        assert_eq!(index.records.len(), 1);
        assert_eq!(index.records[0].message_index, (1, 0));
    }

    #[test]
    fn test_cache_path_expansion() {
        let path = cache_path(DEFAULT_INDEXPATH, Path::new("/data/era5.grib"), 10, 20).unwrap();
        let expected = format!("/data/era5.grib.{}.idx", short_hash(10, 20));
        assert_eq!(path, PathBuf::from(expected));

        assert!(cache_path("", Path::new("/data/era5.grib"), 10, 20).is_none());
    }

    #[test]
    fn test_short_hash_is_stable_and_signature_sensitive() {
        assert_eq!(short_hash(10, 20), short_hash(10, 20));
        assert_ne!(short_hash(10, 20), short_hash(10, 21));
        assert_eq!(short_hash(10, 20).len(), 8);
    }

    #[test]
    fn test_cache_round_trip_and_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.idx");
        let index = FileIndex {
            format_version: INDEX_FORMAT_VERSION,
            source_len: 100,
            source_mtime: 200,
            records: vec![record()],
        };

        index.save(&path);
        let loaded = FileIndex::load(&path, 100, 200).unwrap();
        assert_eq!(loaded, index);

        assert!(FileIndex::load(&path, 100, 201).is_none());
        assert!(FileIndex::load(&path, 101, 200).is_none());
        assert!(FileIndex::load(&dir.path().join("missing.idx"), 100, 200).is_none());
    }
}
