use crate::error::{Error, Result};
use crate::index::{self, FileIndex, MessageRecord, VariableKey, DEFAULT_INDEXPATH};
use crate::indexing::{
    outer_select, ArrayData, BackendArray, DType, LazilyIndexedArray, ResolvedIndex,
};
use crate::locks::{ensure_lock, StoreLock};
use crate::metadata::{AttributeValue, Attributes, DatasetEncoding, Variable, VariableData};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// A fully parsed GRIB2 file over a buffered reader.
pub type RawGrib = grib::Grib2<grib::SeekableGrib2Reader<BufReader<File>>>;

/// Attribute and coordinate groups encoded onto variables at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncodeCf {
    Parameter,
    Time,
    Geography,
    Vertical,
}

impl EncodeCf {
    pub fn all() -> BTreeSet<EncodeCf> {
        [
            EncodeCf::Parameter,
            EncodeCf::Time,
            EncodeCf::Geography,
            EncodeCf::Vertical,
        ]
        .into()
    }
}

impl FromStr for EncodeCf {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "parameter" => Ok(EncodeCf::Parameter),
            "time" => Ok(EncodeCf::Time),
            "geography" => Ok(EncodeCf::Geography),
            "vertical" => Ok(EncodeCf::Vertical),
            other => Err(Error::UnknownEncodeCf(other.to_string())),
        }
    }
}

/// Store-level knobs, the subset of the open options the store itself
/// consumes.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Lock serializing decode calls; `None` uses the process-wide default.
    pub lock: Option<StoreLock>,
    /// Index cache path template; empty disables caching.
    pub indexpath: String,
    pub filter_by_keys: BTreeMap<String, String>,
    /// Extra GRIB keys surfaced as `GRIB_*` variable attributes.
    pub read_keys: Vec<String>,
    /// Drop length-one level axes.
    pub squeeze: bool,
    /// Names for the (reference time, forecast period) dimension pair.
    pub time_dims: (String, String),
    pub encode_cf: BTreeSet<EncodeCf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock: None,
            indexpath: DEFAULT_INDEXPATH.to_string(),
            filter_by_keys: BTreeMap::new(),
            read_keys: Vec::new(),
            squeeze: true,
            time_dims: ("time".to_string(), "step".to_string()),
            encode_cf: EncodeCf::all(),
        }
    }
}

/// The open file behind a store: the parsed GRIB wrapped in a mutex so the
/// store can be shared across threads, with `None` modeling the closed
/// state.
pub struct GribFileHandle {
    path: PathBuf,
    grib: Mutex<Option<RawGrib>>,
}

impl GribFileHandle {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let grib = grib::from_reader(BufReader::new(file))?;
        Ok(Self {
            path: path.to_path_buf(),
            grib: Mutex::new(Some(grib)),
        })
    }

    /// Runs `f` against the parsed file, or fails with [`Error::FileClosed`]
    /// after [`close`](Self::close).
    fn with_grib<T>(&self, f: impl FnOnce(&RawGrib) -> Result<T>) -> Result<T> {
        let guard = self.grib.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(grib) => f(grib),
            None => Err(Error::FileClosed),
        }
    }

    /// Drops the parsed file and the OS handle. Idempotent.
    fn close(&self) {
        let mut guard = self.grib.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    fn is_closed(&self) -> bool {
        self.grib
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for GribFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GribFileHandle")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// How one variable's messages map onto its array shape.
#[derive(Debug, Clone)]
struct VariableLayout {
    /// One message per leading (step, level) position, row-major.
    messages: Vec<(usize, usize)>,
    /// Full shape, leading axes then grid axes.
    shape: Vec<usize>,
    /// Number of trailing grid axes (2 for a shaped grid, 1 for a flat
    /// point list).
    grid_ndim: usize,
    /// Points per message.
    grid_len: usize,
}

impl VariableLayout {
    fn lead_shape(&self) -> &[usize] {
        &self.shape[..self.shape.len() - self.grid_ndim]
    }

    fn grid_shape(&self) -> &[usize] {
        &self.shape[self.shape.len() - self.grid_ndim..]
    }
}

/// The per-variable array backend: finds the message for each requested
/// leading position, decodes it, and gathers the requested grid points.
///
/// Every read takes the store lock for its whole duration, then the handle
/// mutex. Nothing is cached between reads.
#[derive(Debug)]
pub struct GribArrayWrapper {
    handle: Arc<GribFileHandle>,
    lock: StoreLock,
    layout: VariableLayout,
}

impl BackendArray for GribArrayWrapper {
    fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    fn dtype(&self) -> DType {
        DType::F32
    }

    fn read(&self, key: &ResolvedIndex) -> Result<ArrayData> {
        let lead = self.layout.lead_shape().len();
        let lead_key = ResolvedIndex {
            dims: key.dims[..lead].to_vec(),
        };
        let grid_key = ResolvedIndex {
            dims: key.dims[lead..].to_vec(),
        };

        let _guard = self.lock.acquire();
        self.handle.with_grib(|grib| {
            let mut out = Vec::new();
            for slot in lead_slots(self.layout.lead_shape(), &lead_key) {
                let target = self.layout.messages[slot];
                let (_, submessage) = grib
                    .iter()
                    .find(|(index, _)| *index == target)
                    .ok_or(Error::MessageVanished(target.0, target.1))?;
                let decoder = grib::Grib2SubmessageDecoder::from(submessage)?;
                let values: Vec<f64> = decoder.dispatch()?.map(f64::from).collect();
                if values.len() != self.layout.grid_len {
                    return Err(Error::DecodedShapeMismatch {
                        message: target,
                        got: values.len(),
                        expected: self.layout.grid_len,
                    });
                }
                let (_, picked) = outer_select(self.layout.grid_shape(), &values, &grid_key);
                out.extend(picked);
            }
            Ok(ArrayData::new(key.result_shape(), DType::F32, out))
        })
    }
}

/// Flat offsets into the leading message table selected by `key`, in
/// row-major order of the selection.
fn lead_slots(lead_shape: &[usize], key: &ResolvedIndex) -> Vec<usize> {
    let mut strides = vec![1usize; lead_shape.len()];
    for axis in (0..lead_shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * lead_shape[axis + 1];
    }

    let lists: Vec<Vec<usize>> = key
        .dims
        .iter()
        .map(|d| match d {
            crate::indexing::DimSelection::Scalar(i) => vec![*i],
            crate::indexing::DimSelection::Many(list) => list.clone(),
        })
        .collect();

    let total: usize = lists.iter().map(|l| l.len()).product();
    let mut slots = Vec::with_capacity(total);
    let mut cursor = vec![0usize; lists.len()];
    for _ in 0..total {
        let offset: usize = cursor
            .iter()
            .zip(&lists)
            .zip(&strides)
            .map(|((&c, list), stride)| list[c] * stride)
            .sum();
        slots.push(offset);

        for axis in (0..cursor.len()).rev() {
            cursor[axis] += 1;
            if cursor[axis] < lists[axis].len() {
                break;
            }
            cursor[axis] = 0;
        }
    }
    slots
}

/// A read-only store over one GRIB2 file.
///
/// Opening scans (or loads a cached index of) the file, groups messages
/// into variables, and builds all coordinates and attributes up front;
/// afterwards only [`BackendArray::read`] touches the file again. The store
/// is cheap to clone and safe to share; clones close together.
#[derive(Debug, Clone)]
pub struct GribDataStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    path: PathBuf,
    handle: Arc<GribFileHandle>,
    lock: StoreLock,
    variables: BTreeMap<String, Variable>,
    attrs: Attributes,
    coord_names: BTreeSet<String>,
    dim_sizes: BTreeMap<String, usize>,
    unlimited: BTreeSet<String>,
}

impl GribDataStore {
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let lock = ensure_lock(config.lock.clone());
        let handle = Arc::new(GribFileHandle::open(path)?);
        let (source_len, source_mtime) = index::source_signature(path)?;

        for key in &config.read_keys {
            if !index::is_known_key(key) {
                return Err(Error::UnsupportedKey(key.clone()));
            }
        }

        let cache = index::cache_path(&config.indexpath, path, source_len, source_mtime);
        let mut file_index = match cache
            .as_deref()
            .and_then(|p| FileIndex::load(p, source_len, source_mtime))
        {
            Some(loaded) => loaded,
            None => {
                let _guard = lock.acquire();
                let scanned =
                    handle.with_grib(|grib| Ok(FileIndex::scan(grib, source_len, source_mtime)))?;
                if let Some(p) = &cache {
                    scanned.save(p);
                }
                scanned
            }
        };
        file_index.apply_filters(&config.filter_by_keys)?;
        if file_index.records.is_empty() {
            return Err(Error::EmptyDataset);
        }
        debug!(path = %path.display(), messages = file_index.records.len(), "opened GRIB store");

        let parts = build_parts(&handle, &lock, &file_index, &config, path)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                path: path.to_path_buf(),
                handle,
                lock,
                variables: parts.variables,
                attrs: parts.attrs,
                coord_names: parts.coord_names,
                dim_sizes: parts.dim_sizes,
                unlimited: parts.unlimited,
            }),
        })
    }

    pub fn get_variables(&self) -> BTreeMap<String, Variable> {
        self.inner.variables.clone()
    }

    pub fn get_attrs(&self) -> Attributes {
        self.inner.attrs.clone()
    }

    /// Dimension name to size; record dimensions report `None`.
    pub fn get_dimensions(&self) -> BTreeMap<String, Option<u64>> {
        self.inner
            .dim_sizes
            .iter()
            .map(|(name, &size)| {
                let size = if self.inner.unlimited.contains(name) {
                    None
                } else {
                    Some(size as u64)
                };
                (name.clone(), size)
            })
            .collect()
    }

    pub fn get_encoding(&self) -> DatasetEncoding {
        DatasetEncoding {
            unlimited_dims: self.inner.unlimited.clone(),
            source: self.inner.path.to_string_lossy().into_owned(),
        }
    }

    /// Variables and global attributes in one call.
    pub fn load(&self) -> (BTreeMap<String, Variable>, Attributes) {
        (self.get_variables(), self.get_attrs())
    }

    pub fn coord_names(&self) -> &BTreeSet<String> {
        &self.inner.coord_names
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn lock(&self) -> &StoreLock {
        &self.inner.lock
    }

    /// Releases the underlying file. Later reads through any lazy variable
    /// of this store fail with [`Error::FileClosed`]. Idempotent.
    pub fn close(&self) {
        self.inner.handle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.handle.is_closed()
    }
}

/// One step×level hypercube of messages sharing a variable identity.
#[derive(Debug, Clone)]
struct Cube {
    steps: Vec<f64>,
    levels: Vec<f64>,
    messages: Vec<(usize, usize)>,
    sample: MessageRecord,
}

/// Arranges records into a complete step×level cube, or `None` when the
/// combination is ragged (missing cells, duplicates, or a mix of leveled
/// and unleveled messages).
fn try_cube(records: &[MessageRecord]) -> Option<Cube> {
    let mut steps: Vec<f64> = records
        .iter()
        .map(|r| r.step_hours.unwrap_or(0.0))
        .collect();
    steps.sort_by(f64::total_cmp);
    steps.dedup();

    let with_level = records.iter().filter(|r| r.level_value.is_some()).count();
    if with_level != 0 && with_level != records.len() {
        return None;
    }
    let mut levels: Vec<f64> = records.iter().filter_map(|r| r.level_value).collect();
    levels.sort_by(f64::total_cmp);
    levels.dedup();

    let nlev = levels.len().max(1);
    let mut cells: Vec<Option<(usize, usize)>> = vec![None; steps.len() * nlev];
    for rec in records {
        let step = rec.step_hours.unwrap_or(0.0);
        let si = steps.iter().position(|s| *s == step)?;
        let li = match rec.level_value {
            Some(level) => levels.iter().position(|l| *l == level)?,
            None => 0,
        };
        let cell = &mut cells[si * nlev + li];
        if cell.is_some() {
            return None;
        }
        *cell = Some(rec.message_index);
    }

    let messages: Option<Vec<_>> = cells.into_iter().collect();
    Some(Cube {
        steps,
        levels,
        messages: messages?,
        sample: records[0].clone(),
    })
}

/// Splits a ragged group into one single-level cube per level, dropping
/// duplicate steps within a level.
fn split_into_cubes(records: Vec<MessageRecord>) -> Vec<Cube> {
    if let Some(cube) = try_cube(&records) {
        return vec![cube];
    }

    let mut by_level: BTreeMap<u64, Vec<MessageRecord>> = BTreeMap::new();
    for rec in records {
        by_level
            .entry(rec.level_value.unwrap_or(f64::NAN).to_bits())
            .or_default()
            .push(rec);
    }

    let mut cubes = Vec::new();
    for (_, mut group) in by_level {
        group.sort_by(|a, b| {
            a.step_hours
                .unwrap_or(0.0)
                .total_cmp(&b.step_hours.unwrap_or(0.0))
        });
        let mut steps = Vec::new();
        let mut messages = Vec::new();
        for rec in &group {
            let step = rec.step_hours.unwrap_or(0.0);
            if steps.last() == Some(&step) {
                warn!(
                    message = ?rec.message_index,
                    step,
                    "skipping duplicate message for an already seen step"
                );
                continue;
            }
            steps.push(step);
            messages.push(rec.message_index);
        }
        let levels = group[0].level_value.map(|l| vec![l]).unwrap_or_default();
        cubes.push(Cube {
            steps,
            levels,
            messages,
            sample: group[0].clone(),
        });
    }
    cubes
}

/// Hands out dimension names, reusing a name only when the claimed axis
/// values (or plain size) match what the name already stands for.
#[derive(Debug, Default)]
struct DimRegistry {
    sizes: BTreeMap<String, usize>,
    axes: BTreeMap<String, Vec<f64>>,
}

impl DimRegistry {
    /// Claims a dimension carrying coordinate values. Returns the assigned
    /// name and whether it is newly created.
    fn claim_axis(&mut self, base: &str, values: &[f64]) -> (String, bool) {
        for name in candidate_names(base) {
            match self.axes.get(&name) {
                None if !self.sizes.contains_key(&name) => {
                    self.sizes.insert(name.clone(), values.len());
                    self.axes.insert(name.clone(), values.to_vec());
                    return (name, true);
                }
                Some(existing) if existing == values => return (name, false),
                _ => continue,
            }
        }
        unreachable!("candidate_names is unbounded")
    }

    /// Claims a plain (coordinate-free) dimension by size.
    fn claim_plain(&mut self, base: &str, size: usize) -> (String, bool) {
        for name in candidate_names(base) {
            if self.axes.contains_key(&name) {
                continue;
            }
            match self.sizes.get(&name) {
                None => {
                    self.sizes.insert(name.clone(), size);
                    return (name, true);
                }
                Some(&existing) if existing == size => return (name, false),
                Some(_) => continue,
            }
        }
        unreachable!("candidate_names is unbounded")
    }
}

fn candidate_names(base: &str) -> impl Iterator<Item = String> + '_ {
    (1usize..).map(move |n| {
        if n == 1 {
            base.to_string()
        } else {
            format!("{base}_{n}")
        }
    })
}

struct DatasetParts {
    variables: BTreeMap<String, Variable>,
    attrs: Attributes,
    coord_names: BTreeSet<String>,
    dim_sizes: BTreeMap<String, usize>,
    unlimited: BTreeSet<String>,
}

fn eager_coord(name: &str, values: Vec<f64>, attributes: Attributes) -> Variable {
    let len = values.len();
    Variable {
        dimensions: vec![name.to_string()],
        data: VariableData::Eager(ArrayData::new(vec![len], DType::F64, values)),
        attributes,
        encoding: Attributes::new(),
    }
}

fn attrs_of(pairs: &[(&str, AttributeValue)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Builds every variable, coordinate, and attribute for the dataset in one
/// pass over the grouped index.
fn build_parts(
    handle: &Arc<GribFileHandle>,
    lock: &StoreLock,
    file_index: &FileIndex,
    config: &StoreConfig,
    path: &Path,
) -> Result<DatasetParts> {
    let mut groups: BTreeMap<VariableKey, Vec<MessageRecord>> = BTreeMap::new();
    for rec in &file_index.records {
        groups.entry(rec.variable_key()).or_default().push(rec.clone());
    }

    let mut registry = DimRegistry::default();
    let mut variables: BTreeMap<String, Variable> = BTreeMap::new();
    let mut coord_names = BTreeSet::new();
    let mut unlimited = BTreeSet::new();

    let step_base = config.time_dims.1.as_str();

    for (_, records) in groups {
        for cube in split_into_cubes(records) {
            let sample = &cube.sample;

            // Forecast-period axis, never squeezed.
            let (step_dim, step_is_new) = registry.claim_axis(step_base, &cube.steps);
            unlimited.insert(step_dim.clone());
            if step_is_new && config.encode_cf.contains(&EncodeCf::Time) {
                let coord = eager_coord(
                    &step_dim,
                    cube.steps.clone(),
                    attrs_of(&[
                        ("units", AttributeValue::String("hours".to_string())),
                        (
                            "standard_name",
                            AttributeValue::String("forecast_period".to_string()),
                        ),
                        (
                            "long_name",
                            AttributeValue::String(
                                "time since forecast_reference_time".to_string(),
                            ),
                        ),
                    ]),
                );
                coord_names.insert(step_dim.clone());
                variables.insert(step_dim.clone(), coord);
            }

            let mut dimensions = vec![step_dim];
            let mut shape = vec![cube.steps.len()];

            // Level axis, dropped when length one and squeezing.
            let keep_level_axis =
                cube.levels.len() > 1 || (cube.levels.len() == 1 && !config.squeeze);
            if keep_level_axis {
                let (level_dim, level_is_new) = registry.claim_axis("level", &cube.levels);
                if level_is_new && config.encode_cf.contains(&EncodeCf::Vertical) {
                    let coord = eager_coord(
                        &level_dim,
                        cube.levels.clone(),
                        level_coord_attrs(sample.level_type),
                    );
                    coord_names.insert(level_dim.clone());
                    variables.insert(level_dim.clone(), coord);
                }
                dimensions.push(level_dim);
                shape.push(cube.levels.len());
            }
            let lead_len = shape.len();

            // Grid axes. The registry reuses a name only when the claimed
            // coordinate values match, so equal-shape grids with different
            // origins end up on separate dimensions.
            let grid_dims = resolve_grid_dims(
                handle,
                lock,
                sample,
                config,
                &mut registry,
                &mut variables,
                &mut coord_names,
            )?;
            for dim in &grid_dims {
                dimensions.push(dim.clone());
                shape.push(registry.sizes[dim]);
            }

            let layout = VariableLayout {
                messages: cube.messages.clone(),
                grid_ndim: grid_dims.len(),
                grid_len: shape[lead_len..].iter().product(),
                shape,
            };
            let wrapper = Arc::new(GribArrayWrapper {
                handle: Arc::clone(handle),
                lock: lock.clone(),
                layout,
            });

            let name = claim_variable_name(&variables, &cube.sample.short_name());
            let attributes = variable_attrs(&cube, config)?;
            let mut encoding = Attributes::new();
            encoding.insert(
                "source".to_string(),
                AttributeValue::String(path.to_string_lossy().into_owned()),
            );
            encoding.insert(
                "dtype".to_string(),
                AttributeValue::String(DType::F32.name().to_string()),
            );
            encoding.insert(
                "original_shape".to_string(),
                AttributeValue::Array(
                    wrapper
                        .layout
                        .shape
                        .iter()
                        .map(|&s| AttributeValue::Integer(s as i64))
                        .collect(),
                ),
            );

            variables.insert(
                name,
                Variable {
                    dimensions,
                    data: VariableData::Lazy(LazilyIndexedArray::new(wrapper)),
                    attributes,
                    encoding,
                },
            );
        }
    }

    let mut attrs = Attributes::new();
    attrs.insert(
        "Conventions".to_string(),
        AttributeValue::String("CF-1.7".to_string()),
    );
    attrs.insert("GRIB_edition".to_string(), AttributeValue::Integer(2));
    attrs.insert(
        "history".to_string(),
        AttributeValue::String(format!(
            "opened with grib-store {}",
            env!("CARGO_PKG_VERSION")
        )),
    );

    Ok(DatasetParts {
        variables,
        attrs,
        coord_names,
        dim_sizes: registry.sizes,
        unlimited,
    })
}

fn claim_variable_name(variables: &BTreeMap<String, Variable>, base: &str) -> String {
    for name in candidate_names(base) {
        if !variables.contains_key(&name) {
            return name;
        }
    }
    unreachable!("candidate_names is unbounded")
}

fn level_coord_attrs(level_type: Option<u8>) -> Attributes {
    use grib::codetables::{CodeTable4_5, Lookup};

    let mut attrs = Attributes::new();
    if let Some(t) = level_type {
        attrs.insert(
            "long_name".to_string(),
            AttributeValue::String(CodeTable4_5.lookup(usize::from(t)).to_string()),
        );
        if let Some(unit) = grib::FixedSurface::new(t, 0, 0).unit() {
            attrs.insert(
                "units".to_string(),
                AttributeValue::String(unit.to_string()),
            );
        }
        attrs.insert(
            "GRIB_typeOfFirstFixedSurface".to_string(),
            AttributeValue::Integer(i64::from(t)),
        );
    }
    attrs
}

fn variable_attrs(cube: &Cube, config: &StoreConfig) -> Result<Attributes> {
    let sample = &cube.sample;
    let mut attrs = Attributes::new();

    if config.encode_cf.contains(&EncodeCf::Parameter) {
        if let Some(name) = &sample.parameter_name {
            attrs.insert(
                "long_name".to_string(),
                AttributeValue::String(name.clone()),
            );
        }
        attrs.insert(
            "GRIB_discipline".to_string(),
            AttributeValue::Integer(i64::from(sample.discipline)),
        );
        if let Some(v) = sample.parameter_category {
            attrs.insert(
                "GRIB_parameterCategory".to_string(),
                AttributeValue::Integer(i64::from(v)),
            );
        }
        if let Some(v) = sample.parameter_number {
            attrs.insert(
                "GRIB_parameterNumber".to_string(),
                AttributeValue::Integer(i64::from(v)),
            );
        }
    }

    if config.encode_cf.contains(&EncodeCf::Vertical) {
        if let Some(t) = sample.level_type {
            attrs.insert(
                "GRIB_typeOfFirstFixedSurface".to_string(),
                AttributeValue::Integer(i64::from(t)),
            );
        }
        // A squeezed single level survives as an attribute.
        if cube.levels.len() == 1 && config.squeeze {
            attrs.insert(
                "GRIB_level".to_string(),
                AttributeValue::Number(cube.levels[0]),
            );
        }
    }

    for key in &config.read_keys {
        if let Some(value) = sample.key_value(key) {
            attrs.insert(format!("GRIB_{key}"), value);
        }
    }

    Ok(attrs)
}

/// Claims the grid dimensions for a message's grid, materializing 1-D
/// latitude/longitude coordinates when the grid is regular and geography
/// encoding is on.
fn resolve_grid_dims(
    handle: &Arc<GribFileHandle>,
    lock: &StoreLock,
    sample: &MessageRecord,
    config: &StoreConfig,
    registry: &mut DimRegistry,
    variables: &mut BTreeMap<String, Variable>,
    coord_names: &mut BTreeSet<String>,
) -> Result<Vec<String>> {
    let (Some(ni), Some(nj)) = (sample.grid_ni, sample.grid_nj) else {
        let (dim, _) = registry.claim_plain("values", sample.num_points as usize);
        return Ok(vec![dim]);
    };

    let coords = {
        let _guard = lock.acquire();
        handle.with_grib(|grib| {
            let target = sample.message_index;
            let (_, submessage) = grib
                .iter()
                .find(|(index, _)| *index == target)
                .ok_or(Error::MessageVanished(target.0, target.1))?;
            Ok(submessage
                .latlons()
                .ok()
                .and_then(|iter| regular_latlon_axes(iter.collect(), ni, nj)))
        })?
    };

    match coords {
        Some((lats, lons)) => {
            let (lat_dim, lat_is_new) = registry.claim_axis("latitude", &lats);
            let (lon_dim, lon_is_new) = registry.claim_axis("longitude", &lons);
            if config.encode_cf.contains(&EncodeCf::Geography) {
                if lat_is_new {
                    let coord = eager_coord(
                        &lat_dim,
                        lats,
                        attrs_of(&[
                            (
                                "units",
                                AttributeValue::String("degrees_north".to_string()),
                            ),
                            (
                                "standard_name",
                                AttributeValue::String("latitude".to_string()),
                            ),
                        ]),
                    );
                    coord_names.insert(lat_dim.clone());
                    variables.insert(lat_dim.clone(), coord);
                }
                if lon_is_new {
                    let coord = eager_coord(
                        &lon_dim,
                        lons,
                        attrs_of(&[
                            (
                                "units",
                                AttributeValue::String("degrees_east".to_string()),
                            ),
                            (
                                "standard_name",
                                AttributeValue::String("longitude".to_string()),
                            ),
                        ]),
                    );
                    coord_names.insert(lon_dim.clone());
                    variables.insert(lon_dim.clone(), coord);
                }
            }
            Ok(vec![lat_dim, lon_dim])
        }
        None => {
            let (y, _) = registry.claim_plain("y", nj);
            let (x, _) = registry.claim_plain("x", ni);
            Ok(vec![y, x])
        }
    }
}

/// Extracts 1-D latitude/longitude axes from a scanned point list, or
/// `None` when the grid is not rectilinear in scanning order.
fn regular_latlon_axes(
    points: Vec<(f32, f32)>,
    ni: usize,
    nj: usize,
) -> Option<(Vec<f64>, Vec<f64>)> {
    if ni == 0 || nj == 0 || points.len() != ni * nj {
        return None;
    }
    // Each row must repeat the same longitudes and hold latitude constant.
    for j in 0..nj {
        let row = &points[j * ni..(j + 1) * ni];
        if row.iter().any(|p| p.0 != row[0].0) {
            return None;
        }
        if row.iter().zip(&points[..ni]).any(|(p, q)| p.1 != q.1) {
            return None;
        }
    }
    let lats = (0..nj).map(|j| f64::from(points[j * ni].0)).collect();
    let lons = (0..ni).map(|i| f64::from(points[i].1)).collect();
    Some((lats, lons))
}
