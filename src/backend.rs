use crate::cf::{decode_cf_variables, DecodeOptions};
use crate::error::{Error, Result};
use crate::locks::StoreLock;
use crate::metadata::Dataset;
use crate::store::{EncodeCf, GribDataStore, StoreConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::debug;

/// Everything [`open_dataset`] accepts: the store knobs and the CF decode
/// knobs in one bag, with builder-style setters.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub lock: Option<StoreLock>,
    pub indexpath: String,
    pub filter_by_keys: BTreeMap<String, String>,
    pub read_keys: Vec<String>,
    pub squeeze: bool,
    pub time_dims: (String, String),
    pub encode_cf: BTreeSet<EncodeCf>,
    pub mask_and_scale: bool,
    pub decode_times: bool,
    pub concat_characters: bool,
    pub decode_coords: bool,
    pub drop_variables: Vec<String>,
    pub use_cftime: Option<bool>,
    pub decode_timedelta: Option<bool>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        let store = StoreConfig::default();
        let decode = DecodeOptions::default();
        Self {
            lock: store.lock,
            indexpath: store.indexpath,
            filter_by_keys: store.filter_by_keys,
            read_keys: store.read_keys,
            squeeze: store.squeeze,
            time_dims: store.time_dims,
            encode_cf: store.encode_cf,
            mask_and_scale: decode.mask_and_scale,
            decode_times: decode.decode_times,
            concat_characters: decode.concat_characters,
            decode_coords: decode.decode_coords,
            drop_variables: decode.drop_variables,
            use_cftime: decode.use_cftime,
            decode_timedelta: decode.decode_timedelta,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(mut self, lock: StoreLock) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn indexpath(mut self, template: impl Into<String>) -> Self {
        self.indexpath = template.into();
        self
    }

    pub fn filter_by_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_by_keys.insert(key.into(), value.into());
        self
    }

    pub fn read_key(mut self, key: impl Into<String>) -> Self {
        self.read_keys.push(key.into());
        self
    }

    pub fn squeeze(mut self, squeeze: bool) -> Self {
        self.squeeze = squeeze;
        self
    }

    pub fn encode_cf(mut self, encode_cf: BTreeSet<EncodeCf>) -> Self {
        self.encode_cf = encode_cf;
        self
    }

    pub fn drop_variable(mut self, name: impl Into<String>) -> Self {
        self.drop_variables.push(name.into());
        self
    }

    pub fn mask_and_scale(mut self, on: bool) -> Self {
        self.mask_and_scale = on;
        self
    }

    pub fn decode_times(mut self, on: bool) -> Self {
        self.decode_times = on;
        self
    }

    pub fn decode_coords(mut self, on: bool) -> Self {
        self.decode_coords = on;
        self
    }

    pub fn decode_timedelta(mut self, on: bool) -> Self {
        self.decode_timedelta = Some(on);
        self
    }

    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            lock: self.lock.clone(),
            indexpath: self.indexpath.clone(),
            filter_by_keys: self.filter_by_keys.clone(),
            read_keys: self.read_keys.clone(),
            squeeze: self.squeeze,
            time_dims: self.time_dims.clone(),
            encode_cf: self.encode_cf.clone(),
        }
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            mask_and_scale: self.mask_and_scale,
            decode_times: self.decode_times,
            concat_characters: self.concat_characters,
            decode_coords: self.decode_coords,
            drop_variables: self.drop_variables.clone(),
            use_cftime: self.use_cftime,
            decode_timedelta: self.decode_timedelta,
        }
    }
}

/// Opens a GRIB2 file as a [`Dataset`].
///
/// The store is closed again if anything after the open fails, so an error
/// never leaks an OS file handle.
pub fn open_dataset(path: impl AsRef<Path>, options: OpenOptions) -> Result<Dataset> {
    let store = GribDataStore::open(path.as_ref(), options.store_config())?;
    match dataset_from_store(store.clone(), &options.decode_options()) {
        Ok(dataset) => Ok(dataset),
        Err(err) => {
            store.close();
            Err(err)
        }
    }
}

fn dataset_from_store(store: GribDataStore, decode: &DecodeOptions) -> Result<Dataset> {
    let (variables, attributes) = store.load();
    let (variables, coord_names) =
        decode_cf_variables(variables, store.coord_names().clone(), decode)?;
    let encoding = store.get_encoding();
    Ok(Dataset {
        variables,
        attributes,
        coord_names,
        encoding,
        file_handle: Some(store),
    })
}

/// A named dataset opener that can also say whether a file looks like
/// something it understands.
pub trait BackendEntrypoint: Send + Sync {
    fn guess_can_open(&self, path: &Path) -> bool;
    fn open_dataset(&self, path: &Path, options: OpenOptions) -> Result<Dataset>;
    fn description(&self) -> &str {
        ""
    }
}

/// The GRIB entrypoint: recognizes files by the `GRIB` magic or by
/// extension when the file cannot be read.
pub struct GribBackendEntrypoint;

impl BackendEntrypoint for GribBackendEntrypoint {
    fn guess_can_open(&self, path: &Path) -> bool {
        if let Some(magic) = read_magic(path) {
            return &magic == b"GRIB";
        }
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("grib" | "grib2" | "grb" | "grb2")
        )
    }

    fn open_dataset(&self, path: &Path, options: OpenOptions) -> Result<Dataset> {
        open_dataset(path, options)
    }

    fn description(&self) -> &str {
        "Open GRIB2 files"
    }
}

fn read_magic(path: &Path) -> Option<[u8; 4]> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path).ok()?;
    file.read_exact(&mut magic).ok()?;
    Some(magic)
}

type Registry = BTreeMap<String, Arc<dyn BackendEntrypoint>>;

static BACKENDS: LazyLock<RwLock<Registry>> = LazyLock::new(|| {
    let mut registry: Registry = BTreeMap::new();
    registry.insert("grib".to_string(), Arc::new(GribBackendEntrypoint));
    RwLock::new(registry)
});

/// Registers an entrypoint under `name`, replacing any previous holder of
/// that name.
pub fn register_backend(name: impl Into<String>, entrypoint: Arc<dyn BackendEntrypoint>) {
    let name = name.into();
    debug!(%name, "registering backend");
    BACKENDS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name, entrypoint);
}

pub fn backend(name: &str) -> Option<Arc<dyn BackendEntrypoint>> {
    BACKENDS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

pub fn backend_names() -> Vec<String> {
    BACKENDS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .keys()
        .cloned()
        .collect()
}

/// Opens through a named backend, or probes every registered backend when
/// `engine` is `None`.
pub fn open_dataset_with_backend(
    path: impl AsRef<Path>,
    engine: Option<&str>,
    options: OpenOptions,
) -> Result<Dataset> {
    let path = path.as_ref();
    match engine {
        Some(name) => {
            let entrypoint =
                backend(name).ok_or_else(|| Error::UnknownBackend(name.to_string()))?;
            entrypoint.open_dataset(path, options)
        }
        None => {
            let candidates: Vec<Arc<dyn BackendEntrypoint>> = BACKENDS
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            for entrypoint in candidates {
                if entrypoint.guess_can_open(path) {
                    return entrypoint.open_dataset(path, options);
                }
            }
            Err(Error::NoMatchingBackend(path.to_path_buf()))
        }
    }
}
