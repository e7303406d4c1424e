//! NanoAOD reading and [`EventTable`] persistence.

use super::*;
use crate::utils::enums::BranchType;
use arrow::{
    array::{Array, ArrayRef, Float32Array, Float64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use oxyroot::{Branch, ReaderTree, RootFile, Slice};
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

const DEFAULT_WRITE_BATCH_SIZE: usize = 10_000;
const LABEL_METADATA_KEY: &str = "label";

fn canonicalize_input_path(file_path: &str) -> FixRateResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

/// Expand `~` and environment variables in a path which may not exist yet.
pub fn expand_output_path(file_path: &str) -> FixRateResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// Find the input files of one configuration.
///
/// `pattern` is expanded with `shellexpand` and matched with `glob`; matches are sorted and
/// truncated to `max_files` when given. Matching nothing is an error naming `label`.
pub fn discover_files(
    label: &str,
    pattern: &str,
    max_files: Option<usize>,
) -> FixRateResult<Vec<PathBuf>> {
    let expanded = shellexpand::full(pattern)?;
    let mut paths = glob::glob(&expanded)?.collect::<Result<Vec<PathBuf>, _>>()?;
    paths.sort();
    if let Some(max_files) = max_files {
        paths.truncate(max_files);
    }
    if paths.is_empty() {
        return Err(FixRateError::NoInputFiles {
            label: label.to_string(),
            pattern: expanded.into_owned(),
        });
    }
    debug!(label, n_files = paths.len(), pattern = %expanded, "discovered input files");
    Ok(paths)
}

/// The branch names read from a NanoAOD tree for one trigger configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NanoBranches {
    /// L1 sum transverse energy.
    pub sum_pt: String,
    /// L1 sum type code.
    pub sum_type: String,
    /// L1 sum bunch crossing.
    pub sum_bx: String,
    /// L1 jet transverse momentum.
    pub l1_jet_pt: String,
    /// L1 jet pseudorapidity.
    pub l1_jet_eta: String,
    /// L1 jet azimuth.
    pub l1_jet_phi: String,
    /// Offline jet transverse momentum.
    pub jet_pt: String,
    /// Offline jet pseudorapidity.
    pub jet_eta: String,
    /// Offline jet azimuth.
    pub jet_phi: String,
    /// Muon transverse momentum.
    pub muon_pt: String,
    /// Muon azimuth.
    pub muon_phi: String,
    /// Muon PF-candidate flag.
    pub muon_is_pf_cand: String,
    /// PUPPI MET magnitude.
    pub met_pt: String,
    /// PUPPI MET azimuth.
    pub met_phi: String,
}

impl NanoBranches {
    /// Resolve branch names for the given L1 source. Sums come from the main processor (an extra
    /// `MP` in the prefix) when `use_mp_sums` is set.
    pub fn new(branch_type: BranchType, use_mp_sums: bool) -> Self {
        let sums = branch_type.sum_prefix(use_mp_sums);
        let objects = branch_type.object_prefix();
        Self {
            sum_pt: format!("{sums}EtSum_pt"),
            sum_type: format!("{sums}EtSum_etSumType"),
            sum_bx: format!("{sums}EtSum_bx"),
            l1_jet_pt: format!("{objects}Jet_pt"),
            l1_jet_eta: format!("{objects}Jet_eta"),
            l1_jet_phi: format!("{objects}Jet_phi"),
            jet_pt: "Jet_pt".to_string(),
            jet_eta: "Jet_eta".to_string(),
            jet_phi: "Jet_phi".to_string(),
            muon_pt: "Muon_pt".to_string(),
            muon_phi: "Muon_phi".to_string(),
            muon_is_pf_cand: "Muon_isPFcand".to_string(),
            met_pt: "PuppiMET_pt".to_string(),
            met_phi: "PuppiMET_phi".to_string(),
        }
    }

    /// Every branch name, in reading order.
    pub fn names(&self) -> Vec<&str> {
        vec![
            &self.sum_pt,
            &self.sum_type,
            &self.sum_bx,
            &self.l1_jet_pt,
            &self.l1_jet_eta,
            &self.l1_jet_phi,
            &self.jet_pt,
            &self.jet_eta,
            &self.jet_phi,
            &self.muon_pt,
            &self.muon_phi,
            &self.muon_is_pf_cand,
            &self.met_pt,
            &self.met_phi,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RootLeafKind {
    F32,
    F64,
    I32,
    U32,
    I16,
    U16,
    I8,
    U8,
    Bool,
}

fn leaf_kind(type_name: &str) -> Option<RootLeafKind> {
    let lower = type_name.to_ascii_lowercase();
    if lower.contains("vector") {
        return None;
    }
    let base = lower
        .split('[')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_end_matches("_t");
    match base {
        "float" | "float32" => Some(RootLeafKind::F32),
        "double" | "double32" => Some(RootLeafKind::F64),
        "int" | "int32" => Some(RootLeafKind::I32),
        "uint" | "unsigned int" | "uint32" => Some(RootLeafKind::U32),
        "short" | "int16" => Some(RootLeafKind::I16),
        "ushort" | "unsigned short" | "uint16" => Some(RootLeafKind::U16),
        "char" | "int8" => Some(RootLeafKind::I8),
        "uchar" | "unsigned char" | "uint8" => Some(RootLeafKind::U8),
        "bool" => Some(RootLeafKind::Bool),
        _ => None,
    }
}

fn map_root_error<E: std::fmt::Display>(context: &str, err: E) -> FixRateError {
    FixRateError::Custom(format!("{context}: {err}"))
}

fn find_branch<'a>(tree: &'a ReaderTree, name: &str) -> FixRateResult<(RootLeafKind, &'a Branch)> {
    let branch = tree
        .branches()
        .find(|branch| branch.name() == name)
        .ok_or_else(|| FixRateError::MissingColumn {
            name: name.to_string(),
        })?;
    let type_name = branch.item_type_name();
    let kind = leaf_kind(&type_name).ok_or_else(|| FixRateError::InvalidColumnType {
        name: name.to_string(),
        datatype: type_name.to_string(),
    })?;
    Ok((kind, branch))
}

macro_rules! read_jagged_as {
    ($branch:expr, $name:expr, $t:ty, $convert:expr) => {{
        let mut column = JaggedColumn::new();
        let rows = $branch
            .as_iter::<Slice<$t>>()
            .map_err(|err| map_root_error(&format!("Failed to read branch '{}'", $name), err))?;
        for row in rows {
            let row: Vec<f64> = row.into_vec().into_iter().map($convert).collect();
            column.push_row(&row);
        }
        column
    }};
}

macro_rules! read_scalar_as {
    ($branch:expr, $name:expr, $t:ty, $convert:expr) => {{
        $branch
            .as_iter::<$t>()
            .map_err(|err| map_root_error(&format!("Failed to read branch '{}'", $name), err))?
            .map($convert)
            .collect::<Vec<f64>>()
    }};
}

fn read_jagged(tree: &ReaderTree, name: &str) -> FixRateResult<JaggedColumn> {
    let (kind, branch) = find_branch(tree, name)?;
    let column = match kind {
        RootLeafKind::F32 => read_jagged_as!(branch, name, f32, |v| v as f64),
        RootLeafKind::F64 => read_jagged_as!(branch, name, f64, |v| v),
        RootLeafKind::I32 => read_jagged_as!(branch, name, i32, |v| v as f64),
        RootLeafKind::U32 => read_jagged_as!(branch, name, u32, |v| v as f64),
        RootLeafKind::I16 => read_jagged_as!(branch, name, i16, |v| v as f64),
        RootLeafKind::U16 => read_jagged_as!(branch, name, u16, |v| v as f64),
        RootLeafKind::I8 => read_jagged_as!(branch, name, i8, |v| v as f64),
        RootLeafKind::U8 => read_jagged_as!(branch, name, u8, |v| v as f64),
        RootLeafKind::Bool => {
            read_jagged_as!(branch, name, bool, |v| if v { 1.0 } else { 0.0 })
        }
    };
    debug!(branch = name, n_values = column.n_values(), "read jagged branch");
    Ok(column)
}

fn read_scalar(tree: &ReaderTree, name: &str) -> FixRateResult<Vec<f64>> {
    let (kind, branch) = find_branch(tree, name)?;
    let values = match kind {
        RootLeafKind::F32 => read_scalar_as!(branch, name, f32, |v| v as f64),
        RootLeafKind::F64 => read_scalar_as!(branch, name, f64, |v| v),
        RootLeafKind::I32 => read_scalar_as!(branch, name, i32, |v| v as f64),
        RootLeafKind::U32 => read_scalar_as!(branch, name, u32, |v| v as f64),
        RootLeafKind::I16 => read_scalar_as!(branch, name, i16, |v| v as f64),
        RootLeafKind::U16 => read_scalar_as!(branch, name, u16, |v| v as f64),
        RootLeafKind::I8 => read_scalar_as!(branch, name, i8, |v| v as f64),
        RootLeafKind::U8 => read_scalar_as!(branch, name, u8, |v| v as f64),
        RootLeafKind::Bool => read_scalar_as!(branch, name, bool, |v| if v { 1.0 } else { 0.0 }),
    };
    debug!(branch = name, n_events = values.len(), "read branch");
    Ok(values)
}

/// Load the collections of one NanoAOD file.
pub fn read_nano(
    file_path: &Path,
    branches: &NanoBranches,
    tree_name: &str,
) -> FixRateResult<NanoEvents> {
    let path = canonicalize_input_path(&file_path.to_string_lossy())?;
    let mut file = RootFile::open(&path).map_err(|err| {
        FixRateError::Custom(format!(
            "Failed to open ROOT file '{}': {err}",
            path.display()
        ))
    })?;
    let tree = file
        .get_tree(tree_name)
        .map_err(|err| map_root_error(&format!("Failed to open ROOT tree '{tree_name}'"), err))?;
    debug!(file = %path.display(), entries = tree.entries(), "opened tree");

    NanoEvents::new(
        EtSums {
            pt: read_jagged(&tree, &branches.sum_pt)?,
            sum_type: read_jagged(&tree, &branches.sum_type)?,
            bx: read_jagged(&tree, &branches.sum_bx)?,
        },
        Jets {
            pt: read_jagged(&tree, &branches.l1_jet_pt)?,
            eta: read_jagged(&tree, &branches.l1_jet_eta)?,
            phi: read_jagged(&tree, &branches.l1_jet_phi)?,
        },
        Jets {
            pt: read_jagged(&tree, &branches.jet_pt)?,
            eta: read_jagged(&tree, &branches.jet_eta)?,
            phi: read_jagged(&tree, &branches.jet_phi)?,
        },
        Muons {
            pt: read_jagged(&tree, &branches.muon_pt)?,
            phi: read_jagged(&tree, &branches.muon_phi)?,
            is_pf_cand: read_jagged(&tree, &branches.muon_is_pf_cand)?,
        },
        PuppiMet {
            pt: read_scalar(&tree, &branches.met_pt)?,
            phi: read_scalar(&tree, &branches.met_phi)?,
        },
    )
}

/// Load and concatenate the collections of several NanoAOD files.
pub fn read_nano_files(
    paths: &[PathBuf],
    branches: &NanoBranches,
    tree_name: &str,
) -> FixRateResult<NanoEvents> {
    let parts = paths
        .iter()
        .map(|path| read_nano(path, branches, tree_name))
        .collect::<FixRateResult<Vec<_>>>()?;
    let events = NanoEvents::concat(parts)?;
    info!(
        n_files = paths.len(),
        n_events = events.n_events(),
        "loaded NanoAOD events"
    );
    Ok(events)
}

/// Precision for writing floating-point columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FloatPrecision {
    /// 32-bit floats.
    F32,
    /// 64-bit floats.
    #[default]
    F64,
}

/// Options for writing an [`EventTable`] to disk.
#[derive(Clone, Debug)]
pub struct TableWriteOptions {
    /// Number of events to include in each batch when writing.
    pub batch_size: usize,
    /// Floating-point precision to use for persisted columns.
    pub precision: FloatPrecision,
}

impl Default for TableWriteOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_WRITE_BATCH_SIZE,
            precision: FloatPrecision::default(),
        }
    }
}

impl TableWriteOptions {
    /// Override the batch size used for writing; defaults to 10_000.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Select the floating-point precision for persisted columns.
    pub fn precision(mut self, precision: FloatPrecision) -> Self {
        self.precision = precision;
        self
    }
}

fn build_table_schema(table: &EventTable, precision: FloatPrecision) -> Schema {
    let dtype = match precision {
        FloatPrecision::F64 => DataType::Float64,
        FloatPrecision::F32 => DataType::Float32,
    };
    let fields: Vec<Field> = table
        .column_names()
        .into_iter()
        .map(|name| Field::new(name, dtype.clone(), true))
        .collect();
    let metadata = HashMap::from([(LABEL_METADATA_KEY.to_string(), table.label().to_string())]);
    Schema::new(fields).with_metadata(metadata)
}

fn table_range_to_record_batch(
    table: &EventTable,
    start: usize,
    end: usize,
    schema: Arc<Schema>,
    precision: FloatPrecision,
) -> FixRateResult<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::new();
    for name in table.column_names() {
        let values = &table.column(name)?[start..end];
        match precision {
            FloatPrecision::F64 => columns.push(Arc::new(Float64Array::from(values.to_vec()))),
            FloatPrecision::F32 => columns.push(Arc::new(Float32Array::from(
                values
                    .iter()
                    .map(|value| value.map(|v| v as f32))
                    .collect::<Vec<Option<f32>>>(),
            ))),
        }
    }
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Persist an [`EventTable`] to a Parquet file.
///
/// Every column is a nullable float column; missing cells are written as nulls. The table label is
/// stored in the schema metadata.
pub fn write_table(
    table: &EventTable,
    file_path: &str,
    options: &TableWriteOptions,
) -> FixRateResult<()> {
    let path = expand_output_path(file_path)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let batch_size = options.batch_size.max(1);
    let precision = options.precision;
    let schema = Arc::new(build_table_schema(table, precision));
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), None)
        .map_err(|err| FixRateError::Custom(format!("Failed to create Parquet writer: {err}")))?;

    let n_rows = table.n_events();
    let mut start = 0usize;
    while start < n_rows {
        let end = (start + batch_size).min(n_rows);
        let batch = table_range_to_record_batch(table, start, end, schema.clone(), precision)?;
        writer
            .write(&batch)
            .map_err(|err| FixRateError::Custom(format!("Failed to write Parquet batch: {err}")))?;
        start = end;
    }

    writer
        .close()
        .map_err(|err| FixRateError::Custom(format!("Failed to finalise Parquet file: {err}")))?;
    debug!(table = table.label(), file = %path.display(), rows = n_rows, "wrote table");
    Ok(())
}

#[derive(Clone, Copy)]
enum FloatColumn<'a> {
    F32(&'a Float32Array),
    F64(&'a Float64Array),
}

impl FloatColumn<'_> {
    fn value(&self, row: usize) -> Option<f64> {
        match self {
            Self::F32(array) => (!array.is_null(row)).then(|| array.value(row) as f64),
            Self::F64(array) => (!array.is_null(row)).then(|| array.value(row)),
        }
    }
}

fn prepare_float_column<'a>(batch: &'a RecordBatch, name: &str) -> FixRateResult<FloatColumn<'a>> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| FixRateError::MissingColumn {
            name: name.to_string(),
        })?;
    let invalid = || FixRateError::InvalidColumnType {
        name: name.to_string(),
        datatype: column.data_type().to_string(),
    };
    match column.data_type() {
        DataType::Float32 => column
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(FloatColumn::F32)
            .ok_or_else(invalid),
        DataType::Float64 => column
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(FloatColumn::F64)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Load an [`EventTable`] from a Parquet file written by [`write_table`].
///
/// The label is taken from the schema metadata, falling back to `label` when absent.
pub fn read_table(file_path: &str, label: &str) -> FixRateResult<EventTable> {
    let path = canonicalize_input_path(file_path)?;
    let file = File::open(&path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let label = schema
        .metadata()
        .get(LABEL_METADATA_KEY)
        .cloned()
        .unwrap_or_else(|| label.to_string());
    let names: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();
    let total_rows = builder.metadata().file_metadata().num_rows() as usize;

    let mut columns: Vec<Vec<Option<f64>>> = names
        .iter()
        .map(|_| Vec::with_capacity(total_rows))
        .collect();
    let reader = builder.build()?;
    for batch in reader {
        let batch = batch?;
        let sources = names
            .iter()
            .map(|name| prepare_float_column(&batch, name))
            .collect::<FixRateResult<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            for (target, source) in columns.iter_mut().zip(&sources) {
                target.push(source.value(row));
            }
        }
    }

    let n_events = columns.first().map_or(0, Vec::len);
    let mut table = EventTable::new(label, n_events);
    for (name, values) in names.into_iter().zip(columns) {
        table = table.with_column(name, values)?;
    }
    debug!(table = table.label(), file = %path.display(), rows = n_events, "read table");
    Ok(table)
}
