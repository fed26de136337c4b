use std::marker::PhantomData;

use run_store::{ComparedRow, Db, StoreError};
use surface_core::{
    CertificateObject, ChangeType, CompareResult, FileSystemObject, OpenPortObject, RegistryObject,
    ResourceObject, ResultType, ServiceObject, UserAccountObject,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pairing::{pair, Keyed};

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Differences between two runs for one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub kind: ResultType,
    pub base_run_id: String,
    pub compare_run_id: String,
    pub added: Vec<CompareResult>,
    pub removed: Vec<CompareResult>,
    pub modified: Vec<CompareResult>,
    /// Rows of either run that failed to decode.
    pub skipped: usize,
}

impl ComparisonResult {
    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn rows(&self) -> Vec<ComparedRow> {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .map(|c| ComparedRow {
                base_run_id: c.base_run_id.clone(),
                compare_run_id: c.compare_run_id.clone(),
                base_row_key: c.base_row_key.clone(),
                compare_row_key: c.compare_row_key.clone(),
                change_type: c.change_type,
                kind: c.result_type,
            })
            .collect()
    }
}

struct Loaded<T> {
    row_key: String,
    obj: T,
}

/// The comparison algorithm for one resource kind.
pub struct Comparator<T: ResourceObject> {
    _kind: PhantomData<T>,
}

impl<T: ResourceObject> Default for Comparator<T> {
    fn default() -> Self {
        Self { _kind: PhantomData }
    }
}

impl<T: ResourceObject> Comparator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compare(
        &self,
        db: &mut Db,
        base_run_id: &str,
        compare_run_id: &str,
    ) -> Result<ComparisonResult, CompareError> {
        validate_run_id("base", base_run_id)?;
        validate_run_id("compare", compare_run_id)?;
        db.finished_run(base_run_id)?;
        db.finished_run(compare_run_id)?;

        let (base, base_skipped) = load::<T>(db, base_run_id)?;
        let (cmp, cmp_skipped) = load::<T>(db, compare_run_id)?;

        let pairing = pair(&keyed(&base), &keyed(&cmp));

        let entry = |change_type: ChangeType, b: Option<&Loaded<T>>, c: Option<&Loaded<T>>| CompareResult {
            base_run_id: base_run_id.to_string(),
            compare_run_id: compare_run_id.to_string(),
            base_row_key: b.map(|l| l.row_key.clone()),
            compare_row_key: c.map(|l| l.row_key.clone()),
            change_type,
            result_type: T::KIND,
            base: b.map(|l| l.obj.clone().into()),
            compare: c.map(|l| l.obj.clone().into()),
        };

        let result = ComparisonResult {
            kind: T::KIND,
            base_run_id: base_run_id.to_string(),
            compare_run_id: compare_run_id.to_string(),
            added: pairing.added.iter().map(|&j| entry(ChangeType::Created, None, Some(&cmp[j]))).collect(),
            removed: pairing.removed.iter().map(|&i| entry(ChangeType::Deleted, Some(&base[i]), None)).collect(),
            modified: pairing
                .modified
                .iter()
                .map(|&(i, j)| entry(ChangeType::Modified, Some(&base[i]), Some(&cmp[j])))
                .collect(),
            skipped: base_skipped + cmp_skipped,
        };

        db.replace_comparison(base_run_id, compare_run_id, T::KIND, &result.rows())?;
        info!(
            kind = %T::KIND,
            base = base_run_id,
            compare = compare_run_id,
            added = result.added.len(),
            removed = result.removed.len(),
            modified = result.modified.len(),
            unchanged = pairing.unchanged.len(),
            skipped = result.skipped,
            "comparison finished"
        );
        Ok(result)
    }
}

fn keyed<T: ResourceObject>(items: &[Loaded<T>]) -> Vec<Keyed<'_>> {
    items
        .iter()
        .map(|l| Keyed { row_key: &l.row_key, keys: l.obj.identity_keys() })
        .collect()
}

fn validate_run_id(which: &str, run_id: &str) -> Result<(), CompareError> {
    if run_id.trim().is_empty() {
        return Err(CompareError::InvalidArgument(format!("{which} run id is empty")));
    }
    Ok(())
}

/// Decodes every row of a run. Rows that fail are logged and counted.
fn load<T: ResourceObject>(db: &Db, run_id: &str) -> Result<(Vec<Loaded<T>>, usize), CompareError> {
    let rows = db.records_for_run(run_id, T::KIND)?;
    let mut loaded = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match row.decode(T::KIND).map(T::from_record) {
            Ok(Some(obj)) => loaded.push(Loaded { row_key: row.row_key, obj }),
            Ok(None) => {
                warn!(run_id, row_key = %row.row_key, kind = %T::KIND, "stored record has wrong kind");
                skipped += 1;
            }
            Err(e) => {
                warn!(run_id, row_key = %row.row_key, kind = %T::KIND, error = %e, "skipping undecodable record");
                skipped += 1;
            }
        }
    }
    debug!(run_id, kind = %T::KIND, rows = loaded.len(), skipped, "loaded run");
    Ok((loaded, skipped))
}

/// Runs the comparator for `kind`.
pub fn compare_kind(
    db: &mut Db,
    kind: ResultType,
    base_run_id: &str,
    compare_run_id: &str,
) -> Result<ComparisonResult, CompareError> {
    match kind {
        ResultType::File => Comparator::<FileSystemObject>::new().compare(db, base_run_id, compare_run_id),
        ResultType::Port => Comparator::<OpenPortObject>::new().compare(db, base_run_id, compare_run_id),
        ResultType::User => Comparator::<UserAccountObject>::new().compare(db, base_run_id, compare_run_id),
        ResultType::Service => Comparator::<ServiceObject>::new().compare(db, base_run_id, compare_run_id),
        ResultType::Registry => Comparator::<RegistryObject>::new().compare(db, base_run_id, compare_run_id),
        ResultType::Certificate => {
            Comparator::<CertificateObject>::new().compare(db, base_run_id, compare_run_id)
        }
    }
}
