//! Report output port trait.

use crate::domain::error::StratsimError;
use crate::domain::export::Table;
use std::path::Path;

/// Port for writing exported run data.
pub trait ReportPort {
    fn write_table(&self, table: &Table, output_path: &Path) -> Result<(), StratsimError>;
}
