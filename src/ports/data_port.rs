//! Price data access port trait.

use crate::domain::error::StratsimError;
use crate::domain::prices::PriceTable;
use std::path::Path;

pub trait PriceDataPort {
    /// Loads a price table with one column per entity.
    fn load_prices(&self, path: &Path) -> Result<PriceTable, StratsimError>;
}
