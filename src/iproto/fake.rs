//! Materialized result sets served through the cursor API.
//!
//! Used for catalog-style answers the driver computes locally. Once attached
//! to a statement, fetches read from here and the network is never touched.

use super::types::Cell;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct FakeResultSet {
    names: Vec<String>,
    decl_types: Vec<String>,
    rows: Vec<Vec<Cell>>,
    /// Index of the row last returned.
    cursor: Option<usize>,
}

impl FakeResultSet {
    /// Empty result set with the given column names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FakeResultSet {
            names: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Declared type names, one per column.
    pub fn with_decl_types<I, S>(mut self, types: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        if types.len() != self.names.len() {
            return Err(Error::InvalidParameter {
                index: types.len(),
                reason: format!("expected {} declared types", self.names.len()),
            });
        }
        self.decl_types = types;
        Ok(self)
    }

    /// Append a row. Its width must match the column count.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.names.len() {
            return Err(Error::InvalidParameter {
                index: self.rows.len(),
                reason: format!(
                    "row has {} cells, result set has {} columns",
                    row.len(),
                    self.names.len()
                ),
            });
        }
        self.rows.try_reserve(1)?;
        self.rows.push(row);
        Ok(())
    }

    pub fn with_row(mut self, row: Vec<Cell>) -> Result<Self> {
        self.push_row(row)?;
        Ok(self)
    }

    pub fn column_count(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn decl_types(&self) -> &[String] {
        &self.decl_types
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows not yet returned.
    pub fn remaining(&self) -> usize {
        match self.cursor {
            Some(i) => self.rows.len().saturating_sub(i + 1),
            None => self.rows.len(),
        }
    }

    /// Move to the next row. Past the end this keeps returning `None`.
    pub(crate) fn advance(&mut self) -> Option<&[Cell]> {
        let next = self.cursor.map_or(0, |i| i + 1);
        if next >= self.rows.len() {
            self.cursor = Some(self.rows.len());
            return None;
        }
        self.cursor = Some(next);
        Some(&self.rows[next])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_width() {
        let mut rs = FakeResultSet::new(["TABLE_NAME", "TABLE_TYPE"]);
        assert!(rs.push_row(vec![Cell::str("T")]).is_err());
        assert!(rs.push_row(vec![Cell::str("T"), Cell::str("TABLE")]).is_ok());
        assert_eq!(rs.len(), 1);
    }

    #[test]
    fn test_forward_only() {
        let mut rs = FakeResultSet::new(["N"])
            .with_row(vec![Cell::Int(1)])
            .unwrap()
            .with_row(vec![Cell::Int(2)])
            .unwrap();
        assert_eq!(rs.remaining(), 2);
        assert_eq!(rs.advance(), Some(&[Cell::Int(1)][..]));
        assert_eq!(rs.advance(), Some(&[Cell::Int(2)][..]));
        assert_eq!(rs.advance(), None);
        assert_eq!(rs.advance(), None);
        assert_eq!(rs.remaining(), 0);
    }

    #[test]
    fn test_empty_set() {
        let mut rs = FakeResultSet::new(["A", "B"]);
        assert!(rs.is_empty());
        assert_eq!(rs.column_count(), 2);
        assert_eq!(rs.advance(), None);
    }

    #[test]
    fn test_decl_types_width() {
        let rs = FakeResultSet::new(["A"]);
        assert!(rs.clone().with_decl_types(["integer", "string"]).is_err());
        let rs = rs.with_decl_types(["integer"]).unwrap();
        assert_eq!(rs.decl_types(), &["integer".to_string()]);
    }
}
