//! Line-number program rows.

/// One row of the line-number matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow
{
    pub address: u64,
    /// Index into [`LineProgram::files`].
    pub file: u64,
    pub line: u64,
    pub is_stmt: bool,
    /// First address past the sequence; carries no position of its own.
    pub end_sequence: bool,
}

/// A unit's line table as emitted by the line-number program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineProgram
{
    /// File names indexed by the `file` register value.
    pub files: Vec<String>,
    /// Rows in program order (sequences need not be sorted).
    pub rows: Vec<LineRow>,
}

impl LineProgram
{
    #[must_use]
    pub fn file_name(&self, index: u64) -> Option<&str>
    {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.files.get(i))
            .map(String::as_str)
    }

    /// Rows ordered by address, sequence terminators before a sequence that
    /// starts at the same address.
    pub(crate) fn sorted_rows(&self) -> Vec<LineRow>
    {
        let mut rows = self.rows.clone();
        rows.sort_by_key(|row| (row.address, !row.end_sequence));
        rows
    }
}

/// Find the row describing `address` in rows produced by
/// [`LineProgram::sorted_rows`].
pub(crate) fn row_for_address(rows: &[LineRow], address: u64) -> Option<&LineRow>
{
    let after = rows.partition_point(|row| row.address <= address);
    let row = rows[..after].last()?;
    if row.end_sequence {
        return None;
    }
    // A row past the last terminator has no known extent.
    rows[after..].first()?;
    Some(row)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn row(address: u64, line: u64, end_sequence: bool) -> LineRow
    {
        LineRow {
            address,
            file: 1,
            line,
            is_stmt: true,
            end_sequence,
        }
    }

    #[test]
    fn test_lookup_across_sequences()
    {
        let program = LineProgram {
            files: vec![String::new(), "main.c".into()],
            rows: vec![
                row(0x200, 20, false),
                row(0x210, 21, false),
                row(0x220, 0, true),
                row(0x100, 10, false),
                row(0x108, 11, false),
                row(0x200, 0, true),
            ],
        };
        let rows = program.sorted_rows();
        assert_eq!(row_for_address(&rows, 0x104).map(|r| r.line), Some(10));
        assert_eq!(row_for_address(&rows, 0x1ff).map(|r| r.line), Some(11));
        assert_eq!(row_for_address(&rows, 0x200).map(|r| r.line), Some(20));
        assert_eq!(row_for_address(&rows, 0x215).map(|r| r.line), Some(21));
        assert!(row_for_address(&rows, 0x220).is_none());
        assert!(row_for_address(&rows, 0x50).is_none());
        assert_eq!(program.file_name(1), Some("main.c"));
        assert_eq!(program.file_name(9), None);
    }
}
