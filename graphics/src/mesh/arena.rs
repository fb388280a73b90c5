//! Shared-buffer arena bookkeeping.
//!
//! Submeshes stored in a mesh's shared buffer each own one [`AllocationRecord`]
//! per buffer kind. The functions here only inspect and adjust records; moving
//! the buffer contents is up to the caller. Every query is a linear scan over
//! the records, which is plenty for the tens of submeshes a mesh carries.

use crate::error::GraphicsError;

/// A slice `[offset, offset + length)` of a shared buffer, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AllocationRecord {
    /// First element.
    pub offset: usize,
    /// Number of elements.
    pub length: usize,
}

impl AllocationRecord {
    /// Create a record.
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// One past the last element.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Whether the two records share at least one element.
    pub fn overlaps(&self, other: &AllocationRecord) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Unused elements between a record and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeSpan {
    /// First free element.
    pub offset: usize,
    /// Number of free elements.
    pub length: usize,
}

/// Bump-allocation point: the end of the furthest record, or `0` without records.
pub fn find_next_buffer_offset<'a>(
    records: impl IntoIterator<Item = &'a AllocationRecord>,
) -> usize {
    records
        .into_iter()
        .map(AllocationRecord::end)
        .max()
        .unwrap_or(0)
}

/// Free space directly after `[offset, offset + length)`.
///
/// The span ends at the nearest record starting after `offset`, or at
/// `capacity` if there is none. Returns `None` when the next record (or the
/// end of the buffer) starts right at `offset + length`.
pub fn check_buffer_free_space<'a>(
    records: impl IntoIterator<Item = &'a AllocationRecord>,
    offset: usize,
    length: usize,
    capacity: usize,
) -> Option<FreeSpan> {
    let gap_start = offset + length;
    let gap_end = records
        .into_iter()
        .filter(|r| r.offset > offset)
        .map(|r| r.offset)
        .min()
        .unwrap_or(capacity);

    (gap_end > gap_start).then(|| FreeSpan {
        offset: gap_start,
        length: gap_end - gap_start,
    })
}

/// Move every record starting after `removed_offset` left by `removed_length`.
///
/// Returns the number of records shifted.
pub fn shift_offsets<'a>(
    records: impl IntoIterator<Item = &'a mut AllocationRecord>,
    removed_offset: usize,
    removed_length: usize,
) -> usize {
    let mut shifted = 0;
    for record in records {
        if record.offset > removed_offset {
            debug_assert!(record.offset >= removed_length);
            record.offset -= removed_length;
            shifted += 1;
        }
    }
    shifted
}

/// Total number of allocated elements.
pub fn allocated_length<'a>(records: impl IntoIterator<Item = &'a AllocationRecord>) -> usize {
    records.into_iter().map(|r| r.length).sum()
}

/// Verify the records are non-empty, pairwise disjoint and inside `capacity`.
pub fn validate_records(
    records: &[AllocationRecord],
    capacity: usize,
) -> Result<(), GraphicsError> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|r| r.offset);

    for record in &sorted {
        if record.length == 0 {
            return Err(GraphicsError::InvariantViolation(format!(
                "empty allocation record at {}",
                record.offset
            )));
        }
        if record.end() > capacity {
            return Err(GraphicsError::InvariantViolation(format!(
                "allocation [{}, {}) exceeds buffer capacity {}",
                record.offset,
                record.end(),
                capacity
            )));
        }
    }
    for pair in sorted.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(GraphicsError::InvariantViolation(format!(
                "allocations [{}, {}) and [{}, {}) overlap",
                pair[0].offset,
                pair[0].end(),
                pair[1].offset,
                pair[1].end()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn records(spans: &[(usize, usize)]) -> Vec<AllocationRecord> {
        spans
            .iter()
            .map(|&(offset, length)| AllocationRecord::new(offset, length))
            .collect()
    }

    #[test]
    fn test_next_offset() {
        assert_eq!(find_next_buffer_offset(std::iter::empty()), 0);
        assert_eq!(
            find_next_buffer_offset(&records(&[(10, 5), (0, 10), (20, 2)])),
            22
        );
    }

    #[test]
    fn test_free_space_between_records() {
        let recs = records(&[(0, 10), (14, 4), (30, 2)]);

        assert_eq!(
            check_buffer_free_space(&recs, 0, 10, 40),
            Some(FreeSpan {
                offset: 10,
                length: 4
            })
        );
        // Adjacent neighbour
        assert_eq!(check_buffer_free_space(&recs, 0, 14, 40), None);
        // Nearest neighbour wins over later ones
        assert_eq!(
            check_buffer_free_space(&recs, 14, 4, 40),
            Some(FreeSpan {
                offset: 18,
                length: 12
            })
        );
    }

    #[test]
    fn test_free_space_at_tail() {
        let recs = records(&[(0, 10), (10, 5)]);
        assert_eq!(
            check_buffer_free_space(&recs, 10, 5, 20),
            Some(FreeSpan {
                offset: 15,
                length: 5
            })
        );
        assert_eq!(check_buffer_free_space(&recs, 10, 5, 15), None);
    }

    #[test]
    fn test_shift_after_removal() {
        // A(0, 10) removed; B(10, 5) moves to 0
        let mut recs = records(&[(0, 10), (10, 5)]);
        let removed = recs.remove(0);

        let shifted = shift_offsets(recs.iter_mut(), removed.offset, removed.length);
        assert_eq!(shifted, 1);
        assert_eq!(recs, records(&[(0, 5)]));
        assert_eq!(allocated_length(&recs), 5);
    }

    #[test]
    fn test_shift_leaves_earlier_records() {
        let mut recs = records(&[(0, 4), (4, 6), (10, 2), (12, 8)]);
        let shifted = shift_offsets(recs.iter_mut(), 4, 6);
        assert_eq!(shifted, 2);
        assert_eq!(recs, records(&[(0, 4), (4, 6), (4, 2), (6, 8)]));
    }

    #[test]
    fn test_validate_records() {
        assert!(validate_records(&records(&[(0, 4), (6, 2)]), 8).is_ok());

        let err = validate_records(&records(&[(0, 4), (3, 2)]), 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);

        let err = validate_records(&records(&[(6, 4)]), 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);

        let err = validate_records(&records(&[(2, 0)]), 8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invariant);
    }
}
