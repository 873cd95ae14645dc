//! Ordering-string transitions for sortable column headers.
//!
//! An ordering is a single API-level sort spec, optionally prefixed with
//! `-` for descending, so at most one column is active at a time.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Splits an ordering string into its active column and direction.
/// Empty orderings (server default order) have no active column.
pub fn active_field(ordering: &str) -> Option<(&str, SortDirection)> {
    match ordering.strip_prefix('-') {
        Some("") => None,
        Some(field) => Some((field, SortDirection::Descending)),
        None if ordering.is_empty() => None,
        None => Some((ordering, SortDirection::Ascending)),
    }
}

/// Direction a header shows for `data_field`, if it is the active column.
pub fn sort_state(ordering: &str, data_field: &str) -> Option<SortDirection> {
    match active_field(ordering) {
        Some((field, direction)) if field == data_field => Some(direction),
        _ => None,
    }
}

/// Next ordering after a click on `data_field`.
///
/// Inactive columns start ascending; an ascending column flips to
/// descending. A descending non-default column falls back to
/// `default_sort`, while the default column wraps straight back to
/// ascending since the fallback would be redundant there.
pub fn next_ordering(current: &str, data_field: &str, default_sort: &str) -> String {
    match sort_state(current, data_field) {
        None => data_field.to_string(),
        Some(SortDirection::Ascending) => format!("-{data_field}"),
        Some(SortDirection::Descending) => {
            let default_field = default_sort.strip_prefix('-').unwrap_or(default_sort);
            if data_field == default_field {
                data_field.to_string()
            } else {
                default_sort.to_string()
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/sort_tests.rs"]
mod tests;
