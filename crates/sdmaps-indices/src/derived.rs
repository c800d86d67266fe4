//! Derived per-row scalar columns.

use crate::grid::Grid;
use crate::status::{StatusLevel, StatusSource, StatusTable};
use crate::Result;
use sdmaps_metrics::{Diagnostics, FallbackKind};

/// Name of the Shannon column.
pub const SHANNON: &str = "shannon";

/// `<source>-B`.
pub fn binary_column(source: StatusSource) -> String {
    format!("{}-B", source.name())
}

/// `<source>-<status>`.
pub fn status_column(source: StatusSource, status: &str) -> String {
    format!("{}-{}", source.name(), status)
}

/// `<source>-cats`.
pub fn category_column(source: StatusSource) -> String {
    format!("{}-cats", source.name())
}

/// Summed probability of the classes selected by `source` at `level`.
///
/// At the binary level a class is selected when it is threatened; at the
/// status level when its status equals `status`. Unmapped classes and
/// species missing from the table are never selected; the latter are counted
/// as `MissingStatus`. Returns the column name.
pub fn sumap(
    grid: &mut Grid,
    table: &StatusTable,
    source: StatusSource,
    level: StatusLevel,
    status: Option<&str>,
    diagnostics: &Diagnostics,
) -> Result<String> {
    let lookup = source.lookup();
    let name = match (level, status) {
        (StatusLevel::Status, Some(s)) => status_column(source, s),
        _ => binary_column(source),
    };

    let mut missing = 0u64;
    let values: Vec<f64> = grid
        .rows()
        .iter()
        .map(|row| {
            row.pairs()
                .filter(|(class, _)| {
                    let Some(class) = class else {
                        return false;
                    };
                    if table.get(*class).is_none() {
                        missing += 1;
                        return false;
                    }
                    match (level, status) {
                        (StatusLevel::Status, Some(s)) => table.status(*class, lookup) == Some(s),
                        _ => table.binary(*class, lookup).unwrap_or(false),
                    }
                })
                .map(|(_, p)| p as f64)
                .sum::<f64>()
        })
        .collect();

    if missing > 0 {
        diagnostics.record_n(FallbackKind::MissingStatus, missing);
    }
    grid.set_column(name.clone(), values)?;
    Ok(name)
}

/// Shannon index `-Σ p ln p` of each row's probabilities; terms with `p <= 0`
/// contribute nothing. With `normalized`, divided by the class count.
pub fn shannon(grid: &mut Grid, normalized: bool) -> Result<&'static str> {
    let values: Vec<f64> = grid
        .rows()
        .iter()
        .map(|row| {
            let h: f64 = -row
                .probas
                .iter()
                .map(|p| *p as f64)
                .filter(|p| *p > 0.0)
                .map(|p| p * p.ln())
                .sum::<f64>();
            if normalized && !row.probas.is_empty() {
                h / row.probas.len() as f64
            } else {
                h
            }
        })
        .collect();
    grid.set_column(SHANNON, values)?;
    Ok(SHANNON)
}

/// Most severe status with a nonzero sumap, as a 1-based index into
/// `statuses` (least to most severe); `empty_value` when none.
///
/// Needs the `<source>-<status>` columns.
pub fn worst_status_category(grid: &mut Grid, source: StatusSource, statuses: &[String], empty_value: u8) -> Result<String> {
    let mut values = vec![empty_value as f64; grid.len()];
    for (i, status) in statuses.iter().enumerate() {
        let column = grid.column(&status_column(source, status))?;
        for (v, s) in values.iter_mut().zip(column) {
            if *s != 0.0 {
                *v = (i + 1) as f64;
            }
        }
    }
    let name = category_column(source);
    grid.set_column(name.clone(), values)?;
    Ok(name)
}

/// Compute every derived column: for each source the binary sumap, one
/// sumap per status and the worst-status category, then Shannon.
pub fn derive_all(
    grid: &mut Grid,
    table: &StatusTable,
    statuses: &[String],
    empty_value: u8,
    normalized_shannon: bool,
    diagnostics: &Diagnostics,
) -> Result<()> {
    for source in StatusSource::ALL {
        sumap(grid, table, source, StatusLevel::Binary, None, diagnostics)?;
        for status in statuses {
            sumap(grid, table, source, StatusLevel::Status, Some(status), diagnostics)?;
        }
        worst_status_category(grid, source, statuses, empty_value)?;
    }
    shannon(grid, normalized_shannon)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridRow;
    use crate::status::{default_statuses, SpeciesStatus};
    use approx::assert_relative_eq;
    use sdmaps_common::ClassId;
    use std::collections::HashMap;

    fn grid(rows: Vec<Vec<(Option<ClassId>, f32)>>) -> Grid {
        Grid::new(
            rows.into_iter()
                .enumerate()
                .map(|(i, pairs)| {
                    let (classes, probas): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
                    GridRow {
                        id: i as u64,
                        lon: 0.0,
                        lat: 0.0,
                        region_raw: None,
                        region: None,
                        empty: probas.is_empty(),
                        classes,
                        probas,
                    }
                })
                .collect(),
        )
    }

    fn table() -> StatusTable {
        let entry = |gt: Option<&str>, pb: bool, ps: &str| SpeciesStatus {
            species: String::new(),
            ground_truth: gt.map(str::to_string),
            predicted_binary: Some(pb),
            predicted_status: Some(ps.to_string()),
        };
        let mut entries = HashMap::new();
        entries.insert(1, entry(Some("LC"), false, "LC"));
        entries.insert(2, entry(None, true, "EN"));
        entries.insert(3, entry(Some("VU"), false, "NT"));
        StatusTable::new(entries)
    }

    #[test]
    fn test_sumaps_and_categories() {
        let mut g = grid(vec![
            vec![(Some(1), 0.5), (Some(2), 0.3), (Some(3), 0.2)],
            vec![(Some(1), 0.6), (None, 0.3), (Some(99), 0.1)],
            vec![],
        ]);
        let diagnostics = Diagnostics::new();
        derive_all(&mut g, &table(), &default_statuses(), 255, false, &diagnostics).unwrap();

        let iucn_b = g.column("iucn-B").unwrap();
        assert_relative_eq!(iucn_b[0], 0.2, epsilon = 1e-6);
        let comp_b = g.column("comp-B").unwrap();
        assert_relative_eq!(comp_b[0], 0.5, epsilon = 1e-6);
        assert_eq!(comp_b[2], 0.0);

        assert_eq!(g.column("iucn-cats").unwrap(), &[3.0, 1.0, 255.0]);
        assert_eq!(g.column("comp-cats").unwrap(), &[4.0, 1.0, 255.0]);
        assert_relative_eq!(g.column("comp-EN").unwrap()[0], 0.3, epsilon = 1e-6);

        // Species 99 is counted once per sumap column.
        assert_eq!(diagnostics.count(FallbackKind::MissingStatus), 12);
    }

    #[test]
    fn test_shannon() {
        let mut g = grid(vec![vec![(Some(1), 0.5), (Some(2), 0.5)], vec![(Some(1), 1.0), (Some(2), 0.0)], vec![]]);
        shannon(&mut g, false).unwrap();
        let h = g.column(SHANNON).unwrap();
        assert_relative_eq!(h[0], std::f64::consts::LN_2, epsilon = 1e-9);
        assert_eq!(h[1], 0.0);
        assert_eq!(h[2], 0.0);

        shannon(&mut g, true).unwrap();
        assert_relative_eq!(g.column(SHANNON).unwrap()[0], std::f64::consts::LN_2 / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_category_needs_status_columns() {
        let mut g = grid(vec![vec![]]);
        assert!(worst_status_category(&mut g, StatusSource::Comp, &default_statuses(), 255).is_err());
    }
}
