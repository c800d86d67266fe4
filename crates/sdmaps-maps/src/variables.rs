//! Map variable groups: which derived columns go into one stack.

use crate::{MapsError, Result};
use sdmaps_indices::{binary_column, category_column, status_column, StatusSource, SHANNON};
use std::str::FromStr;

/// One stacked map product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableGroup {
    /// `<src>-B`, threatened sumap.
    Binary(StatusSource),
    /// `<src>-<status>` for every status.
    Status(StatusSource),
    /// `<src>-cats`, worst-status category.
    Category(StatusSource),
    /// Shannon index.
    Shannon,
}

impl VariableGroup {
    /// Every product written per buffer, in write order.
    pub fn all() -> Vec<VariableGroup> {
        let mut out = Vec::with_capacity(7);
        for source in StatusSource::ALL {
            out.push(VariableGroup::Binary(source));
            out.push(VariableGroup::Status(source));
            out.push(VariableGroup::Category(source));
        }
        out.push(VariableGroup::Shannon);
        out
    }

    /// Group for a variable type (`B`, `S`, `cat`/`cats`, `shannon`) and source.
    pub fn parse(var_type: &str, source: StatusSource) -> Result<Self> {
        match var_type {
            "B" => Ok(VariableGroup::Binary(source)),
            "S" => Ok(VariableGroup::Status(source)),
            "cat" | "cats" => Ok(VariableGroup::Category(source)),
            "shannon" => Ok(VariableGroup::Shannon),
            other => Err(MapsError::UnknownVariable(other.to_string())),
        }
    }

    /// Columns stacked as bands, in band order.
    pub fn columns(&self, statuses: &[String]) -> Vec<String> {
        match self {
            VariableGroup::Binary(src) => vec![binary_column(*src)],
            VariableGroup::Status(src) => statuses.iter().map(|s| status_column(*src, s)).collect(),
            VariableGroup::Category(src) => vec![category_column(*src)],
            VariableGroup::Shannon => vec![SHANNON.to_string()],
        }
    }

    /// Stack name: band column names joined with `_`.
    pub fn stack_name(&self, statuses: &[String]) -> String {
        self.columns(statuses).join("_")
    }

    /// Worst-status categories are written as `u8`, everything else as `f32`.
    pub fn is_categorical(&self) -> bool {
        matches!(self, VariableGroup::Category(_))
    }
}

impl FromStr for VariableGroup {
    type Err = MapsError;

    /// `shannon`, or `<source>-<type>` such as `comp-B` or `iucn-cats`.
    fn from_str(s: &str) -> Result<Self> {
        if s == "shannon" {
            return Ok(VariableGroup::Shannon);
        }
        let (source, var_type) = s
            .split_once('-')
            .ok_or_else(|| MapsError::UnknownVariable(s.to_string()))?;
        let source = match source {
            "iucn" => StatusSource::Iucn,
            "comp" => StatusSource::Comp,
            _ => return Err(MapsError::UnknownVariable(s.to_string())),
        };
        Self::parse(var_type, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdmaps_indices::default_statuses;

    #[test]
    fn test_stack_names() {
        let statuses = default_statuses();
        assert_eq!(VariableGroup::Binary(StatusSource::Iucn).stack_name(&statuses), "iucn-B");
        assert_eq!(
            VariableGroup::Status(StatusSource::Iucn).stack_name(&statuses),
            "iucn-LC_iucn-NT_iucn-VU_iucn-EN_iucn-CR"
        );
        assert_eq!(VariableGroup::Category(StatusSource::Comp).stack_name(&statuses), "comp-cats");
        assert_eq!(VariableGroup::Shannon.stack_name(&statuses), "shannon");
        assert_eq!(VariableGroup::all().len(), 7);
    }

    #[test]
    fn test_unknown_variable_is_an_error() {
        assert!(matches!(
            VariableGroup::parse("X", StatusSource::Comp),
            Err(MapsError::UnknownVariable(_))
        ));
        assert_eq!("comp-cats".parse::<VariableGroup>().unwrap(), VariableGroup::Category(StatusSource::Comp));
        assert!("foo-B".parse::<VariableGroup>().is_err());
    }
}
