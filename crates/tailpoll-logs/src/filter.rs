use std::sync::Arc;

use tailpoll_types::{ConfigError, Filter, FilterError};

/// Filter mode for a line source.
///
/// Select and reject filters are mutually exclusive, so the mode is a single
/// variant rather than two lists that might both be populated.
#[derive(Clone, Debug, Default)]
pub enum Filters {
    /// Every line passes, unmatched
    #[default]
    None,

    /// Keep a line if any filter matches
    Select(Vec<Arc<Filter>>),

    /// Keep a line only if no filter matches
    Reject(Vec<Arc<Filter>>),
}

/// Result of running a line through [`Filters`]
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Keep(Option<Arc<Filter>>),
    Drop,
}

impl Filters {
    /// Build from config lists, validating and compiling every filter
    pub fn new(select: &[Filter], reject: &[Filter]) -> Result<Self, ConfigError> {
        if !select.is_empty() && !reject.is_empty() {
            return Err(ConfigError::FilterConflict {
                select: select.len(),
                reject: reject.len(),
            });
        }
        for filter in select.iter().chain(reject) {
            filter.validate()?;
        }

        let shared = |filters: &[Filter]| filters.iter().cloned().map(Arc::new).collect();
        Ok(if !select.is_empty() {
            Self::Select(shared(select))
        } else if !reject.is_empty() {
            Self::Reject(shared(reject))
        } else {
            Self::None
        })
    }

    #[cfg(test)]
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Apply reject filters first, then select filters
    pub fn apply(&self, line: &str) -> Result<Verdict, FilterError> {
        match self {
            Self::None => Ok(Verdict::Keep(None)),
            Self::Reject(filters) => {
                if reject_match(filters, line)? {
                    Ok(Verdict::Drop)
                } else {
                    Ok(Verdict::Keep(None))
                }
            }
            Self::Select(filters) => Ok(match select_match(filters, line)? {
                Some(filter) => Verdict::Keep(Some(Arc::clone(filter))),
                None => Verdict::Drop,
            }),
        }
    }
}

/// First filter that matches the line
pub fn select_match<'a, F>(filters: &'a [F], line: &str) -> Result<Option<&'a F>, FilterError>
where
    F: AsRef<Filter>,
{
    for filter in filters {
        if filter.as_ref().matches(line)? {
            return Ok(Some(filter));
        }
    }
    Ok(None)
}

/// Whether any filter matches the line
pub fn reject_match<F>(filters: &[F], line: &str) -> Result<bool, FilterError>
where
    F: AsRef<Filter>,
{
    Ok(select_match(filters, line)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINES: [&str; 3] = ["ERROR foo", "INFO bar", "ERROR baz"];

    fn kept(filters: &Filters) -> Vec<&'static str> {
        LINES
            .iter()
            .copied()
            .filter(|line| matches!(filters.apply(line).unwrap(), Verdict::Keep(_)))
            .collect()
    }

    #[test]
    fn test_select_filter() {
        let filters = Filters::new(&[Filter::substring("errors", "ERROR")], &[]).unwrap();
        assert_eq!(kept(&filters), vec!["ERROR foo", "ERROR baz"]);

        match filters.apply("ERROR foo").unwrap() {
            Verdict::Keep(Some(filter)) => assert_eq!(filter.name, "errors"),
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn test_reject_filter() {
        let filters = Filters::new(&[], &[Filter::regex("errors", "^ERROR")]).unwrap();
        assert_eq!(kept(&filters), vec!["INFO bar"]);
        assert_eq!(filters.apply("INFO bar").unwrap(), Verdict::Keep(None));
    }

    #[test]
    fn test_no_filters_pass_through() {
        let filters = Filters::new(&[], &[]).unwrap();
        assert!(filters.is_none());
        assert_eq!(kept(&filters), LINES.to_vec());
    }

    #[test]
    fn test_select_first_match_wins() {
        let filters = [
            Arc::new(Filter::substring("first", "ERROR")),
            Arc::new(Filter::regex("second", "baz$")),
        ];
        let matched = select_match(&filters, "ERROR baz").unwrap().unwrap();
        assert_eq!(matched.name, "first");
        assert!(select_match(&filters, "INFO bar").unwrap().is_none());
    }

    #[test]
    fn test_conflict_rejected() {
        let err = Filters::new(
            &[Filter::substring("a", "x")],
            &[Filter::substring("b", "y")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::FilterConflict { select: 1, reject: 1 }));
    }

    #[test]
    fn test_malformed_regex_rejected_at_construction() {
        let err = Filters::new(&[Filter::regex("bad", "(")], &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Filter(FilterError::InvalidRegex { .. })));
    }
}
