use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Errors produced while validating or evaluating a [`Filter`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    #[error("filter {name:?} has neither a regex nor a substring")]
    Empty { name: String },

    #[error("filter {name:?} has invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        name: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A single match rule applied to a log line.
///
/// The regex (if any) is compiled on first use and cached, so a filter
/// decoded from config or JSON costs nothing until it is evaluated. Once
/// compiled, matching only reads shared state and is safe from any number
/// of threads.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Human readable name, echoed back on matched items
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Regular expression pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Plain substring, checked before the regex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substring: Option<String>,

    /// Consumers interested in lines matched by this filter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<String>,

    #[serde(skip)]
    compiled: OnceCell<Regex>,
}

impl Filter {
    /// Create a substring filter
    pub fn substring(name: impl Into<String>, substring: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            substring: Some(substring.into()),
            ..Default::default()
        }
    }

    /// Create a regex filter. The pattern is not compiled until first use.
    pub fn regex(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regex: Some(pattern.into()),
            ..Default::default()
        }
    }

    /// Attach owner references
    pub fn with_owner_references<I, S>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owner_references = owners.into_iter().map(Into::into).collect();
        self
    }

    /// Check the filter is usable and force compilation of its regex
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.regex.is_none() && self.substring.is_none() {
            return Err(FilterError::Empty {
                name: self.name.clone(),
            });
        }
        self.compile().map(|_| ())
    }

    /// Compile the regex if it has not been compiled yet
    pub fn compile(&self) -> Result<Option<&Regex>, FilterError> {
        let Some(pattern) = &self.regex else {
            return Ok(None);
        };
        self.compiled
            .get_or_try_init(|| Regex::new(pattern))
            .map(Some)
            .map_err(|source| FilterError::InvalidRegex {
                name: self.name.clone(),
                pattern: pattern.clone(),
                source,
            })
    }

    /// Whether the regex has already been compiled
    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Check if a line matches this filter
    pub fn matches(&self, line: &str) -> Result<bool, FilterError> {
        if let Some(substring) = &self.substring
            && line.contains(substring.as_str())
        {
            return Ok(true);
        }
        match self.compile()? {
            Some(re) => Ok(re.is_match(line)),
            None => Ok(false),
        }
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.regex == other.regex
            && self.substring == other.substring
            && self.owner_references == other.owner_references
    }
}

impl Eq for Filter {}

impl AsRef<Filter> for Filter {
    fn as_ref(&self) -> &Filter {
        self
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name)
            .field("regex", &self.regex)
            .field("substring", &self.substring)
            .field("owner_references", &self.owner_references)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_filter() {
        let filter = Filter::substring("oom", "Out of memory");
        assert!(filter.matches("kernel: Out of memory: Killed process 42").unwrap());
        assert!(!filter.matches("kernel: all good").unwrap());
    }

    #[test]
    fn test_regex_compiled_lazily() {
        let filter = Filter::regex("xid", r"NVRM: Xid \(.*\): \d+");
        assert!(!filter.is_compiled());

        assert!(filter.matches("NVRM: Xid (PCI:0000:01:00): 79, pid=1").unwrap());
        assert!(filter.is_compiled());
        assert!(!filter.matches("NVRM: loading").unwrap());
    }

    #[test]
    fn test_invalid_regex_errors_on_use() {
        let filter = Filter::regex("bad", "[invalid");
        let err = filter.matches("anything").unwrap_err();
        assert!(matches!(err, FilterError::InvalidRegex { .. }));
        assert!(filter.validate().is_err());
    }

    #[test]
    fn test_empty_filter_invalid() {
        let filter = Filter {
            name: "nothing".to_string(),
            ..Default::default()
        };
        assert!(matches!(filter.validate(), Err(FilterError::Empty { .. })));
        assert!(!filter.matches("line").unwrap());
    }

    #[test]
    fn test_substring_or_regex() {
        let mut filter = Filter::substring("either", "error");
        filter.regex = Some("^warn".to_string());
        assert!(filter.matches("an error").unwrap());
        assert!(filter.matches("warning: disk").unwrap());
        assert!(!filter.matches("info").unwrap());
    }

    #[test]
    fn test_shared_across_threads() {
        let filter = std::sync::Arc::new(Filter::regex("num", r"\d{3}"));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let filter = filter.clone();
                std::thread::spawn(move || filter.matches(&format!("code {}00", i + 1)).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn test_serde_skips_empty_fields() {
        let filter = Filter::regex("test filter", "test.*");
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, r#"{"name":"test filter","regex":"test.*"}"#);
    }
}
