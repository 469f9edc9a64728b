use crate::{
    error::{ConfigurationError, SheetError},
    service::SheetService,
};

/// Column names from row 1 of the worksheet, in order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderList(Vec<String>);

impl HeaderList {
    pub fn new(headers: Vec<String>) -> Result<Self, ConfigurationError> {
        if headers.is_empty() {
            return Err(ConfigurationError::EmptyHeaderRow);
        }
        Ok(Self(headers))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|h| h == name)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl TryFrom<Vec<String>> for HeaderList {
    type Error = ConfigurationError;

    fn try_from(headers: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(headers)
    }
}

/// Reads the header row on demand. Nothing is cached: the worksheet owns its
/// schema and operators may edit row 1 between two submissions.
pub struct HeaderResolver<'a, S: ?Sized> {
    service: &'a S,
}

impl<'a, S: SheetService + ?Sized> HeaderResolver<'a, S> {
    pub fn new(service: &'a S) -> Self {
        Self { service }
    }

    pub fn resolve(&self) -> Result<HeaderList, SheetError> {
        let headers = self.service.header_row()?;
        tracing::debug!(columns = headers.len(), "header row read");
        Ok(HeaderList::new(headers)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header_row_is_a_configuration_error() {
        assert_eq!(
            HeaderList::new(Vec::new()),
            Err(ConfigurationError::EmptyHeaderRow)
        );
    }

    #[test]
    fn header_order_is_kept() {
        let list = HeaderList::try_from(vec!["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), ["b", "a"]);
        assert!(list.contains("a"));
        assert!(!list.contains("c"));
    }
}
