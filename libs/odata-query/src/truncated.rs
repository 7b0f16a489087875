//! Page-bounded collections.

use serde::{Serialize, Serializer};

/// At most `page_size` items of a source, remembering whether more existed.
///
/// Construction pulls at most `page_size + 1` items, so an unbounded source
/// is never exhausted.
#[derive(Clone, Debug, PartialEq)]
pub struct TruncatedCollection<T> {
    items: Vec<T>,
    page_size: Option<usize>,
    truncated: bool,
    total_count: Option<u64>,
}

impl<T> TruncatedCollection<T> {
    pub fn new(source: impl IntoIterator<Item = T>, page_size: usize) -> Self {
        let mut items: Vec<T> = source.into_iter().take(page_size.saturating_add(1)).collect();
        let truncated = items.len() > page_size;
        items.truncate(page_size);
        Self {
            items,
            page_size: Some(page_size),
            truncated,
            total_count: None,
        }
    }

    /// Like [`TruncatedCollection::new`] over a fallible source; stops at the
    /// first error.
    ///
    /// # Errors
    /// Returns the first error the source yields within the peeked window.
    pub fn try_new<E>(
        source: impl IntoIterator<Item = Result<T, E>>,
        page_size: usize,
    ) -> Result<Self, E> {
        let mut items = source
            .into_iter()
            .take(page_size.saturating_add(1))
            .collect::<Result<Vec<T>, E>>()?;
        let truncated = items.len() > page_size;
        items.truncate(page_size);
        Ok(Self {
            items,
            page_size: Some(page_size),
            truncated,
            total_count: None,
        })
    }

    /// Everything from `source`; never truncated.
    pub fn unbounded(source: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: source.into_iter().collect(),
            page_size: None,
            truncated: false,
            total_count: None,
        }
    }

    #[must_use]
    pub const fn with_total_count(mut self, count: u64) -> Self {
        self.total_count = Some(count);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.truncated
    }

    #[must_use]
    pub const fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    #[must_use]
    pub const fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Map items, keeping page metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> TruncatedCollection<U> {
        TruncatedCollection {
            items: self.items.into_iter().map(f).collect(),
            page_size: self.page_size,
            truncated: self.truncated,
            total_count: self.total_count,
        }
    }

    /// Fallible [`TruncatedCollection::map`].
    ///
    /// # Errors
    /// Returns the first error produced by `f`.
    pub fn try_map<U, E>(
        self,
        f: impl FnMut(T) -> Result<U, E>,
    ) -> Result<TruncatedCollection<U>, E> {
        Ok(TruncatedCollection {
            items: self.items.into_iter().map(f).collect::<Result<_, E>>()?,
            page_size: self.page_size,
            truncated: self.truncated,
            total_count: self.total_count,
        })
    }
}

impl<T> IntoIterator for TruncatedCollection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a TruncatedCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Serializes as the plain item sequence; page metadata travels separately.
impl<T: Serialize> Serialize for TruncatedCollection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peeks_one_item_ahead() {
        let mut pulled = 0;
        let source = (0..).inspect(|_| pulled += 1);
        let page = TruncatedCollection::new(source, 3);
        assert_eq!(page.as_slice(), &[0, 1, 2]);
        assert!(page.is_truncated());
        assert_eq!(pulled, 4);
    }

    #[test]
    fn exact_fit_is_not_truncated() {
        let page = TruncatedCollection::new(vec![1, 2, 3], 3);
        assert_eq!(page.len(), 3);
        assert!(!page.is_truncated());
    }

    #[test]
    fn try_new_stops_at_error() {
        let source = vec![Ok(1), Err("boom"), Ok(3)];
        assert_eq!(TruncatedCollection::try_new(source, 5).unwrap_err(), "boom");
        let ok: Result<_, &str> = TruncatedCollection::try_new(vec![Ok(1), Ok(2)], 1);
        assert!(ok.unwrap().is_truncated());
    }

    #[test]
    fn map_keeps_metadata() {
        let page = TruncatedCollection::new(1..=5, 2).with_total_count(5).map(|i| i * 10);
        assert_eq!(page.as_slice(), &[10, 20]);
        assert!(page.is_truncated());
        assert_eq!(page.total_count(), Some(5));
        assert_eq!(serde_json::to_string(&page).unwrap(), "[10,20]");
    }
}
