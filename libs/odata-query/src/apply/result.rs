use serde::Serialize;
use serde_json::Value as Json;

use crate::container::{PropertyContainer, PropertyNameMapper};
use crate::error::ExecutionError;
use crate::truncated::TruncatedCollection;

/// Outcome of applying a query.
#[derive(Clone, Debug)]
pub struct QueryResult {
    pub value: TruncatedCollection<PropertyContainer>,
    /// Filtered, unpaged count when `$count=true`.
    pub total_count: Option<u64>,
    /// `$skiptoken` for the next page when the server page size cut the result.
    pub next_page_cursor: Option<String>,
}

#[derive(Serialize)]
struct Envelope {
    #[serde(rename = "@odata.count", skip_serializing_if = "Option::is_none")]
    count: Option<u64>,
    #[serde(rename = "@odata.nextLink", skip_serializing_if = "Option::is_none")]
    next_link: Option<String>,
    value: Vec<Json>,
}

impl QueryResult {
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.value.is_truncated()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Next-page link: `base` with the skip token appended, or the bare token
    /// when no base is given.
    #[must_use]
    pub fn next_link(&self, base: Option<&str>) -> Option<String> {
        let cursor = self.next_page_cursor.as_deref()?;
        Some(match base {
            Some(base) => {
                let sep = if base.contains('?') { '&' } else { '?' };
                format!("{base}{sep}$skiptoken={}", urlencoding::encode(cursor))
            }
            None => cursor.to_owned(),
        })
    }

    /// Render the response payload.
    ///
    /// # Errors
    /// Returns the [`ExecutionError`] of a failed deferred expansion.
    pub fn to_json(
        &self,
        mapper: &dyn PropertyNameMapper,
        next_link_base: Option<&str>,
    ) -> Result<Json, ExecutionError> {
        let envelope = Envelope {
            count: self.total_count,
            next_link: self.next_link(next_link_base),
            value: self
                .value
                .iter()
                .map(|c| c.to_json(mapper))
                .collect::<Result<_, _>>()?,
        };
        serde_json::to_value(envelope)
            .map_err(|e| ExecutionError::TypeError(format!("cannot serialize result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{IdentityNameMapper, ProjectedValue};
    use odata_edm::Value;
    use serde_json::json;

    #[test]
    fn envelope_carries_count_and_link() {
        let mut c = PropertyContainer::new("Ns.Item".into());
        c.push("Id".into(), ProjectedValue::Value(Value::Int(1)), false);
        let result = QueryResult {
            value: TruncatedCollection::new([c.clone(), c], 1),
            total_count: Some(2),
            next_page_cursor: Some("eyJ2IjoxfQ".to_owned()),
        };
        assert!(result.is_truncated());
        let json = result
            .to_json(&IdentityNameMapper, Some("https://host/odata/Items?$top=5"))
            .unwrap();
        assert_eq!(
            json,
            json!({
                "@odata.count": 2,
                "@odata.nextLink": "https://host/odata/Items?$top=5&$skiptoken=eyJ2IjoxfQ",
                "value": [{"Id": 1}],
            })
        );
        assert_eq!(result.next_link(None).as_deref(), Some("eyJ2IjoxfQ"));
    }
}
