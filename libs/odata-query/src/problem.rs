//! Mapping from query errors to an RFC 9457 problem document (pure data).
//!
//! The host framework adds instance paths and trace ids before turning the
//! problem into an HTTP response.

use serde::Serialize;

use crate::error::{Error, ExecutionError, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
}

impl Problem {
    fn new(code: &str, title: &str, err: &Error) -> Self {
        Self {
            type_url: format!("about:blank#odata.{code}"),
            title: title.to_owned(),
            status: err.status().as_u16(),
            detail: err.to_string(),
            code: format!("odata.{code}"),
        }
    }
}

impl From<&Error> for Problem {
    fn from(err: &Error) -> Self {
        match err {
            Error::Parse(p) => match p.option.as_str() {
                "$filter" => Problem::new("invalid_filter", "Invalid Filter", err),
                "$orderby" => Problem::new("invalid_orderby", "Invalid OrderBy", err),
                "$skiptoken" => Problem::new("invalid_cursor", "Invalid Cursor", err),
                _ => Problem::new("invalid_query", "Invalid Query", err),
            },
            Error::Bind(_) => Problem::new("invalid_query", "Invalid Query", err),
            Error::Validation(ValidationError::SkipTokenMismatch(_)) => {
                Problem::new("invalid_cursor", "Invalid Cursor", err)
            }
            Error::Validation(_) => Problem::new("query_not_allowed", "Query Not Allowed", err),
            // Evaluation details can leak data; keep the detail generic.
            Error::Execution(ExecutionError::Cancelled | ExecutionError::TimedOut(_)) => {
                Problem::new("cancelled", "Query Cancelled", err)
            }
            Error::Execution(_) => Problem {
                detail: "An internal error occurred while processing the OData query".to_owned(),
                ..Problem::new("internal", "Internal Error", err)
            },
        }
    }
}

impl From<Error> for Problem {
    fn from(err: Error) -> Self {
        Problem::from(&err)
    }
}
