//! # Custom Extractors & Validation
//!
//! The [`Validate`] trait for request DTOs, helpers that turn axum's
//! JSON/query rejections into [`AppError::BadRequest`], and pagination.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::Json;
use linkex_core::ValidationError;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::AppError;
use crate::routes::wallet::TransactionView;
use crate::state::{ListingRecord, OrderRecord};

/// Request types that check business rules beyond what serde checks.
pub trait Validate {
    /// Validate business rules.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate()?;
    Ok(value)
}

/// Extract query parameters, mapping parse errors to [`AppError::BadRequest`].
pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

// ── Pagination ──────────────────────────────────────────────────────────────

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// `?page=&per_page=` query parameters. Pages are 1-based.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// Page number, starting at 1.
    pub page: Option<u32>,
    /// Items per page (default 20, max 100).
    pub per_page: Option<u32>,
}

impl PageParams {
    /// Resolved `(page, per_page)`, clamped to valid ranges.
    pub fn resolve(&self) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[aliases(
    ListingPage = Page<ListingRecord>,
    OrderPage = Page<OrderRecord>,
    TransactionPage = Page<TransactionView>
)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    /// Total items across all pages.
    pub total: usize,
}

impl<T> Page<T> {
    /// Slice an already filtered and sorted list.
    pub fn paginate(items: Vec<T>, params: &PageParams) -> Self {
        let (page, per_page) = params.resolve();
        let total = items.len();
        let start = ((page - 1) as usize).saturating_mul(per_page as usize);
        let items = items
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .collect();
        Self {
            items,
            page,
            per_page,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Body {
        name: String,
    }

    impl Validate for Body {
        fn validate(&self) -> Result<(), ValidationError> {
            linkex_core::validate_text("name", &self.name, 1, 10).map(|_| ())
        }
    }

    #[test]
    fn validated_json_maps_failures_to_422() {
        let err = extract_validated_json(Ok(Json(Body {
            name: "   ".into(),
        })))
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let ok = extract_validated_json(Ok(Json(Body { name: "ok".into() }))).unwrap();
        assert_eq!(ok.name, "ok");
    }

    #[test]
    fn page_params_defaults_and_clamps() {
        assert_eq!(PageParams::default().resolve(), (1, 20));
        let p = PageParams {
            page: Some(0),
            per_page: Some(1_000),
        };
        assert_eq!(p.resolve(), (1, 100));
    }

    #[test]
    fn paginate_slices_and_counts() {
        let items: Vec<u32> = (0..45).collect();
        let p = PageParams {
            page: Some(3),
            per_page: Some(20),
        };
        let page = Page::paginate(items, &p);
        assert_eq!(page.items, (40..45).collect::<Vec<_>>());
        assert_eq!(page.total, 45);
        assert_eq!(page.page, 3);
    }

    #[test]
    fn page_past_end_is_empty() {
        let page = Page::paginate(vec![1, 2, 3], &PageParams {
            page: Some(9),
            per_page: None,
        });
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }
}
