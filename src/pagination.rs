use serde::Serialize;

use crate::models::fhir::{BundleLink, PaginationMeta};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Validated page window. Page numbers are 1-based; sizes are clamped to
/// [1, 1000] with a default of 20.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: i64,
    pub page_size: i64,
}

impl PageParams {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        self.page_size * (self.page - 1)
    }

    pub fn total_pages(&self, count: i64) -> i64 {
        if count <= 0 {
            0
        } else {
            (count + self.page_size - 1) / self.page_size
        }
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Admin list envelope: absolute count plus page-relative navigation URLs.
#[derive(Debug, Serialize)]
pub struct PageEnvelope<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> PageEnvelope<T> {
    pub fn new(count: i64, params: PageParams, base_url: &str, results: Vec<T>) -> Self {
        let total_pages = params.total_pages(count);
        let next = if params.page < total_pages {
            Some(page_url(base_url, params.page + 1, params.page_size))
        } else {
            None
        };
        let previous = if params.page > 1 && params.page <= total_pages {
            Some(page_url(base_url, params.page - 1, params.page_size))
        } else {
            None
        };
        Self {
            count,
            next,
            previous,
            results,
        }
    }
}

fn page_url(base_url: &str, page: i64, page_size: i64) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}page={page}&page_size={page_size}")
}

fn fhir_page_url(base_url: &str, page: i64, count: i64) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}_page={page}&_count={count}")
}

/// Navigation links for a searchset bundle: always self, first and last, with
/// previous/next where the window allows.
pub fn bundle_links(base_url: &str, params: PageParams, count: i64) -> Vec<BundleLink> {
    let total_pages = params.total_pages(count).max(1);
    let mut links = vec![BundleLink {
        relation: "self".to_string(),
        url: fhir_page_url(base_url, params.page, params.page_size),
    }];
    if params.page > 1 {
        links.push(BundleLink {
            relation: "previous".to_string(),
            url: fhir_page_url(base_url, params.page - 1, params.page_size),
        });
    }
    if params.page < total_pages {
        links.push(BundleLink {
            relation: "next".to_string(),
            url: fhir_page_url(base_url, params.page + 1, params.page_size),
        });
    }
    links.push(BundleLink {
        relation: "first".to_string(),
        url: fhir_page_url(base_url, 1, params.page_size),
    });
    links.push(BundleLink {
        relation: "last".to_string(),
        url: fhir_page_url(base_url, total_pages, params.page_size),
    });
    links
}

pub fn pagination_meta(params: PageParams, count: i64) -> PaginationMeta {
    PaginationMeta {
        page: params.page,
        page_size: params.page_size,
        total_pages: params.total_pages(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_clamp_and_default() {
        let params = PageParams::new(None, None);
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 20);

        let params = PageParams::new(Some(0), Some(5000));
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 1000);

        let params = PageParams::new(Some(-3), Some(0));
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, 1);
    }

    #[test]
    fn offset_math() {
        let params = PageParams::new(Some(3), Some(20));
        assert_eq!(params.limit(), 20);
        assert_eq!(params.offset(), 40);
    }

    #[test]
    fn forty_five_rows_make_three_pages() {
        let params = PageParams::new(Some(1), Some(20));
        assert_eq!(params.total_pages(45), 3);
        assert_eq!(params.total_pages(40), 2);
        assert_eq!(params.total_pages(41), 3);
        assert_eq!(params.total_pages(0), 0);
    }

    #[test]
    fn envelope_navigation_over_forty_five_rows() {
        let base = "http://localhost:8000/api/v1/patients";

        let first: PageEnvelope<i64> =
            PageEnvelope::new(45, PageParams::new(Some(1), Some(20)), base, vec![]);
        assert_eq!(first.count, 45);
        assert!(first.previous.is_none());
        assert_eq!(
            first.next.as_deref(),
            Some("http://localhost:8000/api/v1/patients?page=2&page_size=20")
        );

        let middle: PageEnvelope<i64> =
            PageEnvelope::new(45, PageParams::new(Some(2), Some(20)), base, vec![]);
        assert!(middle.previous.is_some());
        assert!(middle.next.is_some());

        let last: PageEnvelope<i64> =
            PageEnvelope::new(45, PageParams::new(Some(3), Some(20)), base, vec![]);
        assert_eq!(
            last.previous.as_deref(),
            Some("http://localhost:8000/api/v1/patients?page=2&page_size=20")
        );
        assert!(last.next.is_none());
    }

    #[test]
    fn envelope_appends_to_existing_query_string() {
        let envelope: PageEnvelope<i64> = PageEnvelope::new(
            45,
            PageParams::new(Some(1), Some(20)),
            "http://localhost:8000/api/v1/patients?organization_id=20001",
            vec![],
        );
        assert_eq!(
            envelope.next.as_deref(),
            Some("http://localhost:8000/api/v1/patients?organization_id=20001&page=2&page_size=20")
        );
    }

    #[test]
    fn bundle_links_on_middle_page() {
        let links = bundle_links(
            "http://localhost:8000/fhir/r5/Patient",
            PageParams::new(Some(2), Some(20)),
            45,
        );
        let relations: Vec<&str> = links.iter().map(|l| l.relation.as_str()).collect();
        assert_eq!(relations, ["self", "previous", "next", "first", "last"]);
        assert!(links[0].url.ends_with("_page=2&_count=20"));
        assert!(links[4].url.ends_with("_page=3&_count=20"));
    }

    #[test]
    fn bundle_links_on_single_page() {
        let links = bundle_links(
            "http://localhost:8000/fhir/r5/Patient",
            PageParams::new(Some(1), Some(20)),
            5,
        );
        let relations: Vec<&str> = links.iter().map(|l| l.relation.as_str()).collect();
        assert_eq!(relations, ["self", "first", "last"]);
    }

    #[test]
    fn meta_reports_total_pages() {
        let meta = pagination_meta(PageParams::new(Some(2), Some(20)), 45);
        assert_eq!(meta.page, 2);
        assert_eq!(meta.page_size, 20);
        assert_eq!(meta.total_pages, 3);
    }
}
