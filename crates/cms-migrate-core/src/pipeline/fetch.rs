//! Page walker for listing endpoints.

use crate::cms::{MigratedReader, Page, RecordSource};
use crate::record::{SourceRecord, TargetRecord};
use crate::{MigrateError, Result};
use std::future::Future;
use tracing::{debug, info};

/// Walk pages starting at 1 until the listing is exhausted.
///
/// An explicit `has_more` signal wins. Without one, a page shorter than
/// `page_size` ends the walk. Any page failure fails the whole walk.
pub async fn fetch_all_pages<T, F, Fut>(page_size: u32, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    if page_size == 0 {
        return Err(MigrateError::config("page size must be at least 1"));
    }

    let mut items = Vec::new();
    let mut page = 1;

    loop {
        let Page {
            items: batch,
            has_more,
        } = fetch_page(page).await?;
        let count = batch.len();
        items.extend(batch);
        debug!("Fetched page {} ({} items)", page, count);

        let more = match has_more {
            Some(more) => more && count > 0,
            None => count == page_size as usize,
        };
        if !more {
            break;
        }
        page += 1;
    }

    Ok(items)
}

/// Fetch every record from the source.
pub async fn fetch_all(source: &dyn RecordSource, page_size: u32) -> Result<Vec<SourceRecord>> {
    let records = fetch_all_pages(page_size, |page| source.fetch_page(page, page_size)).await?;
    info!("Fetched {} source records", records.len());
    Ok(records)
}

/// Fetch every record already present in the target.
pub async fn fetch_all_migrated(
    reader: &dyn MigratedReader,
    page_size: u32,
) -> Result<Vec<TargetRecord>> {
    let records =
        fetch_all_pages(page_size, |page| reader.fetch_migrated_page(page, page_size)).await?;
    info!("Fetched {} target records", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceSchema;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSource {
        total: u32,
        report_has_more: bool,
        fail_on_page: Option<u32>,
        calls: AtomicU32,
    }

    impl FakeSource {
        fn new(total: u32) -> Self {
            Self {
                total,
                report_has_more: false,
                fail_on_page: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordSource for FakeSource {
        async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Page<SourceRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on_page == Some(page) {
                return Err(MigrateError::Network {
                    message: "connection reset".into(),
                    cause: None,
                });
            }
            let start = (page - 1) * page_size;
            let end = (start + page_size).min(self.total);
            let items = (start..end)
                .map(|i| SourceRecord::new(u64::from(i) + 1, SourceSchema::StrapiArticle, format!("Post {i}")))
                .collect();
            let page_count = self.total.div_ceil(page_size);
            let has_more = self.report_has_more.then_some(page < page_count);
            Ok(Page::new(items, has_more))
        }
    }

    #[tokio::test]
    async fn test_exact_multiple_issues_trailing_request() {
        let source = FakeSource::new(50);
        let records = fetch_all(&source, 25).await.unwrap();

        assert_eq!(records.len(), 50);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(records[49].id, 50);
    }

    #[tokio::test]
    async fn test_short_page_stops() {
        let source = FakeSource::new(30);
        let records = fetch_all(&source, 25).await.unwrap();

        assert_eq!(records.len(), 30);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_source_single_request() {
        let source = FakeSource::new(0);
        let records = fetch_all(&source, 25).await.unwrap();

        assert!(records.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_has_more_signal_avoids_trailing_request() {
        let source = FakeSource {
            report_has_more: true,
            ..FakeSource::new(50)
        };
        let records = fetch_all(&source, 25).await.unwrap();

        assert_eq!(records.len(), 50);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mid_walk_failure_returns_no_partial_results() {
        let source = FakeSource {
            fail_on_page: Some(2),
            ..FakeSource::new(60)
        };
        let result = fetch_all(&source, 25).await;

        assert!(matches!(result, Err(MigrateError::Network { .. })));
    }

    #[tokio::test]
    async fn test_zero_page_size_rejected() {
        let source = FakeSource::new(5);
        assert!(fetch_all(&source, 0).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
