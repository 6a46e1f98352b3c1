//! LIMIT/OFFSET pagination
//!
//! Backend-independent loops; the wrappers supply the per-page query.

use std::future::Future;

use crate::error::Result;

/// Fetch pages at increasing offsets until a page comes back shorter than
/// `limit`. In fast debug mode only the first page is fetched.
pub async fn fetch_paged<T, F, Fut>(limit: usize, fast_debug: bool, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let limit = limit.max(1);
    let mut rows = Vec::new();
    let mut offset = 0;

    loop {
        let page = fetch_page(offset).await?;
        let received = page.len();
        rows.extend(page);
        offset += received;

        if received < limit || fast_debug {
            break;
        }
    }

    tracing::debug!("Fetched {} rows", rows.len());
    Ok(rows)
}

/// Repeat a LIMIT-ed delete until it removes fewer than `limit` rows.
/// Returns the total number of removed rows.
pub async fn delete_paged<F, Fut>(limit: usize, fast_debug: bool, mut delete_batch: F) -> Result<u64>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<u64>>,
{
    let limit = limit.max(1) as u64;
    let mut total = 0;

    loop {
        let affected = delete_batch().await?;
        total += affected;
        if affected > 0 {
            tracing::debug!("Successful Delete {} records", affected);
        }

        if affected < limit || fast_debug {
            break;
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_fetch_paged_walks_offsets() {
        let data: Vec<u32> = (0..25).collect();
        let offsets = RefCell::new(Vec::new());

        let rows = fetch_paged(10, false, |offset| {
            offsets.borrow_mut().push(offset);
            let page: Vec<u32> = data.iter().skip(offset).take(10).copied().collect();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(rows, data);
        assert_eq!(*offsets.borrow(), vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn test_fetch_paged_exact_multiple_needs_empty_page() {
        let calls = RefCell::new(0);
        let rows = fetch_paged(5, false, |offset| {
            *calls.borrow_mut() += 1;
            let page: Vec<usize> = (offset..10).take(5).collect();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(rows.len(), 10);
        assert_eq!(*calls.borrow(), 3);
    }

    #[tokio::test]
    async fn test_fetch_paged_fast_debug_single_page() {
        let rows = fetch_paged(3, true, |offset| async move { Ok(vec![offset; 3]) })
            .await
            .unwrap();
        assert_eq!(rows, vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_fetch_paged_propagates_errors() {
        let result: Result<Vec<u8>> = fetch_paged(3, false, |_| async {
            Err(crate::Error::sql_query("db", "SELECT 1", None, "gone"))
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_paged_until_short_batch() {
        let remaining = RefCell::new(23u64);
        let total = delete_paged(10, false, || {
            let mut left = remaining.borrow_mut();
            let n = (*left).min(10);
            *left -= n;
            async move { Ok(n) }
        })
        .await
        .unwrap();

        assert_eq!(total, 23);
        assert_eq!(*remaining.borrow(), 0);
    }

    #[tokio::test]
    async fn test_delete_paged_fast_debug_single_batch() {
        let total = delete_paged(10, true, || async { Ok(10) }).await.unwrap();
        assert_eq!(total, 10);
    }
}
