use std::future::Future;

use futures::future::{select_all, try_join_all};

use crate::{Error, Result};

/// Waits for every call. Fails with the first rejection, otherwise yields
/// the results in input order.
pub async fn all<I, F, T>(calls: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    try_join_all(calls).await
}

/// Settles with whichever call settles first, success or failure. The
/// remaining calls are dropped.
pub async fn race<I, F, T>(calls: I) -> Result<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T>>,
{
    let calls: Vec<_> = calls.into_iter().map(Box::pin).collect();
    if calls.is_empty() {
        return Err(Error::build("race needs at least one call"));
    }
    let (settled, _, _) = select_all(calls).await;
    settled
}
