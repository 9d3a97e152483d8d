use futures::stream::{self, Stream, TryStreamExt};
use std::future::Future;

/// One page of a page-token API response.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazily yields the items of every page, requesting the next page only once the
/// previous one is drained. Ends when a page carries no next page token.
/// Calling it again starts over from the first page.
pub fn paginate<T, E, F, Fut>(fetch: F) -> impl Stream<Item = Result<T, E>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
{
    stream::try_unfold((fetch, Cursor::Start), |(mut fetch, cursor)| async move {
        let token = match cursor {
            Cursor::Start => None,
            Cursor::Next(token) => Some(token),
            Cursor::Done => return Ok::<_, E>(None),
        };
        let page = fetch(token).await?;
        let next = match page.next_page_token {
            Some(token) if !token.is_empty() => Cursor::Next(token),
            _ => Cursor::Done,
        };
        let items = stream::iter(page.items.into_iter().map(Ok::<T, E>));
        Ok(Some((items, (fetch, next))))
    })
    .try_flatten()
}
