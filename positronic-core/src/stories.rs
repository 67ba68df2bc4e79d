//! Watermark-bounded iteration over a paginated [`ContentSource`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::contract::{ContentSource, Story};
use crate::error::ApiError;

/// Lazily walks the shared-stories feed page by page, newest first, yielding only stories
/// shared strictly after `newer_than`.
///
/// Ends (with `Ok(None)`) at the first story at or before the watermark, or at the first empty
/// page. Once ended it stays ended. Source errors are returned as-is and not retried.
pub struct SharedStories<'a, S: ContentSource + ?Sized> {
    source: &'a S,
    newer_than: Option<DateTime<Utc>>,
    next_page: u32,
    buffer: VecDeque<Story>,
    ended: bool,
}

impl<'a, S: ContentSource + ?Sized> SharedStories<'a, S> {
    /// `newer_than = None` drains the whole feed.
    pub fn new(source: &'a S, newer_than: Option<DateTime<Utc>>) -> Self {
        Self {
            source,
            newer_than,
            next_page: 1,
            buffer: VecDeque::new(),
            ended: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Story>, ApiError> {
        if self.ended {
            return Ok(None);
        }

        if self.buffer.is_empty() {
            let page = self.next_page;
            let stories = self.source.shared_stories(page).await?;
            self.next_page += 1;
            if stories.is_empty() {
                tracing::debug!(page, "Shared stories exhausted on empty page");
                self.ended = true;
                return Ok(None);
            }
            self.buffer.extend(stories);
        }

        let Some(story) = self.buffer.pop_front() else {
            self.ended = true;
            return Ok(None);
        };

        if let Some(watermark) = self.newer_than {
            if story.shared_date <= watermark {
                tracing::debug!(
                    watermark = %watermark,
                    shared_date = %story.shared_date,
                    "Reached checkpoint, no newer stories"
                );
                self.ended = true;
                self.buffer.clear();
                return Ok(None);
            }
        }

        Ok(Some(story))
    }

    /// Number of pages requested so far.
    pub fn pages_fetched(&self) -> u32 {
        self.next_page - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockContentSource;
    use chrono::TimeZone;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn story(title: &str, day: u32) -> Story {
        Story {
            id: title.to_string(),
            title: title.to_string(),
            permalink: format!("https://example.com/{title}"),
            comment: String::new(),
            shared_date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        }
    }

    async fn drain<S: ContentSource>(it: &mut SharedStories<'_, S>) -> Vec<String> {
        let mut titles = Vec::new();
        while let Some(st) = it.next().await.unwrap() {
            titles.push(st.title);
        }
        titles
    }

    #[tokio::test]
    async fn yields_prefix_newer_than_watermark() {
        let mut source = MockContentSource::new();
        source
            .expect_shared_stories()
            .with(eq(1u32))
            .times(1)
            .returning(|_| Ok(vec![story("d", 9), story("c", 7), story("b", 5), story("a", 3)]));

        let watermark = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();
        let mut it = SharedStories::new(&source, Some(watermark));
        assert_eq!(drain(&mut it).await, vec!["d", "c"]);
        // Ended iterators never call the source again.
        assert!(it.next().await.unwrap().is_none());
        assert_eq!(it.pages_fetched(), 1);
    }

    #[tokio::test]
    async fn paginates_until_empty_page_without_watermark() {
        let mut source = MockContentSource::new();
        let mut seq = Sequence::new();
        source
            .expect_shared_stories()
            .with(eq(1u32))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![story("c", 9), story("b", 8)]));
        source
            .expect_shared_stories()
            .with(eq(2u32))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![story("a", 2)]));
        source
            .expect_shared_stories()
            .with(eq(3u32))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![]));

        let mut it = SharedStories::new(&source, None);
        assert_eq!(drain(&mut it).await, vec!["c", "b", "a"]);
        assert!(it.next().await.unwrap().is_none());
        assert_eq!(it.pages_fetched(), 3);
    }

    #[tokio::test]
    async fn watermark_equal_to_story_date_ends_iteration() {
        let mut source = MockContentSource::new();
        source
            .expect_shared_stories()
            .times(1)
            .returning(|_| Ok(vec![story("b", 4), story("a", 3)]));

        let watermark = Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap();
        let mut it = SharedStories::new(&source, Some(watermark));
        assert!(it.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn source_errors_propagate() {
        let mut source = MockContentSource::new();
        source
            .expect_shared_stories()
            .times(1)
            .returning(|_| Err(ApiError::Decode("bad json".into())));

        let mut it = SharedStories::new(&source, None);
        assert!(matches!(it.next().await, Err(ApiError::Decode(_))));
    }
}
