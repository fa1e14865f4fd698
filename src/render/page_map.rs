//! Mapping between user pages and document pages
//!
//! A document can be shown with a custom page order such as
//! `[0, 4, 4, 6, 6, 6, 3]`. Consecutive duplicates collapse into one laid out
//! page, so the strip contains `[0, 4, 6, 3]` and user page 2 is drawn at
//! layout slot 1.

/// Page ordering for a loaded document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageMap {
    document_pages: usize,
    order: Option<Order>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Order {
    original: Vec<usize>,
    filtered: Vec<usize>,
    indexes: Vec<usize>,
}

impl PageMap {
    /// Identity mapping over `document_pages` pages
    #[must_use]
    pub fn identity(document_pages: usize) -> Self {
        Self {
            document_pages,
            order: None,
        }
    }

    /// Custom page order. An empty order falls back to the identity mapping.
    #[must_use]
    pub fn with_order(document_pages: usize, user_pages: Vec<usize>) -> Self {
        if user_pages.is_empty() {
            return Self::identity(document_pages);
        }

        let filtered = dedup_consecutive(&user_pages);
        let indexes = indexes_in_deduplicated(&user_pages);
        Self {
            document_pages,
            order: Some(Order {
                original: user_pages,
                filtered,
                indexes,
            }),
        }
    }

    /// Number of pages the user can navigate to
    #[must_use]
    pub fn page_count(&self) -> usize {
        match &self.order {
            Some(order) => order.original.len(),
            None => self.document_pages,
        }
    }

    /// Number of pages laid out on the strip
    #[must_use]
    pub fn layout_len(&self) -> usize {
        match &self.order {
            Some(order) => order.filtered.len(),
            None => self.document_pages,
        }
    }

    #[must_use]
    pub fn document_pages(&self) -> usize {
        self.document_pages
    }

    /// Physical page shown at layout slot `slot`, if any
    #[must_use]
    pub fn document_page(&self, slot: usize) -> Option<usize> {
        let page = match &self.order {
            Some(order) => *order.filtered.get(slot)?,
            None => slot,
        };
        (page < self.document_pages).then_some(page)
    }

    /// Layout slot of a user page. `user_page` must already be clamped.
    #[must_use]
    pub fn layout_slot(&self, user_page: usize) -> usize {
        match &self.order {
            Some(order) => order
                .indexes
                .get(user_page)
                .copied()
                .unwrap_or_else(|| order.filtered.len().saturating_sub(1)),
            None => user_page,
        }
    }

    /// Restrict a requested page to an existing one (`-2` → `0`, past the
    /// end → last page)
    #[must_use]
    pub fn clamp(&self, user_page: i64) -> usize {
        if user_page <= 0 {
            return 0;
        }
        let last = self.page_count().saturating_sub(1);
        (user_page as usize).min(last)
    }
}

/// `(0, 1, 2, 2, 3)` → `(0, 1, 2, 3)`
fn dedup_consecutive(pages: &[usize]) -> Vec<usize> {
    let mut result = pages.to_vec();
    result.dedup();
    result
}

/// `(0, 4, 4, 6, 6, 6, 3)` → `(0, 1, 1, 2, 2, 2, 3)`
fn indexes_in_deduplicated(pages: &[usize]) -> Vec<usize> {
    let mut index = 0;
    pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            if i > 0 && pages[i - 1] != *page {
                index += 1;
            }
            index
        })
        .collect()
}
