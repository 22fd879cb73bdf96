//! crates/storyforge_core/src/pages.rs
//!
//! Page re-ordering and deletion. The full target layout is computed up front
//! by pure functions and then applied with a single repository call, so no
//! step ever reads a half-updated page list.

use crate::domain::{Book, Page, PagePlacement};
use crate::ports::{BookRepository, PortError, PortResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Books never shrink below this many pages.
pub const MIN_PAGES: usize = 2;

/// The layout to write after a delete: the surviving placements and the removed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePlan {
    pub placements: Vec<PagePlacement>,
    pub removed: Uuid,
}

/// Numbers pages 0..n in the given order; the page at index 0 is the title page.
fn place_in_order(order: &[Uuid]) -> Vec<PagePlacement> {
    order
        .iter()
        .enumerate()
        .map(|(i, id)| PagePlacement {
            page_id: *id,
            index: i as u32,
            page_number: i as u32 + 1,
            is_title_page: i == 0,
        })
        .collect()
}

/// Plans a re-order. `ordered_ids` must name every page of the book exactly
/// once and keep the current title page first.
pub fn plan_reorder(pages: &[Page], ordered_ids: &[Uuid]) -> PortResult<Vec<PagePlacement>> {
    let current: HashSet<Uuid> = pages.iter().map(|p| p.id).collect();
    let requested: HashSet<Uuid> = ordered_ids.iter().copied().collect();

    if requested.len() != ordered_ids.len() {
        return Err(PortError::Validation(
            "page order lists a page more than once".to_string(),
        ));
    }
    if current != requested {
        return Err(PortError::Validation(
            "page order must contain exactly the book's pages".to_string(),
        ));
    }

    let title_id = pages
        .iter()
        .find(|p| p.is_title_page)
        .map(|p| p.id)
        .ok_or_else(|| PortError::InvalidState("book has no title page".to_string()))?;
    if ordered_ids.first() != Some(&title_id) {
        return Err(PortError::Validation(
            "the title page must stay at the front of the book".to_string(),
        ));
    }

    Ok(place_in_order(ordered_ids))
}

/// Plans a delete: rejects the cover page and any delete that would leave
/// fewer than `MIN_PAGES`, then re-indexes the survivors in their current order.
pub fn plan_delete(book: &Book, pages: &[Page], page_id: Uuid) -> PortResult<DeletePlan> {
    let target = pages
        .iter()
        .find(|p| p.id == page_id)
        .ok_or_else(|| PortError::NotFound(format!("Page {} not found in book", page_id)))?;

    let is_cover = target.is_title_page
        || (book.cover_asset_id.is_some() && target.asset_id == book.cover_asset_id);
    if is_cover {
        return Err(PortError::InvalidState(
            "the cover page cannot be deleted".to_string(),
        ));
    }
    if pages.len() - 1 < MIN_PAGES {
        return Err(PortError::InvalidState(format!(
            "a book needs at least {} pages",
            MIN_PAGES
        )));
    }

    let mut ordered: Vec<&Page> = pages.iter().filter(|p| p.id != page_id).collect();
    ordered.sort_by_key(|p| p.index);
    let order: Vec<Uuid> = ordered.iter().map(|p| p.id).collect();

    Ok(DeletePlan {
        placements: place_in_order(&order),
        removed: page_id,
    })
}

//=========================================================================================
// Page Editor
//=========================================================================================

/// Applies re-order and delete plans for the book's owner.
#[derive(Clone)]
pub struct PageEditor {
    books: Arc<dyn BookRepository>,
}

impl PageEditor {
    pub fn new(books: Arc<dyn BookRepository>) -> Self {
        Self { books }
    }

    async fn owned_book(&self, book_id: Uuid, user_id: Uuid) -> PortResult<Book> {
        let book = self.books.get_book(book_id).await?;
        if book.user_id != user_id {
            return Err(PortError::Unauthorized);
        }
        Ok(book)
    }

    pub async fn reorder(
        &self,
        book_id: Uuid,
        user_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> PortResult<Vec<PagePlacement>> {
        self.owned_book(book_id, user_id).await?;
        let pages = self.books.get_pages(book_id).await?;
        let placements = plan_reorder(&pages, ordered_ids)?;
        self.books
            .apply_page_layout(book_id, &placements, &[])
            .await?;
        info!(%book_id, pages = placements.len(), "pages re-ordered");
        Ok(placements)
    }

    pub async fn delete(
        &self,
        book_id: Uuid,
        user_id: Uuid,
        page_id: Uuid,
    ) -> PortResult<Vec<PagePlacement>> {
        let book = self.owned_book(book_id, user_id).await?;
        let pages = self.books.get_pages(book_id).await?;
        let plan = plan_delete(&book, &pages, page_id)?;
        self.books
            .apply_page_layout(book_id, &plan.placements, &[plan.removed])
            .await?;
        info!(%book_id, %page_id, remaining = plan.placements.len(), "page deleted");
        Ok(plan.placements)
    }
}
