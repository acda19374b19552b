pub mod attendance;
pub mod benefit;
pub mod dashboard;
pub mod employee;
pub mod leave_request;
pub mod organization;
pub mod user;

/// `(page, per_page, offset)` with page >= 1 and per_page clamped to 1..=100.
pub fn page_window(page: Option<u32>, per_page: Option<u32>, default_per_page: u32) -> (u32, u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(default_per_page).clamp(1, 100);
    (page, per_page, (page - 1) * per_page)
}

#[cfg(test)]
mod tests {
    use super::page_window;

    #[test]
    fn page_window_clamps_inputs() {
        assert_eq!(page_window(None, None, 20), (1, 20, 0));
        assert_eq!(page_window(Some(0), Some(500), 20), (1, 100, 0));
        assert_eq!(page_window(Some(3), Some(10), 20), (3, 10, 20));
        assert_eq!(page_window(Some(2), Some(0), 20), (2, 1, 1));
    }
}
