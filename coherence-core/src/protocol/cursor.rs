//! Continuation cursor for paginated scans.

use bytes::Bytes;

/// An opaque server-issued continuation token plus exhaustion flag.
///
/// A cursor advances monotonically: each successful fetch either yields a
/// batch and the next cookie, or marks the cursor exhausted. The owner must
/// serialize access — a cursor is never used by two in-flight fetches.
#[derive(Debug, Clone, Default)]
pub struct PageCursor {
    cookie: Option<Bytes>,
    exhausted: bool,
}

impl PageCursor {
    /// Creates a cursor positioned at the start of a scan.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cookie to send with the next page fetch. `None` at the start of
    /// the scan.
    pub fn cookie(&self) -> Option<&Bytes> {
        self.cookie.as_ref()
    }

    /// Returns `true` once the server has signalled there are no more pages.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Advances the cursor with the cookie returned by a page fetch. A
    /// `None` cookie marks the cursor exhausted.
    pub fn advance(&mut self, next: Option<Bytes>) {
        match next {
            Some(cookie) => self.cookie = Some(cookie),
            None => {
                self.cookie = None;
                self.exhausted = true;
            }
        }
    }
}
