// passage_proxy::edit
//
// Position-keyed text edits.  The CSS and JavaScript rewriters never
// re-serialize what they parse; they record byte ranges of the original
// source and the text to put there, then splice everything in one pass.
// Bytes outside an edited range come through untouched.

/// A pending replacement of `source[start..end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Ordered, non-overlapping set of edits against one source string.
#[derive(Debug, Default)]
pub struct EditList {
    edits: Vec<Edit>,
}

impl EditList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a replacement.  Ranges that overlap an already recorded edit
    /// are dropped; the first edit for a span wins.
    pub fn replace(&mut self, start: usize, end: usize, text: impl Into<String>) {
        if start >= end {
            return;
        }
        let overlaps = self
            .edits
            .iter()
            .any(|e| start < e.end && e.start < end);
        if overlaps {
            return;
        }
        self.edits.push(Edit {
            start,
            end,
            text: text.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Splice all edits into `source`.
    ///
    /// Edits that fall outside the source or off a char boundary are
    /// skipped rather than panicking.
    pub fn apply(mut self, source: &str) -> String {
        self.edits.sort_by_key(|e| e.start);

        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        for edit in &self.edits {
            if edit.end > source.len()
                || !source.is_char_boundary(edit.start)
                || !source.is_char_boundary(edit.end)
            {
                continue;
            }
            out.push_str(&source[cursor..edit.start]);
            out.push_str(&edit.text);
            cursor = edit.end;
        }
        out.push_str(&source[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_out_of_order_edits() {
        let mut edits = EditList::new();
        edits.replace(6, 11, "there");
        edits.replace(0, 5, "HELLO");
        assert_eq!(edits.apply("hello world!"), "HELLO there!");
    }

    #[test]
    fn overlapping_edit_is_dropped() {
        let mut edits = EditList::new();
        edits.replace(2, 6, "x");
        edits.replace(4, 8, "y");
        edits.replace(2, 6, "z");
        assert_eq!(edits.len(), 1);
        assert_eq!(edits.apply("0123456789"), "01x6789");
    }

    #[test]
    fn adjacent_edits_both_apply() {
        let mut edits = EditList::new();
        edits.replace(0, 2, "a");
        edits.replace(2, 4, "b");
        assert_eq!(edits.apply("wxyz"), "ab");
    }

    #[test]
    fn out_of_range_edit_is_ignored() {
        let mut edits = EditList::new();
        edits.replace(3, 50, "nope");
        assert_eq!(edits.apply("short"), "short");
    }

    #[test]
    fn no_edits_returns_source() {
        assert!(EditList::new().is_empty());
        assert_eq!(EditList::new().apply("same"), "same");
    }
}
