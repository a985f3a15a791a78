use serde::Serialize;
use std::collections::HashSet;

/// Checked rows of the rendered page.
///
/// The selected set is always a subset of the rendered ids: ids outside the
/// page are ignored on select and pruned whenever the page is re-rendered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    rendered: Vec<String>,
    selected: HashSet<String>,
}

/// Header checkbox state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Unchecked,
    Indeterminate,
    Checked,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rendered ids after a list refresh, keeping only the
    /// selected ids that are still on screen.
    pub fn set_rendered<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        self.rendered = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        self.selected.retain(|id| seen.contains(id));
    }

    /// Filter or page change: new rows, empty selection.
    pub fn reset<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected.clear();
        self.set_rendered(ids);
    }

    /// Returns whether membership changed. Ids not on the page are ignored.
    pub fn select_item(&mut self, id: &str, selected: bool) -> bool {
        if !self.rendered.iter().any(|r| r == id) {
            return false;
        }
        if selected {
            self.selected.insert(id.to_string())
        } else {
            self.selected.remove(id)
        }
    }

    pub fn toggle(&mut self, id: &str) -> bool {
        let selected = !self.is_selected(id);
        self.select_item(id, selected)
    }

    pub fn select_all(&mut self, selected: bool) {
        if selected {
            self.selected = self.rendered.iter().cloned().collect();
        } else {
            self.selected.clear();
        }
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn count(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn all_selected(&self) -> bool {
        !self.rendered.is_empty() && self.selected.len() == self.rendered.len()
    }

    pub fn some_selected(&self) -> bool {
        !self.selected.is_empty() && self.selected.len() < self.rendered.len()
    }

    pub fn check_state(&self) -> CheckState {
        if self.all_selected() {
            CheckState::Checked
        } else if self.some_selected() {
            CheckState::Indeterminate
        } else {
            CheckState::Unchecked
        }
    }

    /// Selected ids in rendered order.
    pub fn ids(&self) -> Vec<String> {
        self.rendered
            .iter()
            .filter(|id| self.selected.contains(*id))
            .cloned()
            .collect()
    }

    pub fn rendered(&self) -> &[String] {
        &self.rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(ids: &[&str]) -> Selection {
        let mut selection = Selection::new();
        selection.set_rendered(ids.iter().copied());
        selection
    }

    fn assert_subset(selection: &Selection) {
        for id in selection.ids() {
            assert!(selection.rendered().contains(&id), "{id} is not rendered");
        }
        assert!(selection.count() <= selection.rendered().len());
    }

    #[test]
    fn ignores_ids_outside_the_page() {
        let mut selection = page(&["a", "b"]);
        assert!(!selection.select_item("z", true));
        assert_eq!(selection.count(), 0);
    }

    #[test]
    fn refresh_prunes_stale_ids() {
        let mut selection = page(&["a", "b", "c"]);
        selection.select_item("a", true);
        selection.select_item("c", true);
        selection.set_rendered(["c", "d"]);
        assert_eq!(selection.ids(), vec!["c".to_string()]);
        assert_subset(&selection);
    }

    #[test]
    fn select_all_and_derived_flags() {
        let mut selection = page(&["a", "b", "c"]);
        assert_eq!(selection.check_state(), CheckState::Unchecked);

        selection.select_item("b", true);
        assert!(selection.some_selected());
        assert!(!selection.all_selected());
        assert_eq!(selection.check_state(), CheckState::Indeterminate);

        selection.select_all(true);
        assert!(selection.all_selected());
        assert!(!selection.some_selected());
        assert_eq!(selection.count(), 3);

        selection.select_all(false);
        assert_eq!(selection.count(), 0);
    }

    #[test]
    fn empty_page_is_never_all_selected() {
        let mut selection = page(&[]);
        selection.select_all(true);
        assert!(!selection.all_selected());
        assert!(!selection.some_selected());
    }

    #[test]
    fn reset_clears_selection() {
        let mut selection = page(&["a", "b"]);
        selection.select_all(true);
        selection.reset(["a", "b", "c"]);
        assert!(selection.is_empty());
        assert_eq!(selection.rendered().len(), 3);
    }

    #[test]
    fn ids_follow_rendered_order() {
        let mut selection = page(&["c", "a", "b"]);
        selection.select_item("b", true);
        selection.select_item("c", true);
        assert_eq!(selection.ids(), vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn random_walk_keeps_subset_invariant() {
        let pages: [&[&str]; 4] = [&["a", "b", "c"], &["b", "c", "d"], &["e"], &["a", "e"]];
        let mut selection = Selection::new();
        for (step, ids) in pages.iter().cycle().take(12).enumerate() {
            selection.set_rendered(ids.iter().copied());
            assert_subset(&selection);
            for (i, id) in ids.iter().enumerate() {
                selection.select_item(id, (step + i) % 2 == 0);
            }
            selection.select_item("zz", true);
            assert_subset(&selection);
        }
    }
}
