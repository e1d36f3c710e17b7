/// One selectable row: `key` is what filtering matches against, `label` is
/// what gets printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub key: String,
    pub label: String,
}

impl MenuItem {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Outcome of one menu prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Index into the full item list, not the filtered view.
    Selected(usize),
    Back,
    Exit,
}

/// Where control goes after a nested level returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Back,
    Exit,
}
