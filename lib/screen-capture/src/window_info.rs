use crate::WindowId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,

    /// `WM_CLASS` as (instance, class)
    pub class: Option<(String, String)>,
}

impl WindowInfo {
    pub fn label(&self) -> String {
        match &self.class {
            Some((instance, class)) => format!("{instance}.{class} ({})", self.title),
            None => self.title.clone(),
        }
    }
}
