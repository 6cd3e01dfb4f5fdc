use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

pub fn default_style() -> ProgressStyle {
    match ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        Ok(style) => style.progress_chars("##-"),
        Err(_) => ProgressStyle::default_bar(),
    }
}

/// A bar sized to the number of walk entries under `roots`, or a hidden one.
pub fn scan_bar(roots: &[PathBuf], visible: bool) -> Arc<ProgressBar> {
    if !visible {
        return Arc::new(ProgressBar::hidden());
    }
    let total = roots
        .iter()
        .map(|root| crate::scanner::count_entries(root))
        .sum();
    let progress_bar = ProgressBar::new(total);
    progress_bar.set_style(default_style());
    Arc::new(progress_bar)
}

/// A bar for writing phases; its length is set by the writer.
pub fn output_bar(visible: bool) -> ProgressBar {
    if visible {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    }
}
