mod merged_view;
mod plan;

pub use merged_view::MergedView;
pub use plan::plan;
