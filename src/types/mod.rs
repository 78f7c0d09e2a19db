mod job_views;

pub use job_views::*;
