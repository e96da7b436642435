pub mod counter;
pub mod exclusion;
pub mod scheduler;
pub mod segmenter;
pub mod tracker;
