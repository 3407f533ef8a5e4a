pub(crate) mod aggregation;
pub(crate) mod ai_grading;
pub(crate) mod api_keys;
pub(crate) mod concurrency;
pub(crate) mod definitive_source;
pub(crate) mod draft;
pub(crate) mod email;
pub(crate) mod exam_lifecycle;
pub(crate) mod finalize;
pub(crate) mod grade_reset;
pub(crate) mod grading_stats;
pub(crate) mod offsets;
