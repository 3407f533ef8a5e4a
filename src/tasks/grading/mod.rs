mod worker;

pub(crate) use worker::{claim_next_job, process_grading_job};
