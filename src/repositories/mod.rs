pub(crate) mod answer_grades;
pub(crate) mod answers;
pub(crate) mod exams;
pub(crate) mod grades;
pub(crate) mod grading_jobs;
pub(crate) mod operations;
pub(crate) mod questions;
pub(crate) mod submissions;
pub(crate) mod users;
